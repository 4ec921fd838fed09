use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use log::{debug, error};

use crate::bit2ops::bit2_mismatches;
use crate::dout::Dout;
use crate::layout::{MramInfo, MramLayout, CLOCK_PER_SEC, NEIGHBOUR_COORD_SIZE};
use crate::mram::Mram;
use crate::records::{DpuRequest, DpuResultCoord, DpuResultOut};
use crate::request_pool::RequestPool;
use crate::result_pool::ResultPool;
use crate::stats::{TaskletStats, TASKLET_STATS_SIZE};
use crate::upvc_err::{Result, UpvcError};

/// What one tasklet can see while it works on a read.
pub struct TaskletContext<'a> {
    pub tasklet_id: usize,
    pub mram: &'a Mram,
    pub layout: &'a MramLayout,
    pub mram_info: MramInfo,
    pub stats: TaskletStats,
}

/// The resident program: turns one read record into results.
pub trait DpuProgram: Send + Sync {
    fn process(&self, ctx: &mut TaskletContext<'_>, request: &DpuRequest, nbr: &[u8], dout: &mut Dout) -> Result<()>;
}

fn ticks_since(start: Instant) -> u64 {
    (start.elapsed().as_secs_f64() * CLOCK_PER_SEC) as u64
}

/// Compares a read's neighbour against every reference neighbour of its
/// seed and keeps those within `max_score` mismatching nucleotides.
///
/// This is the no-dynamic-programming fast path; gapped alignment belongs
/// to the variant-calling side.
#[derive(Clone, Copy, Debug)]
pub struct NeighbourMatcher {
    pub max_score: u32,
}

impl DpuProgram for NeighbourMatcher {
    fn process(&self, ctx: &mut TaskletContext<'_>, request: &DpuRequest, nbr: &[u8], dout: &mut Dout) -> Result<()> {
        let start = Instant::now();
        let entry_size = ctx.mram_info.entry_size();
        let mut entry = vec![0_u8; entry_size];
        for idx in 0..request.count as usize {
            let neighbour = request.offset as usize + idx;
            if neighbour >= ctx.mram_info.nb_nbr as usize {
                return Err(UpvcError::Transport(format!(
                    "read {} points at neighbour {} but the index holds {}",
                    request.num, neighbour, ctx.mram_info.nb_nbr
                )));
            }
            let addr = ctx.layout.heap_addr() + ctx.mram_info.neighbour_offset(neighbour);
            ctx.stats.incr_load(entry_size);
            ctx.mram.read(addr, &mut entry)?;

            let score = bit2_mismatches(&entry[NEIGHBOUR_COORD_SIZE..], nbr);
            if score <= self.max_score {
                let coord = DpuResultCoord {
                    seed_nr: u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]),
                    seq_nr: u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]),
                };
                let result = DpuResultOut {
                    num: request.num,
                    score,
                    coord,
                };
                dout.add(ctx.mram, result, &mut ctx.stats)?;
            }
        }
        ctx.stats.nb_nodp_calls += 1;
        ctx.stats.nodp_time += ticks_since(start);
        Ok(())
    }
}

struct UnitShared<'a> {
    mram: &'a Mram,
    layout: &'a MramLayout,
    mram_info: MramInfo,
    request_pool: RequestPool,
    result_pool: ResultPool,
    halted: AtomicBool,
    running: AtomicUsize,
    start: Instant,
}

fn tasklet_main(tasklet_id: usize, unit: &UnitShared<'_>, program: &dyn DpuProgram) -> Result<()> {
    let mut ctx = TaskletContext {
        tasklet_id,
        mram: unit.mram,
        layout: unit.layout,
        mram_info: unit.mram_info,
        stats: TaskletStats::default(),
    };
    let mut dout = Dout::new(unit.layout, tasklet_id);
    let mut request = vec![0_u8; unit.mram_info.request_size()];

    let outcome: Result<()> = (|| {
        while !unit.halted.load(Ordering::Acquire) {
            if !unit.request_pool.next(unit.mram, &mut request, &mut ctx.stats)? {
                break;
            }
            let (header, nbr) = DpuRequest::parse(&request);
            dout.clear();
            program.process(&mut ctx, &header, nbr, &mut dout)?;
            unit.result_pool.write(unit.mram, &dout, &mut ctx.stats)?;
            ctx.stats.nb_reqs += 1;
        }
        Ok(())
    })();
    if let Err(err) = outcome {
        unit.halted.store(true, Ordering::Release);
        unit.running.fetch_sub(1, Ordering::AcqRel);
        return Err(err);
    }

    // the last tasklet out closes the result buffer
    if unit.running.fetch_sub(1, Ordering::AcqRel) == 1 && !unit.halted.load(Ordering::Acquire) {
        unit.result_pool.finish(unit.mram, &mut ctx.stats)?;
        unit.mram
            .write_u64(unit.layout.compute_time_addr(), ticks_since(unit.start))?;
    }
    let stats_addr = unit.layout.tasklet_stats_addr() + tasklet_id * TASKLET_STATS_SIZE;
    unit.mram.write(stats_addr, &ctx.stats.to_bytes())
}

/// Runs one pass of `program` on a unit: every tasklet drains the request
/// pool into the result pool. Any tasklet error halts the whole unit.
pub fn run_dpu(mram: &Mram, layout: &MramLayout, program: &dyn DpuProgram) -> Result<()> {
    let unit = UnitShared {
        mram,
        layout,
        mram_info: MramInfo::load(mram, layout)?,
        request_pool: RequestPool::new(),
        result_pool: ResultPool::new(layout),
        halted: AtomicBool::new(false),
        running: AtomicUsize::new(layout.nb_tasklets),
        start: Instant::now(),
    };
    unit.request_pool.init(mram, layout)?;
    unit.result_pool.init()?;
    debug!("unit running {} reads on {} tasklets", unit.request_pool.nb_reads()?, layout.nb_tasklets);

    let outcomes: Vec<Result<()>> = thread::scope(|s| {
        let handles: Vec<_> = (0..layout.nb_tasklets)
            .map(|tasklet_id| {
                let unit = &unit;
                s.spawn(move || tasklet_main(tasklet_id, unit, program))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(UpvcError::Transport("tasklet panicked".to_string())))
            })
            .collect()
    });
    for outcome in outcomes {
        if let Err(err) = outcome {
            error!("unit halted: {}", err);
            return Err(err);
        }
    }
    Ok(())
}
