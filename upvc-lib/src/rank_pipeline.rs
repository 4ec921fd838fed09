use std::ops::AddAssign;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::devices::Devices;
use crate::dispatch::Dispatch;
use crate::mram_image::IndexImage;
use crate::pipeline::{HandoffSignal, RunAbort};
use crate::platform::Platform;
use crate::result_collector::{RankResults, ResultCollector};
use crate::upvc_err::Result;

/// Identifies a pass: which round, which pass inside it and which slice of
/// the global unit numbering the run currently stands for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PassId {
    pub round: u32,
    pub pass: u32,
    pub dpu_offset: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RankTimes {
    pub write_mram: Duration,
    pub write_reads: Duration,
    pub compute: Duration,
    pub read_result: Duration,
    pub map_read: Duration,
}

impl AddAssign for RankTimes {
    fn add_assign(&mut self, other: RankTimes) {
        self.write_mram += other.write_mram;
        self.write_reads += other.write_reads;
        self.compute += other.compute;
        self.read_result += other.read_result;
        self.map_read += other.map_read;
    }
}

#[derive(Debug, Default)]
struct TimesState {
    last: RankTimes,
    total: RankTimes,
}

/// Stage timings: the latest rank pass and the running totals.
#[derive(Debug, Default)]
pub struct TimesCtx {
    state: Mutex<TimesState>,
}

impl TimesCtx {
    pub fn new() -> TimesCtx {
        TimesCtx::default()
    }
    fn record(&self, times: RankTimes) -> Result<()> {
        let mut state = self.state.lock()?;
        state.last = times;
        state.total += times;
        Ok(())
    }
    pub fn last(&self) -> Result<RankTimes> {
        Ok(self.state.lock()?.last)
    }
    pub fn total(&self) -> Result<RankTimes> {
        Ok(self.state.lock()?.total)
    }
}

/// Shared pieces every rank pipeline of a round works with.
pub struct RankContext<'a, P: Platform> {
    pub devices: &'a Devices<P>,
    pub collector: &'a ResultCollector,
    pub dispatch: &'a Mutex<Dispatch>,
    pub dispatch_free: &'a HandoffSignal,
    pub acc_wait: &'a HandoffSignal,
    pub abort: &'a RunAbort,
    pub times: &'a TimesCtx,
}

/// Loads the reference index of a rank ahead of a round.
pub fn load_mram_dpu<P: Platform>(
    devices: &Devices<P>,
    rank_id: usize,
    dpu_offset: usize,
    images: &[IndexImage],
    times: &TimesCtx,
) -> Result<()> {
    let start = Instant::now();
    if devices.rank_runs(rank_id, dpu_offset) {
        devices.load_index(rank_id, dpu_offset, images)?;
    }
    times.record(RankTimes {
        write_mram: start.elapsed(),
        ..RankTimes::default()
    })
}

/// One pass of one rank: write inputs, boot, poll until idle, read results.
///
/// The dispatch-free signal is raised right after the inputs are written so
/// the next pass can be staged while this rank computes. Reading results
/// waits on the accumulator, except in debug mode. Returns `None` when the
/// rank sits the pass out.
pub fn run_on_dpu<P: Platform>(ctx: &RankContext<'_, P>, pass: PassId, rank_id: usize) -> Result<Option<RankResults>> {
    let devices = ctx.devices;
    let t1 = Instant::now();
    if !devices.rank_runs(rank_id, pass.dpu_offset) {
        ctx.dispatch_free.post()?;
        ctx.times.record(RankTimes {
            map_read: t1.elapsed(),
            ..RankTimes::default()
        })?;
        return Ok(None);
    }

    {
        let dispatch = ctx.dispatch.lock()?;
        devices.write_dispatch(rank_id, pass.dpu_offset, &dispatch)?;
    }
    ctx.dispatch_free.post()?;
    let t2 = Instant::now();

    devices.boot(rank_id)?;
    while !devices.poll(rank_id, pass.dpu_offset)? {
        thread::yield_now();
    }
    let t3 = Instant::now();
    debug!("rank {} pass {} done computing in {:?}", rank_id, pass.pass, t3 - t2);

    if devices.config().debug_dpu.is_none() {
        ctx.acc_wait.wait(ctx.abort)?;
    }
    let results = ctx.collector.collect(devices, pass, rank_id)?;
    let t4 = Instant::now();

    ctx.times.record(RankTimes {
        write_mram: Duration::ZERO,
        write_reads: t2 - t1,
        compute: t3 - t2,
        read_result: t4 - t3,
        map_read: t4 - t1,
    })?;
    Ok(Some(results))
}
