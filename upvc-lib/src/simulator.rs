use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use log::{debug, error};

use crate::layout::{MramLayout, MramSymbol};
use crate::mram::Mram;
use crate::platform::{GatherMatrix, Platform, RunStatus, ScatterMatrix};
use crate::program::{run_dpu, DpuProgram};
use crate::run_config::TargetType;
use crate::upvc_err::{Result, UpvcError};

const STATUS_IDLE: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_FAULT: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimulatorProfile {
    pub nb_dpus_per_rank: usize,
    pub layout: MramLayout,
}

impl Default for SimulatorProfile {
    fn default() -> Self {
        SimulatorProfile {
            nb_dpus_per_rank: TargetType::Simulator.dpus_per_rank(),
            layout: MramLayout::default(),
        }
    }
}

struct SimUnit {
    mram: Mram,
    status: AtomicU8,
}

struct SimRank {
    units: Vec<Arc<SimUnit>>,
    program: Mutex<Option<PathBuf>>,
    channel: Mutex<()>,
}

impl SimRank {
    fn unit(&self, member: usize) -> Result<&Arc<SimUnit>> {
        self.units
            .get(member)
            .ok_or_else(|| UpvcError::Transport(format!("rank has no member {}", member)))
    }
}

/// In-process stand-in for a set of ranks.
///
/// Every unit owns a private MRAM; booting a rank runs `program` on all its
/// units concurrently, each with `layout.nb_tasklets` tasklet threads.
pub struct FunctionalSimulator {
    profile: SimulatorProfile,
    program: Arc<dyn DpuProgram>,
    ranks: RwLock<Vec<Arc<SimRank>>>,
}

impl FunctionalSimulator {
    pub fn new(profile: SimulatorProfile, program: Arc<dyn DpuProgram>) -> FunctionalSimulator {
        FunctionalSimulator {
            profile,
            program,
            ranks: RwLock::new(Vec::new()),
        }
    }
    pub fn layout(&self) -> &MramLayout {
        &self.profile.layout
    }
    pub fn nb_ranks(&self) -> Result<usize> {
        Ok(self.ranks.read()?.len())
    }
    fn rank(&self, rank: usize) -> Result<Arc<SimRank>> {
        self.ranks
            .read()?
            .get(rank)
            .cloned()
            .ok_or_else(|| UpvcError::Transport(format!("rank {} is not allocated", rank)))
    }
}

impl Platform for FunctionalSimulator {
    fn target(&self) -> TargetType {
        TargetType::Simulator
    }
    fn nb_dpus_per_rank(&self) -> usize {
        self.profile.nb_dpus_per_rank
    }
    fn mram_size(&self) -> usize {
        self.profile.layout.mram_size()
    }
    fn alloc_rank(&self) -> Result<usize> {
        let units = (0..self.profile.nb_dpus_per_rank)
            .map(|_| {
                Arc::new(SimUnit {
                    mram: Mram::new(self.mram_size()),
                    status: AtomicU8::new(STATUS_IDLE),
                })
            })
            .collect();
        let mut ranks = self.ranks.write()?;
        ranks.push(Arc::new(SimRank {
            units,
            program: Mutex::new(None),
            channel: Mutex::new(()),
        }));
        Ok(ranks.len() - 1)
    }
    fn load_program(&self, rank: usize, program: &Path) -> Result<()> {
        fs::metadata(program)
            .map_err(|e| UpvcError::Config(format!("cannot load DPU program {}: {}", program.display(), e)))?;
        *self.rank(rank)?.program.lock()? = Some(program.to_path_buf());
        Ok(())
    }
    fn mram_symbol(&self, rank: usize, member: usize, name: &str) -> Result<MramSymbol> {
        self.rank(rank)?.unit(member)?;
        self.profile
            .layout
            .symbol(name)
            .ok_or_else(|| UpvcError::Transport(format!("no MRAM symbol named {}", name)))
    }
    fn copy_to_dpus(&self, rank: usize, matrix: &ScatterMatrix<'_>) -> Result<()> {
        let rank = self.rank(rank)?;
        let _channel = rank.channel.lock()?;
        for entry in matrix.entries() {
            rank.unit(entry.member)?.mram.write(entry.mram_addr, entry.data)?;
        }
        Ok(())
    }
    fn copy_from_dpus(&self, rank: usize, matrix: &mut GatherMatrix<'_>) -> Result<()> {
        let rank = self.rank(rank)?;
        let _channel = rank.channel.lock()?;
        for entry in matrix.entries_mut() {
            rank.unit(entry.member)?.mram.read(entry.mram_addr, entry.data)?;
        }
        Ok(())
    }
    fn boot(&self, rank_id: usize) -> Result<()> {
        let rank = self.rank(rank_id)?;
        if rank.program.lock()?.is_none() {
            return Err(UpvcError::Transport(format!("no program loaded on rank {}", rank_id)));
        }
        for (member, unit) in rank.units.iter().enumerate() {
            if unit.status.swap(STATUS_RUNNING, Ordering::AcqRel) == STATUS_RUNNING {
                return Err(UpvcError::Transport(format!(
                    "rank {} member {} booted while running",
                    rank_id, member
                )));
            }
            let unit = unit.clone();
            let program = self.program.clone();
            let layout = self.profile.layout;
            thread::Builder::new()
                .name(format!("dpu-{}-{}", rank_id, member))
                .spawn(move || {
                    let status = match run_dpu(&unit.mram, &layout, program.as_ref()) {
                        Ok(()) => STATUS_IDLE,
                        Err(err) => {
                            error!("rank {} member {} faulted: {}", rank_id, member, err);
                            STATUS_FAULT
                        }
                    };
                    unit.status.store(status, Ordering::Release);
                })?;
        }
        debug!("booted rank {}", rank_id);
        Ok(())
    }
    fn status(&self, rank: usize) -> Result<Vec<RunStatus>> {
        Ok(self
            .rank(rank)?
            .units
            .iter()
            .map(|unit| match unit.status.load(Ordering::Acquire) {
                STATUS_IDLE => RunStatus::Idle,
                STATUS_RUNNING => RunStatus::Running,
                STATUS_FAULT => RunStatus::Fault,
                other => RunStatus::Unknown(other),
            })
            .collect())
    }
    fn copy_from_individual(&self, rank: usize, member: usize, mram_addr: usize, buf: &mut [u8]) -> Result<()> {
        let rank = self.rank(rank)?;
        let _channel = rank.channel.lock()?;
        rank.unit(member)?.mram.read(mram_addr, buf)
    }
}
