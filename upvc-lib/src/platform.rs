use std::path::Path;

use crate::layout::{MramSymbol, DMA_ALIGNMENT};
use crate::run_config::TargetType;
use crate::upvc_err::{Result, UpvcError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Fault,
    Unknown(u8),
}

fn check_dma(member: usize, len: usize, mram_addr: usize) -> Result<()> {
    if mram_addr % DMA_ALIGNMENT != 0 || len % DMA_ALIGNMENT != 0 {
        return Err(UpvcError::Transport(format!(
            "unaligned transfer of {} bytes at {:#x} for rank member {}",
            len, mram_addr, member
        )));
    }
    Ok(())
}

pub struct ScatterEntry<'a> {
    pub member: usize,
    pub data: &'a [u8],
    pub mram_addr: usize,
}

/// Host-to-units transfers of one rank, issued as a single DMA pass.
#[derive(Default)]
pub struct ScatterMatrix<'a> {
    entries: Vec<ScatterEntry<'a>>,
}

impl<'a> ScatterMatrix<'a> {
    pub fn new() -> ScatterMatrix<'a> {
        ScatterMatrix { entries: Vec::new() }
    }
    pub fn add(&mut self, member: usize, data: &'a [u8], mram_addr: usize) -> Result<()> {
        check_dma(member, data.len(), mram_addr)?;
        self.entries.push(ScatterEntry { member, data, mram_addr });
        Ok(())
    }
    pub fn entries(&self) -> &[ScatterEntry<'a>] {
        &self.entries
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct GatherEntry<'a> {
    pub member: usize,
    pub data: &'a mut [u8],
    pub mram_addr: usize,
}

/// Units-to-host transfers of one rank, issued as a single DMA pass.
#[derive(Default)]
pub struct GatherMatrix<'a> {
    entries: Vec<GatherEntry<'a>>,
}

impl<'a> GatherMatrix<'a> {
    pub fn new() -> GatherMatrix<'a> {
        GatherMatrix { entries: Vec::new() }
    }
    pub fn add(&mut self, member: usize, data: &'a mut [u8], mram_addr: usize) -> Result<()> {
        check_dma(member, data.len(), mram_addr)?;
        self.entries.push(GatherEntry { member, data, mram_addr });
        Ok(())
    }
    pub fn entries_mut(&mut self) -> &mut [GatherEntry<'a>] {
        &mut self.entries
    }
}

/// Driver for a set of ranks, either the functional simulator or hardware.
///
/// Ranks are identified by the handle `alloc_rank` returned and members by
/// their position inside the rank. Each rank owns one transfer channel;
/// implementations serialize transfers on it.
pub trait Platform: Send + Sync {
    fn target(&self) -> TargetType;
    fn nb_dpus_per_rank(&self) -> usize;
    fn mram_size(&self) -> usize;
    fn alloc_rank(&self) -> Result<usize>;
    fn load_program(&self, rank: usize, program: &Path) -> Result<()>;
    fn mram_symbol(&self, rank: usize, member: usize, name: &str) -> Result<MramSymbol>;
    fn copy_to_dpus(&self, rank: usize, matrix: &ScatterMatrix<'_>) -> Result<()>;
    fn copy_from_dpus(&self, rank: usize, matrix: &mut GatherMatrix<'_>) -> Result<()>;
    /// Starts every unit of the rank and returns without waiting.
    fn boot(&self, rank: usize) -> Result<()>;
    fn status(&self, rank: usize) -> Result<Vec<RunStatus>>;
    fn copy_from_individual(&self, rank: usize, member: usize, mram_addr: usize, buf: &mut [u8]) -> Result<()>;
}
