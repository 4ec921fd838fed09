use crate::bit2ops::roundup;
use crate::mram::Mram;
use crate::stats::TASKLET_STATS_SIZE;
use crate::upvc_err::{Result, UpvcError};

pub const MAX_DPU_RESULTS: usize = 1 << 16;
pub const DPU_RESULT_SIZE: usize = 16;
pub const MAX_LOCAL_RESULTS_PER_READ: usize = 16;
pub const LOCAL_RESULTS_PAGE_SIZE: usize = MAX_LOCAL_RESULTS_PER_READ * DPU_RESULT_SIZE;
pub const SWAP_PAGES_PER_TASKLET: usize = 16;
pub const NB_TASKLET_PER_DPU: usize = 16;
pub const MRAM_SIZE: usize = 64 << 20;
pub const DPU_INPUTS_SIZE: usize = 32 << 20;
pub const CLOCK_PER_SEC: f64 = 600_000_000.0;

pub const REQUEST_MAGIC: u32 = 0xcdef_abcd;
/// `offset`, `count` and `num`, each a little-endian u32.
pub const DPU_REQUEST_HEADER_SIZE: usize = 12;
pub const REQUEST_INFO_SIZE: usize = 8;
pub const MRAM_INFO_SIZE: usize = 16;
/// Every reference neighbour is stored behind its `(seed_nr, seq_nr)` coordinate.
pub const NEIGHBOUR_COORD_SIZE: usize = 8;
pub const DMA_ALIGNMENT: usize = 8;

pub const DPU_MRAM_HEAP_POINTER_NAME: &str = "__sys_used_mram_end";
pub const DPU_RESULT_VAR: &str = "dpu_results";
pub const DPU_RESULTS_CHECKSUM_VAR: &str = "dpu_results_checksum";
pub const DPU_COMPUTE_TIME_VAR: &str = "dpu_compute_time";
pub const DPU_TASKLET_STATS_VAR: &str = "dpu_tasklet_stats";

pub const fn dpu_request_size(size_neighbour_in_bytes: usize) -> usize {
    DPU_REQUEST_HEADER_SIZE + size_neighbour_in_bytes
}

pub fn align_dma(len: usize) -> usize {
    roundup(len, DMA_ALIGNMENT)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MramSymbol {
    pub addr: usize,
    pub size: usize,
}

/// Placement of every region in a unit's MRAM.
///
/// Order is fixed: inputs (reference index, request header, read records),
/// result buffer, checksum word, compute-time counter, per-tasklet stats and
/// finally the per-tasklet swap pages used by the result cache. Host and unit
/// must agree on it exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MramLayout {
    pub nb_tasklets: usize,
    pub max_results: usize,
    pub inputs_size: usize,
}

impl Default for MramLayout {
    fn default() -> Self {
        MramLayout {
            nb_tasklets: NB_TASKLET_PER_DPU,
            max_results: MAX_DPU_RESULTS,
            inputs_size: DPU_INPUTS_SIZE,
        }
    }
}

impl MramLayout {
    /// Fails unless the result buffer can hold the end marker behind at least one result slot.
    pub fn new(nb_tasklets: usize, max_results: usize, inputs_size: usize) -> Result<MramLayout> {
        if max_results < 2 {
            return Err(UpvcError::Config(format!(
                "result buffer of {} records cannot hold any result",
                max_results
            )));
        }
        Ok(MramLayout {
            nb_tasklets,
            max_results,
            inputs_size: align_dma(inputs_size),
        })
    }
    pub fn heap_addr(&self) -> usize {
        0
    }
    pub fn results_addr(&self) -> usize {
        self.heap_addr() + self.inputs_size
    }
    pub fn results_size(&self) -> usize {
        self.max_results * DPU_RESULT_SIZE
    }
    pub fn checksum_addr(&self) -> usize {
        self.results_addr() + self.results_size()
    }
    pub fn compute_time_addr(&self) -> usize {
        self.checksum_addr() + 8
    }
    pub fn tasklet_stats_addr(&self) -> usize {
        self.compute_time_addr() + 8
    }
    pub fn tasklet_stats_size(&self) -> usize {
        self.nb_tasklets * TASKLET_STATS_SIZE
    }
    pub fn swap_addr(&self, tasklet_id: usize) -> usize {
        self.tasklet_stats_addr()
            + self.tasklet_stats_size()
            + tasklet_id * SWAP_PAGES_PER_TASKLET * LOCAL_RESULTS_PAGE_SIZE
    }
    pub fn mram_size(&self) -> usize {
        self.swap_addr(self.nb_tasklets)
    }
    pub fn symbol(&self, name: &str) -> Option<MramSymbol> {
        let (addr, size) = match name {
            DPU_MRAM_HEAP_POINTER_NAME => (self.heap_addr(), self.inputs_size),
            DPU_RESULT_VAR => (self.results_addr(), self.results_size()),
            DPU_RESULTS_CHECKSUM_VAR => (self.checksum_addr(), 8),
            DPU_COMPUTE_TIME_VAR => (self.compute_time_addr(), 8),
            DPU_TASKLET_STATS_VAR => (self.tasklet_stats_addr(), self.tasklet_stats_size()),
            _ => return None,
        };
        Some(MramSymbol { addr, size })
    }
}

/// Header of the reference-index area at the start of the MRAM heap.
///
/// The request header and read records are placed right after the index,
/// so their addresses differ from one unit to the next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MramInfo {
    pub total_nbr_size: u32,
    pub nb_nbr: u32,
    pub nbr_len: u32,
    pub delta: u32,
}

impl MramInfo {
    pub fn to_bytes(&self) -> [u8; MRAM_INFO_SIZE] {
        let mut out = [0_u8; MRAM_INFO_SIZE];
        out[0..4].copy_from_slice(&self.total_nbr_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.nb_nbr.to_le_bytes());
        out[8..12].copy_from_slice(&self.nbr_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.delta.to_le_bytes());
        out
    }
    pub fn from_bytes(data: &[u8; MRAM_INFO_SIZE]) -> MramInfo {
        let word = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        MramInfo {
            total_nbr_size: word(0),
            nb_nbr: word(4),
            nbr_len: word(8),
            delta: word(12),
        }
    }
    pub fn load(mram: &Mram, layout: &MramLayout) -> Result<MramInfo> {
        let mut buf = [0_u8; MRAM_INFO_SIZE];
        mram.read(layout.heap_addr(), &mut buf)?;
        Ok(MramInfo::from_bytes(&buf))
    }
    pub fn entry_size(&self) -> usize {
        NEIGHBOUR_COORD_SIZE + self.nbr_len as usize
    }
    /// Offset of a reference neighbour entry, relative to the heap.
    pub fn neighbour_offset(&self, idx: usize) -> usize {
        MRAM_INFO_SIZE + idx * self.entry_size()
    }
    pub fn request_info_offset(&self) -> usize {
        align_dma(MRAM_INFO_SIZE + self.total_nbr_size as usize)
    }
    pub fn request_offset(&self) -> usize {
        self.request_info_offset() + REQUEST_INFO_SIZE
    }
    pub fn request_size(&self) -> usize {
        dpu_request_size(self.nbr_len as usize)
    }
}
