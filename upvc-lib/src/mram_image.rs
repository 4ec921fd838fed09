use crate::layout::{align_dma, MramInfo, MRAM_INFO_SIZE};
use crate::records::DpuResultCoord;
use crate::upvc_err::{Result, UpvcError};

/// Reference-index area of one unit: the `MramInfo` header followed by
/// every reference neighbour of the seeds assigned to that unit.
///
/// Built by the host from the genome index and loaded before the first pass.
#[derive(Clone, Debug)]
pub struct IndexImage {
    info: MramInfo,
    entries: Vec<u8>,
}

impl IndexImage {
    pub fn new(nbr_len: usize, delta: u32) -> IndexImage {
        IndexImage {
            info: MramInfo {
                total_nbr_size: 0,
                nb_nbr: 0,
                nbr_len: nbr_len as u32,
                delta,
            },
            entries: Vec::new(),
        }
    }
    /// Appends a reference neighbour and returns its index, the `offset`
    /// reads of this seed will carry.
    pub fn push(&mut self, coord: DpuResultCoord, nbr: &[u8]) -> Result<u32> {
        if nbr.len() != self.info.nbr_len as usize {
            return Err(UpvcError::Config(format!(
                "neighbour of {} bytes in an index of {} byte neighbours",
                nbr.len(),
                self.info.nbr_len
            )));
        }
        let idx = self.info.nb_nbr;
        self.entries.extend_from_slice(&coord.seed_nr.to_le_bytes());
        self.entries.extend_from_slice(&coord.seq_nr.to_le_bytes());
        self.entries.extend_from_slice(nbr);
        self.info.nb_nbr += 1;
        self.info.total_nbr_size = self.entries.len() as u32;
        Ok(idx)
    }
    pub fn info(&self) -> MramInfo {
        self.info
    }
    /// Header and entries, zero padded to the DMA alignment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(align_dma(MRAM_INFO_SIZE + self.entries.len()));
        out.extend_from_slice(&self.info.to_bytes());
        out.extend_from_slice(&self.entries);
        out.resize(align_dma(out.len()), 0);
        out
    }
}
