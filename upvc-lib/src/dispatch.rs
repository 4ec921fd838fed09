use crate::layout::{align_dma, dpu_request_size, DPU_REQUEST_HEADER_SIZE};
use crate::records::DpuRequest;
use crate::upvc_err::{Result, UpvcError};

/// Reads bound for one unit, packed back to back as they will sit in MRAM.
#[derive(Clone, Debug, Default)]
pub struct DispatchRequest {
    nb_reads: u32,
    used: usize,
    reads_area: Vec<u8>,
}

impl DispatchRequest {
    pub fn nb_reads(&self) -> u32 {
        self.nb_reads
    }
    /// Packed records, zero padded to the DMA alignment.
    pub fn reads(&self) -> &[u8] {
        &self.reads_area
    }
    pub fn records(&self) -> &[u8] {
        &self.reads_area[..self.used]
    }
}

/// What genome indexing yields for a seed: the unit holding its
/// neighbourhood, where it starts and how many neighbours it has.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexSeed {
    pub num_dpu: usize,
    pub offset: u32,
    pub nb_nbr: u32,
}

/// Host-side staging of read records, one buffer per logical unit.
pub struct Dispatch {
    size_neighbour_in_bytes: usize,
    requests: Vec<DispatchRequest>,
}

impl Dispatch {
    pub fn new(nb_dpus: usize, size_neighbour_in_bytes: usize) -> Dispatch {
        Dispatch {
            size_neighbour_in_bytes,
            requests: vec![DispatchRequest::default(); nb_dpus],
        }
    }
    pub fn nb_dpus(&self) -> usize {
        self.requests.len()
    }
    pub fn size_neighbour_in_bytes(&self) -> usize {
        self.size_neighbour_in_bytes
    }
    pub fn request_size(&self) -> usize {
        dpu_request_size(self.size_neighbour_in_bytes)
    }
    pub fn request(&self, dpu: usize) -> Option<&DispatchRequest> {
        self.requests.get(dpu)
    }
    pub fn nb_reads(&self) -> usize {
        self.requests.iter().map(|r| r.nb_reads as usize).sum()
    }

    pub fn add(&mut self, dpu: usize, offset: u32, count: u32, num: u32, nbr: &[u8]) -> Result<()> {
        if nbr.len() != self.size_neighbour_in_bytes {
            return Err(UpvcError::Config(format!(
                "read {} has a {} byte neighbour, expected {}",
                num,
                nbr.len(),
                self.size_neighbour_in_bytes
            )));
        }
        let request_size = self.request_size();
        let nb_dpus = self.requests.len();
        let reads = self.requests.get_mut(dpu).ok_or_else(|| {
            UpvcError::Config(format!("read {} dispatched to DPU {} of {}", num, dpu, nb_dpus))
        })?;

        let start = reads.used;
        reads.used += request_size;
        reads.reads_area.resize(align_dma(reads.used), 0);
        let record = &mut reads.reads_area[start..reads.used];
        DpuRequest { offset, count, num }.write_to(record);
        record[DPU_REQUEST_HEADER_SIZE..].copy_from_slice(nbr);
        reads.nb_reads += 1;
        Ok(())
    }

    /// Empties every buffer so the dispatch can be refilled for the next pass.
    pub fn clear(&mut self) {
        for reads in self.requests.iter_mut() {
            reads.nb_reads = 0;
            reads.used = 0;
            reads.reads_area.clear();
        }
    }
}

pub fn add_seed_to_dpu_requests(dispatch: &mut Dispatch, num_read: u32, seed: &IndexSeed, nbr: &[u8]) -> Result<()> {
    dispatch.add(seed.num_dpu, seed.offset, seed.nb_nbr, num_read, nbr)
}
