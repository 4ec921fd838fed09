use crate::layout::{MramLayout, DPU_RESULT_SIZE, LOCAL_RESULTS_PAGE_SIZE, MAX_LOCAL_RESULTS_PER_READ, SWAP_PAGES_PER_TASKLET};
use crate::mram::Mram;
use crate::records::DpuResultOut;
use crate::stats::TaskletStats;
use crate::upvc_err::{Result, UpvcError};

/// Results a tasklet produced for the read it is working on.
///
/// Up to `MAX_LOCAL_RESULTS_PER_READ` results stay cached locally. When the
/// cache fills up it is swapped to the tasklet's page area in MRAM, and the
/// result pool later copies those pages verbatim.
pub struct Dout {
    outs: Vec<DpuResultOut>,
    nb_page_out: usize,
    swap_base: usize,
    page: [u8; LOCAL_RESULTS_PAGE_SIZE],
}

impl Dout {
    pub fn new(layout: &MramLayout, tasklet_id: usize) -> Dout {
        Dout {
            outs: Vec::with_capacity(MAX_LOCAL_RESULTS_PER_READ),
            nb_page_out: 0,
            swap_base: layout.swap_addr(tasklet_id),
            page: [0_u8; LOCAL_RESULTS_PAGE_SIZE],
        }
    }
    pub fn clear(&mut self) {
        self.outs.clear();
        self.nb_page_out = 0;
    }
    pub fn add(&mut self, mram: &Mram, result: DpuResultOut, stats: &mut TaskletStats) -> Result<()> {
        if self.outs.len() == MAX_LOCAL_RESULTS_PER_READ {
            self.swap_page(mram, stats)?;
        }
        self.outs.push(result);
        stats.nb_results += 1;
        Ok(())
    }
    fn swap_page(&mut self, mram: &Mram, stats: &mut TaskletStats) -> Result<()> {
        if self.nb_page_out == SWAP_PAGES_PER_TASKLET {
            return Err(UpvcError::ResultCapacity {
                write_index: self.nb_results(),
                max_results: SWAP_PAGES_PER_TASKLET * MAX_LOCAL_RESULTS_PER_READ,
            });
        }
        for (slot, out) in self.page.chunks_exact_mut(DPU_RESULT_SIZE).zip(self.outs.iter()) {
            slot.copy_from_slice(&out.to_bytes());
        }
        stats.incr_store(LOCAL_RESULTS_PAGE_SIZE);
        mram.write(self.swap_page_addr(self.nb_page_out), &self.page)?;
        self.nb_page_out += 1;
        self.outs.clear();
        Ok(())
    }
    pub fn swap_page_addr(&self, pageno: usize) -> usize {
        self.swap_base + pageno * LOCAL_RESULTS_PAGE_SIZE
    }
    pub fn nb_page_out(&self) -> usize {
        self.nb_page_out
    }
    pub fn cached(&self) -> &[DpuResultOut] {
        &self.outs
    }
    pub fn nb_results(&self) -> usize {
        self.nb_page_out * MAX_LOCAL_RESULTS_PER_READ + self.outs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(num: u32) -> DpuResultOut {
        DpuResultOut {
            num,
            score: num * 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_then_swap() {
        let layout = MramLayout::new(2, 64, 64).unwrap();
        let mram = Mram::new(layout.mram_size());
        let mut stats = TaskletStats::default();
        let mut dout = Dout::new(&layout, 1);
        for num in 0..(MAX_LOCAL_RESULTS_PER_READ as u32 + 3) {
            dout.add(&mram, result(num), &mut stats).unwrap();
        }
        assert_eq!(dout.nb_page_out(), 1);
        assert_eq!(dout.cached().len(), 3);
        assert_eq!(dout.nb_results(), MAX_LOCAL_RESULTS_PER_READ + 3);
        assert_eq!(dout.swap_page_addr(0), layout.swap_addr(1));

        let mut slot = [0_u8; DPU_RESULT_SIZE];
        mram.read(dout.swap_page_addr(0) + 5 * DPU_RESULT_SIZE, &mut slot).unwrap();
        assert_eq!(DpuResultOut::from_bytes(&slot), result(5));
        assert_eq!(stats.mram_store, LOCAL_RESULTS_PAGE_SIZE as u64);

        dout.clear();
        assert_eq!(dout.nb_results(), 0);
    }

    #[test]
    fn test_swap_area_full() {
        let layout = MramLayout::new(1, 64, 64).unwrap();
        let mram = Mram::new(layout.mram_size());
        let mut stats = TaskletStats::default();
        let mut dout = Dout::new(&layout, 0);
        let fits = (SWAP_PAGES_PER_TASKLET + 1) * MAX_LOCAL_RESULTS_PER_READ;
        for num in 0..fits {
            dout.add(&mram, result(num as u32), &mut stats).unwrap();
        }
        assert!(matches!(
            dout.add(&mram, result(0), &mut stats),
            Err(UpvcError::ResultCapacity { .. })
        ));
    }
}
