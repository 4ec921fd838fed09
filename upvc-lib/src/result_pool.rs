use std::sync::Mutex;

use log::error;

use crate::dout::Dout;
use crate::layout::{MramLayout, DPU_RESULT_SIZE, LOCAL_RESULTS_PAGE_SIZE, MAX_LOCAL_RESULTS_PER_READ};
use crate::mram::Mram;
use crate::records::{compute_checksum, DpuResultOut};
use crate::stats::TaskletStats;
use crate::upvc_err::{Result, UpvcError};

struct ResultPoolState {
    wridx: usize,
    cur_write: usize,
    checksum: u64,
    cache: [u8; LOCAL_RESULTS_PAGE_SIZE],
}

/// Append-only FIFO of results shared by every tasklet of a unit.
///
/// The write index never reaches `max_results - 1`; that slot is kept so
/// the end-of-results marker always fits. Crossing the bound is fatal for
/// the unit.
pub struct ResultPool {
    state: Mutex<ResultPoolState>,
    results_addr: usize,
    checksum_addr: usize,
    max_results: usize,
}

impl ResultPool {
    pub fn new(layout: &MramLayout) -> ResultPool {
        ResultPool {
            state: Mutex::new(ResultPoolState {
                wridx: 0,
                cur_write: layout.results_addr(),
                checksum: 0,
                cache: [0_u8; LOCAL_RESULTS_PAGE_SIZE],
            }),
            results_addr: layout.results_addr(),
            checksum_addr: layout.checksum_addr(),
            max_results: layout.max_results,
        }
    }

    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        state.wridx = 0;
        state.cur_write = self.results_addr;
        state.checksum = 0;
        Ok(())
    }

    fn overflow(&self, write_index: usize, from: &str) -> UpvcError {
        error!("too many results in DPU (from {}): write index {}", from, write_index);
        UpvcError::ResultCapacity {
            write_index,
            max_results: self.max_results,
        }
    }

    /// Appends the swapped pages of `results`, then its cached records.
    pub fn write(&self, mram: &Mram, results: &Dout, stats: &mut TaskletStats) -> Result<()> {
        let mut guard = self.state.lock()?;
        let state = &mut *guard;

        for pageno in 0..results.nb_page_out() {
            if state.wridx + MAX_LOCAL_RESULTS_PER_READ >= self.max_results - 1 {
                return Err(self.overflow(state.wridx, "swap"));
            }
            stats.incr_load(LOCAL_RESULTS_PAGE_SIZE);
            mram.read(results.swap_page_addr(pageno), &mut state.cache)?;
            state.checksum = state.checksum.wrapping_add(compute_checksum(&state.cache));

            stats.incr_store(LOCAL_RESULTS_PAGE_SIZE);
            stats.incr_store_result(LOCAL_RESULTS_PAGE_SIZE);
            mram.write(state.cur_write, &state.cache)?;

            state.wridx += MAX_LOCAL_RESULTS_PER_READ;
            state.cur_write += LOCAL_RESULTS_PAGE_SIZE;
        }

        for out in results.cached() {
            if state.wridx + 1 >= self.max_results - 1 {
                return Err(self.overflow(state.wridx, "local"));
            }
            let bytes = out.to_bytes();
            stats.incr_store(DPU_RESULT_SIZE);
            stats.incr_store_result(DPU_RESULT_SIZE);
            mram.write(state.cur_write, &bytes)?;
            state.checksum = state.checksum.wrapping_add(compute_checksum(&bytes));

            state.wridx += 1;
            state.cur_write += DPU_RESULT_SIZE;
        }
        Ok(())
    }

    /// Writes the end-of-results marker at the current cursor and publishes
    /// the checksum. Indexes are left untouched, so calling it again, or
    /// writing more results first, still leaves the marker right after the
    /// last real result.
    pub fn finish(&self, mram: &Mram, stats: &mut TaskletStats) -> Result<()> {
        let state = self.state.lock()?;
        mram.write(state.cur_write, &DpuResultOut::END_OF_RESULTS.to_bytes())?;
        stats.incr_store(DPU_RESULT_SIZE);
        stats.incr_store_result(DPU_RESULT_SIZE);
        mram.write_u64(self.checksum_addr, state.checksum)?;
        Ok(())
    }

    pub fn write_index(&self) -> Result<usize> {
        Ok(self.state.lock()?.wridx)
    }
    pub fn checksum(&self) -> Result<u64> {
        Ok(self.state.lock()?.checksum)
    }
}
