use std::sync::Mutex;

use log::debug;

use crate::layout::{MramInfo, MramLayout, REQUEST_INFO_SIZE, REQUEST_MAGIC};
use crate::mram::Mram;
use crate::records::RequestInfo;
use crate::stats::TaskletStats;
use crate::upvc_err::{Result, UpvcError};

#[derive(Debug, Default)]
struct RequestPoolState {
    nb_reads: u32,
    rdidx: u32,
    cur_read: usize,
    request_size: usize,
}

/// FIFO of read records shared by every tasklet of a unit.
///
/// Each record is handed to exactly one caller: the whole fetch-and-advance
/// sequence runs under the pool lock.
#[derive(Debug, Default)]
pub struct RequestPool {
    state: Mutex<RequestPoolState>,
}

impl RequestPool {
    pub fn new() -> RequestPool {
        RequestPool::default()
    }

    /// Resets the pool from the request header the host wrote for this pass.
    pub fn init(&self, mram: &Mram, layout: &MramLayout) -> Result<()> {
        let info = MramInfo::load(mram, layout)?;
        let mut header = [0_u8; REQUEST_INFO_SIZE];
        mram.read(layout.heap_addr() + info.request_info_offset(), &mut header)?;
        let request_info = RequestInfo::from_bytes(&header);
        if request_info.magic != REQUEST_MAGIC {
            return Err(UpvcError::BadRequestHeader {
                magic: request_info.magic,
            });
        }

        let mut state = self.state.lock()?;
        state.nb_reads = request_info.nb_reads;
        state.rdidx = 0;
        state.cur_read = layout.heap_addr() + info.request_offset();
        state.request_size = info.request_size();
        debug!(
            "request pool: {} reads of {} bytes at {:#x}",
            state.nb_reads, state.request_size, state.cur_read
        );
        Ok(())
    }

    /// Copies the next record into `request_buffer`, or returns `false` once
    /// every record of the pass has been handed out.
    pub fn next(&self, mram: &Mram, request_buffer: &mut [u8], stats: &mut TaskletStats) -> Result<bool> {
        let mut state = self.state.lock()?;
        if state.rdidx == state.nb_reads {
            return Ok(false);
        }
        let request_size = state.request_size;
        if request_buffer.len() < request_size {
            return Err(UpvcError::Transport(format!(
                "request buffer of {} bytes cannot hold a {} byte request",
                request_buffer.len(),
                request_size
            )));
        }

        stats.incr_load(request_size);
        stats.incr_load_data(request_size);
        mram.read(state.cur_read, &mut request_buffer[..request_size])?;

        state.rdidx += 1;
        state.cur_read += request_size;
        Ok(true)
    }

    pub fn request_size(&self) -> Result<usize> {
        Ok(self.state.lock()?.request_size)
    }
    pub fn read_index(&self) -> Result<u32> {
        Ok(self.state.lock()?.rdidx)
    }
    pub fn nb_reads(&self) -> Result<u32> {
        Ok(self.state.lock()?.nb_reads)
    }
}
