use std::iter::Sum;
use std::ops::AddAssign;

pub const TASKLET_STATS_SIZE: usize = 80;

/// Counters one tasklet publishes at the end of a pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskletStats {
    pub nb_reqs: u64,
    pub nb_nodp_calls: u64,
    pub nb_odpd_calls: u64,
    pub nb_results: u64,
    pub mram_data_load: u64,
    pub mram_result_store: u64,
    pub mram_load: u64,
    pub mram_store: u64,
    pub nodp_time: u64,
    pub odpd_time: u64,
}

impl TaskletStats {
    pub fn incr_load(&mut self, bytes: usize) {
        self.mram_load += bytes as u64;
    }
    pub fn incr_load_data(&mut self, bytes: usize) {
        self.mram_data_load += bytes as u64;
    }
    pub fn incr_store(&mut self, bytes: usize) {
        self.mram_store += bytes as u64;
    }
    pub fn incr_store_result(&mut self, bytes: usize) {
        self.mram_result_store += bytes as u64;
    }

    fn fields(&self) -> [u64; 10] {
        [
            self.nb_reqs,
            self.nb_nodp_calls,
            self.nb_odpd_calls,
            self.nb_results,
            self.mram_data_load,
            self.mram_result_store,
            self.mram_load,
            self.mram_store,
            self.nodp_time,
            self.odpd_time,
        ]
    }
    pub fn to_bytes(&self) -> [u8; TASKLET_STATS_SIZE] {
        let mut out = [0_u8; TASKLET_STATS_SIZE];
        for (chunk, field) in out.chunks_exact_mut(8).zip(self.fields()) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }
    pub fn from_bytes(data: &[u8]) -> TaskletStats {
        let mut words = [0_u64; 10];
        for (word, chunk) in words.iter_mut().zip(data.chunks_exact(8)) {
            let mut buf = [0_u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        TaskletStats {
            nb_reqs: words[0],
            nb_nodp_calls: words[1],
            nb_odpd_calls: words[2],
            nb_results: words[3],
            mram_data_load: words[4],
            mram_result_store: words[5],
            mram_load: words[6],
            mram_store: words[7],
            nodp_time: words[8],
            odpd_time: words[9],
        }
    }
}

impl AddAssign for TaskletStats {
    fn add_assign(&mut self, other: TaskletStats) {
        self.nb_reqs += other.nb_reqs;
        self.nb_nodp_calls += other.nb_nodp_calls;
        self.nb_odpd_calls += other.nb_odpd_calls;
        self.nb_results += other.nb_results;
        self.mram_data_load += other.mram_data_load;
        self.mram_result_store += other.mram_result_store;
        self.mram_load += other.mram_load;
        self.mram_store += other.mram_store;
        self.nodp_time += other.nodp_time;
        self.odpd_time += other.odpd_time;
    }
}

impl Sum for TaskletStats {
    fn sum<I: Iterator<Item = TaskletStats>>(iter: I) -> TaskletStats {
        iter.fold(TaskletStats::default(), |mut acc, stats| {
            acc += stats;
            acc
        })
    }
}
