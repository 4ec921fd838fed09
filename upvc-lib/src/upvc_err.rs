use std::io;
use std::sync::PoisonError;

use crossbeam_channel::{RecvError, SendError};
use thiserror::Error;

/// Every failure in the request/result pipeline is fatal for the run.
#[derive(Error, Debug)]
pub enum UpvcError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(
        "will exceed MRAM limit if writing reads on DPU number {dpu}: {needed} bytes needed, {available} available"
    )]
    InputCapacity {
        dpu: usize,
        needed: usize,
        available: usize,
    },
    #[error("too many results in DPU: write index {write_index} with capacity {max_results}")]
    ResultCapacity {
        write_index: usize,
        max_results: usize,
    },
    #[error("DPU {dpu} reported an error")]
    DpuFault { dpu: usize },
    #[error("could not get DPU {dpu} status ({status})")]
    DpuStatusUnknown { dpu: usize, status: u8 },
    #[error("transfer failed: {0}")]
    Transport(String),
    #[error("checksum mismatch on DPU {dpu}: published {expected:#018x}, computed {computed:#018x}")]
    Checksum {
        dpu: usize,
        expected: u64,
        computed: u64,
    },
    #[error("stale or misaligned request header (magic {magic:#010x})")]
    BadRequestHeader { magic: u32 },
    #[error("run aborted after a fatal error on another rank")]
    Aborted,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("could not parse run configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, UpvcError>;

impl<T> From<PoisonError<T>> for UpvcError {
    fn from(error: PoisonError<T>) -> Self {
        UpvcError::Transport(format!("lock poisoned: {}", error))
    }
}

impl<T> From<SendError<T>> for UpvcError {
    fn from(error: SendError<T>) -> Self {
        UpvcError::Transport(error.to_string())
    }
}

impl From<RecvError> for UpvcError {
    fn from(error: RecvError) -> Self {
        UpvcError::Transport(error.to_string())
    }
}
