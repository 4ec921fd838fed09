mod bit2ops;
mod devices;
mod dispatch;
mod dout;
mod layout;
mod mram;
mod mram_image;
mod pipeline;
mod platform;
mod program;
mod rank_pipeline;
mod records;
mod request_pool;
mod result_collector;
mod result_pool;
mod run_config;
mod simulator;
mod stats;
mod upvc_err;

pub use crate::bit2ops::*;
pub use crate::devices::*;
pub use crate::dispatch::*;
pub use crate::dout::*;
pub use crate::layout::*;
pub use crate::mram::*;
pub use crate::mram_image::*;
pub use crate::pipeline::*;
pub use crate::platform::*;
pub use crate::program::*;
pub use crate::rank_pipeline::*;
pub use crate::records::*;
pub use crate::request_pool::*;
pub use crate::result_collector::*;
pub use crate::result_pool::*;
pub use crate::run_config::*;
pub use crate::simulator::*;
pub use crate::stats::*;
pub use crate::upvc_err::*;
