// Common building blocks shared by the executor and the response layer

pub mod buffer_pool;
pub mod duration;
pub mod json;
pub mod signal;
pub mod types;

pub use buffer_pool::BufferPool;
pub use duration::format_duration;
pub use signal::StopSignal;
