#![forbid(unsafe_code)]

mod audit;
mod jobs;

pub use audit::*;
pub use jobs::*;
