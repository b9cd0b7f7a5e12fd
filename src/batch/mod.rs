pub mod client;
pub mod error;
pub mod types;

pub use client::BatchClient;
pub use error::BatchError;
pub use types::{CreateJobRequest, CreateJobResponse, JobDescription};
