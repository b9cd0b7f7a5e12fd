//! reviewflow drives batch inference jobs over game reviews from submission to
//! a terminal outcome.
//!
//! The [`workflow`] module holds the state machine. Collaborators it calls out
//! to are declared in [`ports`] and implemented by [`batch`] (HTTP batch
//! service), [`staging`], [`store`] and [`notify`]. [`simulated`] provides
//! scripted in-memory collaborators for demos and tests.

pub mod batch;
pub mod config;
pub mod error;
pub mod notify;
pub mod ports;
pub mod runner;
pub mod simulated;
pub mod staging;
pub mod store;
pub mod workflow;

pub use error::{ErrorKind, StepError, WorkflowError};
pub use workflow::{
    Collaborators, JobContext, JobOutcome, JobStatus, RunReport, WorkflowEngine,
};
