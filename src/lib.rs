//! Task orchestration for asynchronous FLUX image generation.
//!
//! Single requests go straight onto the [`task_queue`]; batch jobs go through the
//! [`batch`] queue first and are decomposed into single requests. One worker drives
//! each request through submission and polling ([`polling`]) and hands finished
//! results to [`persistence`]. Both workers report through a shared [`status`] slot.

pub mod batch;
pub mod config;
pub mod error;
pub mod flux;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod polling;
pub mod preset;
pub mod status;
pub mod task;
pub mod task_queue;

pub use orchestrator::Orchestrator;
