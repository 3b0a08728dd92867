//! Domain model for the RaidSync pipeline.
//!
//! Plain data types shared by the core components and their collaborators:
//! the work item that flows through the priority queue, its status machine,
//! and the closed error taxonomy produced by the fetch collaborator.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod errors;
pub mod types;

pub use errors::{ErrorKind, FetchError};
pub use types::{WorkItem, WorkStatus};
