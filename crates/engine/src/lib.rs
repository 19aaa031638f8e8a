//! Bounded-concurrency generation and transfer engine.
//!
//! - [`pool`]: fixed-size worker pool over unit indices
//! - [`aggregate`]: fail-complete outcome collection
//! - [`generate`]: dataset generation into any storage backend
//! - [`controller`]: bucket operations and bulk migrations
//! - [`encoders`]: per-format artifact producers

pub mod aggregate;
pub mod controller;
pub mod encoders;
pub mod error;
pub mod generate;
pub mod pool;

pub use aggregate::{AggregateReport, aggregate};
pub use controller::TransferController;
pub use encoders::{Encoder, encoder_for};
pub use error::{EncodeError, GenerateError, JobPanic, TransferError};
pub use generate::Generator;
pub use pool::{Outcome, run_units};
