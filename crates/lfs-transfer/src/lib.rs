//! Transfer queue engine for content-addressed large objects.
//!
//! Objects added to a [`TransferQueue`] are grouped into batches, sent to
//! the server for negotiation, and the ones the server authorizes are
//! handed to the transfer adapter it selected. Failed attempts go back into
//! the next batch until their retry budget runs out.
//!
//! ```text
//! add ──► incoming ──► batch (≤ batch_size, largest first)
//!                         │
//!                         ▼
//!                    negotiate ──► error ──► retry or fail
//!                         │
//!             ┌───────────┼────────────┐
//!             ▼           ▼            ▼
//!        object error   no action   authorized
//!           fail          skip          │
//!                                       ▼
//!                                adapter workers ──► succeed
//!                                       │
//!                                       └──► retriable? ──► next batch
//! ```
//!
//! # Design Rules
//!
//! 1. Every accepted oid ends with exactly one outcome: succeeded, skipped
//!    or failed.
//! 2. Only retriable errors consume retry budget, and an object is
//!    attempted at most `max_attempts` times.
//! 3. A batch never holds more than `batch_size` objects, retries included.
//! 4. At most one adapter is active at a time; switching ends the old one
//!    first.

pub mod adapter;
pub mod basic;
pub mod batch;
pub mod config;
pub mod error;
pub mod manifest;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod transferable;

pub use adapter::{AdapterBase, ObjectTransfer, Transfer, TransferAdapter, TransferResult};
pub use basic::{BasicAdapter, BasicTransfer};
pub use batch::Batch;
pub use config::{RetryClassifier, RetryConfig, TransferConfig};
pub use error::{is_retriable_status, Result, TransferError};
pub use manifest::{AdapterFactory, AdapterManifest};
pub use progress::{meter_callback, NoopMeter, ProgressCallback, ProgressMeter};
pub use queue::{Outcome, QueueState, QueueStats, TransferQueue};
pub use retry::RetryCounter;
pub use transferable::{Downloadable, Transferable, Uploadable};
