//! Content-addressed local object store for large-object transfer.
//!
//! Objects are files keyed by the SHA-256 of their content, laid out two
//! levels deep by the first four hex characters of the id:
//!
//! ```text
//! <root>/objects/2c/f2/2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
//! <root>/tmp/                       scratch space for in-flight writes
//! <root>/bad/                       quarantined corrupt objects
//! ```
//!
//! # Design Rules
//!
//! 1. An object is never visible at its canonical path until its size and
//!    digest have been verified.
//! 2. Temp files live on the same volume as the objects so the final
//!    rename is atomic.
//! 3. Concurrent reads are always safe. Concurrent writers of the same id
//!    are harmless: each renames verified, byte-identical content.
//! 4. A file with the wrong size is treated as absent and removed.

pub mod error;
pub mod fsck;
pub mod hasher;
pub mod store;
pub mod writer;

pub use error::{StoreError, StoreResult};
pub use fsck::FsckReport;
pub use hasher::{ContentHasher, HashingReader};
pub use store::{ContentStore, CopyCallback, LocalObject};
pub use writer::ObjectWriter;
