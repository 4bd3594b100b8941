//! Foundation types for large-object transfer.
//!
//! Every other crate in the workspace depends on `lfs-types`.
//!
//! # Key Types
//!
//! - [`Oid`]: SHA-256 content identifier, hex-encoded on the wire
//! - [`Direction`]: upload or download

pub mod direction;
pub mod error;
pub mod oid;

pub use direction::Direction;
pub use error::TypeError;
pub use oid::{Oid, OID_LEN};
