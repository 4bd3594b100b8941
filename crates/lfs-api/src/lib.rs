//! Client side of the batch negotiation protocol.
//!
//! A batch call tells the server which objects the client wants to move
//! and which transfer adapters it can drive. The server answers with the
//! adapter it picked and, per object, either an authorized action, an
//! error, or nothing (no transfer needed).
//!
//! ```text
//! POST <endpoint>/objects/batch
//! {"operation":"download","objects":[{"oid":"..","size":5}],"transfers":["basic"]}
//!
//! {"transfer":"basic","objects":[{"oid":"..","size":5,
//!   "actions":{"download":{"href":"..","header":{..},"expires_at":".."}}}]}
//! ```

pub mod client;
pub mod error;
pub mod negotiator;
pub mod types;

pub use client::{BatchClient, HttpConfig};
pub use error::{ApiError, ApiResult};
pub use negotiator::Negotiator;
pub use types::{
    Action, BatchRequest, BatchResponse, NegotiatedObject, ObjectError, ObjectSpec,
    BASIC_ADAPTER, MEDIA_TYPE,
};
