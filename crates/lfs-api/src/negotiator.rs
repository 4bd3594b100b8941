use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::{BatchRequest, BatchResponse};

/// Performs batch negotiation with a remote.
///
/// One call carries a whole batch. Implementations must have no local side
/// effects, so a request can be repeated freely across retries. Results in
/// the response are correlated with the request by oid, not by position.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn negotiate(&self, request: &BatchRequest) -> ApiResult<BatchResponse>;
}
