//! The remote authority seam.
//!
//! The authority is the external service that decides on permission
//! records. Implementations may talk to a server over any transport; the
//! processor only needs an answer per record.

use async_trait::async_trait;
use vellum_perms::PermissionRecord;

pub use vellum_perms::AuthorityResponse;

use crate::error::Result;

/// Decides on permission records.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Authority: Send + Sync {
    /// Decide on one record.
    ///
    /// A rejection is a response with a nonzero status code, not an error.
    /// Errors mean no decision was made and the record stays unprocessed.
    async fn process(&self, record: &PermissionRecord) -> Result<AuthorityResponse>;
}

#[async_trait]
impl<A: Authority + ?Sized> Authority for std::sync::Arc<A> {
    async fn process(&self, record: &PermissionRecord) -> Result<AuthorityResponse> {
        (**self).process(record).await
    }
}
