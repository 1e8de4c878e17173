//! An in-process authority for testing.
//!
//! Implements the redemption rules: offers get a fresh token, a request
//! must name the token of an unexpired offer, and changes are recorded as
//! grants. Offers are not consumed by redemption.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;
use vellum_core::now_millis;
use vellum_perms::{status, PermissionOffer, PermissionRecord, WILDCARD};

use crate::authority::{Authority, AuthorityResponse};
use crate::error::Result;

/// Access granted by a processed change or redeemed offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub realm_url: String,
    pub user_id: String,
    pub may_read: Option<bool>,
    pub may_write: Option<bool>,
    pub may_manage: Option<bool>,
}

#[derive(Default)]
struct AuthorityState {
    offers: HashMap<String, PermissionOffer>,
    grants: Vec<Grant>,
}

/// In-memory authority. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryAuthority {
    state: Arc<Mutex<AuthorityState>>,
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an offer issued elsewhere, keyed by its token.
    pub async fn seed_offer(&self, offer: PermissionOffer) {
        let mut state = self.state.lock().await;
        state.offers.insert(offer.token.clone(), offer);
    }

    /// Grants recorded so far, in processing order.
    pub async fn grants(&self) -> Vec<Grant> {
        self.state.lock().await.grants.clone()
    }

    async fn redeem(&self, token: Option<&str>, now: i64) -> AuthorityResponse {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return AuthorityResponse::error(status::INVALID, "request has no token");
        };

        let mut state = self.state.lock().await;
        let Some(offer) = state.offers.get(token) else {
            return AuthorityResponse::error(status::NOT_FOUND, "no offer matches token");
        };
        if offer.is_expired(now) {
            return AuthorityResponse::error(status::EXPIRED, "offer has expired");
        }

        let grant = Grant {
            realm_url: offer.realm_url.clone(),
            user_id: WILDCARD.to_string(),
            may_read: Some(offer.may_read),
            may_write: Some(offer.may_write),
            may_manage: Some(offer.may_manage),
        };
        state.grants.push(grant);
        AuthorityResponse::success()
    }
}

#[async_trait]
impl Authority for MemoryAuthority {
    async fn process(&self, record: &PermissionRecord) -> Result<AuthorityResponse> {
        let now = now_millis();
        let response = match record {
            PermissionRecord::Change(change) => {
                if change.realm_url.is_empty() {
                    AuthorityResponse::error(status::INVALID, "change has no realm")
                } else {
                    self.state.lock().await.grants.push(Grant {
                        realm_url: change.realm_url.clone(),
                        user_id: change.user_id.clone(),
                        may_read: change.may_read,
                        may_write: change.may_write,
                        may_manage: change.may_manage,
                    });
                    AuthorityResponse::success()
                }
            }
            PermissionRecord::Offer(offer) => {
                if offer.is_expired(now) {
                    AuthorityResponse::error(status::EXPIRED, "offer expires in the past")
                } else {
                    let token = Uuid::new_v4().simple().to_string();
                    let mut issued = offer.clone();
                    issued.token = token.clone();
                    self.state.lock().await.offers.insert(token.clone(), issued);
                    AuthorityResponse::success().with_token(token)
                }
            }
            PermissionRecord::Request(request) => self.redeem(request.token.as_deref(), now).await,
        };

        debug!(
            kind = %record.kind(),
            id = record.id(),
            status_code = response.status_code,
            "authority decided"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::SyncIdentity;
    use vellum_perms::{PermissionChange, PermissionRequest};

    fn identity() -> SyncIdentity {
        SyncIdentity::anonymous().with_realm_url("realms://example.com/~/notes")
    }

    #[tokio::test]
    async fn test_offer_gets_token_and_can_be_redeemed_twice() {
        let authority = MemoryAuthority::new();
        let offer = PermissionOffer::new(&identity(), None, true, false, false);

        let response = authority.process(&offer.into()).await.unwrap();
        assert_eq!(response.status_code, status::SUCCESS);
        let token = response.token.unwrap();

        for _ in 0..2 {
            let request = PermissionRequest::new(token.clone());
            let response = authority.process(&request.into()).await.unwrap();
            assert_eq!(response.status_code, status::SUCCESS);
        }
        assert_eq!(authority.grants().await.len(), 2);
    }

    #[tokio::test]
    async fn test_request_without_token_invalid() {
        let authority = MemoryAuthority::new();
        let mut request = PermissionRequest::new("x");
        request.token = None;

        let response = authority.process(&request.into()).await.unwrap();
        assert_eq!(response.status_code, status::INVALID);
    }

    #[tokio::test]
    async fn test_expired_offer_not_issued() {
        let authority = MemoryAuthority::new();
        let offer = PermissionOffer::new(&identity(), Some(1), true, false, false);

        let response = authority.process(&offer.into()).await.unwrap();
        assert_eq!(response.status_code, status::EXPIRED);
        assert!(response.token.is_none());
    }

    #[tokio::test]
    async fn test_change_recorded_as_grant() {
        let authority = MemoryAuthority::new();
        let change = PermissionChange::new(&identity(), Some("bob"), None, Some(true), None);

        authority.process(&change.into()).await.unwrap();
        let grants = authority.grants().await;
        assert_eq!(grants[0].user_id, "bob");
        assert_eq!(grants[0].may_write, Some(true));
    }
}
