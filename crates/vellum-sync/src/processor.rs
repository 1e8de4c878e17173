//! The authority's writer.
//!
//! Reads unprocessed permission records from a store, forwards each to an
//! [`Authority`], and writes the response back with [`StatusWriter`].
//! Store access runs on the blocking pool; the processor wakes on commit
//! notifications that touch permission types and on a poll interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use vellum_core::now_millis;
use vellum_perms::{PermissionKind, PermissionRecord, PermissionStore, StatusWriter};
use vellum_store::{Store, StoreExt};

use crate::authority::{Authority, AuthorityResponse};
use crate::error::{Result, SyncError};

/// Configuration for the processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum records forwarded per pass.
    pub batch_size: usize,
    /// Pass interval when no commits arrive.
    pub poll_interval: Duration,
    /// Timeout for one authority call.
    pub authority_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(5),
            authority_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of one processing pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// Records the authority answered.
    pub processed: usize,
    /// Answers with status code 0.
    pub succeeded: usize,
    /// Answers with a nonzero status code.
    pub rejected: usize,
    /// Records left unprocessed because the authority failed.
    pub failed: usize,
}

/// Forwards unprocessed records to an authority and applies its answers.
pub struct PermissionProcessor<S: ?Sized, A> {
    store: Arc<S>,
    authority: A,
    config: ProcessorConfig,
}

impl<S, A> PermissionProcessor<S, A>
where
    S: Store + ?Sized + 'static,
    A: Authority,
{
    pub fn new(store: Arc<S>, authority: A, config: ProcessorConfig) -> Self {
        Self {
            store,
            authority,
            config,
        }
    }

    /// Process the currently unprocessed records once.
    pub async fn run_once(&self) -> Result<ProcessReport> {
        let mut report = ProcessReport::default();

        let store = Arc::clone(&self.store);
        let pending = blocking(move || {
            store.read(|txn| PermissionStore::new(txn).unprocessed())
        })
        .await?;

        for record in pending.into_iter().take(self.config.batch_size) {
            let response = match self.forward(&record).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(kind = %record.kind(), id = record.id(), "authority failed: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            let succeeded = response.status_code == vellum_perms::status::SUCCESS;
            if let Err(e) = self
                .apply(record.kind(), record.id().to_string(), response)
                .await
            {
                warn!(kind = %record.kind(), id = record.id(), "status write failed: {}", e);
                report.failed += 1;
                continue;
            }

            if succeeded {
                report.succeeded += 1;
            } else {
                report.rejected += 1;
            }
            report.processed += 1;
        }

        if report.processed > 0 || report.failed > 0 {
            info!(
                processed = report.processed,
                succeeded = report.succeeded,
                rejected = report.rejected,
                failed = report.failed,
                "processed permission records"
            );
        }
        Ok(report)
    }

    /// Process records until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut commits = self.store.subscribe();
        self.run_once().await?;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("processor shutting down");
                    return Ok(());
                }
                received = commits.recv() => match received {
                    Ok(notification) => {
                        let relevant = PermissionKind::ALL
                            .iter()
                            .any(|kind| notification.touches(kind.object_type()));
                        if relevant {
                            self.run_once().await?;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "commit notifications lagged");
                        self.run_once().await?;
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.run_once().await?;
                }
            }
        }
    }

    async fn forward(&self, record: &PermissionRecord) -> Result<AuthorityResponse> {
        match tokio::time::timeout(self.config.authority_timeout, self.authority.process(record))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "authority did not answer for {}",
                record.id()
            ))),
        }
    }

    async fn apply(&self, kind: PermissionKind, id: String, response: AuthorityResponse) -> Result<()> {
        let store = Arc::clone(&self.store);
        blocking(move || {
            store.write(|txn| StatusWriter::apply(txn, kind, &id, &response, now_millis()))
        })
        .await?;
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, vellum_perms::PermsError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
        .map_err(SyncError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAuthority;
    use async_trait::async_trait;
    use vellum_core::{SyncIdentity, Value};
    use vellum_perms::{
        permission_schema, status, PermissionOffer, PermissionRequest, PermissionStatus,
    };
    use vellum_store::{MemoryStore, StoreError};

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store
            .write(|txn| {
                for object_type in permission_schema().iter() {
                    txn.put_object_type(object_type)?;
                }
                Ok::<_, StoreError>(())
            })
            .unwrap();
        Arc::new(store)
    }

    fn insert(store: &MemoryStore, record: PermissionRecord) -> String {
        let id = record.id().to_string();
        store
            .write(|txn| PermissionStore::new(txn).insert(&record))
            .unwrap();
        id
    }

    fn get(store: &MemoryStore, kind: PermissionKind, id: &str) -> PermissionRecord {
        store
            .read(|txn| PermissionStore::new(txn).get(kind, id))
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_offer_then_request_round_trip() {
        let store = store();
        let authority = MemoryAuthority::new();
        let processor =
            PermissionProcessor::new(Arc::clone(&store), authority.clone(), ProcessorConfig::default());

        let identity = SyncIdentity::anonymous().with_realm_url("realms://example.com/~/notes");
        let offer_id = insert(
            &store,
            PermissionOffer::new(&identity, None, true, true, false).into(),
        );

        let report = processor.run_once().await.unwrap();
        assert_eq!(report.succeeded, 1);

        let token = match get(&store, PermissionKind::Offer, &offer_id) {
            PermissionRecord::Offer(offer) => {
                assert_eq!(offer.meta.status(), PermissionStatus::Success);
                offer.token
            }
            other => panic!("unexpected record {:?}", other),
        };
        assert!(!token.is_empty());

        let request_id = insert(&store, PermissionRequest::new(token).into());
        processor.run_once().await.unwrap();

        let request = get(&store, PermissionKind::Request, &request_id);
        assert_eq!(request.status(), PermissionStatus::Success);
        assert_eq!(authority.grants().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_sets_error_status() {
        let store = store();
        let processor =
            PermissionProcessor::new(Arc::clone(&store), MemoryAuthority::new(), ProcessorConfig::default());

        let id = insert(&store, PermissionRequest::new("nope").into());
        let report = processor.run_once().await.unwrap();
        assert_eq!(report.rejected, 1);

        let request = get(&store, PermissionKind::Request, &id);
        assert_eq!(request.status(), PermissionStatus::Error);
        assert_eq!(request.meta().status_code, Some(status::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_expired_offer_rejects_request() {
        let store = store();
        let authority = MemoryAuthority::new();
        let mut offer = PermissionOffer::new(&SyncIdentity::anonymous(), Some(1), true, false, false);
        offer.token = "old".into();
        authority.seed_offer(offer).await;

        let processor =
            PermissionProcessor::new(Arc::clone(&store), authority, ProcessorConfig::default());
        let id = insert(&store, PermissionRequest::new("old").into());
        processor.run_once().await.unwrap();

        let request = get(&store, PermissionKind::Request, &id);
        assert_eq!(request.meta().status_code, Some(status::EXPIRED));
    }

    struct Unreachable;

    #[async_trait]
    impl Authority for Unreachable {
        async fn process(&self, _record: &PermissionRecord) -> Result<AuthorityResponse> {
            Err(SyncError::Authority("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_authority_failure_leaves_record_unprocessed() {
        let store = store();
        let processor =
            PermissionProcessor::new(Arc::clone(&store), Unreachable, ProcessorConfig::default());

        let id = insert(&store, PermissionRequest::new("abc").into());
        let report = processor.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed, 0);

        let request = get(&store, PermissionKind::Request, &id);
        assert_eq!(request.status(), PermissionStatus::NotProcessed);
    }

    /// Deletes the request it is asked about before answering.
    struct DeletesFirst {
        store: Arc<MemoryStore>,
        doomed: &'static str,
    }

    #[async_trait]
    impl Authority for DeletesFirst {
        async fn process(&self, record: &PermissionRecord) -> Result<AuthorityResponse> {
            if let PermissionRecord::Request(request) = record {
                if request.token.as_deref() == Some(self.doomed) {
                    self.store
                        .write(|txn| {
                            let object_type = PermissionKind::Request.object_type();
                            if let Some((key, _)) =
                                txn.find_by_primary_key(object_type, &Value::from(self.doomed))?
                            {
                                txn.delete(object_type, key)?;
                            }
                            Ok::<_, StoreError>(())
                        })
                        .unwrap();
                }
            }
            Ok(AuthorityResponse::error(status::NOT_FOUND, "no such offer"))
        }
    }

    #[tokio::test]
    async fn test_failed_status_write_does_not_stop_the_batch() {
        let store = store();
        let authority = DeletesFirst {
            store: Arc::clone(&store),
            doomed: "deleted-meanwhile",
        };
        let processor =
            PermissionProcessor::new(Arc::clone(&store), authority, ProcessorConfig::default());

        insert(&store, PermissionRequest::new("deleted-meanwhile").into());
        let survivor = insert(&store, PermissionRequest::new("still-here").into());

        let report = processor.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.rejected, 1);

        let request = get(&store, PermissionKind::Request, &survivor);
        assert_eq!(request.status(), PermissionStatus::Error);
    }

    #[tokio::test]
    async fn test_run_wakes_on_commit() {
        let store = store();
        let config = ProcessorConfig {
            poll_interval: Duration::from_secs(3600),
            ..ProcessorConfig::default()
        };
        let processor = Arc::new(PermissionProcessor::new(
            Arc::clone(&store),
            MemoryAuthority::new(),
            config,
        ));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                processor
                    .run(async move {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        // Let the processor subscribe before writing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = insert(&store, PermissionRequest::new("missing").into());

        let mut status = PermissionStatus::NotProcessed;
        for _ in 0..100 {
            status = get(&store, PermissionKind::Request, &id).status();
            if status.is_processed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, PermissionStatus::Error);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
