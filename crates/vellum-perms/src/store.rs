//! Typed access to permission records inside a store transaction.

use std::ops::{Deref, DerefMut};

use tracing::debug;
use vellum_core::{ObjectKey, Value};
use vellum_store::{ReadTransaction, WriteTransaction};

use crate::error::{PermsError, Result};
use crate::model::{PermissionOffer, PermissionRequest};
use crate::record::{fields, PermissionKind, PermissionRecord};

/// Permission records viewed through a transaction.
///
/// Wraps `&dyn ReadTransaction` for reads or `&mut dyn WriteTransaction`
/// for inserts:
///
/// ```rust,no_run
/// use vellum_perms::{PermissionRequest, PermissionStore};
/// use vellum_store::{SqliteStore, StoreExt};
///
/// fn example(store: &SqliteStore) -> vellum_perms::Result<()> {
///     store.write(|txn| {
///         PermissionStore::new(txn).insert(&PermissionRequest::new("abc").into())
///     })?;
///     let pending = store.read(|txn| PermissionStore::new(txn).unprocessed())?;
///     assert_eq!(pending.len(), 1);
///     Ok(())
/// }
/// ```
pub struct PermissionStore<T> {
    txn: T,
}

impl<T> PermissionStore<T> {
    pub fn new(txn: T) -> Self {
        Self { txn }
    }
}

impl<T> PermissionStore<T>
where
    T: Deref,
    T::Target: ReadTransaction,
{
    /// Find a record by id.
    pub fn get(&self, kind: PermissionKind, id: &str) -> Result<Option<PermissionRecord>> {
        Ok(self.find(kind, id)?.map(|(_, record)| record))
    }

    pub(crate) fn find(
        &self,
        kind: PermissionKind,
        id: &str,
    ) -> Result<Option<(ObjectKey, PermissionRecord)>> {
        let found = self
            .txn
            .find_by_index(kind.object_type(), fields::ID, &Value::from(id))?;
        match found.into_iter().next() {
            Some((key, object)) => Ok(Some((key, PermissionRecord::from_object(kind, &object)?))),
            None => Ok(None),
        }
    }

    /// Offers carrying `token`. Tokens are not unique among offers.
    pub fn offers_by_token(&self, token: &str) -> Result<Vec<PermissionOffer>> {
        self.txn
            .find_by_index(
                PermissionKind::Offer.object_type(),
                fields::TOKEN,
                &Value::from(token),
            )?
            .iter()
            .map(|(_, object)| PermissionOffer::from_object(object))
            .collect()
    }

    /// The request holding `token`, if any.
    pub fn request_by_token(&self, token: &str) -> Result<Option<PermissionRequest>> {
        self.txn
            .find_by_primary_key(PermissionKind::Request.object_type(), &Value::from(token))?
            .map(|(_, object)| PermissionRequest::from_object(&object))
            .transpose()
    }

    /// Every record of a kind, in insertion order.
    pub fn list(&self, kind: PermissionKind) -> Result<Vec<PermissionRecord>> {
        self.txn
            .scan(kind.object_type())?
            .iter()
            .map(|(_, object)| PermissionRecord::from_object(kind, object))
            .collect()
    }

    /// Records the authority has not responded to, of every kind.
    ///
    /// Kinds whose object type is not part of the store are skipped.
    pub fn unprocessed(&self) -> Result<Vec<PermissionRecord>> {
        let mut pending = Vec::new();
        for kind in PermissionKind::ALL {
            if self.txn.object_type(kind.object_type())?.is_none() {
                continue;
            }
            pending.extend(
                self.list(kind)?
                    .into_iter()
                    .filter(|record| !record.status().is_processed()),
            );
        }
        Ok(pending)
    }
}

impl<T> PermissionStore<T>
where
    T: DerefMut,
    T::Target: WriteTransaction,
{
    /// Insert a newly created record.
    ///
    /// Records must arrive unprocessed; status fields belong to the
    /// authority. A request whose token is taken fails with
    /// `DuplicateKey`.
    pub fn insert(&mut self, record: &PermissionRecord) -> Result<ObjectKey> {
        let meta = record.meta();
        if meta.status_code.is_some() || meta.status_message.is_some() {
            return Err(PermsError::StatusAlreadySet(meta.id.clone()));
        }

        let key = self
            .txn
            .insert(record.kind().object_type(), record.to_object())?;
        debug!(kind = %record.kind(), id = %meta.id, "inserted permission record");
        Ok(key)
    }

    pub(crate) fn txn_mut(&mut self) -> &mut T::Target {
        &mut self.txn
    }
}
