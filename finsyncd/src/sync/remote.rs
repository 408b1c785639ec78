use std::future::Future;
use std::sync::Arc;

use finsync_core::{ApiError, ApiErrorClass, EntityKind, FinsyncClient};
use serde_json::Value;
use thiserror::Error;

use super::queue::{OperationType, PendingSyncItem};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{op} for {entity} {record_id} has no payload")]
    MissingPayload {
        op: &'static str,
        entity: &'static str,
        record_id: String,
    },
    #[error("rejected by remote: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// `None` when the failure carries no status to judge it by.
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            RemoteError::Api(err) => err.classification(),
            RemoteError::MissingPayload { .. } => Some(ApiErrorClass::Permanent),
            RemoteError::Rejected(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Api(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// The authoritative data service pending operations are replayed against.
///
/// Implementations must be idempotent per record id: replaying a create,
/// update or delete that already took effect must leave the same state.
pub trait RemoteDataService: Send + Sync {
    /// Applies one queued mutation, returning the authoritative row when the
    /// service sends one back.
    fn apply(
        &self,
        item: &PendingSyncItem,
    ) -> impl Future<Output = Result<Option<Value>, RemoteError>> + Send;

    fn fetch_all(
        &self,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send;
}

impl<R: RemoteDataService> RemoteDataService for Arc<R> {
    fn apply(
        &self,
        item: &PendingSyncItem,
    ) -> impl Future<Output = Result<Option<Value>, RemoteError>> + Send {
        (**self).apply(item)
    }

    fn fetch_all(
        &self,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send {
        (**self).fetch_all(kind)
    }
}

impl RemoteDataService for FinsyncClient {
    async fn apply(&self, item: &PendingSyncItem) -> Result<Option<Value>, RemoteError> {
        match item.op {
            OperationType::Create => Ok(self.upsert(item.entity, payload(item)?).await?),
            OperationType::Update => Ok(self
                .update(item.entity, &item.record_id, payload(item)?)
                .await?),
            OperationType::Delete => {
                self.delete(item.entity, &item.record_id).await?;
                Ok(None)
            }
        }
    }

    async fn fetch_all(&self, kind: EntityKind) -> Result<Vec<Value>, RemoteError> {
        Ok(self.list(kind).await?)
    }
}

fn payload(item: &PendingSyncItem) -> Result<&Value, RemoteError> {
    item.data.as_ref().ok_or_else(|| RemoteError::MissingPayload {
        op: item.op.as_str(),
        entity: item.entity.as_str(),
        record_id: item.record_id.clone(),
    })
}
