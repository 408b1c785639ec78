use finsync_core::{EntityKind, Record, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Result<Self, QueueError> {
        match value {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            other => Err(QueueError::InvalidOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid operation type: {0}")]
    InvalidOperation(String),
}

/// A mutation recorded locally and not yet confirmed by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSyncItem {
    pub id: String,
    pub entity: EntityKind,
    #[serde(rename = "type")]
    pub op: OperationType,
    pub record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: i64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingSyncItem {
    pub fn create<T: Record>(record: &T) -> Result<Self, QueueError> {
        Self::with_payload(OperationType::Create, record)
    }

    pub fn update<T: Record>(record: &T) -> Result<Self, QueueError> {
        Self::with_payload(OperationType::Update, record)
    }

    pub fn delete(entity: EntityKind, record_id: impl Into<String>) -> Self {
        Self::new(entity, OperationType::Delete, record_id.into(), None)
    }

    fn with_payload<T: Record>(op: OperationType, record: &T) -> Result<Self, QueueError> {
        record.validate()?;
        let data = serde_json::to_value(record)?;
        Ok(Self::new(T::KIND, op, record.id().to_string(), Some(data)))
    }

    fn new(entity: EntityKind, op: OperationType, record_id: String, data: Option<Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity,
            op,
            record_id,
            data,
            timestamp: now_millis(),
            attempts: 0,
            failed: false,
            last_error: None,
        }
    }
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
