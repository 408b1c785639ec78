use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::model::EntityKind;

const UPSERT_PREFERENCE: &str = "resolution=merge-duplicates,return=representation";
const RETURN_PREFERENCE: &str = "return=representation";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Client for the PostgREST-style data API behind the finance app.
#[derive(Clone)]
pub struct FinsyncClient {
    http: Client,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
}

impl FinsyncClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
            access_token: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ApiError> {
        self.http = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Session token issued by the external auth provider.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn ping(&self) -> Result<(), ApiError> {
        let url = self.endpoint("/rest/v1/")?;
        let response = self.authorized(self.http.get(url)).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::api_error(response).await)
    }

    /// Inserts or merges a row by primary key, so replays of the same create
    /// leave one row behind.
    pub async fn upsert(&self, kind: EntityKind, record: &Value) -> Result<Option<Value>, ApiError> {
        let mut url = self.table_url(kind)?;
        url.query_pairs_mut().append_pair("on_conflict", "id");
        let response = self
            .authorized(self.http.post(url))
            .header("Prefer", UPSERT_PREFERENCE)
            .json(record)
            .send()
            .await?;
        let rows = Self::handle_rows(response).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: &Value,
    ) -> Result<Option<Value>, ApiError> {
        let mut url = self.table_url(kind)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let response = self
            .authorized(self.http.patch(url))
            .header("Prefer", RETURN_PREFERENCE)
            .json(patch)
            .send()
            .await?;
        let rows = Self::handle_rows(response).await?;
        Ok(rows.into_iter().next())
    }

    /// Deleting an id that is already gone is not an error.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), ApiError> {
        let mut url = self.table_url(kind)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let response = self.authorized(self.http.delete(url)).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::api_error(response).await)
    }

    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, ApiError> {
        let mut url = self.table_url(kind)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "id.asc");
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_rows(response).await
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    fn table_url(&self, kind: EntityKind) -> Result<Url, ApiError> {
        self.endpoint(&format!("/rest/v1/{}", kind.table()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_rows(response: reqwest::Response) -> Result<Vec<Value>, ApiError> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            single => Ok(vec![single]),
        }
    }

    async fn api_error(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ApiError::Api { status, body }
    }
}

impl ApiError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ApiError::Api { status, .. } => Some(classify_api_status(*status)),
            ApiError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::UNPROCESSABLE_ENTITY),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn api_errors_report_retryability() {
        let err = ApiError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(err.is_retryable());
        let err = ApiError::Api {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }
}
