use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;

use super::InteractionLogEntry;

/// Rows returned by [`RestSink::user_history`] when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server responded with {status}: {body}")]
    Status { status: u16, body: String },
}

/// Durable destination for a batch of log entries.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait LogSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn insert(&self, batch: &[InteractionLogEntry]) -> Result<(), SinkError>;
}

async fn check(response: reqwest::Response) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Inserts rows into the `interactions_log` table through a PostgREST endpoint.
pub struct RestSink {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl RestSink {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/rest/v1/interactions_log", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    /// Every entry of one session, oldest first. Empty when the query fails.
    pub async fn session_logs(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Vec<InteractionLogEntry> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("session_id", format!("eq.{}", session_id)),
            ("order", "timestamp.asc".to_string()),
        ];
        if let Some(user_id) = user_id {
            query.push(("user_id", format!("eq.{}", user_id)));
        }
        self.select(&query).await.unwrap_or_else(|e| {
            tracing::error!("failed to read logs of session {}: {}", session_id, e);
            Vec::new()
        })
    }

    /// The latest `limit` entries of one user, newest first. Empty when the query fails.
    pub async fn user_history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Vec<InteractionLogEntry> {
        let query = [
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("order", "timestamp.desc".to_string()),
            ("limit", limit.unwrap_or(DEFAULT_HISTORY_LIMIT).to_string()),
        ];
        self.select(&query).await.unwrap_or_else(|e| {
            tracing::error!("failed to read interaction history of {}: {}", user_id, e);
            Vec::new()
        })
    }

    async fn select(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<InteractionLogEntry>, SinkError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl LogSink for RestSink {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn insert(&self, batch: &[InteractionLogEntry]) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .json(batch)
            .send()
            .await?;
        check(response).await
    }
}

/// Posts `{"logs": [...]}` to a plain HTTP endpoint.
pub struct HttpFallbackSink {
    client: Client,
    url: String,
}

impl HttpFallbackSink {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[derive(serde::Serialize)]
struct FallbackBody<'a> {
    logs: &'a [InteractionLogEntry],
}

#[async_trait]
impl LogSink for HttpFallbackSink {
    fn name(&self) -> &'static str {
        "http-fallback"
    }

    async fn insert(&self, batch: &[InteractionLogEntry]) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&FallbackBody { logs: batch })
            .send()
            .await?;
        check(response).await
    }
}

/// Accepts and discards everything; used when no destination is configured.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl LogSink for NullSink {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn insert(&self, batch: &[InteractionLogEntry]) -> Result<(), SinkError> {
        tracing::debug!("discarding {} interaction logs", batch.len());
        Ok(())
    }
}
