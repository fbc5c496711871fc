//! HTTP feed adapter.

use super::{split_payload, RecordSource};
use crate::error::FetchError;
use crate::parse::RawRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Polls a remote HTTP endpoint for records.
///
/// The request is a plain GET; when a watermark exists it is passed as a
/// `since` query parameter in RFC 3339 so the server can trim its reply.
/// Servers that ignore `since` just return more, which the idempotent
/// upsert absorbs. The body may be a JSON array or JSON-lines.
pub struct HttpSource {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpSource {
    /// The client is shared across sources; build it once with the
    /// configured fetch timeout.
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RecordSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawRecord>, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request.send().await.map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, &self.url));
        }

        let body = response.text().await.map_err(FetchError::from_reqwest)?;
        split_payload(&body)
    }
}
