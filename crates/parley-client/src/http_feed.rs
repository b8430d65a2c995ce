//! Remote feed over HTTP.
//!
//! ```text
//! GET  {base}/api/messages/{conversationId}  -> [{ "encrypted": "...", "timestamp": 1700000000000 }]
//! POST {base}/api/messages                   <- { "chatId": "...", "encrypted": "..." }
//! ```
//!
//! Any non-2xx answer is a `FeedError::Status`. The server only ever sees
//! ciphertext.

use async_trait::async_trait;
use parley_core::{ConversationId, FeedError, RemoteEntry, RemoteFeed};
use parley_crypto::CiphertextBlob;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

/// Default feed server URL
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Body of a submit request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    chat_id: &'a str,
    encrypted: &'a str,
}

/// HTTP client for the message feed.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: Client,
    base_url: String,
}

impl HttpFeed {
    /// Feed at `base_url` with a default client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Feed at `base_url` using a preconfigured client (timeouts, proxies).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn messages_url(&self, id: &ConversationId) -> String {
        format!("{}/api/messages/{}", self.base_url, id)
    }

    fn submit_url(&self) -> String {
        format!("{}/api/messages", self.base_url)
    }
}

impl Default for HttpFeed {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

#[async_trait]
impl RemoteFeed for HttpFeed {
    #[instrument(skip(self), fields(conversation_id = %id))]
    async fn fetch(&self, id: &ConversationId) -> Result<Vec<RemoteEntry>, FeedError> {
        let res = self
            .client
            .get(self.messages_url(id))
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        if !res.status().is_success() {
            return Err(FeedError::Status { status: res.status().as_u16() });
        }

        let entries: Vec<RemoteEntry> =
            res.json().await.map_err(|e| FeedError::Decode(e.to_string()))?;

        debug!(count = entries.len(), "fetched remote messages");
        Ok(entries)
    }

    #[instrument(skip(self, blob), fields(conversation_id = %id))]
    async fn submit(&self, id: &ConversationId, blob: &CiphertextBlob) -> Result<(), FeedError> {
        let body = SubmitBody { chat_id: id.as_str(), encrypted: blob.as_str() };

        let res = self
            .client
            .post(self.submit_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| FeedError::Network(e.to_string()))?;

        if !res.status().is_success() {
            return Err(FeedError::Status { status: res.status().as_u16() });
        }

        debug!("submitted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_body_wire_format() {
        let body = SubmitBody { chat_id: "1700000000000", encrypted: "QUJDRA==" };

        insta::assert_snapshot!(
            serde_json::to_string(&body).unwrap(),
            @r#"{"chatId":"1700000000000","encrypted":"QUJDRA=="}"#
        );
    }

    #[test]
    fn fetch_response_wire_format() {
        let json = r#"[
            {"encrypted": "QUJDRA==", "timestamp": 1700000000123},
            {"encrypted": "RUZHSA=="}
        ]"#;

        let entries: Vec<RemoteEntry> = serde_json::from_str(json).unwrap();

        assert_eq!(entries, vec![
            RemoteEntry {
                encrypted: CiphertextBlob::new("QUJDRA=="),
                timestamp: Some(1_700_000_000_123),
            },
            RemoteEntry { encrypted: CiphertextBlob::new("RUZHSA=="), timestamp: None },
        ]);
    }

    #[test]
    fn unknown_response_fields_are_ignored() {
        let json = r#"[{"encrypted": "QUJD", "chatId": "1", "id": 9}]"#;
        let entries: Vec<RemoteEntry> = serde_json::from_str(json).unwrap();

        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn urls_ignore_trailing_slash() {
        let feed = HttpFeed::new("http://example.test/");

        assert_eq!(feed.base_url(), "http://example.test");
        assert_eq!(
            feed.messages_url(&ConversationId::new("42")),
            "http://example.test/api/messages/42"
        );
        assert_eq!(feed.submit_url(), "http://example.test/api/messages");
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        // Port 9 (discard) is closed on loopback in test environments
        let client = Client::builder().no_proxy().build().unwrap();
        let feed = HttpFeed::with_client(client, "http://127.0.0.1:9");

        let result = feed.fetch(&ConversationId::new("1")).await;
        assert!(matches!(result, Err(FeedError::Network(_))));
    }
}
