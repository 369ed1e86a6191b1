use crate::error::FetchError;
use crate::feed::message::{Message, MessageType};
use crate::feed::normalize::{normalize_value, IngestPath};
use crate::feed::store::sort_newest_first;
use reqwest::{Client, StatusCode};
use serde::de::IgnoredAny;
use serde::Deserialize;
use simd_json::OwnedValue;
use std::time::Duration;
use url::Url;

/// Body of the historical endpoint: either the stored rows or an
/// `{ "error": ... }` object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryResponseWire {
    Rows(Vec<OwnedValue>),
    Failure { error: OwnedValue },
    Other(IgnoredAny),
}

/// Stored rows split into the two collections the endpoint keeps.
#[derive(Debug, Default, Clone)]
pub struct HistoryBatch {
    pub signals: Vec<Message>,
    pub markets: Vec<Message>,
    pub skipped_rows: usize,
}

impl HistoryBatch {
    fn from_rows(rows: Vec<OwnedValue>) -> Self {
        let mut batch = Self::default();
        for (index, row) in rows.into_iter().enumerate() {
            match normalize_value(row, IngestPath::History) {
                Ok(message) if message.message_type == MessageType::Signal => {
                    batch.signals.push(message)
                }
                Ok(message) => batch.markets.push(message),
                Err(error) => {
                    batch.skipped_rows += 1;
                    tracing::warn!(row = index, %error, "skipping history row");
                }
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.signals.len() + self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Both collections combined, newest first.
    pub fn into_merged(self) -> Vec<Message> {
        let mut merged = self.signals;
        merged.extend(self.markets);
        sort_newest_first(&mut merged);
        merged
    }
}

pub fn build_history_client(timeout_ms: u64) -> Result<Client, FetchError> {
    let client = Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()?;
    Ok(client)
}

fn render_error(error: OwnedValue) -> String {
    match error {
        OwnedValue::String(reason) => reason,
        other => other.to_string(),
    }
}

fn status_failure(status: StatusCode, mut body: Vec<u8>) -> FetchError {
    let reason = match simd_json::serde::from_slice::<HistoryResponseWire>(&mut body) {
        Ok(HistoryResponseWire::Failure { error }) => render_error(error),
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    FetchError::Status {
        status: status.as_u16(),
        reason,
    }
}

/// Single GET against the historical endpoint. No retries: a failure is
/// reported once and the feed carries on with live data only.
pub async fn fetch_history(client: &Client, endpoint: &Url) -> Result<HistoryBatch, FetchError> {
    let response = client.get(endpoint.clone()).send().await?;
    let status = response.status();
    let mut body = response.bytes().await?.to_vec();

    if !status.is_success() {
        return Err(status_failure(status, body));
    }

    match simd_json::serde::from_slice::<HistoryResponseWire>(&mut body)? {
        HistoryResponseWire::Rows(rows) => Ok(HistoryBatch::from_rows(rows)),
        HistoryResponseWire::Failure { error } => {
            Err(FetchError::ErrorPayload(render_error(error)))
        }
        HistoryResponseWire::Other(_) => Err(FetchError::UnexpectedShape(
            "expected an array of rows or an error object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::message::SetupType;

    async fn fetch_from(server: &mockito::ServerGuard) -> Result<HistoryBatch, FetchError> {
        let client = build_history_client(2_000).expect("client should build");
        let endpoint = Url::parse(&format!("{}/api/messages", server.url())).unwrap();
        fetch_history(&client, &endpoint).await
    }

    #[tokio::test]
    async fn partitions_rows_by_type_and_merges_newest_first() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"message_type":"signal","pair":"BTCUSDT","setup_type":"short","entry":65000.5,"timestamp":"2025-01-01 10:00:00"},
                    {"type":"market","text":"BTC dominance rising","timestamp":"2025-01-01T12:00:00Z"},
                    {"message_type":"signal","pair":"ETHUSDT","timestamp":"2025-01-01T11:00:00Z"},
                    "not a row",
                    {"sender":"desk","message":"no timestamp"}
                ]"#,
            )
            .create_async()
            .await;

        let batch = fetch_from(&server).await.expect("history should load");
        mock.assert_async().await;

        assert_eq!(batch.signals.len(), 2);
        assert_eq!(batch.markets.len(), 2);
        assert_eq!(batch.skipped_rows, 1);
        assert_eq!(batch.signals[0].setup_type, Some(SetupType::Short));
        assert_eq!(batch.signals[0].entry.as_deref(), Some("65000.5"));

        let merged = batch.into_merged();
        let labels: Vec<Option<&str>> = merged
            .iter()
            .map(|message| {
                message
                    .pair
                    .as_deref()
                    .or(message.sender.as_deref())
                    .or(message.text.as_deref())
            })
            .collect();
        assert_eq!(
            labels,
            vec![
                Some("BTC dominance rising"),
                Some("ETHUSDT"),
                Some("BTCUSDT"),
                Some("desk"),
            ]
        );
        assert!(merged[3].timestamp.is_none());
    }

    #[tokio::test]
    async fn empty_array_is_a_successful_empty_load() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/messages")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let batch = fetch_from(&server).await.expect("empty history is valid");
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn error_object_is_reported_as_fetch_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/messages")
            .with_status(200)
            .with_body(r#"{"error":"database offline"}"#)
            .create_async()
            .await;

        let error = fetch_from(&server).await.expect_err("error payload must fail");
        assert!(matches!(
            error,
            FetchError::ErrorPayload(ref reason) if reason == "database offline"
        ));
    }

    #[tokio::test]
    async fn non_success_status_carries_endpoint_reason() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/messages")
            .with_status(500)
            .with_body(r#"{"error":"Failed to fetch messages"}"#)
            .create_async()
            .await;

        let error = fetch_from(&server).await.expect_err("500 must fail");
        match error {
            FetchError::Status { status, reason } => {
                assert_eq!(status, 500);
                assert_eq!(reason, "Failed to fetch messages");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_success_status_without_body_uses_canonical_reason() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/messages")
            .with_status(503)
            .create_async()
            .await;

        let error = fetch_from(&server).await.expect_err("503 must fail");
        assert!(matches!(error, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn other_shapes_are_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/messages")
            .with_status(200)
            .with_body(r#"{"rows":[]}"#)
            .create_async()
            .await;

        let error = fetch_from(&server).await.expect_err("object without error must fail");
        assert!(matches!(error, FetchError::UnexpectedShape(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/messages")
            .with_status(200)
            .with_body("[{")
            .create_async()
            .await;

        let error = fetch_from(&server).await.expect_err("truncated json must fail");
        assert!(matches!(error, FetchError::Decode(_)));
    }
}
