//! Client transport speaking to a remote backend over HTTP and server-sent events.

use std::sync::Arc;

use async_stream::try_stream;
use futures::{StreamExt, future::BoxFuture};
use reqwest::{Client, StatusCode};
use serde_json::json;

use crate::{
    client::transport::{DeliveryStream, SyncTransport, TransportError},
    dto::sse::EventDelivery,
    state::game::{Choice, GameSnapshot},
};

/// [`SyncTransport`] backed by the HTTP API.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Arc<str>,
}

impl HttpTransport {
    /// Transport with a default client rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|source| TransportError::Http {
                path: base_url.to_string(),
                source,
            })?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing client.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn status_error(path: String, status: StatusCode) -> TransportError {
    match status {
        StatusCode::NOT_FOUND => TransportError::NotFound(path),
        StatusCode::CONFLICT | StatusCode::BAD_REQUEST => TransportError::Rejected(path),
        StatusCode::SERVICE_UNAVAILABLE => TransportError::Unavailable(path),
        other => TransportError::Status {
            path,
            status: other.as_u16(),
        },
    }
}

impl SyncTransport for HttpTransport {
    fn fetch_snapshot(&self, game_id: &str) -> BoxFuture<'static, Result<GameSnapshot, TransportError>> {
        let client = self.client.clone();
        let path = format!("/games/{game_id}/state");
        let url = self.url(&path);
        Box::pin(async move {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|source| TransportError::Http {
                    path: path.clone(),
                    source,
                })?;
            if !response.status().is_success() {
                return Err(status_error(path, response.status()));
            }
            response
                .json::<GameSnapshot>()
                .await
                .map_err(|source| TransportError::Http { path, source })
        })
    }

    fn subscribe(&self, game_id: &str) -> BoxFuture<'static, Result<DeliveryStream, TransportError>> {
        let client = self.client.clone();
        let path = format!("/games/{game_id}/events");
        let url = self.url(&path);
        Box::pin(async move {
            let response = client
                .get(url)
                .header("accept", "text/event-stream")
                .send()
                .await
                .map_err(|source| TransportError::Http {
                    path: path.clone(),
                    source,
                })?;
            if !response.status().is_success() {
                return Err(status_error(path, response.status()));
            }

            let mut bytes = response.bytes_stream();
            let deliveries: DeliveryStream = Box::pin(try_stream! {
                let mut parser = SseParser::default();
                while let Some(chunk) = bytes.next().await {
                    let chunk = chunk.map_err(|source| TransportError::Http {
                        path: path.clone(),
                        source,
                    })?;
                    for data in parser.feed(&chunk) {
                        let delivery = serde_json::from_str::<EventDelivery>(&data)
                            .map_err(|err| TransportError::Decode(err.to_string()))?;
                        yield delivery;
                    }
                }
                Err::<(), _>(TransportError::Closed)?;
            });
            Ok(deliveries)
        })
    }

    fn submit_choice(
        &self,
        game_id: &str,
        round_index: u32,
        player_id: &str,
        choice: Choice,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let client = self.client.clone();
        let path = format!("/games/{game_id}/rounds/{round_index}/choice");
        let url = self.url(&path);
        let body = json!({ "player_id": player_id, "choice": choice });
        Box::pin(async move {
            let response = client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(|source| TransportError::Http {
                    path: path.clone(),
                    source,
                })?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(status_error(path, response.status()))
            }
        })
    }
}

/// Incremental line parser for `text/event-stream` bodies.
///
/// Yields the `data` of each complete event; comments, `event:` and `id:` fields are
/// skipped since the delivery JSON carries the name and sequence id itself.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut complete = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    complete.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }
        complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_joins_split_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: player-joined\nid: 1\nda").is_empty());
        let events = parser.feed(b"ta: {\"a\":1}\n\n: keep-alive\n\n");
        assert_eq!(events, [r#"{"a":1}"#]);
    }

    #[test]
    fn parser_handles_crlf_and_multiline_data() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"data: first\r\ndata: second\r\n\r\n");
        assert_eq!(events, ["first\nsecond"]);
    }

    #[test]
    fn parser_keeps_multibyte_characters_split_across_chunks() {
        let mut parser = SseParser::default();
        let text = "data: café\n\n".as_bytes();
        let split = text.iter().position(|byte| *byte == 0xc3).unwrap() + 1;
        assert!(parser.feed(&text[..split]).is_empty());
        assert_eq!(parser.feed(&text[split..]), ["café"]);
    }

    #[test]
    fn statuses_map_to_transport_errors() {
        assert!(matches!(
            status_error("/x".into(), StatusCode::CONFLICT),
            TransportError::Rejected(_)
        ));
        assert!(matches!(
            status_error("/x".into(), StatusCode::INTERNAL_SERVER_ERROR),
            TransportError::Status { status: 500, .. }
        ));
    }
}
