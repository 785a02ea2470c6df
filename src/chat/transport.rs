// Push transport: one server-to-client event stream per conversation

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info};
use reqwest::{header, Client, Url};
use std::collections::VecDeque;
use std::time::Duration;

use super::api::{endpoint, parse_base_url, status_error, with_bearer};
use super::sse::SseDecoder;
use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};

/// Raw event payloads in delivery order. An `Err` item ends the channel.
pub type EventStream = BoxStream<'static, ChatResult<String>>;

/// Opens push subscriptions. Every call starts a logically fresh stream.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn subscribe(&self, room_id: &str) -> ChatResult<EventStream>;
}

/// Server-sent events over `GET /api/v1/{roomId}/messages`.
pub struct SseTransport {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl SseTransport {
    pub fn new(config: &ChatConfig) -> ChatResult<Self> {
        // No overall timeout: the body never completes while the room is open
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: parse_base_url(config.chat_base())?,
            token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl MessageTransport for SseTransport {
    async fn subscribe(&self, room_id: &str) -> ChatResult<EventStream> {
        let url = endpoint(&self.base_url, &["api", "v1", room_id, "messages"]);
        debug!("Opening event stream {}", url);

        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        let response = with_bearer(request, self.token.as_deref()).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        info!("Event stream open for room {}", room_id);

        let body = response.bytes_stream().boxed();
        Ok(decode_events(body))
    }
}

/// Turn a stream of body chunks into a stream of SSE data payloads.
pub fn decode_events<S, B, E>(body: S) -> EventStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        body: S,
        decoder: SseDecoder,
        ready: VecDeque<String>,
        done: bool,
    }

    let state = State {
        body,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.ready.extend(state.decoder.feed(chunk.as_ref()));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ChatError::Network(e.to_string())), state));
                }
                None => {
                    state.decoder.finish();
                    return None;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decode_events_across_chunks() {
        let chunks: Vec<Result<&'static [u8], String>> = vec![
            Ok(&b"data: {\"a\":1}\n"[..]),
            Ok(&b"\ndata: {\"b\""[..]),
            Ok(&b":2}\n\n"[..]),
        ];
        let events: Vec<_> = decode_events(stream::iter(chunks)).collect().await;
        assert_eq!(
            events,
            vec![Ok("{\"a\":1}".to_string()), Ok("{\"b\":2}".to_string())]
        );
    }

    #[tokio::test]
    async fn test_decode_events_surfaces_body_error_once() {
        let chunks: Vec<Result<&'static [u8], String>> = vec![
            Ok(&b"data: one\n\n"[..]),
            Err("connection reset".to_string()),
            Ok(&b"data: never\n\n"[..]),
        ];
        let events: Vec<_> = decode_events(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok("one".to_string()));
        assert_eq!(events[1], Err(ChatError::Network("connection reset".to_string())));
    }
}
