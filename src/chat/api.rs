// Message mutation API: create, edit and soft-delete over the chat service REST endpoints

use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::{ApiErrorBody, ApiGeneralResponse, ChatMessage, EditMessageRequest, SendMessageRequest};

/// Correlates client log lines with chat service logs
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Request/response operations on the messages of one conversation.
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn create_message(&self, room_id: &str, content: &str) -> ChatResult<ChatMessage>;

    async fn edit_message(&self, room_id: &str, message_id: &str, content: &str) -> ChatResult<ChatMessage>;

    /// Returns the tombstoned message.
    async fn delete_message(&self, room_id: &str, message_id: &str) -> ChatResult<ChatMessage>;
}

pub struct HttpMessageApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpMessageApi {
    pub fn new(config: &ChatConfig) -> ChatResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: parse_base_url(config.chat_base())?,
            token: config.access_token.clone(),
        })
    }

    fn messages_url(&self, room_id: &str) -> Url {
        endpoint(&self.base_url, &["api", "v1", room_id, "messages"])
    }

    fn message_url(&self, room_id: &str, message_id: &str) -> Url {
        endpoint(&self.base_url, &["api", "v1", room_id, "message", message_id])
    }

    async fn execute(&self, request: RequestBuilder) -> ChatResult<ChatMessage> {
        let request_id = Uuid::new_v4().to_string();
        let response = with_bearer(request, self.token.as_deref())
            .header(REQUEST_ID_HEADER, &request_id)
            .send()
            .await
            .map_err(|e| {
                error!("Chat service request {} failed: {}", request_id, e);
                ChatError::Network(e.to_string())
            })?;
        debug!("Request {} answered with {}", request_id, response.status());
        read_envelope(response).await
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn create_message(&self, room_id: &str, content: &str) -> ChatResult<ChatMessage> {
        debug!("POST message to room {}", room_id);
        let body = SendMessageRequest { content: content.to_string() };
        self.execute(self.client.post(self.messages_url(room_id)).json(&body)).await
    }

    async fn edit_message(&self, room_id: &str, message_id: &str, content: &str) -> ChatResult<ChatMessage> {
        debug!("PUT message {} in room {}", message_id, room_id);
        let body = EditMessageRequest { content: content.to_string() };
        self.execute(self.client.put(self.message_url(room_id, message_id)).json(&body)).await
    }

    async fn delete_message(&self, room_id: &str, message_id: &str) -> ChatResult<ChatMessage> {
        debug!("DELETE message {} in room {}", message_id, room_id);
        self.execute(self.client.delete(self.message_url(room_id, message_id))).await
    }
}

pub(crate) fn parse_base_url(raw: &str) -> ChatResult<Url> {
    let url = Url::parse(raw).map_err(|e| ChatError::Validation(format!("invalid service url '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(ChatError::Validation(format!("invalid service url '{}'", raw)));
    }
    Ok(url)
}

/// Append path segments to `base`. Every segment is percent-encoded, so ids
/// containing `/`, `?` or `#` stay inside their own segment.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

pub(crate) fn with_bearer(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Unwrap the `data` field of a successful response, or map the failure.
pub(crate) async fn read_envelope<T: DeserializeOwned>(response: Response) -> ChatResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(status_error(status, &body));
    }

    let envelope: ApiGeneralResponse<T> = serde_json::from_str(&body).map_err(|e| {
        warn!("Undecodable response body ({}): {}", status, e);
        ChatError::Network(format!("invalid response body: {}", e))
    })?;
    Ok(envelope.data)
}

/// Map a non-success status and its body to the error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> ChatError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ChatError::Validation(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(message),
        StatusCode::NOT_FOUND => ChatError::NotFound(message),
        _ => ChatError::Network(message),
    }
}
