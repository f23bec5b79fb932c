//! Streaming backends

pub mod anthropic;
pub mod openai;

use crate::{Api, Error, Message, ModelConfig, ProviderEventStream, Result, Tool};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use std::sync::Arc;

/// A backend that turns a history into a stream of [`crate::ProviderEvent`]s.
///
/// `stream` resolves once the response is open; failures before that point
/// are returned as `Err` and are the only ones worth retrying. Failures after
/// it arrive as an `Err` item in the stream.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    async fn stream(
        &self,
        history: &[Message],
        tools: &[Tool],
        config: &ModelConfig,
    ) -> Result<ProviderEventStream>;
}

/// The adapter speaking the given wire protocol
pub fn provider_for(api: Api) -> Arc<dyn StreamProvider> {
    match api {
        Api::AnthropicMessages => Arc::new(anthropic::AnthropicProvider::new()),
        Api::OpenAICompletions => Arc::new(openai::OpenAIProvider::new()),
    }
}

/// Get an API key from the provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}

/// Send the request and wait until the server accepts the event stream.
pub(crate) async fn open_event_source(request: reqwest::RequestBuilder) -> Result<EventSource> {
    let mut source = EventSource::new(request)
        .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;
    source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

    match source.next().await {
        Some(Ok(Event::Open)) => Ok(source),
        Some(Ok(Event::Message(message))) => {
            source.close();
            Err(Error::UnexpectedResponse(format!(
                "event before stream open: {}",
                message.event
            )))
        }
        Some(Err(err)) => {
            source.close();
            Err(map_sse_error(err).await)
        }
        None => Err(Error::Sse("stream closed before opening".to_string())),
    }
}

/// Convert an event source failure into a crate error, reading the body of
/// rejected responses so API error envelopes are preserved.
pub(crate) async fn map_sse_error(err: reqwest_eventsource::Error) -> Error {
    use reqwest_eventsource::Error as SseError;

    match err {
        SseError::InvalidStatusCode(status, response) => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            match Error::from_status(status.as_u16(), &body) {
                Error::RateLimited { .. } => Error::RateLimited { retry_after },
                other => other,
            }
        }
        SseError::InvalidContentType(content_type, response) => {
            let body = response.text().await.unwrap_or_default();
            Error::UnexpectedResponse(format!(
                "expected an event stream, got {:?}: {}",
                content_type,
                body.trim()
            ))
        }
        SseError::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}
