//! Server-Sent Events (SSE) client for the change feed.

use std::pin::Pin;
use std::task::{Context, Poll};

use chat_core::rpc::CHANGE_EVENT;
use chat_core::{ChangeEvent, ChatError, Scope};
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest_eventsource::{retry, Error as SseError, Event, EventSource, RequestBuilderExt};
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// A stream of change events for one subscription scope.
///
/// Reconnection is owned by the sync engine, not the event source: once the
/// connection drops this stream yields a `SubscriptionDropped` error and ends.
pub struct ChangeStream {
    event_source: EventSource,
    scope: Scope,
    finished: bool,
}

impl ChangeStream {
    /// Connect and wait until the server has accepted the subscription.
    pub async fn open(request: reqwest::RequestBuilder, scope: Scope) -> Result<Self, ChatError> {
        let mut event_source = request
            .eventsource()
            .map_err(|e| ClientError::Sse(e.to_string()))?;
        event_source.set_retry_policy(Box::new(retry::Never));

        match event_source.next().await {
            Some(Ok(Event::Open)) => {
                info!(%scope, "SSE connection opened");
                Ok(Self {
                    event_source,
                    scope,
                    finished: false,
                })
            }
            Some(Ok(Event::Message(msg))) => {
                event_source.close();
                Err(ClientError::Sse(format!("unexpected event before open: {}", msg.event)).into())
            }
            Some(Err(err)) => {
                event_source.close();
                Err(rejection(err).await)
            }
            None => Err(ClientError::Sse("stream ended before open".to_string()).into()),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }
}

/// Map a failed connection attempt, keeping the server's structured error.
async fn rejection(err: SseError) -> ChatError {
    match err {
        SseError::InvalidStatusCode(status, response) => {
            let body = response.json::<serde_json::Value>().await.ok();
            let detail = body
                .and_then(|mut body| body.get_mut("detail").map(serde_json::Value::take))
                .and_then(|detail| serde_json::from_value::<ChatError>(detail).ok());
            match detail {
                Some(err) => err,
                None if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED => {
                    ChatError::Transport(format!("subscription refused: HTTP {}", status))
                }
                None => ChatError::SubscriptionDropped(format!("HTTP {}", status)),
            }
        }
        SseError::Transport(e) => ClientError::Http(e).into(),
        other => ClientError::Sse(other.to_string()).into(),
    }
}

impl Stream for ChangeStream {
    type Item = Result<ChangeEvent, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.event_source).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => match event {
                    Event::Open => continue,
                    Event::Message(msg) => {
                        if msg.event != CHANGE_EVENT {
                            debug!("Ignoring SSE event type: {}", msg.event);
                            continue;
                        }
                        match serde_json::from_str::<ChangeEvent>(&msg.data) {
                            Ok(change) => return Poll::Ready(Some(Ok(change))),
                            Err(e) => {
                                warn!("Failed to parse change event: {}", e);
                                debug!("Raw data: {}", msg.data);
                                continue;
                            }
                        }
                    }
                },
                Poll::Ready(Some(Err(SseError::StreamEnded))) | Poll::Ready(None) => {
                    info!(scope = %self.scope, "SSE stream ended");
                    self.finished = true;
                    self.event_source.close();
                    return Poll::Ready(Some(Err(ChatError::SubscriptionDropped(
                        "stream ended".to_string(),
                    ))));
                }
                Poll::Ready(Some(Err(e))) => {
                    warn!(scope = %self.scope, "SSE error: {}", e);
                    self.finished = true;
                    self.event_source.close();
                    return Poll::Ready(Some(Err(ChatError::SubscriptionDropped(e.to_string()))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
