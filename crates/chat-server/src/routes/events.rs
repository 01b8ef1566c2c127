//! Server-Sent Events change feed.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use chat_core::rpc::CHANGE_EVENT;
use chat_core::{Scope, UserId};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::warn;

use crate::error::ApiError;
use crate::routes::Caller;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// `conversation:<id>`, `user:<id>`, or `user` for the caller.
    pub scope: String,
}

fn parse_scope(raw: &str, caller: UserId) -> Result<Scope, ApiError> {
    if raw == "user" {
        return Ok(Scope::User(caller));
    }
    raw.parse()
        .map_err(|e: chat_core::ParseIdError| ApiError::InvalidScope(e.to_string()))
}

/// Open a change-feed subscription.
///
/// The subscription is registered before the response headers go out, so a
/// client that has seen the response open will receive every later change.
pub async fn events(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let scope = parse_scope(&query.scope, caller)?;
    let subscription = state.service.subscribe(caller, scope).await?;

    let stream = subscription.filter_map(|change| async move {
        match Event::default().event(CHANGE_EVENT).json_data(&change) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                warn!(kind = change.kind(), "Failed to encode change event: {}", err);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::ConversationId;

    #[test]
    fn test_parse_scope() {
        let caller = UserId::new();
        assert_eq!(parse_scope("user", caller).unwrap(), Scope::User(caller));

        let id = ConversationId::new();
        assert_eq!(
            parse_scope(&format!("conversation:{}", id), caller).unwrap(),
            Scope::Conversation(id)
        );
        assert!(matches!(
            parse_scope("everything", caller),
            Err(ApiError::InvalidScope(_))
        ));
    }
}
