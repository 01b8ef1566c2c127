//! JSON-RPC 2.0 endpoint.

use axum::extract::State;
use axum::Json;
use chat_core::rpc::{
    code, method, AppendMessageParams, ConversationParams, CreateOrGetConversationParams,
    RpcError, RpcRequest, RpcResponse,
};
use chat_core::UserId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::routes::Caller;
use crate::service::ChatService;
use crate::state::AppState;

/// Dispatch one call. Domain failures become JSON-RPC error objects with
/// stable codes; the HTTP status stays 200.
pub async fn rpc(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<RpcRequest<Value>>,
) -> Json<RpcResponse<Value>> {
    debug!(method = %request.method, caller = %caller, id = request.id, "RPC call");

    let response = match dispatch(&state.service, caller, &request.method, request.params).await {
        Ok(result) => RpcResponse::success(request.id, result),
        Err(error) => {
            debug!(method = %request.method, code = error.code, "RPC failed: {}", error.message);
            RpcResponse::failure(request.id, error)
        }
    };

    Json(response)
}

async fn dispatch(
    service: &ChatService,
    caller: UserId,
    method: &str,
    params: Option<Value>,
) -> Result<Value, RpcError> {
    match method {
        method::CREATE_OR_GET_CONVERSATION => {
            let p: CreateOrGetConversationParams = parse(params)?;
            reply(service.create_or_get_conversation(caller, p.other_user_id).await?)
        }
        method::APPEND_MESSAGE => {
            let p: AppendMessageParams = parse(params)?;
            reply(
                service
                    .append_message(caller, p.conversation_id, &p.content, p.message_type)
                    .await?,
            )
        }
        method::LIST_MESSAGES => {
            let p: ConversationParams = parse(params)?;
            reply(service.list_messages(caller, p.conversation_id).await?)
        }
        method::MARK_CONVERSATION_READ => {
            let p: ConversationParams = parse(params)?;
            reply(service.mark_conversation_read(caller, p.conversation_id).await?)
        }
        method::IS_UNREAD => {
            let p: ConversationParams = parse(params)?;
            reply(service.is_unread(caller, p.conversation_id).await?)
        }
        method::GET_UNREAD_COUNT => reply(service.get_unread_count(caller).await?),
        method::LIST_CONVERSATIONS => reply(service.list_conversations(caller).await?),
        other => Err(RpcError::new(
            code::METHOD_NOT_FOUND,
            format!("unknown method: {}", other),
        )),
    }
}

fn parse<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::new(code::INVALID_PARAMS, "missing params"))?;
    serde_json::from_value(params)
        .map_err(|e| RpcError::new(code::INVALID_PARAMS, format!("invalid params: {}", e)))
}

fn reply<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value)
        .map_err(|e| RpcError::new(code::INTERNAL, format!("failed to encode result: {}", e)))
}
