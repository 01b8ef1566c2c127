//! JSON-RPC 2.0 wire format shared by the HTTP server and client.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::ids::{ConversationId, UserId};
use crate::message::MessageType;

/// Header carrying the caller's session identity.
pub const USER_HEADER: &str = "x-chat-user";

/// Name of the SSE event carrying a [`crate::ChangeEvent`].
pub const CHANGE_EVENT: &str = "change";

/// RPC method names.
pub mod method {
    pub const CREATE_OR_GET_CONVERSATION: &str = "createOrGetConversation";
    pub const APPEND_MESSAGE: &str = "appendMessage";
    pub const LIST_MESSAGES: &str = "listMessages";
    pub const MARK_CONVERSATION_READ: &str = "markConversationRead";
    pub const IS_UNREAD: &str = "isUnread";
    pub const GET_UNREAD_COUNT: &str = "getUnreadCount";
    pub const LIST_CONVERSATIONS: &str = "listConversations";
}

/// Stable error codes.
pub mod code {
    pub const INTERNAL: i32 = -32000;
    pub const INVALID_PARTICIPANTS: i32 = -32001;
    pub const UNAUTHORIZED: i32 = -32003;
    pub const NOT_FOUND: i32 = -32004;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
}

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest<T> {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<T>,
    pub id: u64,
}

impl<T> RpcRequest<T> {
    pub fn new(method: impl Into<String>, params: Option<T>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: u64,
}

impl<T> RpcResponse<T> {
    pub fn success(id: u64, result: T) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: u64, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 2.0 error. `data` carries the structured [`ChatError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ChatError>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Recover the domain error on the client side.
    pub fn into_chat_error(self) -> ChatError {
        if let Some(err) = self.data {
            return err;
        }
        match self.code {
            code::NOT_FOUND => ChatError::NotFound {
                entity: "resource".to_string(),
                id: self.message,
            },
            _ => ChatError::Transport(format!("RPC error {}: {}", self.code, self.message)),
        }
    }
}

impl From<ChatError> for RpcError {
    fn from(err: ChatError) -> Self {
        let code = match &err {
            ChatError::InvalidParticipants { .. } => code::INVALID_PARTICIPANTS,
            ChatError::Unauthorized { .. } => code::UNAUTHORIZED,
            ChatError::NotFound { .. } => code::NOT_FOUND,
            ChatError::EmptyMessage => code::INVALID_PARAMS,
            _ => code::INTERNAL,
        };
        Self {
            code,
            message: err.to_string(),
            data: Some(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrGetConversationParams {
    pub other_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessageParams {
    pub conversation_id: ConversationId,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
}

/// Params for every method that only names a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationParams {
    pub conversation_id: ConversationId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let params = ConversationParams {
            conversation_id: ConversationId::new(),
        };
        let req = RpcRequest::new(method::LIST_MESSAGES, Some(params.clone()), 7);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "listMessages");
        assert_eq!(json["params"]["conversationId"], params.conversation_id.to_string());
    }

    #[test]
    fn test_error_codes_round_trip() {
        let user_id = UserId::new();
        let rpc: RpcError = ChatError::InvalidParticipants { user_id }.into();
        assert_eq!(rpc.code, code::INVALID_PARTICIPANTS);

        let wire = serde_json::to_string(&rpc).unwrap();
        let back: RpcError = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.into_chat_error(), ChatError::InvalidParticipants { user_id });
    }

    /// Decodes for any `DeserializeOwned` result type, not only `Default` ones.
    fn decode<R: serde::de::DeserializeOwned>(wire: &str) -> RpcResponse<R> {
        serde_json::from_str(wire).unwrap()
    }

    #[test]
    fn test_response_decodes_generic_result() {
        let ok: RpcResponse<ConversationParams> = decode(
            r#"{"jsonrpc":"2.0","id":3,
                "result":{"conversationId":"6f1c1a43-4a0e-4e55-9c7e-2f6f0f7a1b20"}}"#,
        );
        assert!(ok.error.is_none());
        assert_eq!(
            ok.result.unwrap().conversation_id.to_string(),
            "6f1c1a43-4a0e-4e55-9c7e-2f6f0f7a1b20"
        );

        let failed: RpcResponse<ConversationParams> = decode(
            r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"unknown method: nope"},"id":4}"#,
        );
        assert!(failed.result.is_none());
        assert_eq!(failed.error.unwrap().code, code::METHOD_NOT_FOUND);

        let request: RpcRequest<ConversationParams> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"getUnreadCount","id":5}"#).unwrap();
        assert!(request.params.is_none());
    }

    #[test]
    fn test_error_without_data_maps_to_transport() {
        let err = RpcError::new(code::METHOD_NOT_FOUND, "unknown method: nope").into_chat_error();
        assert!(matches!(err, ChatError::Transport(_)));
    }

    #[test]
    fn test_append_params_default_type() {
        let params: AppendMessageParams = serde_json::from_value(serde_json::json!({
            "conversationId": ConversationId::new(),
            "content": "[JOB_LINK:42] hi",
        }))
        .unwrap();
        assert_eq!(params.message_type, MessageType::Text);
        assert_eq!(params.content, "[JOB_LINK:42] hi");
    }
}
