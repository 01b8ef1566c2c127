//! Chat server HTTP client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_core::rpc::{
    method, AppendMessageParams, ConversationParams, CreateOrGetConversationParams, RpcRequest,
    RpcResponse, USER_HEADER,
};
use chat_core::{
    ChatBackend, ChatError, ConversationId, ConversationSummary, EventStream, MarkRead, Message,
    MessageType, Scope, UserId,
};
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::sse::ChangeStream;

/// [`ChatBackend`] over the server's JSON-RPC and SSE endpoints.
#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    sse_http: Client,
    config: ClientConfig,
    request_id: Arc<AtomicU64>,
}

impl HttpBackend {
    /// Build a backend without contacting the server.
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ClientError::Http)?;

        // SSE connections are long-lived and must not time out
        let sse_http = Client::builder().build().map_err(ClientError::Http)?;

        Ok(Self {
            http,
            sse_http,
            config,
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Build a backend and verify the server answers its health check.
    pub async fn connect(config: ClientConfig) -> Result<Self, ChatError> {
        let backend = Self::new(config)?;
        if !backend.health_check().await? {
            return Err(ChatError::Transport(format!(
                "health check failed for {}",
                backend.config.base_url
            )));
        }
        info!("Connected to chat server at {}", backend.config.base_url);
        Ok(backend)
    }

    /// Perform a health check against the server.
    pub async fn health_check(&self) -> Result<bool, ChatError> {
        let url = self.config.check_url();
        debug!("Health check: {}", url);

        let resp = self.http.get(&url).send().await.map_err(ClientError::Http)?;
        Ok(resp.status().is_success())
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Make a JSON-RPC call to the server.
    async fn rpc_call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> Result<R, ClientError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(method, params, id);

        debug!("RPC call: {} (id={})", method, id);

        let response = self
            .http
            .post(self.config.rpc_url())
            .header(USER_HEADER, self.config.user_id.to_string())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rpc_response: RpcResponse<R> = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(ClientError::Rpc(error));
        }

        rpc_response.result.ok_or(ClientError::EmptyResult)
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> Result<R, ChatError> {
        Ok(self.rpc_call(method, params).await?)
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn user_id(&self) -> UserId {
        self.config.user_id
    }

    async fn create_or_get_conversation(&self, other: UserId) -> Result<ConversationId, ChatError> {
        self.call(
            method::CREATE_OR_GET_CONVERSATION,
            Some(CreateOrGetConversationParams {
                other_user_id: other,
            }),
        )
        .await
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message, ChatError> {
        self.call(
            method::APPEND_MESSAGE,
            Some(AppendMessageParams {
                conversation_id,
                content: content.to_string(),
                message_type,
            }),
        )
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        self.call(method::LIST_MESSAGES, Some(ConversationParams { conversation_id }))
            .await
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<MarkRead, ChatError> {
        self.call(
            method::MARK_CONVERSATION_READ,
            Some(ConversationParams { conversation_id }),
        )
        .await
    }

    async fn is_unread(&self, conversation_id: ConversationId) -> Result<bool, ChatError> {
        self.call(method::IS_UNREAD, Some(ConversationParams { conversation_id }))
            .await
    }

    async fn get_unread_count(&self) -> Result<u64, ChatError> {
        self.call::<(), _>(method::GET_UNREAD_COUNT, None).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        self.call::<(), _>(method::LIST_CONVERSATIONS, None).await
    }

    async fn subscribe(&self, scope: Scope) -> Result<EventStream, ChatError> {
        let request = self
            .sse_http
            .get(self.config.events_url(scope))
            .header(USER_HEADER, self.config.user_id.to_string());
        let stream = ChangeStream::open(request, scope).await?;
        Ok(stream.boxed())
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("config", &self.config)
            .finish()
    }
}
