//! Provider-agnostic chat transport and model routing.
//!
//! The actual HTTP clients (OpenAI, Anthropic, Ollama...) live outside this crate: they only
//! need to implement [`Transport`]. A [`ModelRouter`] maps a model identifier to the transport
//! serving it. [`ProviderRouter`] is the prefix-based router used by default.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::TransportError,
    model::{Model, Provider},
};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Standing instructions.
    System,
    /// Prompt from the engine.
    User,
    /// Earlier model reply.
    Assistant,
}

/// One message of a chat-style request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// What a model answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Text content of the answer.
    pub content: String,
    /// Reasoning trace, for models that expose one.
    pub reasoning: Option<String>,
}

impl Completion {
    /// Completion without reasoning trace.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: None,
        }
    }
}

/// Something able to produce a chat completion.
///
/// `timeout` is advisory: the agent proxy enforces its own hard deadline and abandons calls
/// that overrun it.
pub trait Transport: Send + Sync {
    /// Sends `messages` to `model` (routing prefix already stripped).
    fn send(
        &self,
        model: &str,
        messages: &[ChatMessage],
        timeout: Duration,
    ) -> Result<Completion, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&str, &[ChatMessage]) -> Result<Completion, TransportError> + Send + Sync,
{
    fn send(
        &self,
        model: &str,
        messages: &[ChatMessage],
        _timeout: Duration,
    ) -> Result<Completion, TransportError> {
        self(model, messages)
    }
}

/// A transport resolved for one model.
#[derive(Clone)]
pub struct Route {
    /// Transport to call.
    pub transport: Arc<dyn Transport>,
    /// Name to send on the wire.
    pub wire_model: String,
}

/// Resolves a model to the transport able to serve it.
pub trait ModelRouter: Send + Sync {
    /// # Errors
    /// [`TransportError::Unavailable`] when nothing can serve `model`.
    fn resolve(&self, model: &Model) -> Result<Route, TransportError>;
}

/// Routes by identifier prefix, falling back to the local provider when the requested one is
/// not configured.
#[derive(Default, Clone)]
pub struct ProviderRouter {
    transports: HashMap<Provider, Arc<dyn Transport>>,
}

impl ProviderRouter {
    /// Router without any transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the transport serving `provider`.
    pub fn with_transport(mut self, provider: Provider, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(provider, transport);
        self
    }

    /// Registers the same transport for every provider.
    pub fn single(transport: Arc<dyn Transport>) -> Self {
        Self::new()
            .with_transport(Provider::Ollama, transport.clone())
            .with_transport(Provider::OpenAi, transport.clone())
            .with_transport(Provider::Anthropic, transport)
    }
}

impl ModelRouter for ProviderRouter {
    fn resolve(&self, model: &Model) -> Result<Route, TransportError> {
        let provider = model.provider();
        if let Some(transport) = self.transports.get(&provider) {
            return Ok(Route {
                transport: transport.clone(),
                wire_model: model.wire_name().to_owned(),
            });
        }
        // anything unavailable ends up on the local server
        if let Some(local) = self.transports.get(&Provider::Ollama) {
            warn!(model = model.id(), ?provider, "provider not configured, falling back to local");
            return Ok(Route {
                transport: local.clone(),
                wire_model: model.wire_name().to_owned(),
            });
        }
        Err(TransportError::Unavailable {
            model: model.id().to_owned(),
        })
    }
}
