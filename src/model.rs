//! Model identities and the batch model pool.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Where inference for a model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderClass {
    /// Served by a local inference server.
    Local,
    /// Served by a hosted API.
    Cloud,
}

/// Provider family, derived from the model identifier prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// `ollama/...`, `local/...` or unprefixed identifiers.
    Ollama,
    /// `openai/...`
    OpenAi,
    /// `claude/...` or `anthropic/...`
    Anthropic,
}

impl Provider {
    /// Local or cloud inference.
    pub fn class(self) -> ProviderClass {
        match self {
            Provider::Ollama => ProviderClass::Local,
            Provider::OpenAi | Provider::Anthropic => ProviderClass::Cloud,
        }
    }

    /// Splits `"openai/gpt-4o-mini"` into the provider and the name sent on the wire.
    pub fn split(model_id: &str) -> (Provider, &str) {
        let Some((prefix, rest)) = model_id.split_once('/') else {
            return (Provider::Ollama, model_id);
        };
        match prefix.to_ascii_lowercase().as_str() {
            "openai" | "oai" => (Provider::OpenAi, rest),
            "claude" | "anthropic" => (Provider::Anthropic, rest),
            "ollama" | "local" => (Provider::Ollama, rest),
            // e.g. "library/llama3" is an ollama namespace, not a provider
            _ => (Provider::Ollama, model_id),
        }
    }
}

/// A configured model. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Model {
    id: String,
    provider: Provider,
}

impl Model {
    /// Resolves the provider from the identifier prefix.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let (provider, _) = Provider::split(&id);
        Self { id, provider }
    }

    /// Full identifier, as configured.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Provider family.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Local or cloud inference.
    pub fn class(&self) -> ProviderClass {
        self.provider.class()
    }

    /// Identifier without the routing prefix.
    pub fn wire_name(&self) -> &str {
        Provider::split(&self.id).1
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// One entry of the batch model pool, with an optional fixed seat name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelEntry {
    /// Model to seat.
    pub model: Model,
    /// Display name used for the seat. Defaults to the model identifier.
    pub seat_name: Option<String>,
}

impl ModelEntry {
    /// Pool entry seated under its own identifier.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: Model::new(model),
            seat_name: None,
        }
    }

    /// Binds a display name to the seat this model fills.
    pub fn with_seat_name(mut self, name: impl Into<String>) -> Self {
        self.seat_name = Some(name.into());
        self
    }

    /// Name shown to the other agents.
    pub fn seat_name(&self) -> &str {
        self.seat_name.as_deref().unwrap_or(self.model.id())
    }
}

impl From<&str> for ModelEntry {
    fn from(value: &str) -> Self {
        ModelEntry::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_routing() {
        assert_eq!(Provider::split("openai/gpt-4o-mini"), (Provider::OpenAi, "gpt-4o-mini"));
        assert_eq!(
            Provider::split("claude/claude-3-5-sonnet-latest"),
            (Provider::Anthropic, "claude-3-5-sonnet-latest")
        );
        assert_eq!(Provider::split("ollama/llama3.1"), (Provider::Ollama, "llama3.1"));
        assert_eq!(Provider::split("mistral:7b"), (Provider::Ollama, "mistral:7b"));
        assert_eq!(Provider::split("library/llama3"), (Provider::Ollama, "library/llama3"));
    }

    #[test]
    fn model_class() {
        assert_eq!(Model::new("anthropic/x").class(), ProviderClass::Cloud);
        assert_eq!(Model::new("llama3").class(), ProviderClass::Local);
        assert_eq!(Model::new("local/qwen").wire_name(), "qwen");
    }

    #[test]
    fn seat_name_defaults_to_id() {
        let entry = ModelEntry::new("llama3");
        assert_eq!(entry.seat_name(), "llama3");
        assert_eq!(entry.with_seat_name("Sarah").seat_name(), "Sarah");
    }
}
