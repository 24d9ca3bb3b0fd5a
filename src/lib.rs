//! # Deduction Arena
//!
//! A modular Rust crate for running batches of social-deduction games (Mafia, bluffing card
//! games, secret elections, clone troubleshooters...) where every seat is played by a
//! language-model agent.
//!
//! It provides:
//! - A generic phase state machine (`GameEngine`) driving any variant implementing `RuleSet`
//! - Built-in variants: `BluffRules`, `ElectionRules`, `MafiaRules` and `CloneRules`
//! - A resilient agent layer (`AgentProxy`) turning slow, failing or rambling models into
//!   validated decisions, with bounded retries and deterministic fallbacks
//! - A fair batch scheduler (`BatchScheduler`) making sure every model of a pool plays often
//!   enough and never stays idle for long
//!
//! Each match runs on its own OS thread; agent calls of one phase run concurrently.
//!
//! # Documentation Overview
//!
//! - For batch execution and fairness, see the [`batch`] module.
//! - For the phase cycle and what a match records, see [`engine`] and [`record`].
//! - For retries, timeouts and fallbacks, see [`agent_proxy`] and [`retry`].
//! - For limits and behaviors, see [`Configuration`](crate::configuration::Configuration) and
//!   [`limits`].
//! - For writing a new variant, check out the [`RuleSet`](crate::rules::RuleSet) trait.
//!
//! Provider-specific HTTP clients are not part of this crate: plug them in by implementing
//! [`Transport`](crate::transport::Transport).
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use deduction_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     // Your HTTP client implementing `Transport`; a closure works too
//!     let transport: Arc<dyn Transport> = Arc::new(
//!         |_model: &str, _messages: &[ChatMessage]| -> Result<Completion, TransportError> {
//!             Ok(Completion::text("{\"choice\": \"abstain\"}"))
//!         },
//!     );
//!     let router = Arc::new(ProviderRouter::new().with_transport(Provider::Ollama, transport));
//!
//!     let limits = LimitsBuilder::new()
//!         .with_max_attempts(3)
//!         .with_max_rounds(20)
//!         .build()?;
//!     let config = Configuration::new().with_parallel_matches(2);
//!
//!     let scheduler = BatchScheduler::new(
//!         Arc::new(MafiaRules::new()),
//!         router,
//!         Arc::new(JsonLinesStore::new("records")),
//!         config,
//!         limits,
//!     )?;
//!
//!     let pool = ["llama3", "mistral", "qwen2", "openai/gpt-4o-mini", "claude/claude-3-5-haiku"]
//!         .map(ModelEntry::new);
//!     // 10 games per model, nobody idle for more than 5 matches, at most 100 matches
//!     let report = scheduler.run_batch(&pool, 10, 5, 100)?;
//!
//!     for (model, appearances) in &report.appearances {
//!         println!("{model}: {appearances}");
//!     }
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;

pub mod agent_proxy;
pub mod batch;
pub mod cancel;
pub mod configuration;
pub mod engine;
pub mod error;
pub mod limits;
mod logger;
mod match_runner;
pub mod model;
mod planner;
pub mod record;
pub mod retry;
pub mod rules;
pub mod schema;
pub mod seat;
pub mod transport;
pub mod usage;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use deduction_arena::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration) and
///   [`LimitsBuilder`](crate::limits::LimitsBuilder)
/// - [`BatchScheduler`](crate::batch::BatchScheduler) and
///   [`GameEngine`](crate::engine::GameEngine)
/// - all built-in [`variants`](crate::rules)
/// - transports, routing and record stores
pub mod prelude {
    pub use crate::agent_proxy::{AgentProxy, AttemptObserver};
    pub use crate::batch::{BatchReport, BatchScheduler};
    pub use crate::cancel::CancelToken;
    pub use crate::configuration::Configuration;
    pub use crate::engine::{EngineConfig, GameEngine, MatchSummary, StopReason};
    pub use crate::error::{ConfigurationError, TransportError};
    pub use crate::limits::{Limits, LimitsBuilder};
    pub use crate::model::{Model, ModelEntry, Provider};
    pub use crate::record::{JsonLinesStore, MemoryStore, RecordStore};
    pub use crate::retry::RetryPolicy;
    pub use crate::rules::bluff::BluffRules;
    pub use crate::rules::clones::CloneRules;
    pub use crate::rules::election::ElectionRules;
    pub use crate::rules::mafia::MafiaRules;
    pub use crate::rules::{RuleSet, Winner};
    pub use crate::seat::SeatSpec;
    pub use crate::transport::{ChatMessage, Completion, ModelRouter, ProviderRouter, Transport};
    pub use crate::usage::UsageTracker;
}
