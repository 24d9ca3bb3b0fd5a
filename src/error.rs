//! Error taxonomy shared by the engine, the agent proxy and the batch scheduler.
//!
//! Only [`ConfigurationError`] is allowed to cross a component boundary as a hard failure.
//! Every other kind is absorbed by the layer able to recover from it: the
//! [`AgentProxy`](crate::agent_proxy::AgentProxy) turns [`AgentError`]s into fallback decisions,
//! and the [`GameEngine`](crate::engine::GameEngine) turns illegal moves into rule fallbacks.

use std::time::Duration;

use thiserror::Error;

/// A fatal misconfiguration. Aborts the affected match, or the whole batch when raised before
/// the first match.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The roster does not fit the rule set's declared seat bounds.
    #[error("{variant} needs between {min} and {max} seats, got {got}")]
    SeatCount {
        /// Rule set that rejected the roster.
        variant: String,
        /// Roster size.
        got: usize,
        /// Smallest legal roster.
        min: usize,
        /// Largest legal roster.
        max: usize,
    },

    /// The model pool cannot fill even the smallest legal roster.
    #[error("model pool has {pool} models but {variant} needs at least {required} seats")]
    PoolTooSmall {
        /// Rule set the batch plays.
        variant: String,
        /// Distinct models in the pool.
        pool: usize,
        /// Smallest legal roster of the rule set.
        required: usize,
    },

    /// The rule set has nothing to cycle through.
    #[error("{variant} declares no phases")]
    EmptyPhaseCycle {
        /// Offending rule set.
        variant: String,
    },

    /// Setup dealt a number of roles different from the number of seats.
    #[error("setup produced {roles} roles for {seats} seats")]
    RoleCount {
        /// Roles dealt.
        roles: usize,
        /// Seats at the table.
        seats: usize,
    },

    /// A rule set asked a seat to act in a phase where it declares nothing legal.
    #[error("no legal action for seat '{seat}' in phase '{phase}'")]
    NoLegalActions {
        /// Phase being played.
        phase: String,
        /// Name of the seat asked to act.
        seat: String,
    },

    /// The documented fallback of a rule set is not part of its own legal set.
    #[error("fallback for seat '{seat}' in phase '{phase}' is not a legal action")]
    IllegalFallback {
        /// Phase being played.
        phase: String,
        /// Name of the seat the fallback was computed for.
        seat: String,
    },

    /// A resolution jumped to a phase outside the declared cycle.
    #[error("transition to unknown phase '{phase}'")]
    UnknownPhase {
        /// Requested phase.
        phase: String,
    },
}

/// Failure reported by an agent transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No transport is registered that could serve this model.
    #[error("no transport available for model '{model}'")]
    Unavailable {
        /// Model identifier as configured.
        model: String,
    },

    /// Network, authentication or provider-side failure.
    #[error("transport failure: {0}")]
    Failed(String),
}

/// A response that does not match the requested schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Nothing but whitespace.
    #[error("response is empty")]
    Empty,

    /// Text without any JSON object where one is required.
    #[error("no JSON object found in response")]
    NoJson,

    /// An object was found but does not parse.
    #[error("malformed JSON: {0}")]
    Malformed(String),

    /// The object lacks the named field.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// Well-formed, but names a choice the schema does not admit.
    #[error("out of range: {0}")]
    OutOfRange(String),
}

/// Everything that can make a single agent call fail.
///
/// These never leave the agent proxy: they are counted as failed attempts, and exhaustion is
/// turned into a fallback decision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The transport failed before answering.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The call outlived its hard timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// An answer came back but does not fit the schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The cancellation token fired before or during the call.
    #[error("call cancelled")]
    Cancelled,

    /// Attempts or budget ran out.
    #[error("gave up after {attempts} attempts")]
    ExhaustedRetries {
        /// Attempts issued.
        attempts: u32,
    },
}
