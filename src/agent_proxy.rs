//! Resilient agent calls.
//!
//! [`AgentProxy::request`] is the only way the engine talks to a model. It never fails: every
//! timeout, transport error or invalid reply is counted as a failed attempt, and once the
//! [`RetryPolicy`] is exhausted the caller's fallback is returned, tagged as such.
//!
//! Calls run on a detached worker thread so that a hung provider can be abandoned: the proxy
//! stops waiting at the deadline and whatever the worker eventually produces is dropped.

use std::{
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    error::{AgentError, TransportError},
    model::Model,
    retry::{retry_or_fallback, Decided, RetryPolicy},
    schema::ResponseSchema,
    transport::{ChatMessage, Completion, ModelRouter},
};

/// Granularity used to notice cancellation while waiting for a reply.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Who is asking, for observability.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Match the call belongs to.
    pub match_id: String,
    /// Seat display name.
    pub seat: String,
    /// Model answering the call.
    pub model: Model,
    /// Phase name, or `"reflection"`.
    pub phase: String,
}

/// What happened during one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Reply parsed and validated.
    Success,
    /// Reply received but rejected by the schema.
    Invalid(String),
    /// No reply before the deadline.
    Timeout,
    /// Transport reported an error.
    TransportFailure(String),
    /// Retries exhausted; the fallback was substituted. Reported once per request.
    Fallback,
}

/// One observability event.
#[derive(Debug, Clone)]
pub struct AttemptReport<'a> {
    /// Request the attempt belongs to.
    pub call: &'a CallContext,
    /// Attempt number, starting at 1. For `Fallback`, the number of attempts issued.
    pub attempt: u32,
    /// What happened.
    pub outcome: AttemptOutcome,
    /// Time since the request started.
    pub elapsed: Duration,
}

/// Receives every attempt of every request, to diagnose unstable models.
pub trait AttemptObserver: Send + Sync {
    /// Called once per attempt and once per fallback.
    fn observe(&self, report: &AttemptReport<'_>);
}

/// Default observer, logging through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AttemptObserver for TracingObserver {
    fn observe(&self, r: &AttemptReport<'_>) {
        let c = r.call;
        match &r.outcome {
            AttemptOutcome::Success => debug!(
                match_id = %c.match_id, seat = %c.seat, model = c.model.id(), phase = %c.phase,
                attempt = r.attempt, elapsed = ?r.elapsed, "agent answered"
            ),
            AttemptOutcome::Fallback => info!(
                match_id = %c.match_id, seat = %c.seat, model = c.model.id(), phase = %c.phase,
                attempts = r.attempt, "using fallback decision"
            ),
            failure => warn!(
                match_id = %c.match_id, seat = %c.seat, model = c.model.id(), phase = %c.phase,
                attempt = r.attempt, ?failure, "agent attempt failed"
            ),
        }
    }
}

/// A decision together with what the model actually said.
#[derive(Debug, Clone)]
pub struct Answer<T> {
    /// Validated answer, or the fallback.
    pub decision: Decided<T>,
    /// Last raw reply received, kept for audit even when the fallback was used.
    pub raw: Option<String>,
    /// Last reasoning trace received.
    pub reasoning: Option<String>,
    /// Attempts issued.
    pub attempts: u32,
}

/// Turns an unreliable model into a source of validated decisions.
#[derive(Clone)]
pub struct AgentProxy {
    router: Arc<dyn ModelRouter>,
    observer: Arc<dyn AttemptObserver>,
    cancel: CancelToken,
}

impl AgentProxy {
    /// Proxy logging attempts through `tracing`.
    pub fn new(router: Arc<dyn ModelRouter>) -> Self {
        Self {
            router,
            observer: Arc::new(TracingObserver),
            cancel: CancelToken::new(),
        }
    }

    /// Replaces the attempt observer.
    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Shares a cancellation token: once cancelled, requests return their fallback without
    /// calling the model.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token cancelling every call of this proxy.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Asks `call.model` for a decision matching `schema`.
    ///
    /// The schema's [`describe`](ResponseSchema::describe) text is appended to the last
    /// message. Never fails: returns `fallback` tagged [`Decided::Fallback`] once `policy` is
    /// exhausted.
    pub fn request<S: ResponseSchema>(
        &self,
        messages: &[ChatMessage],
        schema: &S,
        call: &CallContext,
        policy: &RetryPolicy,
        fallback: S::Output,
    ) -> Answer<S::Output> {
        let messages = with_instructions(messages, &schema.describe());
        let start = Instant::now();
        let mut raw = None;
        let mut reasoning = None;

        let outcome = retry_or_fallback(
            policy,
            &self.cancel,
            fallback,
            |_, timeout| {
                let completion = self.send_once(call, &messages, timeout)?;
                raw = Some(completion.content.clone());
                if completion.reasoning.is_some() {
                    reasoning = completion.reasoning;
                }
                Ok(schema.parse(&completion.content)?)
            },
            |attempt, error| {
                let outcome = match error {
                    AgentError::Timeout(_) => AttemptOutcome::Timeout,
                    AgentError::Transport(e) => AttemptOutcome::TransportFailure(e.to_string()),
                    other => AttemptOutcome::Invalid(other.to_string()),
                };
                self.observer.observe(&AttemptReport {
                    call,
                    attempt,
                    outcome,
                    elapsed: start.elapsed(),
                });
            },
        );

        let report = if outcome.decision.is_fallback() {
            AttemptOutcome::Fallback
        } else {
            AttemptOutcome::Success
        };
        self.observer.observe(&AttemptReport {
            call,
            attempt: outcome.attempts,
            outcome: report,
            elapsed: start.elapsed(),
        });

        Answer {
            decision: outcome.decision,
            raw,
            reasoning,
            attempts: outcome.attempts,
        }
    }

    /// One call with a hard deadline. The worker thread is left behind on timeout.
    fn send_once(
        &self,
        call: &CallContext,
        messages: &[ChatMessage],
        timeout: Duration,
    ) -> Result<Completion, AgentError> {
        let route = self.router.resolve(&call.model)?;
        let (tx, rx) = mpsc::channel();
        let messages = messages.to_vec();

        thread::Builder::new()
            .name(format!("agent-{}", call.seat))
            .spawn(move || {
                let result = route.transport.send(&route.wire_model, &messages, timeout);
                // receiver gone means the proxy gave up on this call
                let _ = tx.send(result);
            })
            .map_err(|e| AgentError::Transport(TransportError::Failed(e.to_string())))?;

        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AgentError::Timeout(timeout));
            }
            match rx.recv_timeout(WAIT_SLICE.min(deadline - now)) {
                Ok(result) => return Ok(result?),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(AgentError::Transport(TransportError::Failed(
                        "transport worker panicked".to_owned(),
                    )))
                }
            }
        }
    }
}

fn with_instructions(messages: &[ChatMessage], instructions: &str) -> Vec<ChatMessage> {
    let mut messages = messages.to_vec();
    match messages.last_mut() {
        Some(last) => {
            last.content.push_str("\n\n");
            last.content.push_str(instructions);
        }
        None => messages.push(ChatMessage::user(instructions)),
    }
    messages
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        schema::FreeText,
        transport::{ProviderRouter, Transport},
    };

    #[derive(Default)]
    struct Collect(Mutex<Vec<AttemptOutcome>>);

    impl AttemptObserver for Collect {
        fn observe(&self, report: &AttemptReport<'_>) {
            self.0.lock().unwrap().push(report.outcome.clone());
        }
    }

    fn call() -> CallContext {
        CallContext {
            match_id: "m".into(),
            seat: "Ann".into(),
            model: Model::new("llama3"),
            phase: "vote".into(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_millis(200),
            max_attempts: 3,
            delay: Duration::ZERO,
            budget: Duration::from_secs(5),
        }
    }

    fn proxy(transport: Arc<dyn Transport>, observer: Arc<Collect>) -> AgentProxy {
        AgentProxy::new(Arc::new(ProviderRouter::single(transport))).with_observer(observer)
    }

    #[test]
    fn instructions_are_appended_to_prompt() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let transport: Arc<dyn Transport> = Arc::new(move |_: &str, m: &[ChatMessage]| -> Result<Completion, TransportError> {
            *sink.lock().unwrap() = m.last().unwrap().content.clone();
            Ok(Completion::text("fine"))
        });
        let observer = Arc::new(Collect::default());
        let answer = proxy(transport, observer.clone()).request(
            &[ChatMessage::user("Who?")],
            &FreeText,
            &call(),
            &policy(),
            String::new(),
        );
        assert_eq!(answer.decision, Decided::Genuine("fine".to_owned()));
        assert!(seen.lock().unwrap().starts_with("Who?\n\n"));
        assert_eq!(*observer.0.lock().unwrap(), vec![AttemptOutcome::Success]);
    }

    #[test]
    fn transport_errors_then_fallback() {
        let transport: Arc<dyn Transport> =
            Arc::new(|_: &str, _: &[ChatMessage]| -> Result<Completion, TransportError> {
                Err(TransportError::Failed("503".into()))
            });
        let observer = Arc::new(Collect::default());
        let answer = proxy(transport, observer.clone()).request(
            &[ChatMessage::user("x")],
            &FreeText,
            &call(),
            &policy(),
            "abstain".to_owned(),
        );
        assert_eq!(answer.decision, Decided::Fallback("abstain".to_owned()));
        assert_eq!(answer.attempts, 3);
        assert!(answer.raw.is_none());
        let outcomes = observer.0.lock().unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes.last(), Some(&AttemptOutcome::Fallback));
    }

    #[test]
    fn raw_text_kept_on_fallback() {
        let transport: Arc<dyn Transport> =
            Arc::new(|_: &str, _: &[ChatMessage]| -> Result<Completion, TransportError> {
                Ok(Completion::text("   "))
            });
        let answer = proxy(transport, Arc::new(Collect::default())).request(
            &[],
            &FreeText,
            &call(),
            &policy(),
            "pass".to_owned(),
        );
        assert!(answer.decision.is_fallback());
        assert_eq!(answer.raw.as_deref(), Some("   "));
    }
}
