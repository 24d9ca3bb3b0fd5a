use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use deduction_arena::{
    agent_proxy::{AgentProxy, CallContext},
    cancel::CancelToken,
    model::Model,
    retry::{Decided, RetryPolicy},
    rules::{LegalSet, Move},
    transport::{ChatMessage, ProviderRouter},
};

mod common;

fn call() -> CallContext {
    CallContext {
        match_id: "proxy-test".to_owned(),
        seat: "Ann".to_owned(),
        model: Model::new("llama3"),
        phase: "election".to_owned(),
    }
}

fn ballot() -> LegalSet {
    LegalSet::binary("ja", "nein", Move::Ballot)
}

fn ask(proxy: &AgentProxy, policy: &RetryPolicy) -> deduction_arena::agent_proxy::Answer<Move> {
    proxy.request(
        &[ChatMessage::user("Vote.")],
        &ballot(),
        &call(),
        policy,
        Move::Ballot(false),
    )
}

#[test]
fn slow_agent_is_cut_at_the_call_timeout() {
    common::init_debug_logger();
    let proxy = common::proxy_for_all(common::sleeping(Duration::from_secs(3)));
    let policy = RetryPolicy {
        call_timeout: Duration::from_millis(100),
        max_attempts: 3,
        delay: Duration::ZERO,
        budget: Duration::from_secs(10),
    };

    let start = Instant::now();
    let answer = ask(&proxy, &policy);

    assert_eq!(answer.decision, Decided::Fallback(Move::Ballot(false)));
    assert_eq!(answer.attempts, 3);
    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
}

#[test]
fn budget_stops_retries_early() {
    let proxy = common::proxy_for_all(common::sleeping(Duration::from_secs(3)));
    let policy = RetryPolicy {
        call_timeout: Duration::from_secs(1),
        max_attempts: 10,
        delay: Duration::ZERO,
        budget: Duration::from_millis(300),
    };

    let start = Instant::now();
    let answer = ask(&proxy, &policy);

    assert!(answer.decision.is_fallback());
    assert_eq!(answer.attempts, 1);
    assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
}

#[test]
fn invalid_answers_use_every_attempt() {
    let proxy = common::proxy_for_all(common::answering("I would rather not say."));
    let answer = ask(&proxy, &common::quick_policy(4));

    assert_eq!(answer.decision, Decided::Fallback(Move::Ballot(false)));
    assert_eq!(answer.attempts, 4);
    assert_eq!(answer.raw.as_deref(), Some("I would rather not say."));
}

#[test]
fn answer_wrapped_in_prose_is_accepted() {
    let proxy = common::proxy_for_all(common::answering(
        "Let me think. ```json\n{\"choice\": \"JA\"}\n``` That is my vote.",
    ));
    let answer = ask(&proxy, &common::quick_policy(3));

    assert_eq!(answer.decision, Decided::Genuine(Move::Ballot(true)));
    assert_eq!(answer.attempts, 1);
}

#[test]
fn unroutable_model_falls_back() {
    let proxy = AgentProxy::new(Arc::new(ProviderRouter::new()));
    let answer = ask(&proxy, &common::quick_policy(2));

    assert_eq!(answer.decision, Decided::Fallback(Move::Ballot(false)));
    assert_eq!(answer.attempts, 2);
    assert!(answer.raw.is_none());
}

#[test]
fn cancelled_proxy_issues_no_call() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let proxy = AgentProxy::new(Arc::new(ProviderRouter::single(common::answering(
        "{\"choice\": \"ja\"}",
    ))))
    .with_cancel_token(cancel);

    let answer = ask(&proxy, &common::quick_policy(3));

    assert!(answer.decision.is_fallback());
    assert_eq!(answer.attempts, 0);
}
