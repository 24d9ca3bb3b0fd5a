#![allow(dead_code)]

use std::{collections::HashMap, ops::RangeInclusive, sync::Arc, thread, time::Duration};

use deduction_arena::{
    agent_proxy::AgentProxy,
    error::{ConfigurationError, TransportError},
    model::Model,
    retry::RetryPolicy,
    rules::{Action, LegalSet, Move, PhaseId, Resolution, RuleSet, SeatId, Setup, Winner},
    seat::{Role, Seat},
    transport::{ChatMessage, Completion, ModelRouter, ProviderRouter, Route, Transport},
};
use rand::rngs::SmallRng;
use tracing::{Level, Metadata};
use tracing_subscriber::{
    fmt,
    layer::{Context, Filter, SubscriberExt},
    Layer, Registry,
};

struct CustomLevelFilter;
impl<S> Filter<S> for CustomLevelFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() <= &Level::DEBUG
    }
}

pub fn init_debug_logger() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    let reg = Registry::default().with(
        fmt::layer()
            .with_test_writer()
            .event_format(format)
            .with_filter(CustomLevelFilter),
    );

    let _ = tracing::subscriber::set_global_default(reg);
}

/// Retries without pauses, so failing agents cost nothing.
pub fn quick_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        call_timeout: Duration::from_millis(500),
        max_attempts,
        delay: Duration::ZERO,
        budget: Duration::from_secs(5),
    }
}

pub fn answering(text: &'static str) -> Arc<dyn Transport> {
    Arc::new(move |_: &str, _: &[ChatMessage]| -> Result<Completion, TransportError> {
        Ok(Completion::text(text))
    })
}

pub fn failing() -> Arc<dyn Transport> {
    Arc::new(|_: &str, _: &[ChatMessage]| -> Result<Completion, TransportError> {
        Err(TransportError::Failed("connection refused".to_owned()))
    })
}

pub fn sleeping(duration: Duration) -> Arc<dyn Transport> {
    Arc::new(move |_: &str, _: &[ChatMessage]| -> Result<Completion, TransportError> {
        thread::sleep(duration);
        Ok(Completion::text("too late"))
    })
}

/// Plays the first card of its hand, and calls every play it is asked about.
pub fn bluff_player() -> Arc<dyn Transport> {
    Arc::new(|_: &str, messages: &[ChatMessage]| -> Result<Completion, TransportError> {
        let prompt = messages.last().map_or("", |m| m.content.as_str());
        let first_card = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Your hand: "))
            .and_then(|hand| hand.split(", ").next());
        Ok(Completion::text(match first_card {
            Some(card) => format!("{{\"played_cards\": [\"{card}\"]}}"),
            None => "{\"choice\": \"challenge\"}".to_owned(),
        }))
    })
}

/// Routes each model identifier to its own transport.
#[derive(Default)]
pub struct ByModel(HashMap<String, Arc<dyn Transport>>);

impl ByModel {
    pub fn with(mut self, model: &str, transport: Arc<dyn Transport>) -> Self {
        self.0.insert(model.to_owned(), transport);
        self
    }
}

impl ModelRouter for ByModel {
    fn resolve(&self, model: &Model) -> Result<Route, TransportError> {
        self.0
            .get(model.id())
            .map(|transport| Route {
                transport: transport.clone(),
                wire_model: model.wire_name().to_owned(),
            })
            .ok_or_else(|| TransportError::Unavailable {
                model: model.id().to_owned(),
            })
    }
}

pub fn proxy(router: impl ModelRouter + 'static) -> Arc<AgentProxy> {
    Arc::new(AgentProxy::new(Arc::new(router)))
}

pub fn proxy_for_all(transport: Arc<dyn Transport>) -> Arc<AgentProxy> {
    proxy(ProviderRouter::single(transport))
}

const SHOW: PhaseId = PhaseId("show");

/// Every seat raises its hand once, then the match is a draw.
#[derive(Debug, Clone)]
pub struct ShowOfHands {
    pub seats: RangeInclusive<usize>,
    /// Deals one role short, which no engine accepts.
    pub missing_role: bool,
}

impl Default for ShowOfHands {
    fn default() -> Self {
        Self {
            seats: 2..=4,
            missing_role: false,
        }
    }
}

impl RuleSet for ShowOfHands {
    type State = u32;

    fn variant(&self) -> &'static str {
        "show-of-hands"
    }

    fn seat_bounds(&self) -> RangeInclusive<usize> {
        self.seats.clone()
    }

    fn phases(&self) -> &[PhaseId] {
        &[SHOW]
    }

    fn setup(&self, seats: &[Seat], _rng: &mut SmallRng) -> Result<Setup<u32>, ConfigurationError> {
        let dealt = seats.len() - usize::from(self.missing_role);
        Ok(Setup {
            roles: seats.iter().take(dealt).map(|s| Role::plain(s.name())).collect(),
            state: 0,
        })
    }

    fn actors(&self, _phase: PhaseId, seats: &[Seat], _state: &u32) -> Vec<SeatId> {
        seats.iter().map(Seat::id).collect()
    }

    fn legal_actions(&self, _phase: PhaseId, _seat: &Seat, _seats: &[Seat], _state: &u32) -> LegalSet {
        LegalSet::binary("ja", "nein", Move::Ballot)
    }

    fn briefing(&self, seat: &Seat, _seats: &[Seat]) -> String {
        format!("You are {}", seat.name())
    }

    fn prompt(&self, _phase: PhaseId, _seat: &Seat, _seats: &[Seat], _state: &u32) -> String {
        "Raise your hand?".to_owned()
    }

    fn resolve(
        &self,
        _phase: PhaseId,
        actions: &[Action],
        _seats: &[Seat],
        state: &mut u32,
        _rng: &mut SmallRng,
    ) -> Resolution {
        *state += 1;
        Resolution::advance().event(format!("{} hands shown", actions.len()))
    }

    fn is_terminal(&self, _seats: &[Seat], state: &u32) -> Option<Winner> {
        (*state > 0).then_some(Winner::Draw)
    }
}
