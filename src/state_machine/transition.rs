//! Pure state transition function
//!
//! Given the connection's open session (if any) and an inbound message,
//! decide the new session and the ordered effects. No I/O happens here.
//!
//! Every storage effect precedes the first `Reply`, so a reply is only sent
//! once the state it describes has been written.

use super::context::EngineContext;
use super::effect::{Effect, EngineFault};
use super::event::Inbound;
use super::session::{CloseReason, Session};
use crate::matcher::MatchError;
use crate::tree::{Transition, Tree};
use thiserror::Error;

/// Whether the message belonged to this engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// No trigger and no open session; another handler may take it
    Unhandled,
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub outcome: Outcome,
    /// The connection's session after the message, open or just closed
    pub session: Option<Session>,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(session: Session) -> Self {
        Self {
            outcome: Outcome::Handled,
            session: Some(session),
            effects: vec![],
        }
    }

    pub fn unhandled() -> Self {
        Self {
            outcome: Outcome::Unhandled,
            session: None,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// Texts of all `Reply` effects, in order
    pub fn replies(&self) -> Vec<&str> {
        self.effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Reply { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Pure transition function
pub fn transition(
    session: Option<&Session>,
    context: &EngineContext,
    inbound: &Inbound,
) -> Result<TransitionResult, TransitionError> {
    // A trigger always (re)starts its tree, even mid-survey
    if let Some(tree) = context.catalog.find_by_trigger(&inbound.text) {
        return Ok(start_tree(session, context, tree, inbound));
    }

    let Some(session) = session.filter(|s| s.is_open()) else {
        return Ok(TransitionResult::unhandled());
    };

    if context.config.session_end_trigger.as_deref() == Some(inbound.text.as_str()) {
        let closed = session.closed(CloseReason::Canceled, inbound.received_at);
        return Ok(TransitionResult::new(closed.clone())
            .with_effects(Effect::close(closed, Some(&inbound.text)))
            .with_effect(Effect::reply(format!(
                "Your session with '{}' has ended",
                session.tree_trigger
            ))));
    }

    let Some(state_id) = session
        .state
        .as_deref()
        .filter(|id| context.catalog.state(id).is_some())
    else {
        let fault = EngineFault::UnknownState {
            state: session.state.clone().unwrap_or_default(),
        };
        return Ok(integrity_fault(session, fault, inbound));
    };

    let transitions = context.catalog.transitions_from(state_id);
    let mut found: Option<&Transition> = None;
    for candidate in &transitions {
        let Some(answer) = context.catalog.answer(&candidate.answer) else {
            continue;
        };
        if context.matcher.matches(answer, &inbound.text)? {
            found = Some(candidate);
            break;
        }
    }

    let result = match found {
        Some(transition) => advance(session, context, transition, inbound),
        None if transitions.is_empty() => {
            let fault = EngineFault::NoTransitionsFromState {
                state: state_id.to_string(),
            };
            integrity_fault(session, fault, inbound)
        }
        None => invalid_answer(session, context, state_id, inbound),
    };
    Ok(result)
}

/// Preempt any open session and open a new one at the tree's root
fn start_tree(
    existing: Option<&Session>,
    context: &EngineContext,
    tree: &Tree,
    inbound: &Inbound,
) -> TransitionResult {
    let mut effects = Vec::new();
    if let Some(previous) = existing.filter(|s| s.is_open()) {
        let closed = previous.closed(CloseReason::Canceled, inbound.received_at);
        effects.extend(Effect::close(closed, None));
    }

    let session = Session::open(
        inbound.new_session_id.clone(),
        inbound.connection_id.clone(),
        tree.trigger.clone(),
        tree.root_state.clone(),
        inbound.received_at,
    );
    effects.push(Effect::CreateSession {
        session: session.clone(),
    });
    effects.push(Effect::NotifyListeners {
        session: session.clone(),
        is_ending: false,
    });
    if let Some(prompt) = context.prompt(&tree.root_state) {
        effects.push(Effect::reply(prompt));
    }

    TransitionResult::new(session).with_effects(effects)
}

fn integrity_fault(session: &Session, fault: EngineFault, inbound: &Inbound) -> TransitionResult {
    let closed = session.closed(CloseReason::IntegrityFault, inbound.received_at);
    TransitionResult::new(closed.clone())
        .with_effect(Effect::ReportFault {
            session_id: session.id.clone(),
            fault,
        })
        .with_effects(Effect::close(closed, Some(&inbound.text)))
        .with_effect(Effect::reply("No messages found"))
}

fn invalid_answer(
    session: &Session,
    context: &EngineContext,
    state_id: &str,
    inbound: &Inbound,
) -> TransitionResult {
    let tries = session.num_tries + 1;
    let retry_limit = context
        .catalog
        .state(state_id)
        .and_then(|state| state.num_retries);

    if retry_limit.is_some_and(|limit| tries >= limit) {
        let mut closed = session.closed(CloseReason::RetriesExhausted, inbound.received_at);
        closed.num_tries = tries;
        return TransitionResult::new(closed.clone())
            .with_effects(Effect::close(closed, Some(&inbound.text)))
            .with_effect(Effect::reply(format!(
                "Sorry, invalid answer {tries} times. Your session will now end. \
                 Please try again later."
            )));
    }

    let updated = Session {
        num_tries: tries,
        last_modified: inbound.received_at,
        ..session.clone()
    };
    let reply = context
        .catalog
        .state_message(state_id)
        .and_then(|message| message.error_response.clone())
        .unwrap_or_else(|| context.invalid_answer_reply(state_id));

    TransitionResult::new(updated.clone())
        .with_effect(Effect::PersistSession { session: updated })
        .with_effect(Effect::reply(reply))
}

fn advance(
    session: &Session,
    context: &EngineContext,
    transition: &Transition,
    inbound: &Inbound,
) -> TransitionResult {
    let advanced = Session {
        state: Some(transition.next_state.clone()),
        num_tries: 0,
        last_modified: inbound.received_at,
        ..session.clone()
    };
    let record = Effect::RecordEntry {
        session_id: session.id.clone(),
        transition_id: transition.id.clone(),
        text: inbound.text.clone(),
        tags: transition.tags.clone(),
    };

    if context.catalog.is_terminal(&transition.next_state) {
        let closed = advanced.closed(CloseReason::Completed, inbound.received_at);
        let mut result = TransitionResult::new(closed.clone())
            .with_effect(record)
            .with_effects(Effect::close(closed, Some(&inbound.text)));
        if let Some(message) = context.catalog.state_message(&transition.next_state) {
            result = result.with_effect(Effect::reply(message.text.clone()));
        }
        return result;
    }

    let mut result = TransitionResult::new(advanced.clone())
        .with_effect(record)
        .with_effect(Effect::PersistSession { session: advanced });
    if let Some(prompt) = context.prompt(&transition.next_state) {
        result = result.with_effect(Effect::reply(prompt));
    }
    result
}
