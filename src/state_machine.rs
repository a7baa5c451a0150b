//! Survey session state machine
//!
//! Pure transitions in the Elm style: `(session, message) -> (session', effects)`.
//! The runtime executes the effects; nothing in here touches storage or the network.

mod context;
mod effect;
pub mod event;
mod session;
pub(crate) mod transition;


pub use context::EngineContext;
pub use effect::{Effect, EngineFault};
pub use event::Inbound;
pub use session::{CloseReason, Session};
pub use transition::{transition, Outcome, TransitionError, TransitionResult};
