// File: chatcmd-core/src/services/commands/mod.rs

pub mod cooldown;
pub mod dispatcher;
pub mod matcher;
pub mod registry;
pub mod restriction;

pub use cooldown::{CooldownRejection, CooldownReservation, CooldownScope, CooldownTracker};
pub use dispatcher::{DispatchOutcome, DispatchState, Dispatcher, RejectReason};
pub use matcher::{MatchStatus, MatchedCommand, TriggerMatcher};
pub use registry::{CommandRegistry, CommandRemovalListener, RegisteredCommand, SystemCommand};
pub use restriction::{RestrictionEvaluator, RestrictionOutcome, RestrictionRegistry};
