pub mod collaborator_traits;
pub mod repository_traits;

pub use collaborator_traits::{
    ChatMessenger, EffectExecutor, FrontendNotifier, PredicateResult, RestrictionPredicate,
    SystemCommandHandler, SystemCommandTriggerEvent,
};
pub use repository_traits::CustomCommandRepository;
