//! chatcmd-server/src/context.rs
//!
//! Builds every component once at startup and holds the references.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use chatcmd_common::traits::ChatMessenger;
use chatcmd_core::eventbus::{EventBus, EventBusNotifier};
use chatcmd_core::repositories::JsonFileCommandRepository;
use chatcmd_core::services::builtin_commands::register_builtin_commands;
use chatcmd_core::services::commands::{
    CommandRegistry, CooldownTracker, Dispatcher, RestrictionEvaluator, RestrictionRegistry,
};
use chatcmd_core::tasks::{spawn_cooldown_sweeper, spawn_usage_flusher};
use chatcmd_core::{DispatcherConfig, Error};

use crate::Args;
use crate::console::{ConsoleMessenger, LogNotifier, LoggingEffectExecutor};

pub struct ServerContext {
    pub event_bus: Arc<EventBus>,
    pub registry: Arc<CommandRegistry>,
    pub cooldowns: Arc<CooldownTracker>,
    pub restrictions: Arc<RestrictionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: DispatcherConfig,
}

impl ServerContext {
    pub async fn new(args: &Args) -> Result<Self, Error> {
        let mut config = match &args.config {
            Some(path) => {
                info!("Loading dispatcher config from {}", path);
                DispatcherConfig::from_file(path).await?
            }
            None => DispatcherConfig::default(),
        };
        if let Some(secs) = args.sweep_interval_secs {
            config.cooldown_sweep_interval_secs = secs;
        }

        let event_bus = Arc::new(EventBus::with_buffer_size(config.event_buffer_size));
        let messenger: Arc<dyn ChatMessenger> = Arc::new(ConsoleMessenger);

        let repo = Arc::new(JsonFileCommandRepository::new(&args.commands_file));
        let notifier = Arc::new(EventBusNotifier::wrapping(event_bus.clone(), Arc::new(LogNotifier)));
        let registry = Arc::new(CommandRegistry::new(repo).with_notifier(notifier));

        let cooldowns = Arc::new(CooldownTracker::new());
        registry.add_removal_listener(cooldowns.clone());

        register_builtin_commands(&registry, messenger.clone()).await?;
        let loaded = registry.load_custom_commands().await?;
        info!("{} custom commands loaded from {}", loaded, args.commands_file);

        let restrictions = Arc::new(RestrictionRegistry::new());
        let evaluator = RestrictionEvaluator::new(restrictions.clone(), messenger.clone(), event_bus.clone());

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            cooldowns.clone(),
            evaluator,
            Arc::new(LoggingEffectExecutor),
            messenger,
            event_bus.clone(),
            config.clone(),
        ));

        Ok(Self {
            event_bus,
            registry,
            cooldowns,
            restrictions,
            dispatcher,
            config,
        })
    }

    /// Cooldown sweeper and usage-count flusher. Both stop on event bus shutdown.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            spawn_cooldown_sweeper(
                self.cooldowns.clone(),
                self.registry.clone(),
                Duration::from_secs(self.config.cooldown_sweep_interval_secs),
                self.event_bus.shutdown_rx.clone(),
            ),
            spawn_usage_flusher(
                self.registry.clone(),
                Duration::from_secs(self.config.usage_flush_interval_secs),
                self.event_bus.shutdown_rx.clone(),
            ),
        ]
    }
}
