use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod console;
mod context;

use context::ServerContext;

#[derive(Parser, Debug, Clone)]
#[command(name = "chatcmd")]
#[command(author, version, about = "chatcmd - chat command dispatcher with a console chat simulator")]
pub struct Args {
    /// JSON file holding custom commands
    #[arg(long, env = "CHATCMD_COMMANDS_FILE", default_value = "commands.json")]
    pub commands_file: String,

    /// Optional dispatcher config (JSON)
    #[arg(long, env = "CHATCMD_CONFIG")]
    pub config: Option<String>,

    /// Overrides the cooldown sweep interval from the config
    #[arg(long, env = "CHATCMD_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: Option<u64>,

    /// Name used for console lines without a `name:` prefix
    #[arg(long, env = "CHATCMD_CONSOLE_USER", default_value = "viewer")]
    pub console_user: String,

    /// Capacity of the incoming chat queue
    #[arg(long, env = "CHATCMD_QUEUE_SIZE", default_value = "256")]
    pub queue_size: usize,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("chatcmd=info".parse().unwrap_or_default());
    fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!("chatcmd starting. commands_file={}", args.commands_file);

    let ctx = ServerContext::new(&args).await?;
    info!(
        "{} commands registered ({} system)",
        ctx.registry.len(),
        ctx.registry.get_system_commands().len()
    );
    info!("restriction types available: {:?}", ctx.restrictions.ids());

    let background = ctx.spawn_background_tasks();

    let (tx, rx) = mpsc::channel(args.queue_size.max(1));
    let dispatch_loop = ctx.dispatcher.clone().spawn_dispatch_loop(rx);
    let reader = console::spawn_console_reader(tx, args.console_user.clone(), ctx.event_bus.shutdown_rx.clone());

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to listen for ctrl-c => {:?}", e);
            }
            info!("Ctrl-C received, shutting down");
        }
        _ = reader => {
            info!("Console input ended, shutting down");
        }
    }

    ctx.event_bus.shutdown();
    if let Err(e) = dispatch_loop.await {
        error!("Dispatch loop ended abnormally => {:?}", e);
    }
    for handle in background {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally => {:?}", e);
        }
    }
    info!("chatcmd stopped");
    Ok(())
}
