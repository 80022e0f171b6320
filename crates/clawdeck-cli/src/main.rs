mod serve;
mod watch;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "clawdeck", about = "Assistant dashboard backend CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dashboard server (REST API + WebSocket + scheduler)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path (defaults to ~/.clawdeck/clawdeck.db)
        #[arg(long)]
        db: Option<String>,
    },
    /// Tail live dashboard events over the WebSocket
    Watch {
        /// Gateway WebSocket URL
        #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
        url: String,

        /// Bearer token for authentication
        #[arg(long)]
        token: Option<String>,
    },
    /// Check configuration and print a summary
    Health,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, db } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve::run_serve(port, db))?;
        }
        Commands::Watch { url, token } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(watch::run_watch(url, token))?;
        }
        Commands::Health => {
            let config = clawdeck_config::load_config().unwrap_or_default();
            println!("clawdeck is healthy");
            println!("  gateway: {}:{}", config.gateway.host, config.gateway.port);
            println!("  timezone: {}", config.scheduler.timezone);
            println!("  default model: {}", config.scheduler.default_model);
            println!("  weather location: {}", config.weather.location);
            println!(
                "  telegram target: {}",
                config.scheduler.telegram_target.as_deref().unwrap_or("(not set)")
            );
        }
    }

    Ok(())
}
