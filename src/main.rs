use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quorate::config::Settings;
use quorate::ratelimit::{LimiterFactory, Protocol};
use quorate::store::{CounterStore, RedisStore};

#[derive(Parser)]
#[command(name = "quorate", version, about = "Tiered rate limiting")]
struct Cli {
    /// Settings file (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Http,
    Grpc,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Grpc => Protocol::Grpc,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run requests through the gate and print each decision
    Check {
        /// Caller identity
        #[arg(short, long)]
        identity: String,

        #[arg(short, long, value_enum, default_value_t = ProtocolArg::Http)]
        protocol: ProtocolArg,

        /// HTTP verb or full gRPC method name
        #[arg(short, long)]
        method: String,

        /// Request path, HTTP only
        #[arg(long, default_value = "")]
        path: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// Probe the configured counter store
    Health,

    /// Print the effective settings
    Config,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Command::Check {
            identity,
            protocol,
            method,
            path,
            count,
        } => check(settings, &identity, protocol.into(), &method, &path, count).await,
        Command::Health => health(settings).await,
        Command::Config => {
            print!("{}", serde_yaml::to_string(&settings)?);
            Ok(())
        }
    }
}

async fn check(
    settings: Settings,
    identity: &str,
    protocol: Protocol,
    method: &str,
    path: &str,
    count: u32,
) -> anyhow::Result<()> {
    let factory = LimiterFactory::from_settings(settings).await?;
    let gate = factory.build_gate()?;

    let mut allowed = 0;
    for i in 1..=count {
        let decision = gate.check(identity, protocol, method, path).await;
        if decision.is_allowed() {
            allowed += 1;
        }
        println!("{i}: {decision}");
    }

    info!(identity, allowed, denied = count - allowed, "Check finished");

    if let Some(store) = factory.store() {
        store.close().await?;
    }
    Ok(())
}

async fn health(settings: Settings) -> anyhow::Result<()> {
    let Some(store_config) = settings.store else {
        bail!("no counter store configured");
    };

    let store = RedisStore::connect(store_config).await?;
    let result = store.health_check().await;
    store.close().await?;

    match result {
        Ok(()) => {
            println!("ok");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Counter store health check failed");
            Err(e.into())
        }
    }
}
