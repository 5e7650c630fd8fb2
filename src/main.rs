//! WhatsApp relay - CLI entry point
//!
//! Serves the single- or multi-account facade, or runs the automation loop.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use whatsapp_relay::automation::Automation;
use whatsapp_relay::config::Config;
use whatsapp_relay::multi::{self, MultiState};
use whatsapp_relay::relay::{self, RelayState};
use whatsapp_relay::store::DEFAULT_REPLY_MESSAGE;
use whatsapp_relay::tools::{
    demo_report, ToolHarness, AUTOMATION_AVAILABLE_MARKER, BRIDGE_AVAILABLE_MARKER,
    SEND_SUCCESS_MARKER,
};
use whatsapp_relay::{api, store};

/// WhatsApp relay and auto-reply automation
#[derive(Parser)]
#[command(name = "whatsapp-relay")]
#[command(about = "Relay facade and keyword auto-replies in front of a WhatsApp bridge")]
struct Cli {
    /// Bridge base URL (overrides BRIDGE_URL)
    #[arg(long, global = true)]
    bridge_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the single-account facade
    Serve {
        /// Bind address (overrides RELAY_BIND)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Serve the multi-account facade
    ServeMulti {
        /// Bind address (overrides RELAY_BIND)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a single automation cycle and print its report
    Test,

    /// Run automation cycles until the duration elapses or Ctrl-C
    Continuous {
        /// Duration in minutes
        #[arg(default_value = "60")]
        minutes: u64,
    },

    /// Send one message to the target phone
    Send {
        /// Message text
        message: Option<String>,

        /// Recipient (defaults to TARGET_PHONE)
        #[arg(long)]
        to: Option<String>,
    },

    /// Show bridge and automation status
    Status,

    /// Drive the send/messages/status tools as an agent would
    Demo {
        /// Message used for the send scenario
        #[arg(long, default_value = "Bin kurz beschäftigt, melde mich gleich!")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout stays clean for command output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env()?;
    if let Some(url) = cli.bridge_url {
        config.bridge_url = url.trim_end_matches('/').to_string();
    }

    match cli.command {
        Commands::Serve { bind } => cmd_serve(config, bind).await,
        Commands::ServeMulti { bind } => cmd_serve_multi(config, bind).await,
        Commands::Test => cmd_test(&config).await,
        Commands::Continuous { minutes } => cmd_continuous(&config, minutes).await,
        Commands::Send { message, to } => cmd_send(&config, message, to).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Demo { message } => cmd_demo(&config, &message),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let addr = bind.unwrap_or_else(|| config.bind_addr.clone());
    info!(
        "WhatsApp relay starting (bridge {} in {} mode)",
        config.bridge_url, config.bridge_mode
    );

    let state = Arc::new(RelayState::new(&config));
    api::serve(relay::router(state), &addr, shutdown_signal()).await?;
    Ok(())
}

async fn cmd_serve_multi(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let addr = bind.unwrap_or_else(|| config.bind_addr.clone());
    info!("Multi-account WhatsApp relay starting");

    let state = Arc::new(MultiState::from_config(&config)?);
    let result = api::serve(multi::router(state.clone()), &addr, shutdown_signal()).await;

    state.shutdown().await;
    result?;
    Ok(())
}

async fn cmd_test(config: &Config) -> anyhow::Result<()> {
    let mut automation = Automation::new(config);
    let report = automation.run_cycle().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_continuous(config: &Config, minutes: u64) -> anyhow::Result<()> {
    let mut automation = Automation::new(config);
    automation
        .run_continuous(continuous_duration(minutes), shutdown_signal())
        .await;
    Ok(())
}

/// Minutes to run for; absurd values saturate instead of overflowing
fn continuous_duration(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

async fn cmd_send(
    config: &Config,
    message: Option<String>,
    to: Option<String>,
) -> anyhow::Result<()> {
    let automation = Automation::new(config);
    let text = message.unwrap_or_else(|| DEFAULT_REPLY_MESSAGE.to_string());

    let target = to
        .or_else(|| automation.target_phone().map(str::to_string))
        .context("no recipient: pass --to or set TARGET_PHONE")?;

    let available = automation.bridge().is_reachable().await;
    let sent = automation.send_message(&text, &target, available).await;
    println!("Message sent: {}", sent);
    Ok(())
}

async fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let automation = Automation::new(config);

    match automation.bridge().status().await {
        Ok(payload) => println!(
            "{} ({}) {}",
            BRIDGE_AVAILABLE_MARKER,
            config.bridge_url,
            payload
        ),
        Err(e) => println!("bridge: unavailable ({}) {}", config.bridge_url, e),
    }

    let state = automation.state();
    println!("{}", AUTOMATION_AVAILABLE_MARKER);
    println!("  config: {}", config.automation_config_file.display());
    println!("  state: {}", config.state_file.display());
    println!(
        "  processed ids: {}, replies sent: {}, messages processed: {}",
        state.processed_messages.len(),
        state.auto_replies_sent,
        state.total_messages_processed
    );
    if let Some(last) = state.last_check_time {
        println!("  last check: {}", last.to_rfc3339());
    }
    Ok(())
}

fn cmd_demo(config: &Config, message: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    let harness = ToolHarness::new(
        &std::env::current_exe()?,
        vec!["--bridge-url".to_string(), config.bridge_url.clone()],
    )
    .working_dir(&config.data_dir);
    let phone = config
        .target_phone
        .clone()
        .context("the demo needs TARGET_PHONE")?;

    println!("Scenario 1: agent sends a WhatsApp message");
    let sent = harness.send_message(message, &phone);
    println!("  success: {} (expects \"{}\")", sent.success, SEND_SUCCESS_MARKER);

    println!("Scenario 2: agent checks the bridge status");
    let status = harness.bridge_status();
    println!(
        "  bridge available: {}",
        status.details.get("bridge_available").unwrap_or(&serde_json::Value::Null)
    );

    println!("Scenario 3: agent fetches the last 5 messages");
    let messages = harness.get_messages(5);
    let count = messages
        .details
        .get("messages")
        .and_then(|m| m.as_array())
        .map(|m| m.len())
        .unwrap_or(0);
    println!("  {} messages found", count);

    let report = demo_report(&[&sent, &status, &messages]);
    let path = config.data_dir.join("demo_report.json");
    store::write_json_atomic(&path, &report)?;
    println!("Demo report saved: {}", path.display());
    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the handler can't be installed
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received, shutting down"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
