//! Conduit Loopback - Channel Proxy Exerciser
//!
//! Joins two channel proxies with an in-process loopback channel, sends a
//! batch of messages from one to the other, and reports what came back.
//! Both transports are driven on a dedicated I/O thread; listener callbacks
//! run on the main runtime.
//!
//! # Usage
//!
//! ```bash
//! # Send 16 messages and print a summary
//! conduit-loopback
//!
//! # Intercept class 2 on the way back, emit JSON
//! conduit-loopback --messages 64 --class 2 --json
//!
//! # Channel settings from a file
//! conduit-loopback --config conduit.toml
//!
//! # Verbose logging
//! RUST_LOG=conduit_core=trace conduit-loopback
//! ```
//!
//! # Environment Variables
//!
//! - `CONDUIT_CONFIG`: Configuration file path
//! - `CONDUIT_CHANNEL_ID`, `CONDUIT_CHANNEL_MODE`, `CONDUIT_CREATE_IMMEDIATELY`,
//!   `CONDUIT_IO_THREAD`: used when no configuration file is given
//! - `RUST_LOG`: Log filter, overrides `--log-level`

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use conduit_core::{
    message_type, ChannelMode, ChannelProxy, IoThread, LoopbackFactory, Message, MessageClass,
    PeerId, ProxyConfig, RoutingId, Scheduler,
};

use demo::{ClassFilter, EchoFilter, Outcome, ReportingListener, Side};

/// Number of message classes the generated traffic cycles through
const CLASSES: u16 = 4;

/// Conduit Loopback - drive two channel proxies end to end
#[derive(Parser, Debug)]
#[command(name = "conduit-loopback")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of messages to send
    #[arg(short = 'n', long, default_value_t = 16)]
    messages: u32,

    /// Message class intercepted by a filter on the way back
    #[arg(long, value_name = "CLASS")]
    class: Option<u16>,

    /// Build the driver endpoint during init instead of on the I/O thread
    #[arg(long)]
    create_immediately: bool,

    /// Configuration file path
    #[arg(short = 'c', long, env = "CONDUIT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Give up waiting for echoes after this many milliseconds
    #[arg(long, default_value_t = 5000, value_name = "MS")]
    timeout_ms: u64,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CONDUIT_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Result of one run
#[derive(Debug, Default, Serialize)]
struct Summary {
    channel_id: String,
    peer: Option<u32>,
    sent: u32,
    echoed: usize,
    filtered: usize,
    errors: usize,
    complete: bool,
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "conduit_loopback={level},conduit_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<ProxyConfig> {
    let mut config = match &args.config {
        Some(path) => ProxyConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {path:?}"))?,
        None => ProxyConfig::from_env(),
    };
    if args.create_immediately {
        config.create_immediately = true;
    }
    config.validate()?;
    Ok(config)
}

/// The echo endpoint plays the opposite side of the driver
fn peer_mode(mode: ChannelMode) -> ChannelMode {
    match mode {
        ChannelMode::Server => ChannelMode::Client,
        ChannelMode::Client => ChannelMode::Server,
        ChannelMode::NamedServer => ChannelMode::NamedClient,
        ChannelMode::NamedClient => ChannelMode::NamedServer,
    }
}

async fn run(args: &Args, config: &ProxyConfig) -> Result<Summary> {
    let io = IoThread::spawn(&config.io_thread_name)?;
    let owner = Scheduler::current("main").context("No tokio runtime on the main thread")?;
    let (driver_end, echo_end) = LoopbackFactory::pair(&config.channel_id, PeerId(1), PeerId(2));

    let (tx, mut rx) = mpsc::unbounded_channel();

    // Echo side: everything is answered by its filter
    let echo_filter = Arc::new(EchoFilter::default());
    let mut echo = ChannelProxy::new(
        ReportingListener::new(Side::Echo, tx.clone()),
        owner.clone(),
        io.scheduler(),
    );
    echo.add_filter(echo_filter.clone());
    echo.init(Box::new(echo_end), peer_mode(config.mode), false)?;

    // Driver side
    let mut driver = ChannelProxy::new(
        ReportingListener::new(Side::Driver, tx.clone()),
        owner,
        io.scheduler(),
    );
    if let Some(class) = args.class {
        driver.add_filter(ClassFilter::new(MessageClass(class), tx.clone()));
    }
    driver.init(Box::new(driver_end), config.mode, config.create_immediately)?;
    drop(tx);

    for i in 0..args.messages {
        let class = MessageClass(u16::try_from(i % u32::from(CLASSES))?);
        let line = u16::try_from(i / u32::from(CLASSES)).context("Too many messages")?;
        let routing_id = RoutingId(i32::try_from(i).context("Too many messages")?);
        driver.send(Message::new(
            routing_id,
            message_type(class, line),
            format!("message {i}"),
        ));
    }
    info!(count = args.messages, "Messages queued");

    let mut summary = Summary {
        channel_id: config.channel_id.clone(),
        sent: args.messages,
        ..Summary::default()
    };

    let deadline = Instant::now() + Duration::from_millis(args.timeout_ms);
    let expected = args.messages as usize;
    while summary.echoed + summary.filtered < expected {
        let outcome = match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => break,
            Err(_) => {
                warn!(
                    echoed = summary.echoed,
                    filtered = summary.filtered,
                    "Timed out waiting for echoes"
                );
                break;
            }
        };

        match outcome {
            Outcome::Connected(Side::Driver, peer) => {
                info!(peer = ?peer, "Driver connected");
                summary.peer = peer.map(PeerId::as_u32);
            }
            Outcome::Connected(Side::Echo, peer) => debug!(peer = ?peer, "Echo side connected"),
            Outcome::Received(Side::Driver, _) => summary.echoed += 1,
            Outcome::Received(Side::Echo, message) => {
                warn!(routing_id = %message.routing_id(), "Echo side let a message through");
            }
            Outcome::Filtered(message) => {
                debug!(class = %message.class(), "Echo intercepted");
                summary.filtered += 1;
            }
            Outcome::Error(side) => {
                warn!(?side, "Channel reported an error");
                summary.errors += 1;
            }
        }
    }
    summary.complete = summary.echoed + summary.filtered == expected;

    driver.close();
    echo.close();
    info!(echoed = echo_filter.echoed(), "Echo side finished");
    io.shutdown();

    Ok(summary)
}

fn print_summary(summary: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("channel:  {}", summary.channel_id);
    match summary.peer {
        Some(peer) => println!("peer:     peer-{peer}"),
        None => println!("peer:     (not announced)"),
    }
    println!("sent:     {}", summary.sent);
    println!("echoed:   {}", summary.echoed);
    println!("filtered: {}", summary.filtered);
    if summary.errors > 0 {
        println!("errors:   {}", summary.errors);
    }
    if !summary.complete {
        println!("incomplete: some messages never came back");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_config(&args)?;
    info!(channel = %config.channel_id, mode = %config.mode, "Starting loopback run");

    let summary = run(&args, &config).await?;
    print_summary(&summary, args.json)?;

    if !summary.complete {
        anyhow::bail!(
            "Only {} of {} messages came back",
            summary.echoed + summary.filtered,
            summary.sent
        );
    }
    Ok(())
}
