//! selnet command line
//!
//! `selnet serve` runs an echo server on the reactor; `selnet send`
//! connects to one, sends each message over a reliable session and prints
//! the echoes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sn_core::config::{self, NetConfig};
use sn_core::NetError;
use sn_protocol::Packet;
use sn_reactor::event::run_cooperative;
use sn_reactor::{
    Acceptor, ChannelDispatcher, Connector, Demultiplexer, EventPump, EventQueue, PacketSink,
    Session, SessionManager, SessionRouter,
};

#[derive(Parser)]
#[command(name = "selnet")]
#[command(about = "Reactor-driven reliable sessions over TCP")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind or target address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an echo server
    Serve,

    /// Send messages to an echo server and print the replies
    Send {
        /// Seconds to wait for every echo
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,

        /// Messages to send, one packet each
        #[arg(required = true)]
        messages: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let mut config: NetConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                NetConfig::default()
            })
        } else {
            tracing::debug!("Using default configuration");
            NetConfig::default()
        }
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid address {:?}", config.bind_address))?;

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_listener(Arc::clone(&running))?;

    let demux = start_reactor(&config).context("Failed to start reactor")?;

    let result = match args.command {
        Command::Serve => serve(&config, &demux, addr, &running),
        Command::Send { timeout, messages } => send(
            &config,
            &demux,
            addr,
            messages,
            Duration::from_secs(timeout),
            &running,
        ),
    };

    demux.shutdown().context("Failed to stop reactor")?;
    result
}

/// Validate `config` and bring up the reactor thread
fn start_reactor(config: &NetConfig) -> Result<Demultiplexer, NetError> {
    config.validate()?;
    let demux = Demultiplexer::new(&config.reactor);
    demux.startup()?;
    Ok(demux)
}

/// Clear `running` on Ctrl+C or SIGTERM
fn spawn_signal_listener(running: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("selnet-signals".into())
        .spawn(move || {
            runtime.block_on(async {
                let ctrl_c = tokio::signal::ctrl_c();

                #[cfg(unix)]
                let terminate = async {
                    use tokio::signal::unix::{signal, SignalKind};
                    match signal(SignalKind::terminate()) {
                        Ok(mut stream) => {
                            stream.recv().await;
                        }
                        Err(e) => {
                            tracing::warn!("Failed to install SIGTERM handler: {}", e);
                            std::future::pending::<()>().await;
                        }
                    }
                };

                #[cfg(not(unix))]
                let terminate = std::future::pending::<()>();

                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("Received Ctrl+C, shutting down...");
                    }
                    _ = terminate => {
                        tracing::info!("Received SIGTERM, shutting down...");
                    }
                }
            });
            running.store(false, Ordering::Release);
        })
        .context("Failed to spawn signal thread")?;

    Ok(())
}

fn serve(config: &NetConfig, demux: &Demultiplexer, addr: SocketAddr, running: &AtomicBool) -> Result<()> {
    let queue = Arc::new(EventQueue::from_config(&config.pump));
    let dispatcher = Arc::new(ChannelDispatcher::new(Arc::clone(&queue)));
    let acceptor = Acceptor::bind(addr, demux, dispatcher, &config.transport)
        .with_context(|| format!("Failed to listen on {}", addr))?;

    let sessions = Arc::new(SessionManager::new());
    let router = SessionRouter::server(Arc::clone(&sessions), EchoSink);
    let mut pump = EventPump::from_config(queue, router, &config.pump);

    tracing::info!("Echo server ready on {}", acceptor.local_addr());
    run_cooperative(&mut [&mut pump], running, config.pump.idle_sleep);

    acceptor.close();
    for session in sessions.list() {
        session.disconnect();
    }
    tracing::info!("Echo server stopped");
    Ok(())
}

fn send(
    config: &NetConfig,
    demux: &Demultiplexer,
    addr: SocketAddr,
    messages: Vec<String>,
    timeout: Duration,
    running: &AtomicBool,
) -> Result<()> {
    let queue = Arc::new(EventQueue::from_config(&config.pump));
    let dispatcher = Arc::new(ChannelDispatcher::new(Arc::clone(&queue)));
    let connector = Connector::new(demux, dispatcher, &config.transport);

    let sessions = Arc::new(SessionManager::new());
    let router = SessionRouter::client(Arc::clone(&sessions), EchoCollector::new(messages));
    let mut pump = EventPump::from_config(queue, router, &config.pump);

    connector
        .connect(addr)
        .with_context(|| format!("Failed to connect to {}", addr))?;

    let deadline = Instant::now() + timeout;
    let outcome = loop {
        let collector = pump.handler().sink();
        if collector.is_done() {
            break Ok(());
        }
        if collector.lost {
            break Err(anyhow::anyhow!("Connection to {} lost", addr));
        }
        if !running.load(Ordering::Acquire) {
            break Err(anyhow::anyhow!("Interrupted"));
        }
        if Instant::now() >= deadline {
            break Err(anyhow::anyhow!(
                "Timed out with {} of {} echoes received",
                collector.received,
                collector.expected
            ));
        }
        pump.refresh_timeout(config.pump.idle_sleep);
    };

    for session in sessions.list() {
        session.disconnect();
    }
    outcome
}

/// Echoes every delivered packet back on the same session
struct EchoSink;

impl PacketSink for EchoSink {
    fn deliver(&mut self, session: &Arc<Session>, packet: Packet) {
        if let Err(e) = session.send(packet.payload().clone()) {
            tracing::warn!(session = %session.id(), "Echo failed: {}", e);
        }
    }

    fn session_opened(&mut self, session: &Arc<Session>) {
        tracing::info!(session = %session.id(), "Client connected");
    }
}

/// Sends queued messages once the session opens and prints echoes
struct EchoCollector {
    pending: Vec<String>,
    expected: usize,
    received: usize,
    lost: bool,
}

impl EchoCollector {
    fn new(messages: Vec<String>) -> Self {
        Self {
            expected: messages.len(),
            pending: messages,
            received: 0,
            lost: false,
        }
    }

    fn is_done(&self) -> bool {
        self.received >= self.expected
    }
}

impl PacketSink for EchoCollector {
    fn deliver(&mut self, _session: &Arc<Session>, packet: Packet) {
        println!("{}", String::from_utf8_lossy(packet.payload()));
        self.received += 1;
    }

    fn session_opened(&mut self, session: &Arc<Session>) {
        for message in self.pending.drain(..) {
            if let Err(e) = session.send(message.into_bytes()) {
                tracing::warn!("Failed to send message: {}", e);
            }
        }
    }

    fn session_lost(&mut self, _session: &Arc<Session>) {
        self.lost = true;
    }

    fn session_closed(&mut self, _session: &Arc<Session>) {
        self.lost = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_send() {
        let args = Args::try_parse_from(["selnet", "--bind", "127.0.0.1:9000", "send", "a", "b"]).unwrap();
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:9000"));
        match args.command {
            Command::Send { timeout, messages } => {
                assert_eq!(timeout, 10);
                assert_eq!(messages, vec!["a".to_string(), "b".to_string()]);
            }
            Command::Serve => panic!("expected send"),
        }
    }

    #[test]
    fn test_send_requires_messages() {
        assert!(Args::try_parse_from(["selnet", "send"]).is_err());
    }

    #[test]
    fn test_start_reactor_rejects_invalid_config() {
        let mut config = NetConfig::default();
        config.reactor.select_timeout = Duration::ZERO;
        assert!(matches!(start_reactor(&config), Err(NetError::Config(_))));
    }

    #[test]
    fn test_collector_done_after_all_echoes() {
        let mut collector = EchoCollector::new(vec!["x".into()]);
        assert!(!collector.is_done());
        collector.received = 1;
        assert!(collector.is_done());
    }
}
