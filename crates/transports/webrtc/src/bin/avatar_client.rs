//! Interactive avatar session client
//!
//! Starts a session, renders its stream headlessly and makes the avatar speak
//! every line typed on stdin.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin avatar_client -- \
//!   --api-url http://localhost:8000 \
//!   --avatar-id anna --quality high
//!
//! # Commands while active
//! /status    remote session status
//! /avatars   avatar / voice catalog
//! /pause     pause current speech
//! /stop      stop the session and exit
//! ```
//!
//! Ctrl-C releases local resources immediately, then terminates the remote
//! session on a best-effort basis.

use anyhow::{anyhow, Context};
use avatar_webrtc::{
    ClientConfig, HeadlessSurface, LifecycleState, Quality, SessionEvent, SessionLifecycle,
    TaskType, TurnServerConfig,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grace period for remote termination after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Live talking-avatar client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; CLI arguments override its fields
    #[arg(long, env = "AVATAR_CONFIG")]
    config: Option<PathBuf>,

    /// Session API base URL
    #[arg(long, env = "AVATAR_API_URL")]
    api_url: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "AVATAR_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "AVATAR_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Avatar to use (server default if omitted)
    #[arg(long, env = "AVATAR_ID")]
    avatar_id: Option<String>,

    /// Voice to use (server default if omitted)
    #[arg(long, env = "AVATAR_VOICE_ID")]
    voice_id: Option<String>,

    /// Stream quality: low, medium, high
    #[arg(long, env = "AVATAR_QUALITY")]
    quality: Option<QualityArg>,

    /// Negotiation timeout in seconds
    #[arg(long, env = "AVATAR_NEGOTIATION_TIMEOUT")]
    negotiation_timeout_secs: Option<u32>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "AVATAR_REQUEST_TIMEOUT")]
    request_timeout_secs: Option<u32>,

    /// Send the offer without waiting for ICE gathering
    #[arg(long, default_value_t = false, env = "AVATAR_SKIP_ICE_GATHERING")]
    skip_ice_gathering: bool,
}

/// Quality CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum QualityArg {
    Low,
    Medium,
    High,
}

impl From<QualityArg> for Quality {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Low => Quality::Low,
            QualityArg::Medium => Quality::Medium,
            QualityArg::High => Quality::High,
        }
    }
}

/// Parse TURN server string (format: turn:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        // Password may contain colons
        credential: parts[4..].join(":"),
    })
}

/// Build ClientConfig from an optional file plus CLI overrides
fn build_config_from_args(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(url) = &args.api_url {
        config.api_base_url = url.clone();
    }
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }
    if !args.turn_servers.is_empty() {
        config.turn_servers = args
            .turn_servers
            .iter()
            .map(|s| parse_turn_server(s))
            .collect::<Result<_, _>>()
            .map_err(|e| anyhow!("Failed to parse TURN server: {}", e))?;
    }
    if args.avatar_id.is_some() {
        config.avatar_id = args.avatar_id.clone();
    }
    if args.voice_id.is_some() {
        config.voice_id = args.voice_id.clone();
    }
    if let Some(quality) = args.quality {
        config.quality = quality.into();
    }
    if let Some(secs) = args.negotiation_timeout_secs {
        config.negotiation_timeout_secs = secs;
    }
    if let Some(secs) = args.request_timeout_secs {
        config.request_timeout_secs = secs;
    }
    if args.skip_ice_gathering {
        config.wait_for_ice_gathering = false;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,avatar_webrtc=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = build_config_from_args(&args)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        api = %config.api_base_url,
        quality = ?config.quality,
        "Avatar client starting"
    );

    let lifecycle = SessionLifecycle::new(&config, Arc::new(HeadlessSurface::new()))?;

    let mut events = lifecycle.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Failed { message, .. } => eprintln!("Error: {}", message),
                SessionEvent::StreamReady { render_target, .. } => {
                    eprintln!("Stream ready: {}", render_target)
                }
                other => debug!("Session event: {:?}", other),
            }
        }
    });

    let start = lifecycle.start();
    tokio::pin!(start);

    let session = tokio::select! {
        result = &mut start => result.map_err(|e| anyhow!(e.user_message()))?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received during start");
            shutdown(&lifecycle).await;
            // start() terminates a session the server created after stop()
            match tokio::time::timeout(SHUTDOWN_GRACE, start).await {
                Ok(result) => debug!("Interrupted start finished: {:?}", result.err()),
                Err(_) => warn!("Interrupted start did not finish within {:?}", SHUTDOWN_GRACE),
            }
            return Ok(());
        }
    };

    println!("Session Active");
    println!("Session ID: {}...", session.short_id());
    println!("Type a message and press Enter. /status, /avatars, /pause, /stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };

                match line.trim() {
                    "" => continue,
                    "/stop" | "/quit" => break,
                    "/status" => match lifecycle.status().await {
                        Ok(status) => println!(
                            "{} ({})",
                            status.message,
                            status.status().unwrap_or("unknown")
                        ),
                        Err(e) => eprintln!("Error: {}", e.user_message()),
                    },
                    "/avatars" => match lifecycle.list_avatars().await {
                        Ok(catalog) => println!("{}", serde_json::to_string_pretty(&catalog)?),
                        Err(e) => eprintln!("Error: {}", e.user_message()),
                    },
                    "/pause" => {
                        if let Err(e) = lifecycle.speak("", TaskType::Pause).await {
                            eprintln!("Error: {}", e.user_message());
                        }
                    }
                    text => {
                        if let Err(e) = lifecycle.speak(text, TaskType::Talk).await {
                            eprintln!("Error: {}", e.user_message());
                            if lifecycle.state() != LifecycleState::Active {
                                warn!("Session is no longer active");
                                break;
                            }
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                shutdown(&lifecycle).await;
                return Ok(());
            }
        }
    }

    lifecycle.stop().await;
    println!("Session stopped");
    Ok(())
}

/// Host disposal: local release happens before the first await inside stop()
async fn shutdown(lifecycle: &SessionLifecycle) {
    if tokio::time::timeout(SHUTDOWN_GRACE, lifecycle.stop())
        .await
        .is_err()
    {
        warn!("Remote termination did not finish within {:?}", SHUTDOWN_GRACE);
    }
}
