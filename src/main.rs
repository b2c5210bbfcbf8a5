use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use peercall::calls::loopback::{LoopbackDevices, LoopbackTransport, StaticTokenService};
use peercall::calls::{LoggingSignaling, Notice, SessionEvent, SessionState};
use peercall::token::TokenService;
use peercall::{CallSession, HttpTokenService, SessionConfig, UreqHttpClient};
use std::path::PathBuf;
use std::sync::Arc;

// Runs one call against the in-process loopback SFU.
//
// Usage:
//   cargo run -- --channel demo                       # 60s call, local tokens
//   cargo run -- -c demo -b 0                         # No duration limit, Ctrl-C to hang up
//   cargo run -- -c demo --no-camera                  # Audio-only
//   cargo run -- -c demo --token-url https://host/lease --token-auth SECRET

#[derive(Parser)]
#[command(name = "peercall")]
#[command(about = "Two-party call session demo over a loopback SFU")]
struct Cli {
    #[arg(short, long, default_value = "demo")]
    channel: String,

    /// Duration budget in seconds, 0 for unlimited.
    #[arg(short, long, default_value_t = 60)]
    budget_secs: i64,

    /// Lease endpoint. Leases are minted locally when absent.
    #[arg(long)]
    token_url: Option<String>,

    #[arg(long, requires = "token_url")]
    token_auth: Option<String>,

    #[arg(long)]
    no_camera: bool,

    /// JSON file with session settings.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(cli)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => {
            let json = tokio::fs::read_to_string(path).await?;
            SessionConfig::from_json(&json)?
        }
        None => SessionConfig::default(),
    };

    let tokens: Arc<dyn TokenService> = match &cli.token_url {
        Some(url) => {
            let mut service = HttpTokenService::new(Arc::new(UreqHttpClient::new()), url.clone());
            if let Some(auth) = &cli.token_auth {
                service = service.with_bearer_token(auth.clone());
            }
            Arc::new(service)
        }
        None => Arc::new(StaticTokenService::new(chrono::Duration::minutes(30))),
    };

    let session = CallSession::new(
        config,
        Arc::new(LoopbackTransport::new()),
        Arc::new(LoopbackDevices::new(!cli.no_camera)),
        Arc::new(LoggingSignaling),
        tokens,
    );

    let mut events = session.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::TrackSubscribed(track) => {
                    info!("Attach {} of {} ({})", track.kind, track.participant_id, track.track_id)
                }
                SessionEvent::TrackUnsubscribed {
                    participant_id,
                    kind,
                } => info!("Detach {kind} of {participant_id}"),
                SessionEvent::QualityChanged(quality) => info!("Network quality: {quality:?}"),
                SessionEvent::Notice(Notice::CameraUnavailable { reason }) => {
                    warn!("Camera unavailable ({reason}), continuing with audio only")
                }
                SessionEvent::Notice(Notice::CallEnded { reason }) => {
                    warn!("{}", reason.description())
                }
                SessionEvent::Ended {
                    reason,
                    elapsed_secs,
                } => {
                    info!("Call over after {elapsed_secs}s ({reason:?})");
                    break;
                }
                _ => {}
            }
        }
    });

    session.join(&cli.channel, cli.budget_secs).await?;

    let mut state = session.watch_state();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Hanging up");
            session.hangup().await;
        }
        _ = state.wait_for(|state| *state == SessionState::Ended) => {}
    }

    // Let the event printer catch up with the final events.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    Ok(())
}
