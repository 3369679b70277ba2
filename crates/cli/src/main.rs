mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    clap::{Parser, Subcommand},
    sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    courier_backend::HttpAgentBackend,
    courier_bridge::BridgeClientFactory,
    courier_cache::{Cache, MemoryCache, NoopCache},
    courier_common::{SessionKey, TracingActivityLog},
    courier_connector::{ConnectorDeps, ConnectorRegistry, DurableSessionStore},
    courier_gateway::ChannelService,
    courier_relay::{MessageRelay, StatusReconciler},
    courier_store::{SqliteConnectionStore, SqliteConversationStore, init_schema},
};

use config::CourierConfig;

#[derive(Parser)]
#[command(
    name = "courier",
    about = "Courier — QR-paired channel sessions relayed to a remote agent backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file path (default: ./courier.toml, then the user config dir).
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory override.
    #[arg(long, global = true, env = "COURIER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway until interrupted (default).
    Serve,
    /// Pair a session: print a QR code and wait for the scan.
    Connect {
        /// Session key, `tenant:agent`.
        #[arg(long)]
        session: String,
        /// Discard existing credentials and re-pair from scratch.
        #[arg(long, default_value_t = false)]
        force_new: bool,
    },
    /// Show reconciled connection status for a session.
    Status {
        #[arg(long)]
        session: String,
    },
    /// Unpair a session and purge its credentials.
    Disconnect {
        #[arg(long)]
        session: String,
    },
    /// Send a text message through a paired session.
    Send {
        #[arg(long)]
        session: String,
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        message: String,
    },
    /// List a session's conversations.
    Messages {
        #[arg(long)]
        session: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
}

struct App {
    service: ChannelService,
    registry: Arc<ConnectorRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with(fmt::layer())
        .init();

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let app = build_app(&config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&app).await,
        Commands::Connect { session, force_new } => connect(&app, &session, force_new).await,
        Commands::Status { session } => status(&app, &session).await,
        Commands::Disconnect { session } => disconnect(&app, &session).await,
        Commands::Send {
            session,
            to,
            message,
        } => send(&app, &session, &to, &message).await,
        Commands::Messages { session, page } => messages(&app, &session, page).await,
    }
}

async fn build_app(config: &CourierConfig) -> Result<App> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    std::fs::create_dir_all(config.sessions_dir())?;

    let options = SqliteConnectOptions::new()
        .filename(config.database_path())
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open database")?;
    init_schema(&pool).await?;

    let cache: Arc<dyn Cache> = if config.cache.enabled {
        Arc::new(MemoryCache::new())
    } else {
        Arc::new(NoopCache::new())
    };

    let connections = Arc::new(SqliteConnectionStore::new(pool.clone()));
    let conversations = Arc::new(SqliteConversationStore::new(pool));

    let mut backend = HttpAgentBackend::new(&config.backend.base_url);
    if let Some(token) = &config.backend.api_token {
        backend = backend.with_api_token(token);
    }

    let registry = Arc::new(ConnectorRegistry::new(ConnectorDeps {
        cache: Arc::clone(&cache),
        connections: Arc::clone(&connections) as Arc<dyn courier_store::ConnectionStore>,
        sessions: DurableSessionStore::new(config.sessions_dir()),
        factory: Arc::new(BridgeClientFactory::new(&config.bridge.url)),
    }));

    let relay = Arc::new(MessageRelay::new(
        Arc::new(backend),
        Arc::clone(&conversations) as Arc<dyn courier_store::ConversationStore>,
        Arc::clone(&cache),
        Arc::new(TracingActivityLog),
    ));

    let service = ChannelService::new(
        Arc::clone(&registry),
        relay,
        StatusReconciler::new(Arc::clone(&connections) as Arc<dyn courier_store::ConnectionStore>),
        Arc::clone(&conversations) as Arc<dyn courier_store::ConversationStore>,
        Arc::new(TracingActivityLog),
    );

    Ok(App { service, registry })
}

fn parse_session(session: &str) -> Result<SessionKey> {
    session
        .parse()
        .map_err(|e: String| anyhow::anyhow!("invalid --session (expected tenant:agent): {e}"))
}

async fn serve(app: &App) -> Result<()> {
    info!("courier gateway running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    app.registry.shutdown_all().await;
    Ok(())
}

async fn connect(app: &App, session: &str, force_new: bool) -> Result<()> {
    let key = parse_session(session)?;
    let result = app.service.connect(&key, force_new).await?;

    if result.already_connected {
        println!("session {key} is already connected");
        return Ok(());
    }

    match result.qr_payload.as_deref() {
        Some(payload) => {
            println!("scan this code with the phone to pair {key}:");
            print_terminal_qr(payload)?;
        },
        None => bail!("no QR payload produced"),
    }

    // Poll until the scan lands or the pairing window closes.
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = app.service.status(&key).await?;
        if status.report.connected {
            println!(
                "paired: {}",
                status.report.phone_number.as_deref().unwrap_or("unknown number")
            );
            app.registry.shutdown_all().await;
            return Ok(());
        }
    }
    bail!("pairing was not completed in time")
}

async fn status(app: &App, session: &str) -> Result<()> {
    let key = parse_session(session)?;
    let status = app.service.status(&key).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn disconnect(app: &App, session: &str) -> Result<()> {
    let key = parse_session(session)?;
    let response = app.service.disconnect(&key).await?;
    println!("{}", response.message);
    Ok(())
}

async fn send(app: &App, session: &str, to: &str, message: &str) -> Result<()> {
    let key = parse_session(session)?;

    // Restore the session from its durable artifacts; this process is
    // short-lived, so a QR-less restore is required.
    let result = app.service.connect(&key, false).await?;
    if !result.already_connected {
        bail!("session {key} is not paired; run `courier connect --session {key}` first");
    }

    let message_id = app.service.send(&key, to, message).await?;
    println!("sent: {message_id}");
    app.registry.shutdown_all().await;
    Ok(())
}

async fn messages(app: &App, session: &str, page: u32) -> Result<()> {
    let key = parse_session(session)?;
    let page = app.service.list_messages(&key, page).await?;

    if page.conversations.is_empty() {
        println!("no conversations");
        return Ok(());
    }
    for conversation in &page.conversations {
        println!(
            "{}  {:12}  {:8}  {} turns",
            conversation.contact_address,
            conversation.contact_name.as_deref().unwrap_or("-"),
            conversation.status.as_str(),
            conversation.transcript.len(),
        );
    }
    Ok(())
}

/// Render a pairing payload as a scannable code in the terminal.
fn print_terminal_qr(payload: &str) -> Result<()> {
    let code = qrcode::QrCode::new(payload.as_bytes())?;
    let rendered = code
        .render::<qrcode::render::unicode::Dense1x2>()
        .quiet_zone(true)
        .build();
    println!("{rendered}");
    Ok(())
}
