use anyhow::Context;
use busride_execution::{AccountStore, Engine, LocalDecks, Memory, Sqlite};
use busride_server::{
    Api, Config, DeckSource, Decks, RateLimit, RemoteDecks, Server, ValidatedConfig,
};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_yaml::from_str::<Config>(&raw).context("failed to parse config file")?
        }
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    let config = config.validate().context("invalid configuration")?;

    // Create logger
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(config.log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(config.log_level)
            .init();
    }

    // Select deck provider
    let decks = match &config.deck {
        DeckSource::Local(Some(seed)) => Decks::Local(LocalDecks::new(*seed)),
        DeckSource::Local(None) => Decks::Local(LocalDecks::random()),
        DeckSource::Remote(url) => {
            info!(%url, "using remote deck provider");
            Decks::Remote(
                RemoteDecks::new(url.clone(), config.engine.call_timeout)
                    .context("failed to build deck API client")?,
            )
        }
    };

    // Open ledger
    match &config.database {
        Some(path) => {
            let ledger = Sqlite::open(path, config.starting_balance)
                .with_context(|| format!("failed to open ledger database {}", path.display()))?;
            serve(&config, decks, ledger).await
        }
        None => serve(&config, decks, Memory::new(config.starting_balance)).await,
    }
}

async fn serve<L: AccountStore + 'static>(
    config: &ValidatedConfig,
    decks: Decks,
    ledger: L,
) -> anyhow::Result<()> {
    let engine = Engine::new(decks, ledger, config.engine.clone());
    let server = Arc::new(Server::new(engine, config.admin_password.clone()));
    let api = Api::new(
        server,
        RateLimit {
            period: config.rate_limit_period,
            burst: config.rate_limit_burst,
        },
    );
    let app = api.router();

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
