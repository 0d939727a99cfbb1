use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use waste_collection::app::accounts::RegisterInput;
use waste_collection::config::Config;
use waste_collection::domain::{parse_choice, Role};
use waste_collection::infra::LogNotificationSink;
use waste_collection::storage::InMemoryStorage;
use waste_collection::{logging, metrics, server, AppState};

#[derive(Parser)]
#[command(name = "waste_collection")]
#[command(about = "Municipal waste-collection management API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Path to a TOML config file (defaults to ./config.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Port to listen on, overriding the config file
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create an account with an explicit role
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// CITIZEN, DISPATCHER, DRIVER or ADMIN
        #[arg(long, default_value = "CITIZEN")]
        role: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn open_storage(config: &Config) -> anyhow::Result<InMemoryStorage> {
    Ok(match &config.storage.data_file {
        Some(path) => InMemoryStorage::open(path)?,
        None => {
            info!("No storage.data_file configured; data lives in memory only");
            InMemoryStorage::new()
        }
    })
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", config.server.host, port).parse()?;

    if let Some(metrics_port) = config.metrics.port {
        metrics::init_metrics(metrics_port);
    }

    let storage = open_storage(&config)?;
    let bootstrap = config.bootstrap.clone();
    let state = AppState::new(config, storage, Arc::new(LogNotificationSink));

    if let Some(admin) = bootstrap {
        if state.accounts().ensure_bootstrap_admin(&admin)? {
            info!("Created bootstrap administrator {}", admin.username);
        }
    }

    server::start_server(state, addr).await
}

fn create_user(
    config: Config,
    username: String,
    email: String,
    password: String,
    role: &str,
) -> anyhow::Result<()> {
    let role: Role = parse_choice(role).ok_or_else(|| anyhow::anyhow!("unknown role: {role}"))?;
    let storage = InMemoryStorage::open(config.storage.require_data_file()?)?;
    let state = AppState::new(config, storage, Arc::new(LogNotificationSink));
    let user = state.accounts().create_user(
        RegisterInput {
            username,
            email,
            password,
            first_name: String::new(),
            last_name: String::new(),
        },
        role,
    )?;
    println!("Created {} account {} ({})", user.role.as_str(), user.username, user.id);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Serve { config, .. } | Commands::CreateUser { config, .. } => config.clone(),
    };
    let config = Config::load(config_path.as_deref())?;
    let _guard = logging::init_logging(&config.logging);

    let result = match cli.command {
        Commands::Serve { port, .. } => serve(config, port).await,
        Commands::CreateUser {
            username,
            email,
            password,
            role,
            ..
        } => create_user(config, username, email, password, &role),
    };

    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}
