use clap::{Parser, Subcommand};
use fin_api::{build_router, AppState};
use fin_config::ServerConfig;
use finsightd::{health_url, readiness_lines, shutdown_signal, HealthStatus, DAEMON_VERSION};

#[derive(Parser)]
#[command(
    name = "finsightd",
    version = DAEMON_VERSION,
    about = "FinSight backend server"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground
    Run {
        /// Port to bind to (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Query the health route of the configured address
    Status,
    /// Validate configuration and report which services are configured
    Check,
    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "finsightd=info,fin_api=info,fin_quota=info,tower_http=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { port } => {
            let mut config = ServerConfig::load()?;
            if let Some(port) = port {
                config.port = port;
                config.validate()?;
            }

            let state = AppState::new(config.clone())?.with_version(DAEMON_VERSION);
            let app = build_router(state);
            let addr = config.bind_addr();
            println!("FinSight backend running...");
            println!();
            println!("  API:  http://{}", addr);
            println!();
            tracing::info!("Listening on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            Ok(())
        }
        Commands::Status => {
            let config = ServerConfig::load()?;
            let url = health_url(&config);
            match reqwest::get(&url).await {
                Ok(resp) => {
                    let body: HealthStatus = resp.json().await?;
                    println!("Server is running ({})", body.status);
                    println!("Version:  {}", body.version);
                    println!("Database: {}", body.database);
                    println!("Checked:  {}", body.timestamp);
                }
                Err(_) => {
                    println!("Server is not reachable at {}", url);
                }
            }
            Ok(())
        }
        Commands::Check => {
            let config = ServerConfig::load()?;
            println!("Configuration is valid.");
            println!();
            println!("  Bind address:         {}", config.bind_addr());
            println!("  Allowed origins:      {}", config.allowed_origins.join(", "));
            if let Ok(path) = config.database_path() {
                println!("  Database path:        {}", path.display());
            }
            println!();
            for line in readiness_lines(&config.readiness()) {
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Version => {
            println!("finsightd {}", DAEMON_VERSION);
            Ok(())
        }
    }
}
