use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use tracing::info;

use triage_service::{build_router, CoordinationChoice, PersistenceChoice, ServiceConfig, ServiceState};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PersistenceMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CoordinationMode {
    Auto,
    Memory,
    Redis,
}

/// Fraud triage and case-resolution backend.
#[derive(Debug, Parser)]
#[command(name = "triage-service", version, about)]
struct Cli {
    /// Socket address to bind.
    #[arg(long, default_value = "0.0.0.0:8080", env = "PORT")]
    listen: SocketAddr,

    /// Relational store backend. `auto` picks postgres when DATABASE_URL is set.
    #[arg(long, value_enum, default_value_t = PersistenceMode::Auto)]
    persistence: PersistenceMode,

    /// PostgreSQL connection string for the relational store.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 10)]
    pg_max_connections: u32,

    /// Coordination store backend. `auto` picks redis when COORDINATION_STORE_URL is set.
    #[arg(long, value_enum, default_value_t = CoordinationMode::Auto)]
    coordination: CoordinationMode,

    /// Redis-compatible connection string backing the sliding-window rate limiter.
    #[arg(long, env = "COORDINATION_STORE_URL")]
    coordination_store_url: Option<String>,

    /// Shared secret operators present via the X-API-Key header.
    #[arg(long, env = "API_KEY")]
    api_key: String,

    /// Reserved toggle; the triage pipeline has no LLM dependency today.
    #[arg(long, default_value_t = false, env = "LLM_ENABLED")]
    llm_enabled: bool,
}

fn resolve_persistence(cli: &Cli) -> anyhow::Result<PersistenceChoice> {
    Ok(match cli.persistence {
        PersistenceMode::Memory => PersistenceChoice::Memory,
        PersistenceMode::Postgres => {
            let database_url = cli.database_url.clone().ok_or_else(|| {
                anyhow::anyhow!("--persistence=postgres requires --database-url or DATABASE_URL")
            })?;
            PersistenceChoice::Postgres {
                database_url,
                max_connections: cli.pg_max_connections,
            }
        }
        PersistenceMode::Auto => match cli.database_url.clone() {
            Some(database_url) => PersistenceChoice::Postgres {
                database_url,
                max_connections: cli.pg_max_connections,
            },
            None => PersistenceChoice::Memory,
        },
    })
}

fn resolve_coordination(cli: &Cli) -> anyhow::Result<CoordinationChoice> {
    Ok(match cli.coordination {
        CoordinationMode::Memory => CoordinationChoice::Memory,
        CoordinationMode::Redis => {
            let redis_url = cli.coordination_store_url.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "--coordination=redis requires --coordination-store-url or COORDINATION_STORE_URL"
                )
            })?;
            CoordinationChoice::Redis { redis_url }
        }
        CoordinationMode::Auto => match cli.coordination_store_url.clone() {
            Some(redis_url) => CoordinationChoice::Redis { redis_url },
            None => {
                tracing::warn!(
                    "no coordination store configured; rate limiter will fail open on every request"
                );
                CoordinationChoice::Memory
            }
        },
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "triage_service=info,tower_http=info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let persistence = resolve_persistence(&cli)?;
    let coordination = resolve_coordination(&cli)?;

    let config = ServiceConfig {
        persistence,
        coordination,
        api_key: cli.api_key,
        ..ServiceConfig::default()
    };

    info!(llm_enabled = cli.llm_enabled, "bootstrapping triage-service");
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("triage-service listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
