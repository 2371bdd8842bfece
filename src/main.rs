use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use exchange_engine::domains::exchange::engine::{EngineConfig, LedgerBackend, MatchingEngine};
use exchange_engine::domains::exchange::ledger::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use exchange_engine::shared::database::Database;

// 로그 초기화 (RUST_LOG, 기본값 info)
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // 1. 설정 로드
    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;

    // 2. 원장 저장소 준비
    let store: Arc<dyn LedgerStore> = match config.backend {
        LedgerBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is not set")?;
            let db = Database::with_max_connections(url, config.db_max_connections).await?;
            db.initialize().await?;
            Arc::new(PgLedgerStore::new(db))
        }
        LedgerBackend::Memory => {
            warn!("Using in-memory ledger, state is lost on exit");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    // 3. 엔진 시작 + 최초 스윕
    let mut engine = MatchingEngine::new(store, config.clone(), Handle::current());
    engine.start().await.context("Failed to start matching engine")?;

    let admitted = engine.sweep(config.sweep_limit).await?;
    info!(admitted, workers = config.workers, "Matching engine is running");

    // 4. Ctrl-C 대기 후 정지
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    engine.stop().await.context("Failed to stop matching engine")?;
    Ok(())
}
