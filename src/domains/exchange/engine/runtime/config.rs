// =====================================================
// EngineConfig - 엔진 설정 (환경별)
// =====================================================
// 역할: 환경 변수에서 엔진 설정을 읽고, RUST_ENV 에 따라 기본값을 결정
//
// dev (로컬):
//   - 워커 4개, 스윕 1초마다 200건
//
// prod:
//   - 워커 = CPU 수, 스윕 0.5초마다 1000건
// =====================================================

use std::fmt::Display;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};

/// 원장 저장소 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(LedgerBackend::Postgres),
            "memory" => Ok(LedgerBackend::Memory),
            other => Err(anyhow!("Unknown ledger backend: {other}")),
        }
    }
}

/// 엔진 설정
///
/// # 사용 예시
/// ```
/// use exchange_engine::domains::exchange::engine::runtime::EngineConfig;
///
/// let config = EngineConfig::from_lookup(|key| match key {
///     "LEDGER_BACKEND" => Some("memory".to_string()),
///     "MATCH_WORKERS" => Some("2".to_string()),
///     _ => None,
/// })
/// .unwrap();
/// assert_eq!(config.workers, 2);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PostgreSQL 연결 문자열 (`DATABASE_URL`)
    pub database_url: Option<String>,
    /// `LEDGER_BACKEND` (postgres | memory)
    pub backend: LedgerBackend,
    /// `DB_MAX_CONNECTIONS`
    pub db_max_connections: u32,
    /// 매칭 워커 스레드 수 (`MATCH_WORKERS`)
    pub workers: usize,
    /// 스윕 1회 최대 적재 수 (`SWEEP_LIMIT`)
    pub sweep_limit: usize,
    /// 스윕 주기 (`SWEEP_INTERVAL_MS`)
    pub sweep_interval: Duration,
    /// 정산 최대 시도 횟수 (`SETTLEMENT_MAX_ATTEMPTS`)
    pub settlement_max_attempts: u32,
    /// 시작 시 복구할 미정산 예약 최대 수 (`RECOVERY_LIMIT`)
    pub recovery_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::dev()
    }
}

impl EngineConfig {
    /// 로컬 개발 기본값
    pub fn dev() -> Self {
        Self {
            database_url: None,
            backend: LedgerBackend::Postgres,
            db_max_connections: 10,
            workers: 4,
            sweep_limit: 200,
            sweep_interval: Duration::from_millis(1000),
            settlement_max_attempts: 3,
            recovery_limit: 1000,
        }
    }

    /// 프로덕션 기본값
    pub fn prod() -> Self {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        Self {
            database_url: None,
            backend: LedgerBackend::Postgres,
            db_max_connections: 32,
            workers: cpus,
            sweep_limit: 1000,
            sweep_interval: Duration::from_millis(500),
            settlement_max_attempts: 3,
            recovery_limit: 10_000,
        }
    }

    /// 환경 변수에서 설정 읽기
    ///
    /// # 환경 변수
    /// * `RUST_ENV` - "dev" 또는 "prod" (기본값: "dev")
    /// * 나머지는 필드 문서 참고
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 조회 함수로 설정 읽기
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = lookup("RUST_ENV").unwrap_or_else(|| "dev".to_string());
        let mut config = match env.as_str() {
            "prod" => Self::prod(),
            _ => Self::dev(),
        };

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Some(backend) = lookup("LEDGER_BACKEND") {
            config.backend = backend.parse()?;
        }
        config.db_max_connections = parse_var(&lookup, "DB_MAX_CONNECTIONS", config.db_max_connections)?;
        config.workers = parse_var(&lookup, "MATCH_WORKERS", config.workers)?;
        config.sweep_limit = parse_var(&lookup, "SWEEP_LIMIT", config.sweep_limit)?;
        config.sweep_interval = Duration::from_millis(parse_var(
            &lookup,
            "SWEEP_INTERVAL_MS",
            config.sweep_interval.as_millis() as u64,
        )?);
        config.settlement_max_attempts =
            parse_var(&lookup, "SETTLEMENT_MAX_ATTEMPTS", config.settlement_max_attempts)?;
        config.recovery_limit = parse_var(&lookup, "RECOVERY_LIMIT", config.recovery_limit)?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("MATCH_WORKERS must be at least 1");
        }
        if self.settlement_max_attempts == 0 {
            bail!("SETTLEMENT_MAX_ATTEMPTS must be at least 1");
        }
        if self.sweep_interval.is_zero() {
            bail!("SWEEP_INTERVAL_MS must be positive");
        }
        if self.backend == LedgerBackend::Postgres && self.database_url.is_none() {
            bail!("DATABASE_URL is required for the postgres ledger backend");
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid {key}={raw}: {e}")),
        None => Ok(default),
    }
}
