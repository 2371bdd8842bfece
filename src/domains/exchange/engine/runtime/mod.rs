// =====================================================
// Runtime - 매칭 엔진 런타임
// =====================================================
// 구조:
// - engine.rs: MatchingEngine (시작/정지, 워커 관리)
// - config.rs: EngineConfig (환경별 설정)
// - threads.rs: 워커 / 스위퍼 루프
// =====================================================

pub mod config;
pub mod engine;
pub mod threads;

pub use config::{EngineConfig, LedgerBackend};
pub use engine::MatchingEngine;
pub use threads::{match_worker_loop, sweeper_loop};
