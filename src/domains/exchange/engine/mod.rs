// =====================================================
// 매칭 엔진 모듈
// Matching Engine Module
// =====================================================
// 양방향 지정가 주문을 원장 위에서 매칭하고 정산합니다.
//
// 구조:
// - admission: 매칭 대기열 (notify / sweep)
// - matcher: 매칭 규칙 (최우선 상대 주문 예약)
// - settlement: 정산 프로세스 (예약 → 체결)
// - runtime: 워커 풀, 스위퍼, 설정
// =====================================================

pub mod admission;
pub mod matcher;
pub mod settlement;
pub mod runtime;

pub use admission::AdmissionQueue;
pub use matcher::Matcher;
pub use settlement::{SettlementDispatcher, SettlementOutcome, SettlementPlan, SettlementProcess};
pub use runtime::{EngineConfig, LedgerBackend, MatchingEngine};
