// =====================================================
// Exchange 도메인
// =====================================================
// - models: 주문 / 예약 / 체결 / 호가
// - ledger: 원장 저장소 (메모리, PostgreSQL)
// - engine: 매칭, 정산, 워커 런타임
// - services: 주문 서비스
// =====================================================

pub mod models;
pub mod ledger;
pub mod engine;
pub mod services;
