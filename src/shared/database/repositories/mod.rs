// =====================================================
// 원장 리포지토리
// =====================================================
// 풀 단위 메서드는 &self (PgPool) 를,
// 트랜잭션 안에서 쓰는 함수는 &mut PgConnection 을 받습니다.
// =====================================================

pub mod order_repository;
pub mod reservation_repository;
pub mod fill_repository;

pub use order_repository::OrderRepository;
pub use reservation_repository::ReservationRepository;
pub use fill_repository::FillRepository;
