// =====================================================
// 원장 저장소 모듈
// Ledger Store Module
// =====================================================
// 주문 / 예약 / 체결 원장에 대한 트랜잭션 단위 접근을 정의합니다.
//
// 구조:
// - LedgerStore: 풀 단위 연산 (트랜잭션 시작, 주문 생성/취소, 조회)
// - LedgerTx: 트랜잭션 하나 (행 잠금, 버전 비교 쓰기, 커밋 훅)
// - memory: 메모리 구현체 (테스트, 로컬 실행)
// - postgres: PostgreSQL 구현체
//
// 매칭 엔진과 정산 프로세스는 이 trait만 참조합니다.
// =====================================================

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domains::exchange::models::{
    Fill, NewOrder, Order, PriceLevel, Reservation, ReservationLegs,
};
use crate::shared::errors::LedgerResult;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// 커밋 성공 후 실행할 콜백
/// Callback run after a successful commit
pub type CommitHook = Box<dyn FnOnce() + Send + 'static>;

/// 원장 저장소 인터페이스
/// Ledger store interface
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// 트랜잭션 시작
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;

    /// 주문 생성
    async fn create_order(&self, new_order: &NewOrder) -> LedgerResult<Order>;

    /// 주문 ID로 조회
    async fn get_order(&self, order_id: i64) -> LedgerResult<Option<Order>>;

    /// 주문 취소 플래그 설정
    ///
    /// 알 수 없거나 이미 종료된 주문이면 `None`.
    /// 다른 트랜잭션이 행을 잡고 있으면 풀릴 때까지 기다립니다.
    async fn cancel_order(&self, order_id: i64) -> LedgerResult<Option<Order>>;

    /// 매칭 가능성이 있는 대상 주문 (반대편 최우선 가격과 교차), id 순
    /// Eligible, crossing-capable orders ordered by id
    async fn bulk_eligible_orders(&self, limit: usize) -> LedgerResult<Vec<Order>>;

    /// 체결이 없는 예약 ID 목록
    async fn unsettled_reservations(&self, limit: usize) -> LedgerResult<Vec<i64>>;

    /// 예약의 체결 조회
    async fn fill_for_reservation(&self, reservation_id: i64) -> LedgerResult<Option<Fill>>;

    /// 호가 집계 (가격, 방향 순)
    async fn depth_of_market(&self) -> LedgerResult<Vec<PriceLevel>>;
}

/// 원장 트랜잭션 인터페이스
/// One atomic unit of ledger work
///
/// 커밋/롤백 없이 drop 되면 롤백됩니다.
#[async_trait]
pub trait LedgerTx: Send {
    /// 대상 주문이면 즉시 배타 잠금 (다른 트랜잭션이 잡고 있으면 건너뜀)
    ///
    /// # Returns
    /// * `Some(order)` - 잠금 성공 + 매칭 대상
    /// * `None` - 잠겨 있거나 매칭 대상이 아님
    async fn lock_eligible_order(&mut self, order_id: i64) -> LedgerResult<Option<Order>>;

    /// 최우선 상대 주문 탐색 + 잠금 (잠긴 행은 건너뜀)
    ///
    /// # 정렬
    /// - 매수 주문 기준: 매도 가격 오름차순, id 오름차순
    /// - 매도 주문 기준: 매수 가격 내림차순, id 오름차순
    async fn find_best_counter_order(&mut self, order: &Order) -> LedgerResult<Option<Order>>;

    /// 두 주문을 예약 중으로 표시하고 예약 생성
    async fn reserve_pair(&mut self, buy: &Order, sell: &Order) -> LedgerResult<Reservation>;

    /// 예약과 양쪽 주문 로드
    async fn load_reservation(&mut self, reservation_id: i64) -> LedgerResult<Option<ReservationLegs>>;

    /// 주문의 누적 체결 수량 (모든 예약 합산)
    async fn sum_fills_for_order(&mut self, order_id: i64) -> LedgerResult<i64>;

    /// 버전 비교 후 주문 저장
    ///
    /// 버전이 다르거나 행이 다른 트랜잭션에 잡혀 있으면 `WriteConflict`.
    async fn save_order(&mut self, order: &Order) -> LedgerResult<Order>;

    /// 예약 종료 + 체결 기록 (버전 비교, 예약당 1건)
    async fn close_reservation(&mut self, reservation: &Reservation, quantity: i64) -> LedgerResult<Fill>;

    /// 커밋 후 콜백 등록 (롤백 시 실행 안 됨)
    fn after_commit(&mut self, hook: CommitHook);

    async fn commit(&mut self) -> LedgerResult<()>;

    async fn rollback(&mut self) -> LedgerResult<()>;
}
