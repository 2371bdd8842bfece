// =====================================================
// 통합 테스트 공통 헬퍼
// =====================================================
// 목적: 모든 통합 테스트에서 공통으로 사용하는 셋업 함수 제공
//
// 사용법:
// ```rust
// mod common;
// use common::*;
//
// #[tokio::test]
// async fn test_something() {
//     let ledger = setup_ledger();
//     // 테스트 코드...
// }
// ```
// =====================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;

use exchange_engine::domains::exchange::engine::{
    AdmissionQueue, EngineConfig, LedgerBackend, Matcher, SettlementDispatcher, SettlementProcess,
};
use exchange_engine::domains::exchange::ledger::{CommitHook, InMemoryLedgerStore, LedgerStore, LedgerTx};
use exchange_engine::domains::exchange::models::{
    Fill, NewOrder, Order, OrderSide, PriceLevel, Reservation, ReservationLegs,
};
use exchange_engine::shared::errors::{LedgerError, LedgerResult};

pub const MAX_ATTEMPTS: u32 = 3;

pub fn price(value: i64) -> Decimal {
    Decimal::new(value, 0)
}

/// 메모리 원장 + 대기열 + 정산 프로세스 묶음
pub struct TestLedger {
    pub store: InMemoryLedgerStore,
    pub shared: Arc<dyn LedgerStore>,
    pub queue: AdmissionQueue,
    pub settlement: Arc<SettlementProcess>,
}

/// 테스트 전 초기화 (메모리 원장)
pub fn setup_ledger() -> TestLedger {
    let store = InMemoryLedgerStore::new();
    setup_with_store(store.clone(), Arc::new(store))
}

/// 임의의 저장소 구현으로 초기화 (장애 주입용)
pub fn setup_with_store(store: InMemoryLedgerStore, shared: Arc<dyn LedgerStore>) -> TestLedger {
    let queue = AdmissionQueue::new(Arc::clone(&shared));
    let settlement = Arc::new(SettlementProcess::new(Arc::clone(&shared), queue.clone(), MAX_ATTEMPTS));
    TestLedger { store, shared, queue, settlement }
}

impl TestLedger {
    pub async fn place(&self, side: OrderSide, price_value: i64, quantity: i64) -> Order {
        self.shared
            .create_order(&NewOrder::new(side, price(price_value), quantity))
            .await
            .expect("Failed to create order")
    }

    pub async fn order(&self, order_id: i64) -> Order {
        self.shared
            .get_order(order_id)
            .await
            .expect("Failed to fetch order")
            .expect("order should exist")
    }

    /// 정산을 실행하지 않는 매처
    pub fn idle_matcher(&self) -> Matcher {
        Matcher::new(Arc::clone(&self.shared), SettlementDispatcher::from_fn(|_| {}))
    }

    /// 대기열 비우기
    pub fn drain_queue(&self) -> Vec<Order> {
        let mut drained = Vec::new();
        while let Some(order) = self.queue.try_take() {
            drained.push(order);
        }
        drained
    }
}

/// 두 주문을 직접 예약 (매칭 규칙 우회, 정산은 실행 안 함)
pub async fn reserve_directly(store: &dyn LedgerStore, buy_id: i64, sell_id: i64) -> Reservation {
    let mut tx = store.begin().await.expect("Failed to begin");
    let buy = tx
        .lock_eligible_order(buy_id)
        .await
        .expect("Failed to lock buy")
        .expect("buy order should be eligible");
    let sell = tx
        .lock_eligible_order(sell_id)
        .await
        .expect("Failed to lock sell")
        .expect("sell order should be eligible");
    let reservation = tx.reserve_pair(&buy, &sell).await.expect("Failed to reserve pair");
    tx.commit().await.expect("Failed to commit reservation");
    reservation
}

/// 교차 가능한 주문이 없어질 때까지 매칭 + 정산을 순차 실행
pub async fn drain_book(ledger: &TestLedger) {
    let matcher = ledger.idle_matcher();
    loop {
        let orders = ledger.shared.bulk_eligible_orders(usize::MAX).await.expect("sweep query failed");
        let mut progressed = false;
        for order in orders {
            if let Some(reservation) = matcher.reserve(&order).await.expect("reserve failed") {
                ledger.settlement.settle(reservation.id).await.expect("settle failed");
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

/// 엔진 테스트용 설정 (메모리 원장, 짧은 스윕 주기)
pub fn test_config(workers: usize) -> EngineConfig {
    EngineConfig {
        backend: LedgerBackend::Memory,
        workers,
        sweep_limit: 500,
        sweep_interval: Duration::from_millis(20),
        ..EngineConfig::dev()
    }
}

/// 조건이 참이 될 때까지 대기
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 예약 중인 주문이 없고, 모든 예약이 정산됐고, 호가가 교차하지 않음
pub fn is_quiescent(store: &InMemoryLedgerStore) -> bool {
    let orders = store.orders();
    let fills = store.fills();
    let reservations = store.reservations();

    orders.iter().all(|o| !o.on_execution)
        && reservations.len() == fills.len()
        && !book_is_crossed(&orders)
}

pub fn book_is_crossed(orders: &[Order]) -> bool {
    let best_bid = orders
        .iter()
        .filter(|o| o.is_eligible() && o.side == OrderSide::Buy)
        .map(|o| o.price)
        .max();
    let best_ask = orders
        .iter()
        .filter(|o| o.is_eligible() && o.side == OrderSide::Sell)
        .map(|o| o.price)
        .min();

    matches!((best_bid, best_ask), (Some(bid), Some(ask)) if bid >= ask)
}

/// 원장 불변식 검사
///
/// - 예약은 매수 1 + 매도 1, 가격 교차
/// - 예약당 체결 최대 1건
/// - 잔량 = 수량 - 누적 체결, 전량체결 ⇔ 잔량 0 (예약 중이 아닌 주문)
pub fn assert_ledger_consistent(store: &InMemoryLedgerStore) {
    let orders = store.orders();
    let reservations = store.reservations();
    let fills = store.fills();

    let find = |id: i64| orders.iter().find(|o| o.id == id).expect("order referenced by reservation");

    for reservation in &reservations {
        let buy = find(reservation.buy_order_id);
        let sell = find(reservation.sell_order_id);
        assert_eq!(buy.side, OrderSide::Buy, "reservation {} buy leg", reservation.id);
        assert_eq!(sell.side, OrderSide::Sell, "reservation {} sell leg", reservation.id);
        assert!(buy.price >= sell.price, "reservation {} does not cross", reservation.id);
        assert!(
            fills.iter().filter(|f| f.reservation_id == reservation.id).count() <= 1,
            "reservation {} has more than one fill",
            reservation.id
        );
    }

    for order in &orders {
        let filled: i64 = fills
            .iter()
            .filter(|f| {
                reservations
                    .iter()
                    .any(|r| r.id == f.reservation_id && r.involves(order.id))
            })
            .map(|f| f.quantity)
            .sum();

        assert!(filled <= order.quantity, "order {} over-filled", order.id);
        if !order.on_execution {
            assert_eq!(order.quantity_leftover, order.quantity - filled, "order {} leftover", order.id);
            assert_eq!(order.fully_executed, order.quantity_leftover == 0, "order {} fully_executed", order.id);
        }
    }
}

// =====================================================
// 장애 주입 저장소
// =====================================================

/// 메모리 원장을 감싸서 특정 연산에 에러를 주입
#[derive(Clone)]
pub struct FaultyStore {
    inner: InMemoryLedgerStore,
    /// 남은 save_order 충돌 횟수
    pub save_conflicts: Arc<AtomicU32>,
    /// lock_eligible_order 에서 일반 에러를 내는 주문
    pub failing_order: Option<i64>,
    /// lock_eligible_order 에서 치명적 에러를 내는 주문
    pub fatal_order: Option<i64>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryLedgerStore) -> Self {
        Self {
            inner,
            save_conflicts: Arc::new(AtomicU32::new(0)),
            failing_order: None,
            fatal_order: None,
        }
    }

    pub fn inject_save_conflicts(&self, count: u32) {
        self.save_conflicts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        Ok(Box::new(FaultyTx {
            inner: self.inner.begin().await?,
            save_conflicts: Arc::clone(&self.save_conflicts),
            failing_order: self.failing_order,
            fatal_order: self.fatal_order,
        }))
    }

    async fn create_order(&self, new_order: &NewOrder) -> LedgerResult<Order> {
        self.inner.create_order(new_order).await
    }

    async fn get_order(&self, order_id: i64) -> LedgerResult<Option<Order>> {
        self.inner.get_order(order_id).await
    }

    async fn cancel_order(&self, order_id: i64) -> LedgerResult<Option<Order>> {
        self.inner.cancel_order(order_id).await
    }

    async fn bulk_eligible_orders(&self, limit: usize) -> LedgerResult<Vec<Order>> {
        self.inner.bulk_eligible_orders(limit).await
    }

    async fn unsettled_reservations(&self, limit: usize) -> LedgerResult<Vec<i64>> {
        self.inner.unsettled_reservations(limit).await
    }

    async fn fill_for_reservation(&self, reservation_id: i64) -> LedgerResult<Option<Fill>> {
        self.inner.fill_for_reservation(reservation_id).await
    }

    async fn depth_of_market(&self) -> LedgerResult<Vec<PriceLevel>> {
        self.inner.depth_of_market().await
    }
}

struct FaultyTx {
    inner: Box<dyn LedgerTx>,
    save_conflicts: Arc<AtomicU32>,
    failing_order: Option<i64>,
    fatal_order: Option<i64>,
}

#[async_trait]
impl LedgerTx for FaultyTx {
    async fn lock_eligible_order(&mut self, order_id: i64) -> LedgerResult<Option<Order>> {
        if self.fatal_order == Some(order_id) {
            return Err(LedgerError::UnknownSide("HOLD".to_string()));
        }
        if self.failing_order == Some(order_id) {
            return Err(LedgerError::InvalidOrder("injected fault".to_string()));
        }
        self.inner.lock_eligible_order(order_id).await
    }

    async fn find_best_counter_order(&mut self, order: &Order) -> LedgerResult<Option<Order>> {
        self.inner.find_best_counter_order(order).await
    }

    async fn reserve_pair(&mut self, buy: &Order, sell: &Order) -> LedgerResult<Reservation> {
        self.inner.reserve_pair(buy, sell).await
    }

    async fn load_reservation(&mut self, reservation_id: i64) -> LedgerResult<Option<ReservationLegs>> {
        self.inner.load_reservation(reservation_id).await
    }

    async fn sum_fills_for_order(&mut self, order_id: i64) -> LedgerResult<i64> {
        self.inner.sum_fills_for_order(order_id).await
    }

    async fn save_order(&mut self, order: &Order) -> LedgerResult<Order> {
        let injected = self
            .save_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerError::WriteConflict { entity: "order", id: order.id });
        }
        self.inner.save_order(order).await
    }

    async fn close_reservation(&mut self, reservation: &Reservation, quantity: i64) -> LedgerResult<Fill> {
        self.inner.close_reservation(reservation, quantity).await
    }

    fn after_commit(&mut self, hook: CommitHook) {
        self.inner.after_commit(hook);
    }

    async fn commit(&mut self) -> LedgerResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> LedgerResult<()> {
        self.inner.rollback().await
    }
}
