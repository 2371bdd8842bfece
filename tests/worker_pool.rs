// =====================================================
// 매칭 워커 풀 / 엔진 통합 테스트
// =====================================================

mod common;
use common::*;

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use exchange_engine::domains::exchange::engine::MatchingEngine;
use exchange_engine::domains::exchange::ledger::{InMemoryLedgerStore, LedgerStore};
use exchange_engine::domains::exchange::models::{NewOrder, OrderSide};
use exchange_engine::domains::exchange::services::OrderService;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

fn engine_for(store: Arc<dyn LedgerStore>, workers: usize) -> MatchingEngine {
    MatchingEngine::new(store, test_config(workers), Handle::current())
}

/// 테스트: 여러 워커가 동시에 매칭해도 원장이 일관됨
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_settle_whole_book() {
    let store = InMemoryLedgerStore::new();
    let mut engine = engine_for(Arc::new(store.clone()), 4);
    engine.start().await.unwrap();
    let orders = OrderService::new(Arc::clone(engine.store()), engine.queue().clone());

    for i in 0..60i64 {
        let side = if i % 2 == 0 { OrderSide::Buy } else { OrderSide::Sell };
        let offset = (i * 7) % 9 - 4;
        let quantity = 1 + (i * 5) % 13;
        orders
            .create_order(NewOrder::new(side, price(100 + offset), quantity))
            .await
            .unwrap();
    }

    let settled = wait_until(SETTLE_TIMEOUT, || is_quiescent(&store)).await;
    engine.stop().await.unwrap();

    assert!(settled, "book did not settle in time");
    assert!(!store.reservations().is_empty());
    assert!(engine.settlement().stuck_reservations().is_empty());
    assert_ledger_consistent(&store);
}

/// 테스트: 대기열 알림이 없어도 스윕이 매칭을 이어감
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweeper_picks_up_unnotified_orders() {
    let store = InMemoryLedgerStore::new();
    let buy = store.create_order(&NewOrder::buy(price(100), 4)).await.unwrap();
    let sell = store.create_order(&NewOrder::sell(price(100), 4)).await.unwrap();

    let mut engine = engine_for(Arc::new(store.clone()), 2);
    engine.start().await.unwrap();

    let settled = wait_until(SETTLE_TIMEOUT, || store.fills().len() == 1).await;
    engine.stop().await.unwrap();

    assert!(settled, "sweeper never admitted the crossing pair");
    assert!(store.get_order(buy.id).await.unwrap().unwrap().fully_executed);
    assert!(store.get_order(sell.id).await.unwrap().unwrap().fully_executed);
}

/// 테스트: 시작 시 정산되지 않은 예약 복구
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_recovers_unsettled_reservations() {
    let store = InMemoryLedgerStore::new();
    let buy = store.create_order(&NewOrder::buy(price(100), 4)).await.unwrap();
    let sell = store.create_order(&NewOrder::sell(price(100), 6)).await.unwrap();
    let reservation = reserve_directly(&store, buy.id, sell.id).await;

    let mut engine = engine_for(Arc::new(store.clone()), 1);
    engine.start().await.unwrap();

    let fill = store.fill_for_reservation(reservation.id).await.unwrap();
    engine.stop().await.unwrap();

    assert_eq!(fill.map(|f| f.quantity), Some(4));
    assert_eq!(store.get_order(sell.id).await.unwrap().unwrap().quantity_leftover, 2);
}

/// 테스트: 한 주문의 에러가 워커를 멈추지 않음
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_survives_order_fault() {
    let inner = InMemoryLedgerStore::new();
    let poisoned = inner.create_order(&NewOrder::buy(price(50), 1)).await.unwrap();
    let mut faulty = FaultyStore::new(inner.clone());
    faulty.failing_order = Some(poisoned.id);

    let mut engine = engine_for(Arc::new(faulty), 1);
    engine.start().await.unwrap();

    engine.notify(&poisoned);
    let orders = OrderService::new(Arc::clone(engine.store()), engine.queue().clone());
    orders.create_order(NewOrder::buy(price(100), 3)).await.unwrap();
    orders.create_order(NewOrder::sell(price(100), 3)).await.unwrap();

    let settled = wait_until(SETTLE_TIMEOUT, || inner.fills().len() == 1).await;
    engine.stop().await.unwrap();

    assert!(settled, "healthy orders were not matched after a fault");
    assert!(inner.get_order(poisoned.id).await.unwrap().unwrap().is_eligible());
}

/// 테스트: 치명적 에러 (알 수 없는 주문 방향) 는 워커를 종료시킴
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fatal_error_stops_worker() {
    let inner = InMemoryLedgerStore::new();
    let broken = inner.create_order(&NewOrder::buy(price(50), 1)).await.unwrap();
    let mut faulty = FaultyStore::new(inner.clone());
    faulty.fatal_order = Some(broken.id);

    let mut config = test_config(1);
    config.sweep_interval = Duration::from_secs(3600);
    let mut engine = MatchingEngine::new(Arc::new(faulty), config, Handle::current());
    engine.start().await.unwrap();

    engine.notify(&broken);
    assert!(wait_until(SETTLE_TIMEOUT, || engine.queue().is_empty()).await);

    let buy = inner.create_order(&NewOrder::buy(price(100), 1)).await.unwrap();
    engine.notify(&buy);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(engine.queue().len(), 1, "no worker should be left to take the order");
    assert!(inner.reservations().is_empty());
    engine.stop().await.unwrap();
}

/// 테스트: 정지 시 대기 중인 워커가 모두 종료됨
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_joins_idle_workers() {
    let mut engine = engine_for(Arc::new(InMemoryLedgerStore::new()), 3);
    engine.start().await.unwrap();
    assert!(engine.is_running());
    assert_eq!(engine.worker_count(), 3);

    tokio::time::timeout(Duration::from_secs(5), engine.stop())
        .await
        .expect("stop timed out")
        .unwrap();

    assert!(!engine.is_running());
    assert_eq!(engine.worker_count(), 0);
}

/// 테스트: 실행 중 워커 추가 / 정지 후 추가 불가
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_worker_requires_running_engine() {
    let mut engine = engine_for(Arc::new(InMemoryLedgerStore::new()), 1);
    assert!(engine.start_worker().is_err());

    engine.start().await.unwrap();
    engine.start_worker().unwrap();
    assert_eq!(engine.worker_count(), 2);
    assert!(engine.start().await.is_err());

    engine.stop().await.unwrap();
    assert!(engine.start_worker().is_err());
}
