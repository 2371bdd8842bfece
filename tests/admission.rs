// =====================================================
// 매칭 대기열 통합 테스트
// =====================================================

mod common;
use common::*;

use exchange_engine::domains::exchange::ledger::LedgerStore;
use exchange_engine::domains::exchange::models::OrderSide;

/// 테스트: 대상 주문만 대기열에 들어감
#[tokio::test]
async fn test_notify_admits_only_eligible_orders() {
    let ledger = setup_ledger();
    let order = ledger.place(OrderSide::Buy, 100, 5).await;

    assert!(ledger.queue.notify(&order));

    let mut cancelled = order.clone();
    cancelled.cancelled = true;
    assert!(!ledger.queue.notify(&cancelled));

    let mut executed = order.clone();
    executed.fully_executed = true;
    assert!(!ledger.queue.notify(&executed));

    let mut reserved = order.clone();
    reserved.on_execution = true;
    assert!(!ledger.queue.notify(&reserved));

    assert_eq!(ledger.queue.len(), 1);
    assert_eq!(ledger.queue.try_take().map(|o| o.id), Some(order.id));
    assert!(ledger.queue.is_empty());
}

/// 테스트: 스윕은 교차 가능한 대상 주문만 id 순으로 적재
#[tokio::test]
async fn test_sweep_admits_crossing_capable_orders() {
    let ledger = setup_ledger();
    let crossing_buy = ledger.place(OrderSide::Buy, 100, 5).await;
    let _low_buy = ledger.place(OrderSide::Buy, 90, 5).await;
    let crossing_sell = ledger.place(OrderSide::Sell, 99, 5).await;
    let _high_sell = ledger.place(OrderSide::Sell, 120, 5).await;
    let cancelled_sell = ledger.place(OrderSide::Sell, 95, 5).await;
    ledger.shared.cancel_order(cancelled_sell.id).await.unwrap();

    let admitted = ledger.queue.sweep(10).await.unwrap();

    assert_eq!(admitted, 2);
    let ids: Vec<i64> = ledger.drain_queue().iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![crossing_buy.id, crossing_sell.id]);
}

/// 테스트: 스윕 최대 적재 수
#[tokio::test]
async fn test_sweep_respects_limit() {
    let ledger = setup_ledger();
    for _ in 0..4 {
        ledger.place(OrderSide::Buy, 100, 1).await;
        ledger.place(OrderSide::Sell, 100, 1).await;
    }

    assert_eq!(ledger.queue.sweep(3).await.unwrap(), 3);
    assert_eq!(ledger.queue.len(), 3);
}

/// 테스트: 한쪽 호가만 있으면 적재할 것이 없음
#[tokio::test]
async fn test_sweep_with_one_sided_book() {
    let ledger = setup_ledger();
    ledger.place(OrderSide::Buy, 100, 1).await;
    ledger.place(OrderSide::Buy, 105, 1).await;

    assert_eq!(ledger.queue.sweep(10).await.unwrap(), 0);
}

/// 테스트: 같은 주문이 중복으로 들어와도 한 번만 예약됨
#[tokio::test]
async fn test_duplicate_admissions_are_harmless() {
    let ledger = setup_ledger();
    let buy = ledger.place(OrderSide::Buy, 100, 5).await;
    ledger.place(OrderSide::Sell, 100, 5).await;

    ledger.queue.notify(&buy);
    ledger.queue.notify(&buy);
    ledger.queue.sweep(10).await.unwrap();

    let matcher = ledger.idle_matcher();
    let mut reserved = 0;
    for order in ledger.drain_queue() {
        if matcher.reserve(&order).await.unwrap().is_some() {
            reserved += 1;
        }
    }

    assert_eq!(reserved, 1);
    assert_eq!(ledger.store.reservations().len(), 1);
}
