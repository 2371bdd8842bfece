// =====================================================
// Matcher - 매칭 규칙
// =====================================================
// 역할: 대기열에서 꺼낸 주문 1건에 대해 최우선 상대 주문을 찾아 예약
//
// 잠금 순서:
// - 매수 주문: 자기 자신 잠금 → 최저가 매도 탐색 + 잠금
// - 매도 주문: 최고가 매수 탐색 + 잠금 → 자기 자신 잠금
//
// 모든 잠금은 "잡혀 있으면 건너뜀" 방식이라 워커끼리 기다리지 않습니다.
// 예약 커밋이 끝난 뒤에만 정산이 시작됩니다 (커밋 훅).
// =====================================================

use std::sync::Arc;

use tracing::debug;

use super::settlement::SettlementDispatcher;
use crate::domains::exchange::ledger::{LedgerStore, LedgerTx};
use crate::domains::exchange::models::{Order, OrderSide, Reservation};
use crate::shared::errors::LedgerResult;

/// 매칭 엔진 (상태 없음, 워커 스레드끼리 공유)
pub struct Matcher {
    store: Arc<dyn LedgerStore>,
    dispatcher: SettlementDispatcher,
}

impl Matcher {
    pub fn new(store: Arc<dyn LedgerStore>, dispatcher: SettlementDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// 주문 1건 매칭 시도
    ///
    /// # Arguments
    /// * `order` - 대기열에서 꺼낸 주문 (스냅샷, 실제 상태는 잠금 시 다시 확인)
    ///
    /// # Returns
    /// * `Some(reservation)` - 예약 커밋 완료, 정산 시작됨
    /// * `None` - 주문이 더 이상 대상이 아니거나, 잠겨 있거나, 상대가 없음
    pub async fn reserve(&self, order: &Order) -> LedgerResult<Option<Reservation>> {
        let mut tx = self.store.begin().await?;

        let pair = match order.side {
            OrderSide::Buy => Self::lock_buy_first(&mut *tx, order).await?,
            OrderSide::Sell => Self::lock_sell_last(&mut *tx, order).await?,
        };
        let Some((buy, sell)) = pair else {
            tx.rollback().await?;
            return Ok(None);
        };

        let reservation = tx.reserve_pair(&buy, &sell).await?;

        let dispatcher = self.dispatcher.clone();
        let reservation_id = reservation.id;
        tx.after_commit(Box::new(move || dispatcher.dispatch(reservation_id)));
        tx.commit().await?;

        debug!(
            reservation_id,
            buy_order_id = buy.id,
            sell_order_id = sell.id,
            "orders reserved"
        );
        Ok(Some(reservation))
    }

    /// 매수 주문: 자신 → 최저가 매도
    async fn lock_buy_first(tx: &mut dyn LedgerTx, order: &Order) -> LedgerResult<Option<(Order, Order)>> {
        let Some(buy) = tx.lock_eligible_order(order.id).await? else {
            return Ok(None);
        };
        let Some(sell) = tx.find_best_counter_order(&buy).await? else {
            return Ok(None);
        };
        Ok(Some((buy, sell)))
    }

    /// 매도 주문: 최고가 매수 → 자신
    async fn lock_sell_last(tx: &mut dyn LedgerTx, order: &Order) -> LedgerResult<Option<(Order, Order)>> {
        let Some(buy) = tx.find_best_counter_order(order).await? else {
            return Ok(None);
        };
        let Some(sell) = tx.lock_eligible_order(order.id).await? else {
            return Ok(None);
        };
        Ok(Some((buy, sell)))
    }
}
