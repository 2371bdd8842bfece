// =====================================================
// AdmissionQueue - 매칭 대기열
// =====================================================
// 역할: 매칭 워커가 꺼내갈 주문을 모아두는 무제한 MPMC 채널
//
// 입력 경로:
// 1. notify(): 주문 생성/변경 커밋 직후 (대상 주문만 통과)
// 2. sweep(): 주기적으로 교차 가능한 대상 주문을 일괄 적재 (유실 보정)
//
// 같은 주문이 여러 번 들어와도 안전합니다.
// 워커가 잠금을 못 잡거나 상대가 없으면 그냥 건너뜁니다.
// =====================================================

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, unbounded};
use tracing::{debug, warn};

use crate::domains::exchange::ledger::LedgerStore;
use crate::domains::exchange::models::Order;
use crate::shared::errors::LedgerResult;

/// 매칭 대기열
/// Admission queue feeding the match workers
#[derive(Clone)]
pub struct AdmissionQueue {
    tx: Sender<Order>,
    rx: Receiver<Order>,
    store: Arc<dyn LedgerStore>,
}

impl AdmissionQueue {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, store }
    }

    /// 주문 변경 알림
    ///
    /// 매칭 대상(취소/전량체결/예약 중이 아님)이면 대기열에 넣습니다.
    ///
    /// # Returns
    /// 대기열에 넣었으면 true
    pub fn notify(&self, order: &Order) -> bool {
        if !order.is_eligible() {
            return false;
        }
        self.push(order.clone())
    }

    /// 교차 가능한 대상 주문 일괄 적재
    ///
    /// # Arguments
    /// * `limit` - 한 번에 적재할 최대 주문 수
    ///
    /// # Returns
    /// 적재한 주문 수
    pub async fn sweep(&self, limit: usize) -> LedgerResult<usize> {
        let orders = self.store.bulk_eligible_orders(limit).await?;
        let mut admitted = 0;
        for order in orders {
            if self.push(order) {
                admitted += 1;
            }
        }

        if admitted > 0 {
            debug!(admitted, "sweep admitted orders");
        }
        Ok(admitted)
    }

    /// 워커용 수신 채널
    pub fn receiver(&self) -> &Receiver<Order> {
        &self.rx
    }

    /// 대기 중인 주문 하나 꺼내기 (비블로킹)
    pub fn try_take(&self) -> Option<Order> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn push(&self, order: Order) -> bool {
        let order_id = order.id;
        match self.tx.send(order) {
            Ok(()) => true,
            Err(_) => {
                warn!(order_id, "admission queue closed, order dropped");
                false
            }
        }
    }
}
