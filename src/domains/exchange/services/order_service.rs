use std::sync::Arc;

use anyhow::{Context, Result};

use crate::domains::exchange::engine::AdmissionQueue;
use crate::domains::exchange::ledger::LedgerStore;
use crate::domains::exchange::models::{NewOrder, Order, PriceLevel};
use crate::shared::errors::LedgerError;

/// 주문 서비스
/// Order service
///
/// 역할:
/// - 주문 생성 후 매칭 대기열에 알림
/// - 주문 취소 (예약 중이면 정산 시 해제됨)
/// - 주문 / 호가 조회
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn LedgerStore>,
    queue: AdmissionQueue,
}

impl OrderService {
    pub fn new(store: Arc<dyn LedgerStore>, queue: AdmissionQueue) -> Self {
        Self { store, queue }
    }

    /// 주문 생성
    /// Create order
    ///
    /// # 처리 과정
    /// 1. 원장에 주문 저장 (커밋)
    /// 2. 매칭 대기열에 알림
    pub async fn create_order(&self, new_order: NewOrder) -> Result<Order> {
        let order = self
            .store
            .create_order(&new_order)
            .await
            .context("Failed to create order")?;

        self.queue.notify(&order);
        tracing::debug!(order_id = order.id, side = %order.side, price = %order.price, "order created");
        Ok(order)
    }

    /// 주문 취소
    /// Cancel order
    ///
    /// 이미 종료된 주문이면 현재 상태를 그대로 돌려줍니다.
    /// 예약 중인 주문은 정산 프로세스가 취소를 보고 예약을 해제합니다.
    pub async fn cancel_order(&self, order_id: i64) -> Result<Order> {
        if let Some(order) = self
            .store
            .cancel_order(order_id)
            .await
            .context("Failed to cancel order")?
        {
            tracing::info!(order_id, on_execution = order.on_execution, "order cancelled");
            return Ok(order);
        }

        self.store
            .get_order(order_id)
            .await
            .context("Failed to fetch order")?
            .ok_or_else(|| LedgerError::OrderNotFound { id: order_id }.into())
    }

    /// 주문 조회
    pub async fn get_order(&self, order_id: i64) -> Result<Option<Order>> {
        self.store
            .get_order(order_id)
            .await
            .context("Failed to fetch order")
    }

    /// 호가 조회 (가격, 방향 순)
    /// Depth of market
    pub async fn depth_of_market(&self) -> Result<Vec<PriceLevel>> {
        self.store
            .depth_of_market()
            .await
            .context("Failed to load depth of market")
    }
}
