use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::Order;

// =====================================================
// Reservation 모델
// =====================================================
// 역할: 매칭 엔진이 묶어둔 매수 1건 + 매도 1건
// 정산 프로세스가 정확히 한 번 소비합니다 (체결 1건 기록).
// =====================================================

/// 예약 (매칭된 주문 쌍)
/// Reservation of one BUY and one SELL order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    /// 정산 시 "from" 쪽
    pub buy_order_id: i64,
    /// 정산 시 "to" 쪽
    pub sell_order_id: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// 이 예약이 주문을 포함하는지
    pub fn involves(&self, order_id: i64) -> bool {
        self.buy_order_id == order_id || self.sell_order_id == order_id
    }
}

/// 정산 시점에 함께 읽어오는 예약 + 양쪽 주문
/// A reservation together with both of its legs
#[derive(Debug, Clone)]
pub struct ReservationLegs {
    pub reservation: Reservation,
    pub buy: Order,
    pub sell: Order,
    /// 이미 체결이 기록되었는지
    pub settled: bool,
}
