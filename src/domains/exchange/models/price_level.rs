use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::OrderSide;

/// 호가 단계 (가격 + 방향별 집계)
/// Depth-of-market level aggregated by (price, side)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub side: OrderSide,
    /// 살아있는 주문 수
    pub orders_count: i64,
    /// 잔량 합계
    pub overall_quantity: i64,
}
