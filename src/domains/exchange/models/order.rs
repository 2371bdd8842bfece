use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shared::errors::{LedgerError, LedgerResult};

// =====================================================
// Order 모델
// =====================================================
// 역할: 지정가 주문 (매수/매도) 한 건
//
// 상태 플래그:
// - on_execution: 예약에 묶여 정산 대기 중
// - cancelled: 취소됨 (정산 시 반영)
// - fully_executed: 전량 체결 완료
//
// 세 플래그가 모두 false 인 주문만 매칭 대상(eligible)입니다.
// =====================================================

/// 주문 방향
/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// DB 저장용 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// 반대 방향
    /// Opposite side (the side a counter order must have)
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(LedgerError::UnknownSide(other.to_string())),
        }
    }
}

/// 주문 정보 (원장에서 조회한 주문)
/// Order information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// 주문 ID (생성 순서대로 증가, 동일 가격 우선순위 기준)
    pub id: i64,

    /// 매수 / 매도
    pub side: OrderSide,

    /// 지정가 (소수점 2자리)
    pub price: Decimal,

    /// 최초 수량
    pub quantity: i64,

    /// 잔량 (정산 시 quantity - 누적 체결 수량으로 갱신)
    /// Remaining quantity
    pub quantity_leftover: i64,

    pub on_execution: bool,
    pub cancelled: bool,
    pub fully_executed: bool,

    /// 낙관적 잠금 버전 (쓰기마다 +1)
    /// Optimistic-lock version
    pub version: i64,

    pub created_at: DateTime<Utc>,
}

impl Order {
    /// 매칭 대상 여부 (취소/전량체결/예약 중이 아님)
    /// Whether the order may be picked by the matcher
    pub fn is_eligible(&self) -> bool {
        !self.cancelled && !self.fully_executed && !self.on_execution
    }

    /// 두 주문의 가격이 교차하는지 확인
    ///
    /// 방향이 같으면 false. 매수가 >= 매도가 이면 true.
    pub fn crosses(&self, other: &Order) -> bool {
        match (self.side, other.side) {
            (OrderSide::Buy, OrderSide::Sell) => self.price >= other.price,
            (OrderSide::Sell, OrderSide::Buy) => other.price >= self.price,
            _ => false,
        }
    }

    /// 종료 상태 (취소 또는 전량 체결)
    pub fn is_terminal(&self) -> bool {
        self.cancelled || self.fully_executed
    }
}

/// 주문 생성 요청
/// Order creation input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: i64,
}

impl NewOrder {
    pub fn new(side: OrderSide, price: Decimal, quantity: i64) -> Self {
        Self { side, price, quantity }
    }

    pub fn buy(price: Decimal, quantity: i64) -> Self {
        Self::new(OrderSide::Buy, price, quantity)
    }

    pub fn sell(price: Decimal, quantity: i64) -> Self {
        Self::new(OrderSide::Sell, price, quantity)
    }

    /// 최소 입력 검증
    ///
    /// 가격 > 0, 소수점 2자리 이하, 수량 >= 1
    pub fn validate(&self) -> LedgerResult<()> {
        if self.price <= Decimal::ZERO {
            return Err(LedgerError::InvalidOrder(format!(
                "price must be positive, got {}",
                self.price
            )));
        }
        if self.price.normalize().scale() > 2 {
            return Err(LedgerError::InvalidOrder(format!(
                "price supports at most 2 fraction digits, got {}",
                self.price
            )));
        }
        if self.quantity < 1 {
            return Err(LedgerError::InvalidOrder(format!(
                "quantity must be at least 1, got {}",
                self.quantity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: i64, side: OrderSide, price: i64) -> Order {
        Order {
            id,
            side,
            price: Decimal::new(price, 0),
            quantity: 10,
            quantity_leftover: 10,
            on_execution: false,
            cancelled: false,
            fully_executed: false,
            version: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn side_parses_from_db_strings() {
        assert_eq!("BUY".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("SELL".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert!(matches!("buy".parse::<OrderSide>(), Err(LedgerError::UnknownSide(_))));
    }

    #[test]
    fn crossing_requires_opposite_sides() {
        let buy = order(1, OrderSide::Buy, 100);
        let cheap_sell = order(2, OrderSide::Sell, 99);
        let equal_sell = order(3, OrderSide::Sell, 100);
        let dear_sell = order(4, OrderSide::Sell, 101);

        assert!(buy.crosses(&cheap_sell));
        assert!(buy.crosses(&equal_sell));
        assert!(!buy.crosses(&dear_sell));
        assert!(dear_sell.crosses(&order(5, OrderSide::Buy, 101)));
        assert!(!buy.crosses(&order(6, OrderSide::Buy, 50)));
    }

    #[test]
    fn eligibility_tracks_all_three_flags() {
        let mut o = order(1, OrderSide::Buy, 100);
        assert!(o.is_eligible());
        o.on_execution = true;
        assert!(!o.is_eligible());
        o.on_execution = false;
        o.cancelled = true;
        assert!(!o.is_eligible());
        o.cancelled = false;
        o.fully_executed = true;
        assert!(!o.is_eligible());
    }

    #[test]
    fn new_order_validation() {
        assert!(NewOrder::buy(Decimal::new(1050, 2), 1).validate().is_ok());
        assert!(NewOrder::buy(Decimal::ZERO, 1).validate().is_err());
        assert!(NewOrder::sell(Decimal::new(1, 3), 1).validate().is_err());
        assert!(NewOrder::sell(Decimal::new(100, 0), 0).validate().is_err());
    }
}
