use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 체결 기록 (예약당 최대 1건, 취소 시 수량 0)
/// Fill recorded when a reservation is settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub id: i64,
    pub reservation_id: i64,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}
