use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::domains::exchange::models::Fill;
use crate::shared::errors::{LedgerError, LedgerResult};

pub struct FillRepository {
    pool: PgPool,
}

impl FillRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 예약의 체결 조회
    /// Get fill by reservation ID
    pub async fn get_by_reservation(&self, reservation_id: i64) -> LedgerResult<Option<Fill>> {
        let row = sqlx::query(
            r#"
            SELECT id, reservation_id, quantity, created_at
            FROM fills
            WHERE reservation_id = $1
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_fill).transpose()
    }

    /// 체결 기록 (예약당 1건, 중복은 쓰기 충돌)
    pub async fn insert(conn: &mut PgConnection, reservation_id: i64, quantity: i64) -> LedgerResult<Fill> {
        let row = sqlx::query(
            r#"
            INSERT INTO fills (reservation_id, quantity)
            VALUES ($1, $2)
            RETURNING id, reservation_id, quantity, created_at
            "#,
        )
        .bind(reservation_id)
        .bind(quantity)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, "fill", reservation_id))?;

        Self::row_to_fill(&row)
    }

    /// 주문의 누적 체결 수량
    /// Sum of fills over every reservation the order took part in
    pub async fn sum_for_order(conn: &mut PgConnection, order_id: i64) -> LedgerResult<i64> {
        let sum = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(f.quantity), 0)::BIGINT
            FROM fills f
            JOIN reservations r ON r.id = f.reservation_id
            WHERE r.buy_order_id = $1 OR r.sell_order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(sum)
    }

    fn row_to_fill(row: &PgRow) -> LedgerResult<Fill> {
        Ok(Fill {
            id: row.try_get("id")?,
            reservation_id: row.try_get("reservation_id")?,
            quantity: row.try_get("quantity")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
