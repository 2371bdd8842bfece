use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::domains::exchange::models::Reservation;
use crate::shared::errors::{LedgerError, LedgerResult};

pub struct ReservationRepository {
    pool: PgPool,
}

impl ReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 체결이 없는 예약 ID 조회 (재시작 복구용)
    /// Reservations that have no fill yet
    pub async fn find_unsettled_ids(&self, limit: i64) -> LedgerResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT r.id
            FROM reservations r
            WHERE NOT EXISTS (SELECT 1 FROM fills f WHERE f.reservation_id = r.id)
            ORDER BY r.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// 예약 생성
    pub async fn insert(conn: &mut PgConnection, buy_order_id: i64, sell_order_id: i64) -> LedgerResult<Reservation> {
        let row = sqlx::query(
            r#"
            INSERT INTO reservations (buy_order_id, sell_order_id)
            VALUES ($1, $2)
            RETURNING id, buy_order_id, sell_order_id, version, created_at
            "#,
        )
        .bind(buy_order_id)
        .bind(sell_order_id)
        .fetch_one(&mut *conn)
        .await?;

        Self::row_to_reservation(&row)
    }

    /// 예약 + 체결 존재 여부 조회
    ///
    /// # Returns
    /// * `Some((reservation, settled))`
    pub async fn find_with_settled(conn: &mut PgConnection, reservation_id: i64) -> LedgerResult<Option<(Reservation, bool)>> {
        let row = sqlx::query(
            r#"
            SELECT r.id, r.buy_order_id, r.sell_order_id, r.version, r.created_at,
                   EXISTS (SELECT 1 FROM fills f WHERE f.reservation_id = r.id) AS settled
            FROM reservations r
            WHERE r.id = $1
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let settled: bool = row.try_get("settled")?;
                Ok(Some((Self::row_to_reservation(&row)?, settled)))
            }
            None => Ok(None),
        }
    }

    /// 예약 버전 증가 (버전 비교, 0행이면 쓰기 충돌)
    pub async fn bump_version(conn: &mut PgConnection, reservation: &Reservation) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.version)
        .execute(&mut *conn)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, "reservation", reservation.id))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WriteConflict { entity: "reservation", id: reservation.id });
        }
        Ok(())
    }

    fn row_to_reservation(row: &PgRow) -> LedgerResult<Reservation> {
        Ok(Reservation {
            id: row.try_get("id")?,
            buy_order_id: row.try_get("buy_order_id")?,
            sell_order_id: row.try_get("sell_order_id")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
