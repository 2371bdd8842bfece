use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::domains::exchange::models::{NewOrder, Order, OrderSide, PriceLevel};
use crate::shared::errors::{LedgerError, LedgerResult};

pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =====================================================
    // 풀 단위 연산
    // =====================================================

    /// 주문 생성
    /// Create order
    pub async fn create(&self, new_order: &NewOrder) -> LedgerResult<Order> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (side, price, quantity, quantity_leftover)
            VALUES ($1, $2, $3, $3)
            RETURNING id, side, price, quantity, quantity_leftover,
                      on_execution, cancelled, fully_executed, version, created_at
            "#,
        )
        .bind(new_order.side.as_str())
        .bind(new_order.price)
        .bind(new_order.quantity)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_order(&row)
    }

    /// 주문 ID로 조회
    /// Get order by ID
    pub async fn get_by_id(&self, order_id: i64) -> LedgerResult<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, side, price, quantity, quantity_leftover,
                   on_execution, cancelled, fully_executed, version, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    /// 주문 취소 (이미 종료된 주문은 None)
    /// Cancel order
    ///
    /// 매칭/정산 트랜잭션이 행을 잡고 있으면 커밋될 때까지 대기합니다.
    pub async fn cancel(&self, order_id: i64) -> LedgerResult<Option<Order>> {
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET cancelled = TRUE, version = version + 1
            WHERE id = $1 AND cancelled = FALSE AND fully_executed = FALSE
            RETURNING id, side, price, quantity, quantity_leftover,
                      on_execution, cancelled, fully_executed, version, created_at
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    /// 매칭 가능성이 있는 대상 주문 일괄 조회 (스윕용)
    ///
    /// 매수: 가격 >= 최저 대상 매도가
    /// 매도: 가격 <= 최고 대상 매수가
    pub async fn find_crossing_eligible(&self, limit: i64) -> LedgerResult<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.side, o.price, o.quantity, o.quantity_leftover,
                   o.on_execution, o.cancelled, o.fully_executed, o.version, o.created_at
            FROM orders o
            WHERE o.on_execution = FALSE AND o.cancelled = FALSE AND o.fully_executed = FALSE
              AND (
                (o.side = 'BUY' AND o.price >= (
                    SELECT MIN(s.price) FROM orders s
                    WHERE s.side = 'SELL'
                      AND s.on_execution = FALSE AND s.cancelled = FALSE AND s.fully_executed = FALSE
                ))
                OR
                (o.side = 'SELL' AND o.price <= (
                    SELECT MAX(b.price) FROM orders b
                    WHERE b.side = 'BUY'
                      AND b.on_execution = FALSE AND b.cancelled = FALSE AND b.fully_executed = FALSE
                ))
              )
            ORDER BY o.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_order).collect()
    }

    /// 호가 집계 (취소/전량체결 제외)
    /// Depth of market
    pub async fn depth_of_market(&self) -> LedgerResult<Vec<PriceLevel>> {
        let rows = sqlx::query(
            r#"
            SELECT price, side,
                   COUNT(id) AS orders_count,
                   COALESCE(SUM(quantity_leftover), 0)::BIGINT AS overall_quantity
            FROM orders
            WHERE fully_executed = FALSE AND cancelled = FALSE
            GROUP BY price, side
            ORDER BY price, side
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> LedgerResult<PriceLevel> {
                let side: String = row.try_get("side")?;
                Ok(PriceLevel {
                    price: row.try_get("price")?,
                    side: side.parse::<OrderSide>()?,
                    orders_count: row.try_get("orders_count")?,
                    overall_quantity: row.try_get("overall_quantity")?,
                })
            })
            .collect()
    }

    // =====================================================
    // 트랜잭션 내 연산
    // =====================================================

    /// 대상 주문이면 즉시 잠금 (잠겨 있으면 None)
    pub async fn lock_eligible(conn: &mut PgConnection, order_id: i64) -> LedgerResult<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, side, price, quantity, quantity_leftover,
                   on_execution, cancelled, fully_executed, version, created_at
            FROM orders
            WHERE id = $1
              AND on_execution = FALSE AND cancelled = FALSE AND fully_executed = FALSE
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    /// 최우선 상대 주문 탐색 + 잠금
    ///
    /// 매수 주문이면 최저가 매도, 매도 주문이면 최고가 매수 (동가는 id 순)
    pub async fn find_best_counter(conn: &mut PgConnection, order: &Order) -> LedgerResult<Option<Order>> {
        let sql = match order.side {
            OrderSide::Buy => {
                r#"
                SELECT id, side, price, quantity, quantity_leftover,
                       on_execution, cancelled, fully_executed, version, created_at
                FROM orders
                WHERE side = 'SELL' AND price <= $1
                  AND on_execution = FALSE AND cancelled = FALSE AND fully_executed = FALSE
                ORDER BY price ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
                "#
            }
            OrderSide::Sell => {
                r#"
                SELECT id, side, price, quantity, quantity_leftover,
                       on_execution, cancelled, fully_executed, version, created_at
                FROM orders
                WHERE side = 'BUY' AND price >= $1
                  AND on_execution = FALSE AND cancelled = FALSE AND fully_executed = FALSE
                ORDER BY price DESC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
                "#
            }
        };

        let row = sqlx::query(sql)
            .bind(order.price)
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    /// 잠금 없이 조회 (정산 시 낙관적 읽기)
    pub async fn find_in(conn: &mut PgConnection, order_id: i64) -> LedgerResult<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, side, price, quantity, quantity_leftover,
                   on_execution, cancelled, fully_executed, version, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    /// 예약 중 표시 (버전 비교)
    pub async fn mark_on_execution(conn: &mut PgConnection, order: &Order) -> LedgerResult<Order> {
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET on_execution = TRUE, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING id, side, price, quantity, quantity_leftover,
                      on_execution, cancelled, fully_executed, version, created_at
            "#,
        )
        .bind(order.id)
        .bind(order.version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, "order", order.id))?;

        match row {
            Some(row) => Self::row_to_order(&row),
            None => Err(LedgerError::WriteConflict { entity: "order", id: order.id }),
        }
    }

    /// 주문 상태 저장 (버전 비교, 0행이면 쓰기 충돌)
    /// Compare-and-swap update on version
    pub async fn update_versioned(conn: &mut PgConnection, order: &Order) -> LedgerResult<Order> {
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET quantity_leftover = $1,
                on_execution = $2,
                cancelled = $3,
                fully_executed = $4,
                version = version + 1
            WHERE id = $5 AND version = $6
            RETURNING id, side, price, quantity, quantity_leftover,
                      on_execution, cancelled, fully_executed, version, created_at
            "#,
        )
        .bind(order.quantity_leftover)
        .bind(order.on_execution)
        .bind(order.cancelled)
        .bind(order.fully_executed)
        .bind(order.id)
        .bind(order.version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, "order", order.id))?;

        match row {
            Some(row) => Self::row_to_order(&row),
            None => Err(LedgerError::WriteConflict { entity: "order", id: order.id }),
        }
    }

    fn row_to_order(row: &PgRow) -> LedgerResult<Order> {
        let side: String = row.try_get("side")?;
        Ok(Order {
            id: row.try_get("id")?,
            side: side.parse::<OrderSide>()?,
            price: row.try_get("price")?,
            quantity: row.try_get("quantity")?,
            quantity_leftover: row.try_get("quantity_leftover")?,
            on_execution: row.try_get("on_execution")?,
            cancelled: row.try_get("cancelled")?,
            fully_executed: row.try_get("fully_executed")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
