// =====================================================
// PgLedgerStore - PostgreSQL 원장 저장소
// =====================================================
// 역할: LedgerStore / LedgerTx 를 sqlx 리포지토리 위에 구현
//
// 대응:
// - 잠긴 행 건너뛰기 → FOR UPDATE SKIP LOCKED
// - 버전 비교 쓰기 → UPDATE ... WHERE id = $1 AND version = $2 (0행 = 충돌)
// - 예약당 체결 1건 → fills.reservation_id UNIQUE
// =====================================================

use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, Transaction};

use super::{CommitHook, LedgerStore, LedgerTx};
use crate::domains::exchange::models::{
    Fill, NewOrder, Order, PriceLevel, Reservation, ReservationLegs,
};
use crate::shared::database::{Database, FillRepository, OrderRepository, ReservationRepository};
use crate::shared::errors::{LedgerError, LedgerResult};

/// PostgreSQL 원장 저장소
pub struct PgLedgerStore {
    db: Database,
    orders: OrderRepository,
    reservations: ReservationRepository,
    fills: FillRepository,
}

impl PgLedgerStore {
    pub fn new(db: Database) -> Self {
        let pool = db.pool().clone();
        Self {
            orders: OrderRepository::new(pool.clone()),
            reservations: ReservationRepository::new(pool.clone()),
            fills: FillRepository::new(pool),
            db,
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let tx = self.db.pool().begin().await?;
        Ok(Box::new(PgLedgerTx { tx: Some(tx), hooks: Vec::new() }))
    }

    async fn create_order(&self, new_order: &NewOrder) -> LedgerResult<Order> {
        new_order.validate()?;
        self.orders.create(new_order).await
    }

    async fn get_order(&self, order_id: i64) -> LedgerResult<Option<Order>> {
        self.orders.get_by_id(order_id).await
    }

    async fn cancel_order(&self, order_id: i64) -> LedgerResult<Option<Order>> {
        self.orders.cancel(order_id).await
    }

    async fn bulk_eligible_orders(&self, limit: usize) -> LedgerResult<Vec<Order>> {
        self.orders.find_crossing_eligible(limit as i64).await
    }

    async fn unsettled_reservations(&self, limit: usize) -> LedgerResult<Vec<i64>> {
        self.reservations.find_unsettled_ids(limit as i64).await
    }

    async fn fill_for_reservation(&self, reservation_id: i64) -> LedgerResult<Option<Fill>> {
        self.fills.get_by_reservation(reservation_id).await
    }

    async fn depth_of_market(&self) -> LedgerResult<Vec<PriceLevel>> {
        self.orders.depth_of_market().await
    }
}

/// PostgreSQL 트랜잭션
///
/// drop 시 sqlx 가 롤백합니다.
pub struct PgLedgerTx {
    tx: Option<Transaction<'static, Postgres>>,
    hooks: Vec<CommitHook>,
}

impl PgLedgerTx {
    fn conn(&mut self) -> LedgerResult<&mut PgConnection> {
        self.tx.as_deref_mut().ok_or(LedgerError::TransactionClosed)
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_eligible_order(&mut self, order_id: i64) -> LedgerResult<Option<Order>> {
        OrderRepository::lock_eligible(self.conn()?, order_id).await
    }

    async fn find_best_counter_order(&mut self, order: &Order) -> LedgerResult<Option<Order>> {
        OrderRepository::find_best_counter(self.conn()?, order).await
    }

    async fn reserve_pair(&mut self, buy: &Order, sell: &Order) -> LedgerResult<Reservation> {
        let conn = self.conn()?;
        OrderRepository::mark_on_execution(&mut *conn, buy).await?;
        OrderRepository::mark_on_execution(&mut *conn, sell).await?;
        ReservationRepository::insert(conn, buy.id, sell.id).await
    }

    async fn load_reservation(&mut self, reservation_id: i64) -> LedgerResult<Option<ReservationLegs>> {
        let conn = self.conn()?;
        let Some((reservation, settled)) = ReservationRepository::find_with_settled(&mut *conn, reservation_id).await? else {
            return Ok(None);
        };
        let buy = OrderRepository::find_in(&mut *conn, reservation.buy_order_id).await?;
        let sell = OrderRepository::find_in(&mut *conn, reservation.sell_order_id).await?;

        Ok(match (buy, sell) {
            (Some(buy), Some(sell)) => Some(ReservationLegs { reservation, buy, sell, settled }),
            _ => None,
        })
    }

    async fn sum_fills_for_order(&mut self, order_id: i64) -> LedgerResult<i64> {
        FillRepository::sum_for_order(self.conn()?, order_id).await
    }

    async fn save_order(&mut self, order: &Order) -> LedgerResult<Order> {
        OrderRepository::update_versioned(self.conn()?, order).await
    }

    async fn close_reservation(&mut self, reservation: &Reservation, quantity: i64) -> LedgerResult<Fill> {
        let conn = self.conn()?;
        ReservationRepository::bump_version(&mut *conn, reservation).await?;
        FillRepository::insert(conn, reservation.id, quantity).await
    }

    fn after_commit(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }

    async fn commit(&mut self) -> LedgerResult<()> {
        let tx = self.tx.take().ok_or(LedgerError::TransactionClosed)?;
        tx.commit()
            .await
            .map_err(|e| LedgerError::from_sqlx(e, "transaction", 0))?;

        for hook in self.hooks.drain(..) {
            hook();
        }
        Ok(())
    }

    async fn rollback(&mut self) -> LedgerResult<()> {
        let tx = self.tx.take().ok_or(LedgerError::TransactionClosed)?;
        self.hooks.clear();
        tx.rollback().await?;
        Ok(())
    }
}
