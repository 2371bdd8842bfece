// =====================================================
// InMemoryLedgerStore - 메모리 원장 저장소
// =====================================================
// 역할: PostgreSQL 없이 원장 의미를 그대로 재현하는 구현체
//
// 재현하는 동작:
// - 행 잠금 + 잠긴 행 건너뛰기 (FOR UPDATE SKIP LOCKED)
// - 버전 비교 쓰기 (UPDATE ... WHERE version = $v)
// - 트랜잭션 단위 스테이징 / 커밋 / 롤백
// - 커밋 후 훅 실행
//
// 커밋 전까지 변경 사항은 해당 트랜잭션에서만 보입니다 (READ COMMITTED).
// =====================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{CommitHook, LedgerStore, LedgerTx};
use crate::domains::exchange::models::{
    Fill, NewOrder, Order, OrderSide, PriceLevel, Reservation, ReservationLegs,
};
use crate::shared::errors::{LedgerError, LedgerResult};

/// 취소 요청이 잠긴 행을 다시 확인하는 간격
const ROW_WAIT_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Order(i64),
    Reservation(i64),
}

/// 커밋된 원장 상태 + 행 잠금 테이블
#[derive(Default)]
struct LedgerState {
    orders: BTreeMap<i64, Order>,
    reservations: BTreeMap<i64, Reservation>,
    /// Key: reservation_id (예약당 1건)
    fills: BTreeMap<i64, Fill>,
    /// Key: 행, Value: 잠금을 가진 트랜잭션 ID
    row_locks: HashMap<RowKey, u64>,
    order_seq: i64,
    reservation_seq: i64,
    fill_seq: i64,
}

impl LedgerState {
    fn try_lock(&mut self, key: RowKey, tx_id: u64) -> bool {
        match self.row_locks.get(&key) {
            Some(owner) if *owner != tx_id => false,
            _ => {
                self.row_locks.insert(key, tx_id);
                true
            }
        }
    }

    fn held_by_other(&self, key: RowKey, tx_id: u64) -> bool {
        matches!(self.row_locks.get(&key), Some(owner) if *owner != tx_id)
    }

    fn release(&mut self, tx_id: u64) {
        self.row_locks.retain(|_, owner| *owner != tx_id);
    }
}

fn next_id(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

/// 메모리 원장 저장소
/// In-memory ledger store with row locks and optimistic versions
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    tx_seq: Arc<AtomicU64>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 모든 주문 스냅샷 (id 순)
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.values().cloned().collect()
    }

    /// 모든 예약 스냅샷 (id 순)
    pub fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().reservations.values().cloned().collect()
    }

    /// 모든 체결 스냅샷 (예약 id 순)
    pub fn fills(&self) -> Vec<Fill> {
        self.state.lock().fills.values().cloned().collect()
    }

    /// 현재 잡혀 있는 행 잠금 수
    pub fn held_locks(&self) -> usize {
        self.state.lock().row_locks.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let tx_id = self.tx_seq.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Box::new(InMemoryLedgerTx {
            state: Arc::clone(&self.state),
            tx_id,
            staged_orders: HashMap::new(),
            staged_reservations: BTreeMap::new(),
            staged_fills: BTreeMap::new(),
            hooks: Vec::new(),
            finished: false,
        }))
    }

    async fn create_order(&self, new_order: &NewOrder) -> LedgerResult<Order> {
        new_order.validate()?;

        let mut state = self.state.lock();
        let id = next_id(&mut state.order_seq);
        let order = Order {
            id,
            side: new_order.side,
            price: new_order.price,
            quantity: new_order.quantity,
            quantity_leftover: new_order.quantity,
            on_execution: false,
            cancelled: false,
            fully_executed: false,
            version: 0,
            created_at: Utc::now(),
        };
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: i64) -> LedgerResult<Option<Order>> {
        Ok(self.state.lock().orders.get(&order_id).cloned())
    }

    async fn cancel_order(&self, order_id: i64) -> LedgerResult<Option<Order>> {
        loop {
            // None: 행이 잠겨 있음 → 대기 후 재시도
            let attempt: Option<Option<Order>> = {
                let mut state = self.state.lock();
                let locked = state.row_locks.contains_key(&RowKey::Order(order_id));
                match state.orders.get_mut(&order_id) {
                    None => Some(None),
                    Some(order) if order.is_terminal() => Some(None),
                    Some(_) if locked => None,
                    Some(order) => {
                        order.cancelled = true;
                        order.version += 1;
                        Some(Some(order.clone()))
                    }
                }
            };

            match attempt {
                Some(result) => return Ok(result),
                None => tokio::time::sleep(ROW_WAIT_INTERVAL).await,
            }
        }
    }

    async fn bulk_eligible_orders(&self, limit: usize) -> LedgerResult<Vec<Order>> {
        let state = self.state.lock();
        let eligible: Vec<&Order> = state.orders.values().filter(|o| o.is_eligible()).collect();

        let best_ask = eligible
            .iter()
            .filter(|o| o.side == OrderSide::Sell)
            .map(|o| o.price)
            .min();
        let best_bid = eligible
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(|o| o.price)
            .max();

        Ok(eligible
            .into_iter()
            .filter(|o| match o.side {
                OrderSide::Buy => best_ask.is_some_and(|ask| o.price >= ask),
                OrderSide::Sell => best_bid.is_some_and(|bid| o.price <= bid),
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn unsettled_reservations(&self, limit: usize) -> LedgerResult<Vec<i64>> {
        let state = self.state.lock();
        Ok(state
            .reservations
            .keys()
            .filter(|id| !state.fills.contains_key(id))
            .take(limit)
            .copied()
            .collect())
    }

    async fn fill_for_reservation(&self, reservation_id: i64) -> LedgerResult<Option<Fill>> {
        Ok(self.state.lock().fills.get(&reservation_id).cloned())
    }

    async fn depth_of_market(&self) -> LedgerResult<Vec<PriceLevel>> {
        let state = self.state.lock();
        let mut levels: BTreeMap<(Decimal, OrderSide), (i64, i64)> = BTreeMap::new();

        for order in state.orders.values().filter(|o| !o.is_terminal()) {
            let level = levels.entry((order.price, order.side)).or_insert((0, 0));
            level.0 += 1;
            level.1 += order.quantity_leftover;
        }

        Ok(levels
            .into_iter()
            .map(|((price, side), (orders_count, overall_quantity))| PriceLevel {
                price,
                side,
                orders_count,
                overall_quantity,
            })
            .collect())
    }
}

/// 메모리 원장 트랜잭션
///
/// 변경은 staged_* 에 쌓였다가 커밋 시 한 번에 반영됩니다.
pub struct InMemoryLedgerTx {
    state: Arc<Mutex<LedgerState>>,
    tx_id: u64,
    staged_orders: HashMap<i64, Order>,
    staged_reservations: BTreeMap<i64, Reservation>,
    staged_fills: BTreeMap<i64, Fill>,
    hooks: Vec<CommitHook>,
    finished: bool,
}

impl InMemoryLedgerTx {
    fn ensure_open(&self) -> LedgerResult<()> {
        if self.finished {
            return Err(LedgerError::TransactionClosed);
        }
        Ok(())
    }

    fn order_view(&self, state: &LedgerState, order_id: i64) -> Option<Order> {
        self.staged_orders
            .get(&order_id)
            .or_else(|| state.orders.get(&order_id))
            .cloned()
    }

    fn reservation_view(&self, state: &LedgerState, reservation_id: i64) -> Option<Reservation> {
        self.staged_reservations
            .get(&reservation_id)
            .or_else(|| state.reservations.get(&reservation_id))
            .cloned()
    }

    fn has_fill(&self, state: &LedgerState, reservation_id: i64) -> bool {
        self.staged_fills.contains_key(&reservation_id) || state.fills.contains_key(&reservation_id)
    }

    fn discard(&mut self) {
        self.state.lock().release(self.tx_id);
        self.staged_orders.clear();
        self.staged_reservations.clear();
        self.staged_fills.clear();
        self.hooks.clear();
        self.finished = true;
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn lock_eligible_order(&mut self, order_id: i64) -> LedgerResult<Option<Order>> {
        self.ensure_open()?;
        let shared = Arc::clone(&self.state);
        let mut state = shared.lock();

        let Some(order) = self.order_view(&state, order_id) else {
            return Ok(None);
        };
        if !order.is_eligible() || !state.try_lock(RowKey::Order(order_id), self.tx_id) {
            return Ok(None);
        }
        Ok(Some(order))
    }

    async fn find_best_counter_order(&mut self, order: &Order) -> LedgerResult<Option<Order>> {
        self.ensure_open()?;
        let shared = Arc::clone(&self.state);
        let mut state = shared.lock();

        let counter_side = order.side.opposite();
        let mut candidates: Vec<Order> = state
            .orders
            .keys()
            .filter_map(|id| self.order_view(&state, *id))
            .filter(|c| c.side == counter_side && c.is_eligible() && order.crosses(c))
            .filter(|c| !state.held_by_other(RowKey::Order(c.id), self.tx_id))
            .collect();

        match counter_side {
            OrderSide::Sell => candidates.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id))),
            OrderSide::Buy => candidates.sort_by(|a, b| b.price.cmp(&a.price).then(a.id.cmp(&b.id))),
        }

        let best = candidates.into_iter().next();
        if let Some(counter) = &best {
            state.try_lock(RowKey::Order(counter.id), self.tx_id);
        }
        Ok(best)
    }

    async fn reserve_pair(&mut self, buy: &Order, sell: &Order) -> LedgerResult<Reservation> {
        self.ensure_open()?;
        let shared = Arc::clone(&self.state);
        let mut state = shared.lock();

        for leg in [buy, sell] {
            let current = self
                .order_view(&state, leg.id)
                .ok_or(LedgerError::OrderNotFound { id: leg.id })?;
            if current.version != leg.version || !state.try_lock(RowKey::Order(leg.id), self.tx_id) {
                return Err(LedgerError::WriteConflict { entity: "order", id: leg.id });
            }
            let mut reserved = current;
            reserved.on_execution = true;
            reserved.version += 1;
            self.staged_orders.insert(reserved.id, reserved);
        }

        let reservation = Reservation {
            id: next_id(&mut state.reservation_seq),
            buy_order_id: buy.id,
            sell_order_id: sell.id,
            version: 0,
            created_at: Utc::now(),
        };
        self.staged_reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn load_reservation(&mut self, reservation_id: i64) -> LedgerResult<Option<ReservationLegs>> {
        self.ensure_open()?;
        let state = self.state.lock();

        let Some(reservation) = self.reservation_view(&state, reservation_id) else {
            return Ok(None);
        };
        let (Some(buy), Some(sell)) = (
            self.order_view(&state, reservation.buy_order_id),
            self.order_view(&state, reservation.sell_order_id),
        ) else {
            return Ok(None);
        };
        let settled = self.has_fill(&state, reservation_id);

        Ok(Some(ReservationLegs { reservation, buy, sell, settled }))
    }

    async fn sum_fills_for_order(&mut self, order_id: i64) -> LedgerResult<i64> {
        self.ensure_open()?;
        let state = self.state.lock();

        let mut fills: BTreeMap<i64, &Fill> = state.fills.iter().map(|(k, v)| (*k, v)).collect();
        fills.extend(self.staged_fills.iter().map(|(k, v)| (*k, v)));

        Ok(fills
            .values()
            .filter(|fill| {
                self.reservation_view(&state, fill.reservation_id)
                    .is_some_and(|r| r.involves(order_id))
            })
            .map(|fill| fill.quantity)
            .sum())
    }

    async fn save_order(&mut self, order: &Order) -> LedgerResult<Order> {
        self.ensure_open()?;
        let shared = Arc::clone(&self.state);
        let mut state = shared.lock();

        let current = self
            .order_view(&state, order.id)
            .ok_or(LedgerError::OrderNotFound { id: order.id })?;
        if current.version != order.version || !state.try_lock(RowKey::Order(order.id), self.tx_id) {
            return Err(LedgerError::WriteConflict { entity: "order", id: order.id });
        }

        let mut saved = order.clone();
        saved.version += 1;
        self.staged_orders.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn close_reservation(&mut self, reservation: &Reservation, quantity: i64) -> LedgerResult<Fill> {
        self.ensure_open()?;
        let shared = Arc::clone(&self.state);
        let mut state = shared.lock();

        let conflict = LedgerError::WriteConflict { entity: "reservation", id: reservation.id };
        let Some(mut current) = self.reservation_view(&state, reservation.id) else {
            return Err(conflict);
        };
        if current.version != reservation.version
            || self.has_fill(&state, reservation.id)
            || !state.try_lock(RowKey::Reservation(reservation.id), self.tx_id)
        {
            return Err(conflict);
        }

        current.version += 1;
        self.staged_reservations.insert(current.id, current);

        let fill = Fill {
            id: next_id(&mut state.fill_seq),
            reservation_id: reservation.id,
            quantity,
            created_at: Utc::now(),
        };
        self.staged_fills.insert(reservation.id, fill.clone());
        Ok(fill)
    }

    fn after_commit(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }

    async fn commit(&mut self) -> LedgerResult<()> {
        self.ensure_open()?;
        {
            let shared = Arc::clone(&self.state);
            let mut state = shared.lock();
            state.orders.extend(self.staged_orders.drain());
            state.reservations.append(&mut self.staged_reservations);
            state.fills.append(&mut self.staged_fills);
            state.release(self.tx_id);
        }
        self.finished = true;

        for hook in self.hooks.drain(..) {
            hook();
        }
        Ok(())
    }

    async fn rollback(&mut self) -> LedgerResult<()> {
        self.ensure_open()?;
        self.discard();
        Ok(())
    }
}

impl Drop for InMemoryLedgerTx {
    fn drop(&mut self) {
        if !self.finished {
            self.discard();
        }
    }
}
