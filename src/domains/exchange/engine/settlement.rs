// =====================================================
// SettlementProcess - 정산 프로세스
// =====================================================
// 역할: 예약 1건을 소비해서 체결 1건을 기록하고 양쪽 주문을 갱신
//
// 처리 과정 (트랜잭션 1개):
// 1. 예약 + 양쪽 주문 로드 (이미 체결이 있으면 종료)
// 2. 한쪽이라도 취소됨 → 양쪽 예약 해제 + 수량 0 체결
// 3. 아니면 원장 기준 잔량 계산 → min(잔량) 만큼 체결
// 4. 양쪽 주문 버전 비교 저장 + 예약 종료 + 체결 기록
// 5. 커밋 후 양쪽 주문을 매칭 대기열에 다시 알림
//
// 쓰기 충돌이면 트랜잭션 전체를 다시 시도합니다 (최대 max_attempts 회).
// 재시도를 다 써도 실패하면 예약을 보류 목록에 올리고,
// 스위퍼가 주기적으로 다시 정산합니다.
// =====================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::admission::AdmissionQueue;
use crate::domains::exchange::ledger::{LedgerStore, LedgerTx};
use crate::domains::exchange::models::{Fill, Order, ReservationLegs};
use crate::shared::errors::LedgerResult;

/// 정산 계산 결과 (순수 함수)
/// Pure settlement arithmetic
///
/// "from" 은 예약의 매수 주문, "to" 는 매도 주문입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPlan {
    pub fill_quantity: i64,
    pub from_leftover: i64,
    pub to_leftover: i64,
}

impl SettlementPlan {
    /// 체결 수량 = min(양쪽 잔량), 새 잔량 = 잔량 - 체결 수량
    ///
    /// 음수 잔량(원장 초과 체결)은 0으로 봅니다.
    pub fn compute(from_leftover: i64, to_leftover: i64) -> Self {
        let from = from_leftover.max(0);
        let to = to_leftover.max(0);
        let fill_quantity = from.min(to);

        Self {
            fill_quantity,
            from_leftover: from - fill_quantity,
            to_leftover: to - fill_quantity,
        }
    }

    pub fn from_fully_executed(&self) -> bool {
        self.from_leftover == 0
    }

    pub fn to_fully_executed(&self) -> bool {
        self.to_leftover == 0
    }
}

/// 정산 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// 정상 체결
    Filled(Fill),
    /// 취소된 주문이 있어 수량 0 으로 종료
    Cancelled(Fill),
    /// 이미 체결이 기록된 예약 (아무것도 안 함)
    AlreadySettled,
    /// 예약 또는 주문을 찾을 수 없음
    Missing,
    /// 쓰기 충돌 재시도 소진 (보류 목록에 등록됨)
    Exhausted,
}

/// 정산 프로세스
/// Settlement process
pub struct SettlementProcess {
    store: Arc<dyn LedgerStore>,
    queue: AdmissionQueue,
    max_attempts: u32,
    /// 재시도 소진 / 에러로 보류된 예약 ID
    stuck: Mutex<BTreeSet<i64>>,
}

impl SettlementProcess {
    pub fn new(store: Arc<dyn LedgerStore>, queue: AdmissionQueue, max_attempts: u32) -> Self {
        Self {
            store,
            queue,
            max_attempts: max_attempts.max(1),
            stuck: Mutex::new(BTreeSet::new()),
        }
    }

    /// 예약 정산 (쓰기 충돌 시 재시도)
    ///
    /// # Arguments
    /// * `reservation_id` - 정산할 예약 ID
    ///
    /// # Returns
    /// * `Ok(SettlementOutcome)` - 재시도 소진은 `Exhausted`
    /// * `Err(LedgerError)` - 충돌이 아닌 에러 (예약은 보류 목록에 등록)
    pub async fn settle(&self, reservation_id: i64) -> LedgerResult<SettlementOutcome> {
        for attempt in 1..=self.max_attempts {
            match self.settle_once(reservation_id).await {
                Ok(outcome) => {
                    self.stuck.lock().remove(&reservation_id);
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() => {
                    debug!(reservation_id, attempt, error = %e, "settlement write conflict, retrying");
                }
                Err(e) => {
                    self.stuck.lock().insert(reservation_id);
                    return Err(e);
                }
            }
        }

        error!(
            reservation_id,
            attempts = self.max_attempts,
            "settlement retries exhausted, reservation parked"
        );
        self.stuck.lock().insert(reservation_id);
        Ok(SettlementOutcome::Exhausted)
    }

    /// 정산 1회 시도 (트랜잭션 1개)
    async fn settle_once(&self, reservation_id: i64) -> LedgerResult<SettlementOutcome> {
        let mut tx = self.store.begin().await?;

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 1. 예약 + 양쪽 주문 로드
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        let Some(legs) = tx.load_reservation(reservation_id).await? else {
            tx.rollback().await?;
            warn!(reservation_id, "reservation not found, nothing to settle");
            return Ok(SettlementOutcome::Missing);
        };
        if legs.settled {
            tx.rollback().await?;
            return Ok(SettlementOutcome::AlreadySettled);
        }
        let ReservationLegs { reservation, buy: from, sell: to, .. } = legs;

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 2. 취소 경로: 예약 해제 + 수량 0 체결
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        if from.cancelled || to.cancelled {
            let from = tx.save_order(&release(from)).await?;
            let to = tx.save_order(&release(to)).await?;
            let fill = tx.close_reservation(&reservation, 0).await?;
            self.readmit_after_commit(&mut *tx, [from, to]);
            tx.commit().await?;

            info!(reservation_id, "reservation released, counterpart cancelled");
            return Ok(SettlementOutcome::Cancelled(fill));
        }

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 3. 원장 기준 잔량 계산
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        let from_filled = tx.sum_fills_for_order(from.id).await?;
        let to_filled = tx.sum_fills_for_order(to.id).await?;
        let plan = SettlementPlan::compute(from.quantity - from_filled, to.quantity - to_filled);

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 4. 저장 + 체결 기록 + 커밋
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        let from = tx.save_order(&with_leftover(from, plan.from_leftover)).await?;
        let to = tx.save_order(&with_leftover(to, plan.to_leftover)).await?;
        let fill = tx.close_reservation(&reservation, plan.fill_quantity).await?;
        self.readmit_after_commit(&mut *tx, [from, to]);
        tx.commit().await?;

        info!(
            reservation_id,
            buy_order_id = reservation.buy_order_id,
            sell_order_id = reservation.sell_order_id,
            quantity = plan.fill_quantity,
            "reservation settled"
        );
        Ok(SettlementOutcome::Filled(fill))
    }

    /// 커밋 후 양쪽 주문을 대기열에 다시 알림 (대상 주문만 들어감)
    fn readmit_after_commit(&self, tx: &mut dyn LedgerTx, legs: [Order; 2]) {
        let queue = self.queue.clone();
        tx.after_commit(Box::new(move || {
            for leg in &legs {
                queue.notify(leg);
            }
        }));
    }

    /// 보류된 예약 ID 목록
    pub fn stuck_reservations(&self) -> Vec<i64> {
        self.stuck.lock().iter().copied().collect()
    }

    /// 보류된 예약 재정산
    ///
    /// # Returns
    /// 해결된 예약 수
    pub async fn retry_stuck(&self) -> usize {
        let parked: Vec<i64> = self.stuck.lock().iter().copied().collect();
        let mut resolved = 0;

        for reservation_id in parked {
            match self.settle(reservation_id).await {
                Ok(SettlementOutcome::Exhausted) => {}
                Ok(_) => resolved += 1,
                Err(e) => warn!(reservation_id, error = %e, "parked settlement still failing"),
            }
        }
        resolved
    }

    /// 체결이 없는 예약 재정산 (재시작 복구)
    ///
    /// 예약은 커밋됐지만 정산이 실행되지 않은 채 종료된 경우를 처리합니다.
    ///
    /// # Returns
    /// 다시 정산한 예약 수
    pub async fn recover_unsettled(&self, limit: usize) -> LedgerResult<usize> {
        let pending = self.store.unsettled_reservations(limit).await?;
        let count = pending.len();

        for reservation_id in pending {
            if let Err(e) = self.settle(reservation_id).await {
                error!(reservation_id, error = %e, "recovery settlement failed");
            }
        }

        if count > 0 {
            info!(count, "recovered unsettled reservations");
        }
        Ok(count)
    }
}

fn release(mut order: Order) -> Order {
    order.on_execution = false;
    order
}

fn with_leftover(mut order: Order, leftover: i64) -> Order {
    order.quantity_leftover = leftover;
    order.fully_executed = leftover == 0;
    order.on_execution = false;
    order
}

/// 예약 커밋 후 정산을 시작시키는 핸들
/// Hands committed reservations to settlement
#[derive(Clone)]
pub struct SettlementDispatcher {
    dispatch: Arc<dyn Fn(i64) + Send + Sync>,
}

impl SettlementDispatcher {
    /// 예약마다 tokio 태스크로 정산 실행
    pub fn spawning(settlement: Arc<SettlementProcess>, runtime: Handle) -> Self {
        Self::from_fn(move |reservation_id| {
            let settlement = Arc::clone(&settlement);
            runtime.spawn(async move {
                match settlement.settle(reservation_id).await {
                    Ok(outcome) => debug!(reservation_id, ?outcome, "settlement finished"),
                    Err(e) => error!(reservation_id, error = %e, "settlement failed"),
                }
            });
        })
    }

    pub fn from_fn(dispatch: impl Fn(i64) + Send + Sync + 'static) -> Self {
        Self { dispatch: Arc::new(dispatch) }
    }

    pub fn dispatch(&self, reservation_id: i64) {
        (self.dispatch)(reservation_id)
    }
}
