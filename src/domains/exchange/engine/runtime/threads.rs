// =====================================================
// Threads - 워커 루프 함수들
// =====================================================
// 역할: 매칭 워커 스레드 루프와 스위퍼 태스크 루프
//
// 구조:
// - match_worker_loop(): OS 스레드, 대기열에서 주문을 꺼내 매칭
// - sweeper_loop(): tokio 태스크, 주기적 스윕 + 보류 정산 재시도
// =====================================================

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::Receiver;
use tokio::runtime::Handle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domains::exchange::engine::admission::AdmissionQueue;
use crate::domains::exchange::engine::matcher::Matcher;
use crate::domains::exchange::engine::settlement::SettlementProcess;
use crate::domains::exchange::models::Order;

// =====================================================
// 매칭 워커 루프
// =====================================================
// 처리 과정:
// 1. running 플래그 확인 (반복마다 1회)
// 2. 대기열 / 종료 채널 중 먼저 온 것 수신 (블로킹)
// 3. 주문이면 Matcher::reserve() 실행 (tokio 런타임에서 block_on)
// 4. 에러는 로그만 남기고 다음 주문으로 (치명적 에러만 루프 종료)
// =====================================================

/// 매칭 워커 메인 루프
///
/// # Arguments
/// * `worker_id` - 로그용 워커 번호
/// * `orders` - 매칭 대기열 수신 채널 (모든 워커가 공유)
/// * `shutdown` - 종료 신호 채널 (송신측이 drop 되면 깨어남)
/// * `matcher` - 매칭 엔진 (공유)
/// * `runtime` - 원장 호출을 실행할 tokio 런타임 핸들
/// * `running` - 실행 중 여부 플래그
pub fn match_worker_loop(
    worker_id: usize,
    orders: Receiver<Order>,
    shutdown: Receiver<()>,
    matcher: Arc<Matcher>,
    runtime: Handle,
    running: Arc<AtomicBool>,
) {
    info!(worker = worker_id, "match worker started");

    loop {
        if !running.load(Ordering::Relaxed) {
            break;
        }

        crossbeam::select! {
            recv(orders) -> msg => match msg {
                Ok(order) => {
                    if !process_order(worker_id, &order, &matcher, &runtime) {
                        break;
                    }
                }
                // 채널이 닫힘 (정상 종료)
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }

    info!(worker = worker_id, "match worker stopped");
}

/// 주문 1건 처리
///
/// # Returns
/// 워커가 계속 돌아야 하면 true
fn process_order(worker_id: usize, order: &Order, matcher: &Matcher, runtime: &Handle) -> bool {
    let order_id = order.id;
    let result = panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(matcher.reserve(order))));

    match result {
        Ok(Ok(Some(reservation))) => {
            debug!(worker = worker_id, order_id, reservation_id = reservation.id, "reservation committed");
            true
        }
        Ok(Ok(None)) => {
            debug!(worker = worker_id, order_id, "no reservation (not eligible, locked or no counter)");
            true
        }
        Ok(Err(e)) if e.is_fatal() => {
            error!(worker = worker_id, order_id, error = %e, "fatal ledger error, worker exiting");
            false
        }
        Ok(Err(e)) => {
            warn!(worker = worker_id, order_id, error = %e, "matching attempt failed");
            true
        }
        Err(_) => {
            error!(worker = worker_id, order_id, "matching attempt panicked");
            true
        }
    }
}

// =====================================================
// 스위퍼 루프
// =====================================================

/// 스위퍼 메인 루프
///
/// `period` 마다 교차 가능한 대상 주문을 대기열에 적재하고,
/// 보류된 정산을 다시 시도합니다. 늦은 틱은 건너뜁니다.
pub async fn sweeper_loop(
    queue: AdmissionQueue,
    settlement: Arc<SettlementProcess>,
    period: Duration,
    limit: usize,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = queue.sweep(limit).await {
                    warn!(error = %e, "sweep failed");
                }

                let resolved = settlement.retry_stuck().await;
                if resolved > 0 {
                    info!(resolved, "parked settlements resolved");
                }
            }
        }
    }

    debug!("sweeper stopped");
}
