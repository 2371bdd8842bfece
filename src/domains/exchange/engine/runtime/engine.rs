// =====================================================
// MatchingEngine - 매칭 엔진 런타임
// =====================================================
// 역할: 매칭 워커 풀, 스위퍼, 정산 디스패치를 묶어서 시작/정지
//
// 핵심 설계:
// 1. 매칭 워커 N개 - OS 스레드, 공유 대기열(crossbeam)에서 주문 수신
// 2. 정산 - 예약 커밋 훅에서 tokio 태스크로 실행
// 3. 스위퍼 - tokio 태스크, 주기적 스윕 + 보류 정산 재시도
// 4. 시작 시 미정산 예약 복구
//
// 구성 순서:
// store → AdmissionQueue → SettlementProcess → SettlementDispatcher → Matcher
// =====================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result, bail};
use crossbeam::channel::{Receiver, Sender, bounded};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::config::EngineConfig;
use super::threads;
use crate::domains::exchange::engine::admission::AdmissionQueue;
use crate::domains::exchange::engine::matcher::Matcher;
use crate::domains::exchange::engine::settlement::{SettlementDispatcher, SettlementProcess};
use crate::domains::exchange::ledger::LedgerStore;
use crate::domains::exchange::models::Order;
use crate::shared::errors::LedgerResult;

/// 매칭 엔진
///
/// # 아키텍처
/// ```text
/// OrderService / sweep
///     ↓ notify()
/// [crossbeam::channel] (무제한 MPMC)
///     ↓ recv()
/// Match Worker x N (OS 스레드)
///     └─ Matcher::reserve() → 예약 커밋
///            ↓ after_commit
///        SettlementProcess::settle() (tokio 태스크)
///            ↓ after_commit
///        notify() (남은 잔량 재진입)
/// ```
pub struct MatchingEngine {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 핵심 컴포넌트
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    store: Arc<dyn LedgerStore>,
    config: EngineConfig,
    runtime: Handle,
    queue: AdmissionQueue,
    settlement: Arc<SettlementProcess>,
    matcher: Arc<Matcher>,

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 실행 상태
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 워커 스레드 핸들
    workers: Vec<thread::JoinHandle<()>>,

    /// 종료 신호 송신측 (drop 하면 모든 워커가 깨어남)
    shutdown_tx: Option<Sender<()>>,
    shutdown_rx: Option<Receiver<()>>,

    sweeper: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,

    /// 실행 중 여부 (워커 루프가 반복마다 확인)
    running: Arc<AtomicBool>,
}

impl MatchingEngine {
    /// 엔진 생성 (아직 워커 없음)
    ///
    /// # Arguments
    /// * `store` - 원장 저장소
    /// * `config` - 엔진 설정
    /// * `runtime` - 워커의 원장 호출과 정산 태스크를 실행할 런타임
    pub fn new(store: Arc<dyn LedgerStore>, config: EngineConfig, runtime: Handle) -> Self {
        let queue = AdmissionQueue::new(Arc::clone(&store));
        let settlement = Arc::new(SettlementProcess::new(
            Arc::clone(&store),
            queue.clone(),
            config.settlement_max_attempts,
        ));
        let dispatcher = SettlementDispatcher::spawning(Arc::clone(&settlement), runtime.clone());
        let matcher = Arc::new(Matcher::new(Arc::clone(&store), dispatcher));

        Self {
            store,
            config,
            runtime,
            queue,
            settlement,
            matcher,
            workers: Vec::new(),
            shutdown_tx: None,
            shutdown_rx: None,
            sweeper: None,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 엔진 시작
    ///
    /// # 처리 과정
    /// 1. 미정산 예약 복구
    /// 2. 종료 신호 채널 생성 + 실행 플래그 설정
    /// 3. 매칭 워커 `config.workers` 개 시작
    /// 4. 스위퍼 시작
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            bail!("Matching engine is already running");
        }

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 1. 미정산 예약 복구
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        self.settlement
            .recover_unsettled(self.config.recovery_limit)
            .await
            .context("Failed to recover unsettled reservations")?;

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 2. 실행 상태 초기화
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        self.shutdown_tx = Some(shutdown_tx);
        self.shutdown_rx = Some(shutdown_rx);
        self.cancel = CancellationToken::new();
        self.running.store(true, Ordering::Relaxed);

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 3. 매칭 워커 시작
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        for _ in 0..self.config.workers {
            self.start_worker()?;
        }

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 4. 스위퍼 시작
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        let sweeper = threads::sweeper_loop(
            self.queue.clone(),
            Arc::clone(&self.settlement),
            self.config.sweep_interval,
            self.config.sweep_limit,
            self.cancel.clone(),
        );
        self.sweeper = Some(self.runtime.spawn(sweeper));

        info!(workers = self.workers.len(), "matching engine started");
        Ok(())
    }

    /// 매칭 워커 1개 추가
    pub fn start_worker(&mut self) -> Result<()> {
        let shutdown_rx = self
            .shutdown_rx
            .clone()
            .context("Matching engine is not running")?;

        let worker_id = self.workers.len();
        let orders = self.queue.receiver().clone();
        let matcher = Arc::clone(&self.matcher);
        let runtime = self.runtime.clone();
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name(format!("match-worker-{worker_id}"))
            .spawn(move || {
                threads::match_worker_loop(worker_id, orders, shutdown_rx, matcher, runtime, running);
            })
            .context("Failed to spawn match worker")?;

        self.workers.push(handle);
        Ok(())
    }

    /// 엔진 정지
    ///
    /// # 처리 과정
    /// 1. 실행 플래그 해제
    /// 2. 종료 채널 닫기 (대기 중인 워커 깨우기)
    /// 3. 스위퍼 취소 + 종료 대기
    /// 4. 워커 스레드 종료 대기
    ///
    /// 이미 커밋된 예약의 정산 태스크는 런타임에서 계속 진행됩니다.
    pub async fn stop(&mut self) -> Result<()> {
        // 1. 실행 플래그 해제
        self.running.store(false, Ordering::Relaxed);

        // 2. 종료 채널 닫기
        self.shutdown_tx.take();
        self.shutdown_rx.take();

        // 3. 스위퍼 종료
        self.cancel.cancel();
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.await.context("Sweeper task panicked")?;
        }

        // 4. 워커 종료 대기
        let workers = std::mem::take(&mut self.workers);
        let count = workers.len();
        tokio::task::spawn_blocking(move || {
            for handle in workers {
                if handle.join().is_err() {
                    error!("match worker thread panicked");
                }
            }
        })
        .await
        .context("Failed to join match workers")?;

        info!(workers = count, "matching engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// 주문 변경 알림 (대상 주문만 대기열에 들어감)
    pub fn notify(&self, order: &Order) -> bool {
        self.queue.notify(order)
    }

    /// 즉시 스윕 1회
    pub async fn sweep(&self, limit: usize) -> LedgerResult<usize> {
        self.queue.sweep(limit).await
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn settlement(&self) -> &Arc<SettlementProcess> {
        &self.settlement
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        // stop() 없이 drop 된 경우에도 워커/스위퍼가 빠져나가도록 신호만 보냄
        self.running.store(false, Ordering::Relaxed);
        self.shutdown_tx.take();
        self.cancel.cancel();
    }
}
