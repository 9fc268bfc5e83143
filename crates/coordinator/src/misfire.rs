//! 哑火处置
//!
//! 越过阈值仍未触发的 WAITING 触发器被晋升为 MISFIRED，由扫描循环
//! 按触发器自带的哑火策略批量处置。每批处理量有上限，积压时缩短
//! 休眠间隔尽快追赶。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use jobstore_core::CoordinatorConfig;
use jobstore_domain::ports::{LockManager, LockName, SchedulerSignaler, TransactionBoundary};
use jobstore_domain::repositories::{
    CalendarRepository, PersistenceGateway, TriggerRepository,
};
use jobstore_domain::{StoreResult, TriggerKey, TriggerState};

use crate::shutdown::ShutdownHandle;
use crate::unit_of_work::execute_in_lock;

/// 积压未清时两次扫描之间的短暂停
const MORE_TO_DO_PAUSE: Duration = Duration::from_millis(50);

/// 按触发器的哑火策略更新其时间簿记并落库。
///
/// 处置后仍有触发时刻则回到 `state_when_waiting`，否则置 COMPLETE。
/// 哑火通知对每次处置恰好发出一次。返回是否实际处置。
pub(crate) async fn apply_misfire(
    gateway: &dyn PersistenceGateway,
    signaler: &dyn SchedulerSignaler,
    key: &TriggerKey,
    state_when_waiting: TriggerState,
) -> StoreResult<bool> {
    let mut trigger = match gateway.get_trigger(key).await? {
        Some(t) => t,
        None => return Ok(false),
    };
    // 哑火路径总是读新鲜日历
    let calendar = match &trigger.calendar_name {
        Some(name) => gateway.get_calendar(name).await?,
        None => None,
    };

    signaler.notify_trigger_listeners_misfired(&trigger).await;
    trigger.update_after_misfire(Utc::now(), calendar.as_deref());

    trigger.state = if trigger.next_fire_time.is_some() {
        state_when_waiting
    } else {
        TriggerState::Complete
    };
    gateway.update_trigger(&trigger).await?;
    debug!("触发器 {} 哑火处置完成（新状态 {}）", key, trigger.state);
    Ok(true)
}

/// 单次扫描的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MisfireOutcome {
    pub handled: usize,
    pub has_more: bool,
}

/// 哑火扫描循环
pub struct MisfireScanner {
    gateway: Arc<dyn PersistenceGateway>,
    locks: Arc<dyn LockManager>,
    tx: Arc<dyn TransactionBoundary>,
    signaler: Arc<dyn SchedulerSignaler>,
    config: CoordinatorConfig,
    shutdown: ShutdownHandle,
}

impl MisfireScanner {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        locks: Arc<dyn LockManager>,
        tx: Arc<dyn TransactionBoundary>,
        signaler: Arc<dyn SchedulerSignaler>,
        config: CoordinatorConfig,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            gateway,
            locks,
            tx,
            signaler,
            config,
            shutdown,
        }
    }

    /// 执行一次扫描：晋升过期触发器并处置一批 MISFIRED。
    pub async fn scan_once(&self) -> StoreResult<MisfireOutcome> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.scan_once_locked(),
        )
        .await
    }

    async fn scan_once_locked(&self) -> StoreResult<MisfireOutcome> {
        let cutoff = Utc::now() - self.config.misfire_threshold();
        self.gateway
            .update_trigger_states_before(cutoff, TriggerState::Misfired, &[TriggerState::Waiting])
            .await?;

        let keys = self.gateway.triggers_in_state(TriggerState::Misfired).await?;
        let cap = self.config.max_misfires_to_handle_at_a_time;
        let has_more = keys.len() > cap;

        let mut handled = 0usize;
        for key in keys.into_iter().take(cap) {
            if apply_misfire(
                &*self.gateway,
                &*self.signaler,
                &key,
                TriggerState::Waiting,
            )
            .await?
            {
                handled += 1;
            }
        }
        if handled > 0 {
            info!("本轮处置 {} 个哑火触发器（积压未清: {}）", handled, has_more);
            self.signaler.signal_scheduling_change().await;
        }
        Ok(MisfireOutcome { handled, has_more })
    }

    /// 扫描循环：正常间隔为哑火阈值，积压未清时缩短，出错时退避。
    pub async fn run(&self) {
        info!("哑火扫描循环启动");
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut consecutive_failures = 0u32;

        loop {
            if self.shutdown.is_shutdown() {
                break;
            }

            let sleep_for = match self.scan_once().await {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    if outcome.has_more {
                        MORE_TO_DO_PAUSE
                    } else {
                        Duration::from_millis(self.config.misfire_threshold_ms)
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    // 存储持续不可用时每 4 次报一次，避免刷屏
                    if consecutive_failures % 4 == 1 {
                        error!("哑火扫描失败（连续 {} 次）: {}", consecutive_failures, e);
                    } else {
                        warn!("哑火扫描失败: {}", e);
                    }
                    self.config.db_retry_interval()
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        info!("哑火扫描循环退出");
    }
}
