//! 集群签到与故障接管
//!
//! 每个实例周期性刷新调度器状态行；签到超时（自报间隔与本地观测
//! 间隔取较大者，再加固定容差）的实例被判定故障，由发现者接管其
//! 在途执行：预定中的释放回 WAITING，执行中且要求恢复的合成恢复
//! 触发器，有状态封锁解除，在途记录清账。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use jobstore_core::constants::CLUSTER_CHECKIN_SLACK_MS;
use jobstore_core::CoordinatorConfig;
use jobstore_domain::ports::{LockManager, LockName, SchedulerSignaler, TransactionBoundary};
use jobstore_domain::repositories::{
    FiredTriggerRepository, JobRepository, PersistenceGateway, SchedulerStateRepository,
    TriggerRepository,
};
use jobstore_domain::{
    FiredInstanceState, SchedulerStateRecord, StoreResult, TriggerState,
};

use crate::recovery::build_recovery_trigger;
use crate::shutdown::ShutdownHandle;
use crate::unit_of_work::execute_in_lock;

/// 签到循环两次迭代之间的最短间隔
const MIN_CHECKIN_PAUSE: Duration = Duration::from_millis(100);

pub struct ClusterMonitor {
    gateway: Arc<dyn PersistenceGateway>,
    locks: Arc<dyn LockManager>,
    tx: Arc<dyn TransactionBoundary>,
    signaler: Arc<dyn SchedulerSignaler>,
    config: CoordinatorConfig,
    shutdown: ShutdownHandle,
    /// 本实例上次成功签到的时刻，用于计算本地观测间隔
    last_checkin: Mutex<Option<DateTime<Utc>>>,
}

impl ClusterMonitor {
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
            last_checkin: Mutex::new(None),
        }
    }

    /// 执行一轮签到，必要时接管故障实例。返回接管的实例数。
    pub async fn check_in_and_recover(&self) -> StoreResult<usize> {
        let failed = execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::StateAccess),
            self.cluster_check_in(),
        )
        .await?;
        if failed.is_empty() {
            return Ok(0);
        }

        let count = failed.len();
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.recover_failed_instances(failed),
        )
        .await?;
        self.signaler.signal_scheduling_change().await;
        Ok(count)
    }

    /// 刷新本实例状态行，并认领签到超时的同侪。
    async fn cluster_check_in(&self) -> StoreResult<Vec<SchedulerStateRecord>> {
        let now = Utc::now();
        let mut last = self.last_checkin.lock().await;
        // 本地观测间隔：实际两次签到的跨度可能超过配置间隔
        // （循环被存储故障退避拖慢），判定超时取两者较大值
        let own_elapsed = last
            .map(|t| now - t)
            .unwrap_or_else(|| self.config.cluster_checkin_interval());

        let mut failed = Vec::new();
        let mut self_row_seen = false;
        for record in self.gateway.all_scheduler_states().await? {
            if record.instance_id == self.config.instance_id {
                self_row_seen = true;
                continue;
            }
            let tolerance =
                std::cmp::max(chrono::Duration::milliseconds(record.checkin_interval_ms), own_elapsed)
                    + chrono::Duration::milliseconds(CLUSTER_CHECKIN_SLACK_MS);
            if record.checkin_timestamp + tolerance < now {
                if record.recoverer.as_deref() == Some(self.config.instance_id.as_str()) {
                    // 上一轮认领后接管中途失败，本轮重试
                    warn!("实例 {} 的接管上轮未完成，重试", record.instance_id);
                }
                info!(
                    "实例 {} 签到超时（上次签到 {}），认领接管",
                    record.instance_id, record.checkin_timestamp
                );
                let mut claimed = record.clone();
                claimed.recoverer = Some(self.config.instance_id.clone());
                self.gateway.upsert_scheduler_state(&claimed).await?;
                failed.push(claimed);
            }
        }

        if !self_row_seen && last.is_some() {
            // 自己的行被别人当作故障清理过：说明本实例曾被判定故障。
            // 在途工作可能已被接管，这里只告警，重建状态行继续运行
            warn!(
                "本实例 {} 的状态行缺失，可能曾被同侪判定故障并接管",
                self.config.instance_id
            );
        }

        self.gateway
            .upsert_scheduler_state(&SchedulerStateRecord {
                instance_id: self.config.instance_id.clone(),
                checkin_timestamp: now,
                checkin_interval_ms: self.config.cluster_checkin_interval_ms as i64,
                recoverer: None,
            })
            .await?;
        *last = Some(now);
        Ok(failed)
    }

    /// 接管故障实例的在途执行。
    async fn recover_failed_instances(
        &self,
        failed: Vec<SchedulerStateRecord>,
    ) -> StoreResult<()> {
        let now = Utc::now();
        for instance in failed {
            let records = self.gateway.fired_by_instance(&instance.instance_id).await?;
            let mut released = 0u64;
            let mut recovered = 0usize;

            for record in &records {
                match record.state {
                    FiredInstanceState::Acquired => {
                        // 预定未触发：放回 WAITING 即完全撤销
                        released += self
                            .gateway
                            .update_trigger_state_from(
                                &record.trigger_key,
                                TriggerState::Waiting,
                                &[TriggerState::Acquired],
                            )
                            .await?;
                    }
                    FiredInstanceState::Executing | FiredInstanceState::Blocked => {
                        if record.requests_recovery {
                            if self.gateway.job_exists(&record.job_key).await? {
                                let recovery = build_recovery_trigger(record, now);
                                self.gateway.insert_trigger(&recovery).await?;
                                recovered += 1;
                            } else {
                                warn!(
                                    "中断执行 {} 的任务 {} 已不存在，放弃恢复",
                                    record.fire_instance_id, record.job_key
                                );
                            }
                        }
                        if record.is_stateful {
                            // 故障实例再也不会发来完成回执，封锁就地解除
                            self.gateway
                                .update_trigger_states_for_job(
                                    &record.job_key,
                                    TriggerState::Waiting,
                                    &[TriggerState::Blocked],
                                )
                                .await?;
                            self.gateway
                                .update_trigger_states_for_job(
                                    &record.job_key,
                                    TriggerState::Paused,
                                    &[TriggerState::PausedBlocked],
                                )
                                .await?;
                        }
                    }
                }
            }

            let purged = self
                .gateway
                .delete_fired_by_instance(&instance.instance_id)
                .await?;

            // 接管完成：清除认领标记并刷新签到，残留的行不再被
            // 其他实例重复接管
            self.gateway
                .upsert_scheduler_state(&SchedulerStateRecord {
                    instance_id: instance.instance_id.clone(),
                    checkin_timestamp: now,
                    checkin_interval_ms: instance.checkin_interval_ms,
                    recoverer: None,
                })
                .await?;

            info!(
                "实例 {} 接管完成: 释放 {} 个预定, 合成 {} 个恢复触发器, 清账 {} 条在途记录",
                instance.instance_id, released, recovered, purged
            );
        }
        Ok(())
    }

    /// 签到循环：间隔为配置签到间隔扣除本轮耗时，出错时退避。
    pub async fn run(&self) {
        info!("集群签到循环启动（实例 {}）", self.config.instance_id);
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut consecutive_failures = 0u32;

        loop {
            if self.shutdown.is_shutdown() {
                break;
            }

            let started = std::time::Instant::now();
            let sleep_for = match self.check_in_and_recover().await {
                Ok(recovered) => {
                    consecutive_failures = 0;
                    if recovered > 0 {
                        info!("本轮接管 {} 个故障实例", recovered);
                    }
                    let interval =
                        Duration::from_millis(self.config.cluster_checkin_interval_ms);
                    std::cmp::max(
                        interval.saturating_sub(started.elapsed()),
                        MIN_CHECKIN_PAUSE,
                    )
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures % 4 == 1 {
                        error!("集群签到失败（连续 {} 次）: {}", consecutive_failures, e);
                    } else {
                        warn!("集群签到失败: {}", e);
                    }
                    self.config.db_retry_interval()
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        // 退出前摘掉自己的状态行，避免被同侪误判故障
        if let Err(e) = self.deregister().await {
            warn!("退出时清理状态行失败: {}", e);
        }
        info!("集群签到循环退出");
    }

    async fn deregister(&self) -> StoreResult<()> {
        execute_in_lock(&*self.locks, &*self.tx, Some(LockName::StateAccess), async {
            self.gateway
                .delete_scheduler_state(&self.config.instance_id)
                .await?;
            Ok(())
        })
        .await
    }
}
