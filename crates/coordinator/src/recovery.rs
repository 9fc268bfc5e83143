//! 启动自恢复与恢复触发器合成
//!
//! 非集群部署在启动时把上次进程异常退出留下的中间状态收拾干净；
//! 集群部署的同等工作由集群监视循环对故障实例执行，启动自恢复
//! 被跳过以免误伤仍在运行的同侪。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use jobstore_core::constants::{
    RECOVERY_ORIGINAL_FIRE_TIME_KEY, RECOVERY_ORIGINAL_TRIGGER_GROUP_KEY,
    RECOVERY_ORIGINAL_TRIGGER_NAME_KEY, RECOVERY_TRIGGER_GROUP,
};
use jobstore_core::CoordinatorConfig;
use jobstore_domain::ports::{LockManager, LockName, SchedulerSignaler, TransactionBoundary};
use jobstore_domain::repositories::{
    FiredTriggerRepository, JobRepository, PersistenceGateway, TriggerRepository,
};
use jobstore_domain::schedule::{MisfireInstruction, Schedule};
use jobstore_domain::{FiredTriggerRecord, StoreResult, Trigger, TriggerKey, TriggerState};

use crate::misfire::apply_misfire;
use crate::unit_of_work::execute_in_lock;

/// 为中断的执行合成一次性恢复触发器。
///
/// 数据负载携带原触发器坐标与原触发时刻，执行侧据此区分恢复运行
/// 与正常运行。名字由触发实例标识派生，天然唯一。
pub(crate) fn build_recovery_trigger(record: &FiredTriggerRecord, now: DateTime<Utc>) -> Trigger {
    Trigger {
        key: TriggerKey::new(
            format!("recover_{}", record.fire_instance_id),
            RECOVERY_TRIGGER_GROUP,
        ),
        job_key: record.job_key.clone(),
        schedule: Schedule::Once { fire_at: now },
        next_fire_time: Some(now),
        previous_fire_time: None,
        misfire_instruction: MisfireInstruction::FireOnceNow,
        calendar_name: None,
        volatile: record.volatile,
        state: TriggerState::Waiting,
        data: json!({
            RECOVERY_ORIGINAL_TRIGGER_NAME_KEY: record.trigger_key.name,
            RECOVERY_ORIGINAL_TRIGGER_GROUP_KEY: record.trigger_key.group,
            RECOVERY_ORIGINAL_FIRE_TIME_KEY: record.fired_time.timestamp_millis(),
        }),
        fire_instance_id: None,
    }
}

/// 启动自恢复的账目
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub released_triggers: u64,
    pub misfires_handled: usize,
    pub recovery_triggers_created: usize,
    pub completed_removed: usize,
    pub fired_records_purged: u64,
}

pub struct StartupRecovery {
    gateway: Arc<dyn PersistenceGateway>,
    locks: Arc<dyn LockManager>,
    tx: Arc<dyn TransactionBoundary>,
    signaler: Arc<dyn SchedulerSignaler>,
    config: CoordinatorConfig,
}

impl StartupRecovery {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        locks: Arc<dyn LockManager>,
        tx: Arc<dyn TransactionBoundary>,
        signaler: Arc<dyn SchedulerSignaler>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            gateway,
            locks,
            tx,
            signaler,
            config,
        }
    }

    /// 执行启动自恢复。集群模式下直接返回空账目。
    pub async fn recover(&self) -> StoreResult<RecoveryReport> {
        if self.config.is_clustered {
            warn!("集群模式下启动自恢复被跳过，由集群监视循环接管");
            return Ok(RecoveryReport::default());
        }
        let report = execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.recover_locked(),
        )
        .await?;
        self.signaler.signal_scheduling_change().await;
        Ok(report)
    }

    async fn recover_locked(&self) -> StoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        // 上次进程没走完的中间状态一律回到可调度状态
        report.released_triggers = self
            .gateway
            .update_all_trigger_states_from(TriggerState::Waiting, &[
                TriggerState::Acquired,
                TriggerState::Blocked,
            ])
            .await?;
        self.gateway
            .update_all_trigger_states_from(TriggerState::Paused, &[TriggerState::PausedBlocked])
            .await?;

        // 停机期间积累的哑火一次性处置
        let cutoff = now - self.config.misfire_threshold();
        self.gateway
            .update_trigger_states_before(cutoff, TriggerState::Misfired, &[TriggerState::Waiting])
            .await?;
        for key in self.gateway.triggers_in_state(TriggerState::Misfired).await? {
            if apply_misfire(&*self.gateway, &*self.signaler, &key, TriggerState::Waiting).await? {
                report.misfires_handled += 1;
            }
        }

        // 清账之前先为要求恢复的中断执行合成恢复触发器
        for record in self.gateway.all_fired().await? {
            if !record.requests_recovery {
                continue;
            }
            if !self.gateway.job_exists(&record.job_key).await? {
                warn!(
                    "中断执行 {} 的任务 {} 已不存在，放弃恢复",
                    record.fire_instance_id, record.job_key
                );
                continue;
            }
            let recovery = build_recovery_trigger(&record, now);
            self.gateway.insert_trigger(&recovery).await?;
            report.recovery_triggers_created += 1;
        }

        // 残留的 COMPLETE 触发器已无价值
        for key in self.gateway.triggers_in_state(TriggerState::Complete).await? {
            if self.gateway.delete_trigger(&key).await? {
                report.completed_removed += 1;
            }
        }

        report.fired_records_purged = self.gateway.delete_all_fired().await?;

        info!(
            "启动自恢复完成: 释放 {} 个触发器, 处置 {} 个哑火, 合成 {} 个恢复触发器, 清除 {} 个完成触发器, 清账 {} 条在途记录",
            report.released_triggers,
            report.misfires_handled,
            report.recovery_triggers_created,
            report.completed_removed,
            report.fired_records_purged
        );
        Ok(report)
    }
}
