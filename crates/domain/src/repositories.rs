//! 持久层接口定义
//!
//! 按实体拆分的仓储接口，合并为 `PersistenceGateway` 总接口。
//! SQL 方言、BLOB 编码等属于具体实现的事，协调核心只面向这些抽象。
//! 所有状态变更原语都返回受影响的行数，零行更新是调用方的并发防御依据。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::calendar::Calendar;
use crate::entities::{
    FiredTriggerRecord, JobDetail, JobKey, SchedulerStateRecord, Trigger, TriggerKey, TriggerState,
};
use crate::errors::StoreResult;

/// 触发器仓储
#[async_trait]
pub trait TriggerRepository: Send + Sync {
    async fn insert_trigger(&self, trigger: &Trigger) -> StoreResult<()>;

    /// 覆盖整行（含状态与时间簿记）
    async fn update_trigger(&self, trigger: &Trigger) -> StoreResult<()>;

    async fn delete_trigger(&self, key: &TriggerKey) -> StoreResult<bool>;

    async fn get_trigger(&self, key: &TriggerKey) -> StoreResult<Option<Trigger>>;

    async fn trigger_exists(&self, key: &TriggerKey) -> StoreResult<bool>;

    /// 行不存在时返回 `TriggerState::Deleted` 哨兵
    async fn get_trigger_state(&self, key: &TriggerKey) -> StoreResult<TriggerState>;

    async fn update_trigger_state(
        &self,
        key: &TriggerKey,
        state: TriggerState,
    ) -> StoreResult<u64>;

    /// 仅当当前状态位于 `old_states` 中时更新，返回受影响行数
    async fn update_trigger_state_from(
        &self,
        key: &TriggerKey,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64>;

    /// 组范围的条件状态迁移
    async fn update_trigger_group_state_from(
        &self,
        group: &str,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64>;

    /// 同一任务所有触发器的条件状态迁移
    async fn update_trigger_states_for_job(
        &self,
        job_key: &JobKey,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64>;

    /// 全表条件状态迁移（启动恢复用）
    async fn update_all_trigger_states_from(
        &self,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64>;

    /// 触发时刻早于 `cutoff` 的条件状态迁移（哑火晋升用）
    async fn update_trigger_states_before(
        &self,
        cutoff: DateTime<Utc>,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64>;

    /// 按升序触发时刻返回处于某状态的触发器键
    async fn triggers_in_state(&self, state: TriggerState) -> StoreResult<Vec<TriggerKey>>;

    async fn triggers_for_job(&self, job_key: &JobKey) -> StoreResult<Vec<Trigger>>;

    async fn triggers_in_group(&self, group: &str) -> StoreResult<Vec<TriggerKey>>;

    async fn trigger_groups(&self) -> StoreResult<Vec<String>>;

    /// 是否有触发器引用该日历
    async fn calendar_referenced(&self, calendar_name: &str) -> StoreResult<bool>;

    /// WAITING 触发器中最早的触发时刻
    async fn min_next_fire_time(&self) -> StoreResult<Option<DateTime<Utc>>>;

    /// 在给定触发时刻等待触发的触发器键。
    /// 同一时刻多个候选时不承诺确定性排序，实现可用键作次级排序稳定器。
    async fn trigger_for_fire_time(
        &self,
        fire_time: DateTime<Utc>,
    ) -> StoreResult<Option<TriggerKey>>;
}

/// 任务仓储
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert_job(&self, job: &JobDetail) -> StoreResult<()>;

    async fn update_job(&self, job: &JobDetail) -> StoreResult<()>;

    async fn delete_job(&self, key: &JobKey) -> StoreResult<bool>;

    async fn get_job(&self, key: &JobKey) -> StoreResult<Option<JobDetail>>;

    async fn job_exists(&self, key: &JobKey) -> StoreResult<bool>;

    /// 只更新数据负载
    async fn update_job_data(&self, key: &JobKey, data: serde_json::Value) -> StoreResult<()>;
}

/// 在途触发记录仓储
#[async_trait]
pub trait FiredTriggerRepository: Send + Sync {
    async fn insert_fired(&self, record: &FiredTriggerRecord) -> StoreResult<()>;

    async fn delete_fired(&self, fire_instance_id: &str) -> StoreResult<bool>;

    async fn delete_fired_by_instance(&self, instance_id: &str) -> StoreResult<u64>;

    async fn delete_all_fired(&self) -> StoreResult<u64>;

    async fn fired_by_instance(&self, instance_id: &str)
        -> StoreResult<Vec<FiredTriggerRecord>>;

    async fn fired_for_trigger(&self, key: &TriggerKey) -> StoreResult<Vec<FiredTriggerRecord>>;

    async fn fired_for_job(&self, job_key: &JobKey) -> StoreResult<Vec<FiredTriggerRecord>>;

    async fn all_fired(&self) -> StoreResult<Vec<FiredTriggerRecord>>;
}

/// 调度实例签到记录仓储
#[async_trait]
pub trait SchedulerStateRepository: Send + Sync {
    /// 插入或刷新签到行
    async fn upsert_scheduler_state(&self, record: &SchedulerStateRecord) -> StoreResult<()>;

    async fn delete_scheduler_state(&self, instance_id: &str) -> StoreResult<bool>;

    async fn all_scheduler_states(&self) -> StoreResult<Vec<SchedulerStateRecord>>;
}

/// 暂停组标记仓储
#[async_trait]
pub trait PausedGroupRepository: Send + Sync {
    async fn insert_paused_group(&self, group: &str) -> StoreResult<()>;

    async fn delete_paused_group(&self, group: &str) -> StoreResult<bool>;

    async fn is_group_paused(&self, group: &str) -> StoreResult<bool>;

    async fn paused_groups(&self) -> StoreResult<Vec<String>>;
}

/// 日历仓储
#[async_trait]
pub trait CalendarRepository: Send + Sync {
    /// `replace` 为 false 且同名日历已存在时返回 `ObjectAlreadyExists`
    async fn store_calendar(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
    ) -> StoreResult<()>;

    async fn delete_calendar(&self, name: &str) -> StoreResult<bool>;

    async fn get_calendar(&self, name: &str) -> StoreResult<Option<Arc<dyn Calendar>>>;

    async fn calendar_exists(&self, name: &str) -> StoreResult<bool>;
}

/// 持久层总接口：协调核心面向它编程
pub trait PersistenceGateway:
    TriggerRepository
    + JobRepository
    + FiredTriggerRepository
    + SchedulerStateRepository
    + PausedGroupRepository
    + CalendarRepository
{
}

impl<T> PersistenceGateway for T where
    T: TriggerRepository
        + JobRepository
        + FiredTriggerRepository
        + SchedulerStateRepository
        + PausedGroupRepository
        + CalendarRepository
{
}
