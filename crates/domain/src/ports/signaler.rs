use async_trait::async_trait;

use crate::entities::Trigger;

/// 调度器回联信号接口（由外围调度器提供）。
///
/// 状态变更可能让先前休眠的分发线程提前醒来复查时，协调核心
/// 通过 `signal_scheduling_change` 通知它。
#[async_trait]
pub trait SchedulerSignaler: Send + Sync {
    /// 哑火发生时通知触发器监听器（每次哑火恰好一次）
    async fn notify_trigger_listeners_misfired(&self, trigger: &Trigger);

    /// 调度状态发生变化，分发方应醒来复查
    async fn signal_scheduling_change(&self);
}
