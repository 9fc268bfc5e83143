use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::schedule::{MisfireInstruction, Schedule};

/// 触发器标识：(名称, 组)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// 任务标识：(名称, 组)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// 触发器状态（封闭集合）。
/// `Deleted` 是查询不到行时返回的哨兵值，从不落库。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerState {
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "ACQUIRED")]
    Acquired,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "BLOCKED")]
    Blocked,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "PAUSED_BLOCKED")]
    PausedBlocked,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "MISFIRED")]
    Misfired,
    #[serde(rename = "DELETED")]
    Deleted,
}

impl TriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerState::Waiting => "WAITING",
            TriggerState::Acquired => "ACQUIRED",
            TriggerState::Executing => "EXECUTING",
            TriggerState::Blocked => "BLOCKED",
            TriggerState::Paused => "PAUSED",
            TriggerState::PausedBlocked => "PAUSED_BLOCKED",
            TriggerState::Complete => "COMPLETE",
            TriggerState::Error => "ERROR",
            TriggerState::Misfired => "MISFIRED",
            TriggerState::Deleted => "DELETED",
        }
    }

    /// 该状态是否属于暂停族
    pub fn is_paused(&self) -> bool {
        matches!(self, TriggerState::Paused | TriggerState::PausedBlocked)
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 触发器：绑定到一个任务的命名调度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub schedule: Schedule,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub misfire_instruction: MisfireInstruction,
    pub calendar_name: Option<String>,
    pub volatile: bool,
    pub state: TriggerState,
    /// 触发器自带的数据（恢复触发器借此携带原触发信息）
    #[serde(default)]
    pub data: serde_json::Value,
    /// 当前触发实例标识。acquire 时赋值，仅在内存中流转，不落库。
    #[serde(skip)]
    pub fire_instance_id: Option<String>,
}

impl Trigger {
    /// 计算首次触发时刻并写入 `next_fire_time`
    pub fn compute_first_fire_time(&mut self, calendar: Option<&dyn Calendar>) {
        self.next_fire_time = self.schedule.first_fire_time(Utc::now(), calendar);
    }

    /// 触发后推进时间簿记：previous := next，next := 调度算法给出的下一时刻
    pub fn triggered(&mut self, calendar: Option<&dyn Calendar>) {
        self.previous_fire_time = self.next_fire_time;
        self.next_fire_time = self
            .next_fire_time
            .and_then(|t| self.schedule.next_fire_time(t, calendar));
    }

    /// 按触发器自身的哑火策略更新 `next_fire_time`
    pub fn update_after_misfire(&mut self, now: DateTime<Utc>, calendar: Option<&dyn Calendar>) {
        match self.misfire_instruction {
            // 智能策略缺省等同于立即补触发一次
            MisfireInstruction::SmartPolicy | MisfireInstruction::FireOnceNow => {
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::DoNothing => {
                self.next_fire_time = self.schedule.next_fire_time(now, calendar);
            }
        }
    }
}

/// 任务：可被多个触发器指向的命名工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    /// 有状态任务：同一任务的多次触发串行执行
    pub stateful: bool,
    /// 持久任务：没有触发器指向时依然保留
    pub durable: bool,
    /// 实例崩溃后是否要求恢复执行
    pub requests_recovery: bool,
    /// 不透明数据负载
    #[serde(default)]
    pub data: serde_json::Value,
}

/// 触发实例记录的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiredInstanceState {
    #[serde(rename = "ACQUIRED")]
    Acquired,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "BLOCKED")]
    Blocked,
}

impl FiredInstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiredInstanceState::Acquired => "ACQUIRED",
            FiredInstanceState::Executing => "EXECUTING",
            FiredInstanceState::Blocked => "BLOCKED",
        }
    }
}

/// 在途触发标记：记录某实例已预定或正在执行某次触发。
/// 每次在途触发恰有一条存活记录，触发结束或被恢复时删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredTriggerRecord {
    pub fire_instance_id: String,
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub instance_id: String,
    pub state: FiredInstanceState,
    pub fired_time: DateTime<Utc>,
    /// 以下为触发时刻拷贝的任务属性
    pub is_stateful: bool,
    pub requests_recovery: bool,
    pub volatile: bool,
}

/// 调度实例的签到记录，每个存活（或刚失联）实例一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStateRecord {
    pub instance_id: String,
    pub checkin_timestamp: DateTime<Utc>,
    /// 该实例声明的签到间隔（毫秒）
    pub checkin_interval_ms: i64,
    /// 正在/曾经恢复它的实例标识
    pub recoverer: Option<String>,
}

/// 任务执行完成后调度器给出的处置指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedExecutionInstruction {
    /// 无指令：保持触发器现状
    NoInstruction,
    /// 删除该触发器（若任务执行中重新编排了下一次触发则跳过删除）
    DeleteTrigger,
    /// 将该触发器置为 COMPLETE
    SetTriggerComplete,
    /// 将该触发器置为 ERROR
    SetTriggerError,
    /// 将该任务的所有触发器置为 COMPLETE
    SetAllJobTriggersComplete,
    /// 将该任务的所有触发器置为 ERROR
    SetAllJobTriggersError,
}

/// `trigger_fired` 成功后交给执行方的包裹
#[derive(Clone)]
pub struct TriggerFiredBundle {
    pub trigger: Trigger,
    pub job: JobDetail,
    pub calendar: Option<Arc<dyn Calendar>>,
    /// 实际触发时刻
    pub fire_time: DateTime<Utc>,
    /// 本次触发对应的计划时刻
    pub scheduled_fire_time: Option<DateTime<Utc>>,
}

impl fmt::Debug for TriggerFiredBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerFiredBundle")
            .field("trigger", &self.trigger.key)
            .field("job", &self.job.key)
            .field("fire_time", &self.fire_time)
            .field("scheduled_fire_time", &self.scheduled_fire_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_state_round_trip() {
        let all = [
            TriggerState::Waiting,
            TriggerState::Acquired,
            TriggerState::Executing,
            TriggerState::Blocked,
            TriggerState::Paused,
            TriggerState::PausedBlocked,
            TriggerState::Complete,
            TriggerState::Error,
            TriggerState::Misfired,
            TriggerState::Deleted,
        ];
        for state in all {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            let back: TriggerState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state);
        }
    }

    #[test]
    fn test_key_display() {
        let key = TriggerKey::new("nightly", "reports");
        assert_eq!(key.to_string(), "reports.nightly");
    }

    #[test]
    fn test_paused_family() {
        assert!(TriggerState::Paused.is_paused());
        assert!(TriggerState::PausedBlocked.is_paused());
        assert!(!TriggerState::Blocked.is_paused());
    }
}
