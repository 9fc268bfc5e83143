//! 触发器自带的调度算法
//!
//! 协调核心不关心具体的调度数学，只通过 `Schedule` 推进触发时刻。
//! cron 表达式解析复用 `cron` crate。

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;

/// 日历排除时刻的最大跳过次数，防止全排除日历造成死循环
const MAX_CALENDAR_SKIPS: usize = 1_000;

/// 哑火处置策略（触发器自身携带）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisfireInstruction {
    /// 智能策略：由触发器类型选择缺省行为
    #[serde(rename = "SMART_POLICY")]
    SmartPolicy,
    /// 立即补触发一次
    #[serde(rename = "FIRE_ONCE_NOW")]
    FireOnceNow,
    /// 放弃错过的触发，顺延到下一个正常时刻
    #[serde(rename = "DO_NOTHING")]
    DoNothing,
}

/// 调度类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// 一次性触发
    Once { fire_at: DateTime<Utc> },
    /// 固定间隔重复触发
    Interval {
        start_at: DateTime<Utc>,
        every_seconds: i64,
    },
    /// cron 表达式触发
    Cron { expression: String },
}

impl Schedule {
    /// `after` 之后（不含）的首个触发时刻
    pub fn first_fire_time(
        &self,
        after: DateTime<Utc>,
        calendar: Option<&dyn Calendar>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Once { fire_at } if *fire_at > after => {
                self.apply_calendar(Some(*fire_at), calendar)
            }
            Schedule::Once { .. } => None,
            _ => self.next_fire_time(after, calendar),
        }
    }

    /// `after` 之后（不含）的下一个触发时刻；无后续触发时返回 None
    pub fn next_fire_time(
        &self,
        after: DateTime<Utc>,
        calendar: Option<&dyn Calendar>,
    ) -> Option<DateTime<Utc>> {
        let raw = self.raw_next(after);
        self.apply_calendar(raw, calendar)
    }

    fn raw_next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Once { fire_at } => {
                if *fire_at > after {
                    Some(*fire_at)
                } else {
                    None
                }
            }
            Schedule::Interval {
                start_at,
                every_seconds,
            } => {
                let every = Duration::seconds((*every_seconds).max(1));
                if *start_at > after {
                    return Some(*start_at);
                }
                let elapsed = after - *start_at;
                let periods = elapsed.num_seconds() / every.num_seconds() + 1;
                Some(*start_at + Duration::seconds(every.num_seconds() * periods))
            }
            Schedule::Cron { expression } => {
                let schedule = cron::Schedule::from_str(expression).ok()?;
                schedule.after(&after).next()
            }
        }
    }

    /// 跳过被日历排除的时刻
    fn apply_calendar(
        &self,
        mut candidate: Option<DateTime<Utc>>,
        calendar: Option<&dyn Calendar>,
    ) -> Option<DateTime<Utc>> {
        let cal = match calendar {
            Some(c) => c,
            None => return candidate,
        };
        for _ in 0..MAX_CALENDAR_SKIPS {
            match candidate {
                Some(t) if !cal.is_time_included(t) => {
                    candidate = self.raw_next(t);
                }
                other => return other,
            }
        }
        None
    }

    /// 校验 cron 表达式是否合法
    pub fn validate(&self) -> Result<(), String> {
        if let Schedule::Cron { expression } = self {
            cron::Schedule::from_str(expression)
                .map(|_| ())
                .map_err(|e| format!("无效的CRON表达式: {expression} - {e}"))?;
        }
        if let Schedule::Interval { every_seconds, .. } = self {
            if *every_seconds <= 0 {
                return Err("重复间隔必须为正".to_string());
            }
        }
        Ok(())
    }
}
