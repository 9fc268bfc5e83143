//! Test data builders for triggers, jobs and fired-trigger records.
//!
//! Builders come with sensible defaults so tests only spell out what
//! they care about.

use chrono::{DateTime, Duration, Utc};
use jobstore_domain::entities::{
    FiredInstanceState, FiredTriggerRecord, JobDetail, JobKey, Trigger, TriggerKey, TriggerState,
};
use jobstore_domain::schedule::{MisfireInstruction, Schedule};

pub struct TriggerBuilder {
    trigger: Trigger,
}

impl TriggerBuilder {
    pub fn new(name: &str) -> Self {
        let fire_at = Utc::now() + Duration::seconds(60);
        Self {
            trigger: Trigger {
                key: TriggerKey::new(name, "DEFAULT"),
                job_key: JobKey::new("test_job", "DEFAULT"),
                schedule: Schedule::Once { fire_at },
                next_fire_time: Some(fire_at),
                previous_fire_time: None,
                misfire_instruction: MisfireInstruction::SmartPolicy,
                calendar_name: None,
                volatile: false,
                state: TriggerState::Waiting,
                data: serde_json::json!({}),
                fire_instance_id: None,
            },
        }
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.trigger.key.group = group.to_string();
        self
    }

    pub fn for_job(mut self, name: &str, group: &str) -> Self {
        self.trigger.job_key = JobKey::new(name, group);
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.trigger.schedule = schedule;
        self
    }

    /// Repeating interval schedule anchored at the next fire time.
    pub fn repeating_every(mut self, seconds: i64) -> Self {
        let start = self.trigger.next_fire_time.unwrap_or_else(Utc::now);
        self.trigger.schedule = Schedule::Interval {
            start_at: start,
            every_seconds: seconds,
        };
        self
    }

    pub fn firing_at(mut self, at: DateTime<Utc>) -> Self {
        self.trigger.next_fire_time = Some(at);
        if let Schedule::Once { fire_at } = &mut self.trigger.schedule {
            *fire_at = at;
        }
        self
    }

    /// Next fire time already `seconds` in the past.
    pub fn overdue_by(self, seconds: i64) -> Self {
        self.firing_at(Utc::now() - Duration::seconds(seconds))
    }

    pub fn with_state(mut self, state: TriggerState) -> Self {
        self.trigger.state = state;
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.trigger.misfire_instruction = instruction;
        self
    }

    pub fn with_calendar(mut self, name: &str) -> Self {
        self.trigger.calendar_name = Some(name.to_string());
        self
    }

    pub fn volatile(mut self) -> Self {
        self.trigger.volatile = true;
        self
    }

    pub fn build(self) -> Trigger {
        self.trigger
    }
}

pub struct JobBuilder {
    job: JobDetail,
}

impl JobBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            job: JobDetail {
                key: JobKey::new(name, "DEFAULT"),
                stateful: false,
                durable: true,
                requests_recovery: false,
                data: serde_json::json!({}),
            },
        }
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.job.key.group = group.to_string();
        self
    }

    pub fn stateful(mut self) -> Self {
        self.job.stateful = true;
        self
    }

    pub fn non_durable(mut self) -> Self {
        self.job.durable = false;
        self
    }

    pub fn requests_recovery(mut self) -> Self {
        self.job.requests_recovery = true;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.job.data = data;
        self
    }

    pub fn build(self) -> JobDetail {
        self.job
    }
}

pub struct FiredRecordBuilder {
    record: FiredTriggerRecord,
}

impl FiredRecordBuilder {
    pub fn new(fire_instance_id: &str, instance_id: &str) -> Self {
        Self {
            record: FiredTriggerRecord {
                fire_instance_id: fire_instance_id.to_string(),
                trigger_key: TriggerKey::new("test_trigger", "DEFAULT"),
                job_key: JobKey::new("test_job", "DEFAULT"),
                instance_id: instance_id.to_string(),
                state: FiredInstanceState::Acquired,
                fired_time: Utc::now(),
                is_stateful: false,
                requests_recovery: false,
                volatile: false,
            },
        }
    }

    pub fn for_trigger(mut self, name: &str, group: &str) -> Self {
        self.record.trigger_key = TriggerKey::new(name, group);
        self
    }

    pub fn for_job(mut self, name: &str, group: &str) -> Self {
        self.record.job_key = JobKey::new(name, group);
        self
    }

    pub fn executing(mut self) -> Self {
        self.record.state = FiredInstanceState::Executing;
        self
    }

    pub fn stateful(mut self) -> Self {
        self.record.is_stateful = true;
        self
    }

    pub fn requests_recovery(mut self) -> Self {
        self.record.requests_recovery = true;
        self
    }

    pub fn fired_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.fired_time = at;
        self
    }

    pub fn build(self) -> FiredTriggerRecord {
        self.record
    }
}
