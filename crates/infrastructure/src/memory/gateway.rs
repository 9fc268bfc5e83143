use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use jobstore_domain::repositories::{
    CalendarRepository, FiredTriggerRepository, JobRepository, PausedGroupRepository,
    SchedulerStateRepository, TriggerRepository,
};
use jobstore_domain::{
    Calendar, FiredTriggerRecord, JobDetail, JobKey, SchedulerStateRecord, StoreError,
    StoreResult, Trigger, TriggerKey, TriggerState,
};

#[derive(Default)]
struct MemoryState {
    triggers: HashMap<TriggerKey, Trigger>,
    jobs: HashMap<JobKey, JobDetail>,
    fired: HashMap<String, FiredTriggerRecord>,
    scheduler_states: HashMap<String, SchedulerStateRecord>,
    paused_groups: HashSet<String>,
    calendars: HashMap<String, Arc<dyn Calendar>>,
}

/// 内存版持久层。
///
/// 单实例/嵌入式部署的存储实现，同时也是测试套件的基础。所有写入
/// 即时生效（没有真正的事务），事务边界对它而言是空操作。
#[derive(Default)]
pub struct MemoryGateway {
    state: RwLock<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

fn state_matches(trigger: &Trigger, old_states: &[TriggerState]) -> bool {
    old_states.is_empty() || old_states.contains(&trigger.state)
}

#[async_trait]
impl TriggerRepository for MemoryGateway {
    async fn insert_trigger(&self, trigger: &Trigger) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.triggers.contains_key(&trigger.key) {
            return Err(StoreError::ObjectAlreadyExists(trigger.key.to_string()));
        }
        state.triggers.insert(trigger.key.clone(), trigger.clone());
        Ok(())
    }

    async fn update_trigger(&self, trigger: &Trigger) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.triggers.contains_key(&trigger.key) {
            return Err(StoreError::TriggerDoesNotExist(trigger.key.clone()));
        }
        state.triggers.insert(trigger.key.clone(), trigger.clone());
        Ok(())
    }

    async fn delete_trigger(&self, key: &TriggerKey) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.triggers.remove(key).is_some())
    }

    async fn get_trigger(&self, key: &TriggerKey) -> StoreResult<Option<Trigger>> {
        let state = self.state.read().await;
        Ok(state.triggers.get(key).cloned())
    }

    async fn trigger_exists(&self, key: &TriggerKey) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.triggers.contains_key(key))
    }

    async fn get_trigger_state(&self, key: &TriggerKey) -> StoreResult<TriggerState> {
        let state = self.state.read().await;
        Ok(state
            .triggers
            .get(key)
            .map(|t| t.state)
            .unwrap_or(TriggerState::Deleted))
    }

    async fn update_trigger_state(
        &self,
        key: &TriggerKey,
        new_state: TriggerState,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        match state.triggers.get_mut(key) {
            Some(trigger) => {
                trigger.state = new_state;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_trigger_state_from(
        &self,
        key: &TriggerKey,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        match state.triggers.get_mut(key) {
            Some(trigger) if state_matches(trigger, old_states) => {
                trigger.state = new_state;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_trigger_group_state_from(
        &self,
        group: &str,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for trigger in state.triggers.values_mut() {
            if trigger.key.group == group && state_matches(trigger, old_states) {
                trigger.state = new_state;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_trigger_states_for_job(
        &self,
        job_key: &JobKey,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for trigger in state.triggers.values_mut() {
            if trigger.job_key == *job_key && state_matches(trigger, old_states) {
                trigger.state = new_state;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_all_trigger_states_from(
        &self,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for trigger in state.triggers.values_mut() {
            if state_matches(trigger, old_states) {
                trigger.state = new_state;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_trigger_states_before(
        &self,
        cutoff: DateTime<Utc>,
        new_state: TriggerState,
        old_states: &[TriggerState],
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for trigger in state.triggers.values_mut() {
            let overdue = matches!(trigger.next_fire_time, Some(t) if t < cutoff);
            if overdue && state_matches(trigger, old_states) {
                trigger.state = new_state;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn triggers_in_state(&self, wanted: TriggerState) -> StoreResult<Vec<TriggerKey>> {
        let state = self.state.read().await;
        let mut matched: Vec<&Trigger> = state
            .triggers
            .values()
            .filter(|t| t.state == wanted)
            .collect();
        // 触发时刻升序，键作稳定器
        matched.sort_by(|a, b| {
            (a.next_fire_time, &a.key).cmp(&(b.next_fire_time, &b.key))
        });
        Ok(matched.into_iter().map(|t| t.key.clone()).collect())
    }

    async fn triggers_for_job(&self, job_key: &JobKey) -> StoreResult<Vec<Trigger>> {
        let state = self.state.read().await;
        let mut matched: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|t| t.job_key == *job_key)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(matched)
    }

    async fn triggers_in_group(&self, group: &str) -> StoreResult<Vec<TriggerKey>> {
        let state = self.state.read().await;
        let mut keys: Vec<TriggerKey> = state
            .triggers
            .keys()
            .filter(|k| k.group == group)
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn trigger_groups(&self) -> StoreResult<Vec<String>> {
        let state = self.state.read().await;
        let mut groups: Vec<String> = state
            .triggers
            .keys()
            .map(|k| k.group.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        groups.sort();
        Ok(groups)
    }

    async fn calendar_referenced(&self, calendar_name: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .triggers
            .values()
            .any(|t| t.calendar_name.as_deref() == Some(calendar_name)))
    }

    async fn min_next_fire_time(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| t.state == TriggerState::Waiting)
            .filter_map(|t| t.next_fire_time)
            .min())
    }

    async fn trigger_for_fire_time(
        &self,
        fire_time: DateTime<Utc>,
    ) -> StoreResult<Option<TriggerKey>> {
        let state = self.state.read().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| {
                t.state == TriggerState::Waiting && t.next_fire_time == Some(fire_time)
            })
            .map(|t| t.key.clone())
            .min())
    }
}

#[async_trait]
impl JobRepository for MemoryGateway {
    async fn insert_job(&self, job: &JobDetail) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.key) {
            return Err(StoreError::ObjectAlreadyExists(job.key.to_string()));
        }
        state.jobs.insert(job.key.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &JobDetail) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&job.key) {
            return Err(StoreError::JobDoesNotExist(job.key.clone()));
        }
        state.jobs.insert(job.key.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, key: &JobKey) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.jobs.remove(key).is_some())
    }

    async fn get_job(&self, key: &JobKey) -> StoreResult<Option<JobDetail>> {
        let state = self.state.read().await;
        Ok(state.jobs.get(key).cloned())
    }

    async fn job_exists(&self, key: &JobKey) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.jobs.contains_key(key))
    }

    async fn update_job_data(&self, key: &JobKey, data: serde_json::Value) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(key) {
            Some(job) => {
                job.data = data;
                Ok(())
            }
            None => Err(StoreError::JobDoesNotExist(key.clone())),
        }
    }
}

#[async_trait]
impl FiredTriggerRepository for MemoryGateway {
    async fn insert_fired(&self, record: &FiredTriggerRecord) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .fired
            .insert(record.fire_instance_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_fired(&self, fire_instance_id: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.fired.remove(fire_instance_id).is_some())
    }

    async fn delete_fired_by_instance(&self, instance_id: &str) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.fired.len();
        state.fired.retain(|_, r| r.instance_id != instance_id);
        Ok((before - state.fired.len()) as u64)
    }

    async fn delete_all_fired(&self) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let count = state.fired.len() as u64;
        state.fired.clear();
        Ok(count)
    }

    async fn fired_by_instance(
        &self,
        instance_id: &str,
    ) -> StoreResult<Vec<FiredTriggerRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<FiredTriggerRecord> = state
            .fired
            .values()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.fire_instance_id.cmp(&b.fire_instance_id));
        Ok(records)
    }

    async fn fired_for_trigger(&self, key: &TriggerKey) -> StoreResult<Vec<FiredTriggerRecord>> {
        let state = self.state.read().await;
        Ok(state
            .fired
            .values()
            .filter(|r| r.trigger_key == *key)
            .cloned()
            .collect())
    }

    async fn fired_for_job(&self, job_key: &JobKey) -> StoreResult<Vec<FiredTriggerRecord>> {
        let state = self.state.read().await;
        Ok(state
            .fired
            .values()
            .filter(|r| r.job_key == *job_key)
            .cloned()
            .collect())
    }

    async fn all_fired(&self) -> StoreResult<Vec<FiredTriggerRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<FiredTriggerRecord> = state.fired.values().cloned().collect();
        records.sort_by(|a, b| a.fire_instance_id.cmp(&b.fire_instance_id));
        Ok(records)
    }
}

#[async_trait]
impl SchedulerStateRepository for MemoryGateway {
    async fn upsert_scheduler_state(&self, record: &SchedulerStateRecord) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .scheduler_states
            .insert(record.instance_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_scheduler_state(&self, instance_id: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.scheduler_states.remove(instance_id).is_some())
    }

    async fn all_scheduler_states(&self) -> StoreResult<Vec<SchedulerStateRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<SchedulerStateRecord> =
            state.scheduler_states.values().cloned().collect();
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(records)
    }
}

#[async_trait]
impl PausedGroupRepository for MemoryGateway {
    async fn insert_paused_group(&self, group: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.paused_groups.insert(group.to_string());
        Ok(())
    }

    async fn delete_paused_group(&self, group: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.paused_groups.remove(group))
    }

    async fn is_group_paused(&self, group: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.paused_groups.contains(group))
    }

    async fn paused_groups(&self) -> StoreResult<Vec<String>> {
        let state = self.state.read().await;
        let mut groups: Vec<String> = state.paused_groups.iter().cloned().collect();
        groups.sort();
        Ok(groups)
    }
}

#[async_trait]
impl CalendarRepository for MemoryGateway {
    async fn store_calendar(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !replace && state.calendars.contains_key(name) {
            return Err(StoreError::ObjectAlreadyExists(name.to_string()));
        }
        state.calendars.insert(name.to_string(), calendar);
        Ok(())
    }

    async fn delete_calendar(&self, name: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.calendars.remove(name).is_some())
    }

    async fn get_calendar(&self, name: &str) -> StoreResult<Option<Arc<dyn Calendar>>> {
        let state = self.state.read().await;
        Ok(state.calendars.get(name).cloned())
    }

    async fn calendar_exists(&self, name: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state.calendars.contains_key(name))
    }
}
