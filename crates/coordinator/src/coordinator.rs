//! 触发器生命周期协调器
//!
//! 实现触发器状态机与 acquire -> fire -> complete 协议，是多个调度
//! 实例之间的核心同步点。每个公开操作都在对应的命名锁与工作单元
//! 内执行，锁持有覆盖操作的全部存储读写。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use jobstore_core::CoordinatorConfig;
use jobstore_domain::ports::{LockManager, LockName, SchedulerSignaler, TransactionBoundary};
use jobstore_domain::repositories::{
    CalendarRepository, FiredTriggerRepository, JobRepository, PausedGroupRepository,
    PersistenceGateway, TriggerRepository,
};
use jobstore_domain::{
    Calendar, CompletedExecutionInstruction, FiredInstanceState, FiredTriggerRecord, JobDetail,
    JobKey, StoreError, StoreResult, Trigger, TriggerFiredBundle, TriggerKey, TriggerState,
};

use crate::misfire::apply_misfire;
use crate::unit_of_work::execute_in_lock;

/// 候选触发器在锁内消失时的最大重查次数（锁内本不应发生，纯防御）
const MAX_ACQUIRE_ATTEMPTS: usize = 5;

pub struct TriggerCoordinator {
    gateway: Arc<dyn PersistenceGateway>,
    locks: Arc<dyn LockManager>,
    tx: Arc<dyn TransactionBoundary>,
    signaler: Arc<dyn SchedulerSignaler>,
    config: CoordinatorConfig,
    /// 触发实例计数器：构造时以时钟毫秒播种，保证重启后不重复
    fire_instance_counter: AtomicI64,
    /// 日历缓存：首次读取后按名缓存，更新/删除时失效
    calendar_cache: RwLock<HashMap<String, Arc<dyn Calendar>>>,
}

impl TriggerCoordinator {
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
            fire_instance_counter: AtomicI64::new(Utc::now().timestamp_millis()),
            calendar_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn next_fire_instance_id(&self) -> String {
        let seq = self.fire_instance_counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.config.instance_id, seq)
    }

    fn misfire_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.config.misfire_threshold()
    }

    /// 该任务当前是否有正在执行的有状态触发
    async fn job_currently_blocked(&self, job_key: &JobKey) -> StoreResult<bool> {
        let fired = self.gateway.fired_for_job(job_key).await?;
        Ok(fired
            .iter()
            .any(|r| r.is_stateful && r.state == FiredInstanceState::Executing))
    }

    // ------------------------------------------------------------------
    // acquire -> fire -> complete 协议
    // ------------------------------------------------------------------

    /// 取得下一个可触发的触发器（WAITING -> ACQUIRED）。
    /// 没有触发时刻不晚于 `no_later_than` 的候选时返回 None。
    pub async fn acquire_next_trigger(
        &self,
        no_later_than: DateTime<Utc>,
    ) -> StoreResult<Option<Trigger>> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.acquire_next_trigger_locked(no_later_than),
        )
        .await
    }

    async fn acquire_next_trigger_locked(
        &self,
        no_later_than: DateTime<Utc>,
    ) -> StoreResult<Option<Trigger>> {
        // 已经错过阈值的 WAITING 触发器先晋升为 MISFIRED，
        // 不参与正常触发，由哑火扫描按策略处置
        let promoted = self
            .gateway
            .update_trigger_states_before(self.misfire_cutoff(), TriggerState::Misfired, &[
                TriggerState::Waiting,
            ])
            .await?;
        if promoted > 0 {
            debug!("{} 个过期触发器晋升为 MISFIRED", promoted);
        }

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let min_fire_time = match self.gateway.min_next_fire_time().await? {
                Some(t) if t <= no_later_than => t,
                _ => return Ok(None),
            };
            let key = match self.gateway.trigger_for_fire_time(min_fire_time).await? {
                Some(k) => k,
                // 候选在锁内消失，防御性重查
                None => continue,
            };
            // 零行更新说明已被他人占用（持锁单实例内不可能，纯防御）
            let updated = self
                .gateway
                .update_trigger_state_from(&key, TriggerState::Acquired, &[TriggerState::Waiting])
                .await?;
            if updated == 0 {
                continue;
            }
            let mut trigger = match self.gateway.get_trigger(&key).await? {
                Some(t) => t,
                None => continue,
            };
            let fire_instance_id = self.next_fire_instance_id();
            trigger.state = TriggerState::Acquired;
            trigger.fire_instance_id = Some(fire_instance_id.clone());

            // 在途记录此时尚未触发，任务属性留到触发时刻再拷贝
            self.gateway
                .insert_fired(&FiredTriggerRecord {
                    fire_instance_id,
                    trigger_key: trigger.key.clone(),
                    job_key: trigger.job_key.clone(),
                    instance_id: self.config.instance_id.clone(),
                    state: FiredInstanceState::Acquired,
                    fired_time: Utc::now(),
                    is_stateful: false,
                    requests_recovery: false,
                    volatile: trigger.volatile,
                })
                .await?;
            debug!("已预定触发器 {}", trigger.key);
            return Ok(Some(trigger));
        }
        Ok(None)
    }

    /// 调度器决定不触发，归还触发器（ACQUIRED -> WAITING）。
    /// 归还后存储状态与预定之前完全一致。
    pub async fn release_acquired_trigger(&self, trigger: &Trigger) -> StoreResult<()> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.release_acquired_trigger_locked(trigger),
        )
        .await
    }

    async fn release_acquired_trigger_locked(&self, trigger: &Trigger) -> StoreResult<()> {
        self.gateway
            .update_trigger_state_from(&trigger.key, TriggerState::Waiting, &[
                TriggerState::Acquired,
            ])
            .await?;
        match &trigger.fire_instance_id {
            Some(id) => {
                self.gateway.delete_fired(id).await?;
            }
            None => {
                // 没带触发实例标识时清理本实例对该触发器的预定记录
                for record in self.gateway.fired_for_trigger(&trigger.key).await? {
                    if record.instance_id == self.config.instance_id
                        && record.state == FiredInstanceState::Acquired
                    {
                        self.gateway.delete_fired(&record.fire_instance_id).await?;
                    }
                }
            }
        }
        debug!("已归还触发器 {}", trigger.key);
        Ok(())
    }

    /// 确认触发（ACQUIRED -> EXECUTING，有状态任务伴随同侪封锁）。
    ///
    /// 返回 None 表示触发器已被并发的管理操作改变（删除/暂停/完成），
    /// 调用方应跳过本次执行。任务不存在时触发器被置 ERROR 并返回
    /// `JobDoesNotExist`，调用方可据此跳过而不中止整批。
    pub async fn trigger_fired(
        &self,
        trigger: &Trigger,
    ) -> StoreResult<Option<TriggerFiredBundle>> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.trigger_fired_locked(trigger),
        )
        .await
    }

    async fn trigger_fired_locked(
        &self,
        trigger: &Trigger,
    ) -> StoreResult<Option<TriggerFiredBundle>> {
        let state = self.gateway.get_trigger_state(&trigger.key).await?;
        if state != TriggerState::Acquired {
            debug!("触发器 {} 当前状态为 {}，跳过触发", trigger.key, state);
            return Ok(None);
        }

        let job = match self.gateway.get_job(&trigger.job_key).await? {
            Some(j) => j,
            None => {
                error!(
                    "触发器 {} 引用的任务 {} 不存在，标记为 ERROR",
                    trigger.key, trigger.job_key
                );
                self.gateway
                    .update_trigger_state(&trigger.key, TriggerState::Error)
                    .await?;
                return Err(StoreError::JobDoesNotExist(trigger.job_key.clone()));
            }
        };

        // 触发路径总是读新鲜日历
        let calendar = match &trigger.calendar_name {
            Some(name) => match self.gateway.get_calendar(name).await? {
                Some(c) => Some(c),
                None => {
                    warn!("触发器 {} 引用的日历 {} 不存在，跳过触发", trigger.key, name);
                    return Ok(None);
                }
            },
            None => None,
        };

        let mut current = match self.gateway.get_trigger(&trigger.key).await? {
            Some(t) => t,
            None => return Ok(None),
        };
        current.fire_instance_id = trigger.fire_instance_id.clone();

        // 在途记录 ACQUIRED -> EXECUTING，此刻拷贝任务属性
        if let Some(id) = &trigger.fire_instance_id {
            self.gateway.delete_fired(id).await?;
        }
        let fire_instance_id = trigger
            .fire_instance_id
            .clone()
            .unwrap_or_else(|| self.next_fire_instance_id());
        let now = Utc::now();
        self.gateway
            .insert_fired(&FiredTriggerRecord {
                fire_instance_id,
                trigger_key: current.key.clone(),
                job_key: job.key.clone(),
                instance_id: self.config.instance_id.clone(),
                state: FiredInstanceState::Executing,
                fired_time: now,
                is_stateful: job.stateful,
                requests_recovery: job.requests_recovery,
                volatile: current.volatile,
            })
            .await?;

        // 推进时间簿记
        let scheduled_fire_time = current.next_fire_time;
        current.triggered(calendar.as_deref());

        if job.stateful {
            // 封锁同任务的其余触发器，阻止第二次并发触发被预定
            self.gateway
                .update_trigger_states_for_job(&job.key, TriggerState::Blocked, &[
                    TriggerState::Waiting,
                    TriggerState::Acquired,
                ])
                .await?;
            self.gateway
                .update_trigger_states_for_job(&job.key, TriggerState::PausedBlocked, &[
                    TriggerState::Paused,
                ])
                .await?;
        }

        // 本触发器的落库状态，强制写入（覆盖暂停组默认）
        current.state = if current.next_fire_time.is_none() {
            TriggerState::Complete
        } else if job.stateful {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        };
        self.gateway.update_trigger(&current).await?;

        // 对调用方本次触发呈现为执行中
        let mut fired_view = current;
        fired_view.state = TriggerState::Executing;
        info!("触发器 {} 已触发（任务 {}）", fired_view.key, job.key);
        Ok(Some(TriggerFiredBundle {
            trigger: fired_view,
            job,
            calendar,
            fire_time: now,
            scheduled_fire_time,
        }))
    }

    /// 任务执行结束：应用处置指令，解除有状态封锁，删除在途记录。
    pub async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> StoreResult<()> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.triggered_job_complete_locked(trigger, job, instruction),
        )
        .await
    }

    async fn triggered_job_complete_locked(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> StoreResult<()> {
        match instruction {
            CompletedExecutionInstruction::DeleteTrigger => {
                if let Some(stored) = self.gateway.get_trigger(&trigger.key).await? {
                    if trigger.next_fire_time.is_none() {
                        // 任务执行期间可能重新编排了自己：落库的
                        // next_fire_time 非空时说明被并发改写，跳过删除
                        if stored.next_fire_time.is_none() {
                            self.remove_trigger_locked(&trigger.key).await?;
                        } else {
                            debug!("触发器 {} 已被重新编排，跳过删除", trigger.key);
                        }
                    } else {
                        self.remove_trigger_locked(&trigger.key).await?;
                    }
                    self.signaler.signal_scheduling_change().await;
                }
            }
            CompletedExecutionInstruction::SetTriggerComplete => {
                self.gateway
                    .update_trigger_state(&trigger.key, TriggerState::Complete)
                    .await?;
                self.signaler.signal_scheduling_change().await;
            }
            CompletedExecutionInstruction::SetTriggerError => {
                warn!("按处置指令将触发器 {} 置为 ERROR", trigger.key);
                self.gateway
                    .update_trigger_state(&trigger.key, TriggerState::Error)
                    .await?;
                self.signaler.signal_scheduling_change().await;
            }
            CompletedExecutionInstruction::SetAllJobTriggersComplete => {
                self.gateway
                    .update_trigger_states_for_job(&job.key, TriggerState::Complete, &[])
                    .await?;
                self.signaler.signal_scheduling_change().await;
            }
            CompletedExecutionInstruction::SetAllJobTriggersError => {
                warn!("按处置指令将任务 {} 的全部触发器置为 ERROR", job.key);
                self.gateway
                    .update_trigger_states_for_job(&job.key, TriggerState::Error, &[])
                    .await?;
                self.signaler.signal_scheduling_change().await;
            }
            CompletedExecutionInstruction::NoInstruction => {}
        }

        if job.stateful {
            // 解除同任务触发器的封锁
            let unblocked = self
                .gateway
                .update_trigger_states_for_job(&job.key, TriggerState::Waiting, &[
                    TriggerState::Blocked,
                ])
                .await?;
            let unpaused = self
                .gateway
                .update_trigger_states_for_job(&job.key, TriggerState::Paused, &[
                    TriggerState::PausedBlocked,
                ])
                .await?;
            if unblocked + unpaused > 0 {
                self.signaler.signal_scheduling_change().await;
            }
            // 有状态任务的数据负载随执行结束落库
            if self.gateway.job_exists(&job.key).await? {
                self.gateway
                    .update_job_data(&job.key, job.data.clone())
                    .await?;
            }
        }

        if let Some(id) = &trigger.fire_instance_id {
            self.gateway.delete_fired(id).await?;
        }
        debug!("触发器 {} 的本次触发已了结", trigger.key);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 暂停 / 恢复
    // ------------------------------------------------------------------

    /// 暂停触发器；对已暂停的触发器是空操作。
    pub async fn pause_trigger(&self, key: &TriggerKey) -> StoreResult<()> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.pause_trigger_locked(key),
        )
        .await
    }

    async fn pause_trigger_locked(&self, key: &TriggerKey) -> StoreResult<()> {
        let state = self.gateway.get_trigger_state(key).await?;
        match state {
            TriggerState::Waiting | TriggerState::Acquired | TriggerState::Misfired => {
                self.gateway
                    .update_trigger_state(key, TriggerState::Paused)
                    .await?;
            }
            TriggerState::Blocked => {
                self.gateway
                    .update_trigger_state(key, TriggerState::PausedBlocked)
                    .await?;
            }
            _ => {
                debug!("触发器 {} 处于 {}，暂停为空操作", key, state);
            }
        }
        Ok(())
    }

    /// 恢复触发器；对未暂停的触发器是空操作。
    /// 触发时刻已越过哑火阈值时走哑火更新路径而不是简单翻状态。
    pub async fn resume_trigger(&self, key: &TriggerKey) -> StoreResult<()> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.resume_trigger_locked(key),
        )
        .await
    }

    async fn resume_trigger_locked(&self, key: &TriggerKey) -> StoreResult<()> {
        let trigger = match self.gateway.get_trigger(key).await? {
            Some(t) => t,
            None => return Ok(()),
        };
        if !trigger.state.is_paused() {
            debug!("触发器 {} 未处于暂停，恢复为空操作", key);
            return Ok(());
        }
        let next = match trigger.next_fire_time {
            Some(t) => t,
            None => return Ok(()),
        };

        let blocked = self.job_currently_blocked(&trigger.job_key).await?;
        let new_state = if blocked {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        };

        if next < self.misfire_cutoff() {
            apply_misfire(&*self.gateway, &*self.signaler, key, new_state).await?;
        } else {
            self.gateway.update_trigger_state(key, new_state).await?;
        }
        self.signaler.signal_scheduling_change().await;
        Ok(())
    }

    /// 暂停整个触发器组并打上暂停组标记：
    /// 此后该组里新建/更新的触发器默认进入 PAUSED。
    pub async fn pause_trigger_group(&self, group: &str) -> StoreResult<()> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.pause_trigger_group_locked(group),
        )
        .await
    }

    async fn pause_trigger_group_locked(&self, group: &str) -> StoreResult<()> {
        if !self.gateway.is_group_paused(group).await? {
            self.gateway.insert_paused_group(group).await?;
        }
        self.gateway
            .update_trigger_group_state_from(group, TriggerState::PausedBlocked, &[
                TriggerState::Blocked,
            ])
            .await?;
        self.gateway
            .update_trigger_group_state_from(group, TriggerState::Paused, &[
                TriggerState::Waiting,
                TriggerState::Acquired,
                TriggerState::Misfired,
            ])
            .await?;
        info!("触发器组 {} 已暂停", group);
        Ok(())
    }

    /// 摘除暂停组标记并恢复组内全部触发器。
    pub async fn resume_trigger_group(&self, group: &str) -> StoreResult<()> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.resume_trigger_group_locked(group),
        )
        .await
    }

    async fn resume_trigger_group_locked(&self, group: &str) -> StoreResult<()> {
        self.gateway.delete_paused_group(group).await?;
        for key in self.gateway.triggers_in_group(group).await? {
            self.resume_trigger_locked(&key).await?;
        }
        info!("触发器组 {} 已恢复", group);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 触发器 / 任务 CRUD
    // ------------------------------------------------------------------

    /// 存储触发器。初始状态按暂停组标记与有状态任务执行情况推导。
    pub async fn store_trigger(&self, trigger: Trigger, replace: bool) -> StoreResult<()> {
        let lock = if self.config.lock_on_insert || replace {
            Some(LockName::TriggerAccess)
        } else {
            None
        };
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            lock,
            self.store_trigger_locked(trigger, replace),
        )
        .await
    }

    async fn store_trigger_locked(&self, mut trigger: Trigger, replace: bool) -> StoreResult<()> {
        if !self.gateway.job_exists(&trigger.job_key).await? {
            return Err(StoreError::JobDoesNotExist(trigger.job_key.clone()));
        }
        let exists = self.gateway.trigger_exists(&trigger.key).await?;
        if exists && !replace {
            return Err(StoreError::ObjectAlreadyExists(trigger.key.to_string()));
        }

        let calendar = match &trigger.calendar_name {
            Some(name) => match self.gateway.get_calendar(name).await? {
                Some(c) => Some(c),
                None => return Err(StoreError::CalendarDoesNotExist(name.clone())),
            },
            None => None,
        };
        if trigger.next_fire_time.is_none() {
            trigger.compute_first_fire_time(calendar.as_deref());
        }
        // 不变量：WAITING/ACQUIRED 的触发器必须有触发时刻
        if trigger.next_fire_time.is_none() {
            return Err(StoreError::Configuration(format!(
                "触发器 {} 没有任何可触发时刻",
                trigger.key
            )));
        }

        let group_paused = self.gateway.is_group_paused(&trigger.key.group).await?;
        let job_blocked = self.job_currently_blocked(&trigger.job_key).await?;
        trigger.state = match (group_paused, job_blocked) {
            (true, true) => TriggerState::PausedBlocked,
            (true, false) => TriggerState::Paused,
            (false, true) => TriggerState::Blocked,
            (false, false) => TriggerState::Waiting,
        };

        if exists {
            self.gateway.update_trigger(&trigger).await?;
        } else {
            self.gateway.insert_trigger(&trigger).await?;
        }
        self.signaler.signal_scheduling_change().await;
        debug!("已存储触发器 {}（初始状态 {}）", trigger.key, trigger.state);
        Ok(())
    }

    /// 移除触发器。非持久任务的最后一个触发器被移除时级联删除任务。
    pub async fn remove_trigger(&self, key: &TriggerKey) -> StoreResult<bool> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.remove_trigger_locked(key),
        )
        .await
    }

    async fn remove_trigger_locked(&self, key: &TriggerKey) -> StoreResult<bool> {
        let trigger = match self.gateway.get_trigger(key).await? {
            Some(t) => t,
            None => return Ok(false),
        };
        self.gateway.delete_trigger(key).await?;

        if let Some(job) = self.gateway.get_job(&trigger.job_key).await? {
            if !job.durable {
                let remaining = self.gateway.triggers_for_job(&job.key).await?;
                if remaining.is_empty() {
                    self.gateway.delete_job(&job.key).await?;
                    info!("非持久任务 {} 随最后一个触发器一并删除", job.key);
                }
            }
        }
        Ok(true)
    }

    /// 存储任务定义。
    pub async fn store_job(&self, job: JobDetail, replace: bool) -> StoreResult<()> {
        let lock = if self.config.lock_on_insert || replace {
            Some(LockName::TriggerAccess)
        } else {
            None
        };
        execute_in_lock(&*self.locks, &*self.tx, lock, self.store_job_locked(job, replace)).await
    }

    async fn store_job_locked(&self, job: JobDetail, replace: bool) -> StoreResult<()> {
        if self.gateway.job_exists(&job.key).await? {
            if !replace {
                return Err(StoreError::ObjectAlreadyExists(job.key.to_string()));
            }
            self.gateway.update_job(&job).await?;
        } else {
            self.gateway.insert_job(&job).await?;
        }
        debug!("已存储任务 {}", job.key);
        Ok(())
    }

    /// 移除任务及其全部触发器。
    pub async fn remove_job(&self, key: &JobKey) -> StoreResult<bool> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::TriggerAccess),
            self.remove_job_locked(key),
        )
        .await
    }

    async fn remove_job_locked(&self, key: &JobKey) -> StoreResult<bool> {
        for trigger in self.gateway.triggers_for_job(key).await? {
            self.gateway.delete_trigger(&trigger.key).await?;
        }
        self.gateway.delete_job(key).await
    }

    /// 查询触发器当前状态；行不存在时返回 `Deleted` 哨兵。
    pub async fn get_trigger_state(&self, key: &TriggerKey) -> StoreResult<TriggerState> {
        self.gateway.get_trigger_state(key).await
    }

    // ------------------------------------------------------------------
    // 日历
    // ------------------------------------------------------------------

    /// 存储日历并刷新本实例缓存。
    pub async fn store_calendar(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
    ) -> StoreResult<()> {
        let lock = if self.config.lock_on_insert || replace {
            Some(LockName::CalendarAccess)
        } else {
            None
        };
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            lock,
            self.store_calendar_locked(name, calendar, replace),
        )
        .await
    }

    async fn store_calendar_locked(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
    ) -> StoreResult<()> {
        self.gateway
            .store_calendar(name, calendar.clone(), replace)
            .await?;
        self.calendar_cache
            .write()
            .await
            .insert(name.to_string(), calendar);
        debug!("已存储日历 {}", name);
        Ok(())
    }

    /// 读取日历：首次读取后缓存，后续命中缓存。
    pub async fn retrieve_calendar(&self, name: &str) -> StoreResult<Option<Arc<dyn Calendar>>> {
        if let Some(cached) = self.calendar_cache.read().await.get(name) {
            return Ok(Some(cached.clone()));
        }
        let loaded = self.gateway.get_calendar(name).await?;
        if let Some(calendar) = &loaded {
            self.calendar_cache
                .write()
                .await
                .insert(name.to_string(), calendar.clone());
        }
        Ok(loaded)
    }

    /// 移除日历；仍被触发器引用时拒绝。
    pub async fn remove_calendar(&self, name: &str) -> StoreResult<bool> {
        execute_in_lock(
            &*self.locks,
            &*self.tx,
            Some(LockName::CalendarAccess),
            self.remove_calendar_locked(name),
        )
        .await
    }

    async fn remove_calendar_locked(&self, name: &str) -> StoreResult<bool> {
        if self.gateway.calendar_referenced(name).await? {
            return Err(StoreError::CalendarInUse(name.to_string()));
        }
        let removed = self.gateway.delete_calendar(name).await?;
        self.calendar_cache.write().await.remove(name);
        Ok(removed)
    }
}
