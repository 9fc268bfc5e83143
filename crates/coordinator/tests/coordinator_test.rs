//! Integration tests for the trigger coordinator: the acquire/fire/complete
//! protocol, pause/resume, CRUD rules and calendar handling, all running
//! against the in-memory gateway and in-process locks.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use jobstore_coordinator::TriggerCoordinator;
use jobstore_core::CoordinatorConfig;
use jobstore_domain::repositories::{
    CalendarRepository, FiredTriggerRepository, JobRepository, PausedGroupRepository,
    TriggerRepository,
};
use jobstore_domain::{
    CompletedExecutionInstruction, FiredInstanceState, StoreError, TriggerState,
};
use jobstore_infrastructure::{InProcessLockManager, MemoryGateway, SelfManagedTransactions};
use jobstore_testing_utils::{
    BlockoutCalendar, JobBuilder, OpenCalendar, RecordingSignaler, TriggerBuilder,
};

fn fixture() -> (Arc<MemoryGateway>, Arc<RecordingSignaler>, TriggerCoordinator) {
    let gateway = Arc::new(MemoryGateway::new());
    let signaler = Arc::new(RecordingSignaler::new());
    let coordinator = TriggerCoordinator::new(
        gateway.clone(),
        Arc::new(InProcessLockManager::new()),
        Arc::new(SelfManagedTransactions::new()),
        signaler.clone(),
        CoordinatorConfig::default(),
    );
    (gateway, signaler, coordinator)
}

async fn seed_job(coordinator: &TriggerCoordinator, name: &str) {
    coordinator
        .store_job(JobBuilder::new(name).build(), false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_acquire_returns_earliest_waiting_trigger() {
    let (_, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    let now = Utc::now();
    let early = TriggerBuilder::new("early")
        .firing_at(now + Duration::seconds(5))
        .build();
    let late = TriggerBuilder::new("late")
        .firing_at(now + Duration::seconds(30))
        .build();
    coordinator.store_trigger(late, false).await.unwrap();
    coordinator.store_trigger(early, false).await.unwrap();

    let acquired = coordinator
        .acquire_next_trigger(now + Duration::seconds(60))
        .await
        .unwrap()
        .expect("a trigger is due within the horizon");
    assert_eq!(acquired.key.name, "early");
    assert_eq!(acquired.state, TriggerState::Acquired);
    assert!(acquired.fire_instance_id.is_some());
}

#[tokio::test]
async fn test_acquire_respects_time_horizon() {
    let (_, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    let now = Utc::now();
    let trigger = TriggerBuilder::new("distant")
        .firing_at(now + Duration::seconds(300))
        .build();
    coordinator.store_trigger(trigger, false).await.unwrap();

    let acquired = coordinator
        .acquire_next_trigger(now + Duration::seconds(60))
        .await
        .unwrap();
    assert!(acquired.is_none());
}

#[tokio::test]
async fn test_acquire_promotes_overdue_trigger_instead_of_handing_it_out() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    // Overdue far beyond the 60s misfire threshold.
    let trigger = TriggerBuilder::new("stale").overdue_by(300).build();
    let key = trigger.key.clone();
    gateway.insert_trigger(&trigger).await.unwrap();

    let acquired = coordinator.acquire_next_trigger(Utc::now()).await.unwrap();
    assert!(acquired.is_none());
    assert_eq!(
        gateway.get_trigger_state(&key).await.unwrap(),
        TriggerState::Misfired
    );
}

#[tokio::test]
async fn test_acquire_ties_broken_by_key_order() {
    let (_, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    let at = Utc::now() + Duration::seconds(10);
    for name in ["zeta", "alpha"] {
        coordinator
            .store_trigger(TriggerBuilder::new(name).firing_at(at).build(), false)
            .await
            .unwrap();
    }

    let acquired = coordinator
        .acquire_next_trigger(at + Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acquired.key.name, "alpha");
}

#[tokio::test]
async fn test_release_acquired_trigger_restores_waiting_state() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    let trigger = TriggerBuilder::new("t1").build();
    let key = trigger.key.clone();
    coordinator.store_trigger(trigger, false).await.unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    coordinator.release_acquired_trigger(&acquired).await.unwrap();

    assert_eq!(
        gateway.get_trigger_state(&key).await.unwrap(),
        TriggerState::Waiting
    );
    assert!(gateway.all_fired().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_trigger_fired_advances_bookkeeping_and_records_execution() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    let trigger = TriggerBuilder::new("repeat").repeating_every(30).build();
    let scheduled = trigger.next_fire_time.unwrap();
    coordinator.store_trigger(trigger, false).await.unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    let bundle = coordinator
        .trigger_fired(&acquired)
        .await
        .unwrap()
        .expect("fire confirmation succeeds");

    assert_eq!(bundle.trigger.state, TriggerState::Executing);
    assert_eq!(bundle.scheduled_fire_time, Some(scheduled));
    assert_eq!(bundle.trigger.previous_fire_time, Some(scheduled));
    assert_eq!(
        bundle.trigger.next_fire_time,
        Some(scheduled + Duration::seconds(30))
    );

    // Stored trigger goes back to WAITING for the next round.
    let stored = gateway.get_trigger(&bundle.trigger.key).await.unwrap().unwrap();
    assert_eq!(stored.state, TriggerState::Waiting);

    let fired = gateway.all_fired().await.unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].state, FiredInstanceState::Executing);
}

#[tokio::test]
async fn test_trigger_fired_after_concurrent_pause_returns_none() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    coordinator
        .store_trigger(TriggerBuilder::new("t1").build(), false)
        .await
        .unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    // An administrative pause lands between acquire and fire.
    gateway
        .update_trigger_state(&acquired.key, TriggerState::Paused)
        .await
        .unwrap();

    let bundle = coordinator.trigger_fired(&acquired).await.unwrap();
    assert!(bundle.is_none());
}

#[tokio::test]
async fn test_trigger_fired_with_missing_job_marks_error() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    coordinator
        .store_trigger(TriggerBuilder::new("t1").build(), false)
        .await
        .unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    gateway.delete_job(&acquired.job_key).await.unwrap();

    let err = coordinator.trigger_fired(&acquired).await.unwrap_err();
    assert!(matches!(err, StoreError::JobDoesNotExist(_)));
    // The ERROR state write survives the error return.
    assert_eq!(
        gateway.get_trigger_state(&acquired.key).await.unwrap(),
        TriggerState::Error
    );
}

#[tokio::test]
async fn test_stateful_job_blocks_siblings_until_completion() {
    let (gateway, _, coordinator) = fixture();
    coordinator
        .store_job(JobBuilder::new("serial").stateful().build(), false)
        .await
        .unwrap();

    let now = Utc::now();
    let t1 = TriggerBuilder::new("t1")
        .for_job("serial", "DEFAULT")
        .firing_at(now + Duration::seconds(5))
        .build();
    let t2 = TriggerBuilder::new("t2")
        .for_job("serial", "DEFAULT")
        .firing_at(now + Duration::seconds(10))
        .build();
    let t2_key = t2.key.clone();
    coordinator.store_trigger(t1, false).await.unwrap();
    coordinator.store_trigger(t2, false).await.unwrap();

    let acquired = coordinator
        .acquire_next_trigger(now + Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acquired.key.name, "t1");
    let bundle = coordinator.trigger_fired(&acquired).await.unwrap().unwrap();

    // The sibling is blocked and cannot be acquired while t1 executes.
    assert_eq!(
        gateway.get_trigger_state(&t2_key).await.unwrap(),
        TriggerState::Blocked
    );
    assert!(coordinator
        .acquire_next_trigger(now + Duration::seconds(60))
        .await
        .unwrap()
        .is_none());

    coordinator
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::NoInstruction,
        )
        .await
        .unwrap();

    assert_eq!(
        gateway.get_trigger_state(&t2_key).await.unwrap(),
        TriggerState::Waiting
    );
    let next = coordinator
        .acquire_next_trigger(now + Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.key.name, "t2");
}

#[tokio::test]
async fn test_stateful_block_preserves_pausedness() {
    let (gateway, _, coordinator) = fixture();
    coordinator
        .store_job(JobBuilder::new("serial").stateful().build(), false)
        .await
        .unwrap();

    let now = Utc::now();
    let t1 = TriggerBuilder::new("t1")
        .for_job("serial", "DEFAULT")
        .firing_at(now + Duration::seconds(5))
        .build();
    let paused = TriggerBuilder::new("paused_sibling")
        .for_job("serial", "DEFAULT")
        .firing_at(now + Duration::seconds(10))
        .build();
    let paused_key = paused.key.clone();
    coordinator.store_trigger(t1, false).await.unwrap();
    coordinator.store_trigger(paused, false).await.unwrap();
    coordinator.pause_trigger(&paused_key).await.unwrap();

    let acquired = coordinator
        .acquire_next_trigger(now + Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    let bundle = coordinator.trigger_fired(&acquired).await.unwrap().unwrap();
    assert_eq!(
        gateway.get_trigger_state(&paused_key).await.unwrap(),
        TriggerState::PausedBlocked
    );

    coordinator
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::NoInstruction,
        )
        .await
        .unwrap();
    // Unblocking must not lose the pause.
    assert_eq!(
        gateway.get_trigger_state(&paused_key).await.unwrap(),
        TriggerState::Paused
    );
}

#[tokio::test]
async fn test_completion_updates_stateful_job_data() {
    let (gateway, _, coordinator) = fixture();
    coordinator
        .store_job(JobBuilder::new("counter").stateful().build(), false)
        .await
        .unwrap();
    coordinator
        .store_trigger(
            TriggerBuilder::new("t1").for_job("counter", "DEFAULT").build(),
            false,
        )
        .await
        .unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    let bundle = coordinator.trigger_fired(&acquired).await.unwrap().unwrap();

    let mut job = bundle.job.clone();
    job.data = json!({"runs": 1});
    coordinator
        .triggered_job_complete(
            &bundle.trigger,
            &job,
            CompletedExecutionInstruction::NoInstruction,
        )
        .await
        .unwrap();

    let stored = gateway.get_job(&job.key).await.unwrap().unwrap();
    assert_eq!(stored.data, json!({"runs": 1}));
}

#[tokio::test]
async fn test_delete_trigger_instruction_removes_exhausted_trigger() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    coordinator
        .store_trigger(TriggerBuilder::new("once").build(), false)
        .await
        .unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    let bundle = coordinator.trigger_fired(&acquired).await.unwrap().unwrap();
    assert!(bundle.trigger.next_fire_time.is_none());

    coordinator
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::DeleteTrigger,
        )
        .await
        .unwrap();

    assert!(gateway.get_trigger(&bundle.trigger.key).await.unwrap().is_none());
    assert!(gateway.all_fired().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_trigger_instruction_skips_rescheduled_trigger() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    coordinator
        .store_trigger(TriggerBuilder::new("once").build(), false)
        .await
        .unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    let bundle = coordinator.trigger_fired(&acquired).await.unwrap().unwrap();

    // The job rescheduled its own trigger while executing.
    let replacement = TriggerBuilder::new("once")
        .firing_at(Utc::now() + Duration::seconds(600))
        .build();
    coordinator.store_trigger(replacement, true).await.unwrap();

    coordinator
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::DeleteTrigger,
        )
        .await
        .unwrap();

    // The rescheduled trigger must survive.
    assert!(gateway.get_trigger(&bundle.trigger.key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_set_all_job_triggers_complete_instruction() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    let t1 = TriggerBuilder::new("t1").build();
    let t2 = TriggerBuilder::new("t2").build();
    let (k1, k2) = (t1.key.clone(), t2.key.clone());
    coordinator.store_trigger(t1, false).await.unwrap();
    coordinator.store_trigger(t2, false).await.unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    let bundle = coordinator.trigger_fired(&acquired).await.unwrap().unwrap();
    coordinator
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::SetAllJobTriggersComplete,
        )
        .await
        .unwrap();

    assert_eq!(gateway.get_trigger_state(&k1).await.unwrap(), TriggerState::Complete);
    assert_eq!(gateway.get_trigger_state(&k2).await.unwrap(), TriggerState::Complete);
}

#[tokio::test]
async fn test_set_trigger_error_instruction() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    coordinator
        .store_trigger(TriggerBuilder::new("t1").build(), false)
        .await
        .unwrap();

    let acquired = coordinator
        .acquire_next_trigger(Utc::now() + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    let bundle = coordinator.trigger_fired(&acquired).await.unwrap().unwrap();
    coordinator
        .triggered_job_complete(
            &bundle.trigger,
            &bundle.job,
            CompletedExecutionInstruction::SetTriggerError,
        )
        .await
        .unwrap();

    assert_eq!(
        gateway.get_trigger_state(&bundle.trigger.key).await.unwrap(),
        TriggerState::Error
    );
}

#[tokio::test]
async fn test_pause_and_resume_round_trip() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    let trigger = TriggerBuilder::new("t1").build();
    let key = trigger.key.clone();
    coordinator.store_trigger(trigger, false).await.unwrap();

    coordinator.pause_trigger(&key).await.unwrap();
    assert_eq!(gateway.get_trigger_state(&key).await.unwrap(), TriggerState::Paused);
    // Pausing again is a no-op.
    coordinator.pause_trigger(&key).await.unwrap();
    assert_eq!(gateway.get_trigger_state(&key).await.unwrap(), TriggerState::Paused);

    coordinator.resume_trigger(&key).await.unwrap();
    assert_eq!(gateway.get_trigger_state(&key).await.unwrap(), TriggerState::Waiting);
    // Resuming a non-paused trigger is a no-op.
    coordinator.resume_trigger(&key).await.unwrap();
    assert_eq!(gateway.get_trigger_state(&key).await.unwrap(), TriggerState::Waiting);
}

#[tokio::test]
async fn test_resume_applies_misfire_policy_to_stale_trigger() {
    let (gateway, signaler, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    // Paused long enough that the fire time fell past the threshold.
    let trigger = TriggerBuilder::new("stale")
        .overdue_by(300)
        .repeating_every(30)
        .with_state(TriggerState::Paused)
        .build();
    let key = trigger.key.clone();
    gateway.insert_trigger(&trigger).await.unwrap();

    coordinator.resume_trigger(&key).await.unwrap();

    let resumed = gateway.get_trigger(&key).await.unwrap().unwrap();
    assert_eq!(resumed.state, TriggerState::Waiting);
    // Smart policy snaps the next fire time to now, not the stale past.
    assert!(resumed.next_fire_time.unwrap() > Utc::now() - Duration::seconds(5));
    assert_eq!(signaler.misfire_count(), 1);
}

#[tokio::test]
async fn test_trigger_group_pause_and_resume() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    let in_group = TriggerBuilder::new("g1").in_group("batch").build();
    let outside = TriggerBuilder::new("other").build();
    let (gk, ok) = (in_group.key.clone(), outside.key.clone());
    coordinator.store_trigger(in_group, false).await.unwrap();
    coordinator.store_trigger(outside, false).await.unwrap();

    coordinator.pause_trigger_group("batch").await.unwrap();
    assert_eq!(gateway.get_trigger_state(&gk).await.unwrap(), TriggerState::Paused);
    assert_eq!(gateway.get_trigger_state(&ok).await.unwrap(), TriggerState::Waiting);

    // New triggers stored into the paused group start out paused.
    let late_join = TriggerBuilder::new("g2").in_group("batch").build();
    let lk = late_join.key.clone();
    coordinator.store_trigger(late_join, false).await.unwrap();
    assert_eq!(gateway.get_trigger_state(&lk).await.unwrap(), TriggerState::Paused);

    coordinator.resume_trigger_group("batch").await.unwrap();
    assert_eq!(gateway.get_trigger_state(&gk).await.unwrap(), TriggerState::Waiting);
    assert_eq!(gateway.get_trigger_state(&lk).await.unwrap(), TriggerState::Waiting);
    assert!(gateway.paused_groups().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_trigger_requires_existing_job() {
    let (_, _, coordinator) = fixture();
    let err = coordinator
        .store_trigger(TriggerBuilder::new("orphan").build(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::JobDoesNotExist(_)));
}

#[tokio::test]
async fn test_store_trigger_rejects_duplicate_without_replace() {
    let (_, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    coordinator
        .store_trigger(TriggerBuilder::new("t1").build(), false)
        .await
        .unwrap();
    let err = coordinator
        .store_trigger(TriggerBuilder::new("t1").build(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ObjectAlreadyExists(_)));
}

#[tokio::test]
async fn test_store_trigger_rejects_unknown_calendar() {
    let (_, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    let err = coordinator
        .store_trigger(
            TriggerBuilder::new("t1").with_calendar("holidays").build(),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::CalendarDoesNotExist(_)));
}

#[tokio::test]
async fn test_removing_last_trigger_deletes_non_durable_job() {
    let (gateway, _, coordinator) = fixture();
    coordinator
        .store_job(JobBuilder::new("ephemeral").non_durable().build(), false)
        .await
        .unwrap();
    let trigger = TriggerBuilder::new("t1")
        .for_job("ephemeral", "DEFAULT")
        .build();
    let (tk, jk) = (trigger.key.clone(), trigger.job_key.clone());
    coordinator.store_trigger(trigger, false).await.unwrap();

    assert!(coordinator.remove_trigger(&tk).await.unwrap());
    assert!(gateway.get_job(&jk).await.unwrap().is_none());
}

#[tokio::test]
async fn test_removing_trigger_keeps_durable_job() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    let trigger = TriggerBuilder::new("t1").build();
    let (tk, jk) = (trigger.key.clone(), trigger.job_key.clone());
    coordinator.store_trigger(trigger, false).await.unwrap();

    assert!(coordinator.remove_trigger(&tk).await.unwrap());
    assert!(gateway.get_job(&jk).await.unwrap().is_some());
}

#[tokio::test]
async fn test_remove_job_cascades_to_triggers() {
    let (gateway, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    let trigger = TriggerBuilder::new("t1").build();
    let (tk, jk) = (trigger.key.clone(), trigger.job_key.clone());
    coordinator.store_trigger(trigger, false).await.unwrap();

    assert!(coordinator.remove_job(&jk).await.unwrap());
    assert!(gateway.get_trigger(&tk).await.unwrap().is_none());
}

#[tokio::test]
async fn test_calendar_removal_blocked_while_referenced() {
    let (_, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;
    coordinator
        .store_calendar("holidays", Arc::new(OpenCalendar), false)
        .await
        .unwrap();
    coordinator
        .store_trigger(
            TriggerBuilder::new("t1").with_calendar("holidays").build(),
            false,
        )
        .await
        .unwrap();

    let err = coordinator.remove_calendar("holidays").await.unwrap_err();
    assert!(matches!(err, StoreError::CalendarInUse(_)));
}

#[tokio::test]
async fn test_calendar_excluded_window_skipped_on_fire() {
    let (_, _, coordinator) = fixture();
    seed_job(&coordinator, "test_job").await;

    let now = Utc::now();
    // Blocks the next two minutes; the repeating trigger must land after it.
    coordinator
        .store_calendar(
            "blocked",
            Arc::new(BlockoutCalendar {
                from: now,
                to: now + Duration::seconds(120),
            }),
            false,
        )
        .await
        .unwrap();
    let trigger = TriggerBuilder::new("t1")
        .firing_at(now + Duration::seconds(5))
        .repeating_every(10)
        .with_calendar("blocked")
        .build();
    coordinator.store_trigger(trigger, false).await.unwrap();

    let acquired = coordinator
        .acquire_next_trigger(now + Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    let bundle = coordinator.trigger_fired(&acquired).await.unwrap().unwrap();
    assert!(bundle.trigger.next_fire_time.unwrap() >= now + Duration::seconds(120));
}

#[tokio::test]
async fn test_retrieve_calendar_uses_cache_after_first_read() {
    let (gateway, _, coordinator) = fixture();
    coordinator
        .store_calendar("holidays", Arc::new(OpenCalendar), false)
        .await
        .unwrap();

    assert!(coordinator.retrieve_calendar("holidays").await.unwrap().is_some());
    // Deleting behind the cache's back: the cached copy still answers.
    gateway.delete_calendar("holidays").await.unwrap();
    assert!(coordinator.retrieve_calendar("holidays").await.unwrap().is_some());
}
