//! Recording test doubles for the coordinator's outward ports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobstore_domain::calendar::Calendar;
use jobstore_domain::entities::{Trigger, TriggerKey};
use jobstore_domain::ports::SchedulerSignaler;

/// Signaler double that records every notification it receives.
#[derive(Default)]
pub struct RecordingSignaler {
    misfired: Mutex<Vec<TriggerKey>>,
    scheduling_changes: AtomicUsize,
}

impl RecordingSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn misfired_triggers(&self) -> Vec<TriggerKey> {
        self.misfired.lock().unwrap().clone()
    }

    pub fn misfire_count(&self) -> usize {
        self.misfired.lock().unwrap().len()
    }

    pub fn scheduling_change_count(&self) -> usize {
        self.scheduling_changes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchedulerSignaler for RecordingSignaler {
    async fn notify_trigger_listeners_misfired(&self, trigger: &Trigger) {
        self.misfired.lock().unwrap().push(trigger.key.clone());
    }

    async fn signal_scheduling_change(&self) {
        self.scheduling_changes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Calendar excluding the half-open window `[from, to)`.
pub struct BlockoutCalendar {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Calendar for BlockoutCalendar {
    fn is_time_included(&self, instant: DateTime<Utc>) -> bool {
        instant < self.from || instant >= self.to
    }
}

/// Calendar that includes every instant.
pub struct OpenCalendar;

impl Calendar for OpenCalendar {
    fn is_time_included(&self, _instant: DateTime<Utc>) -> bool {
        true
    }
}
