//! Shared test builders and doubles for the jobstore workspace.

pub mod builders;
pub mod mocks;

pub use builders::{FiredRecordBuilder, JobBuilder, TriggerBuilder};
pub use mocks::{BlockoutCalendar, OpenCalendar, RecordingSignaler};
