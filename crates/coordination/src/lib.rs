//! Meeting-coordination state machine for UnLost item handoffs
//!
//! `RequestLifecycleManager` is the single entry point. It composes:
//!
//! - `ScheduleRequestStore`: durable records with conditional writes
//! - `AttendanceTracker`: the presence/note window around `meet_at`
//! - `AutoFailPolicy` / `AutoFailWatcher`: failing meetings nobody attended
//! - `RescheduleCoordinator`: edit in place versus supersede
//! - claim confirmation with a journal so item and record settle together
//! - `ChangeFeed`: push of committed records to subscribed clients

pub mod attendance;
pub mod auto_fail;
pub mod clock;
pub mod confirmation;
pub mod error;
pub mod feed;
pub mod items;
pub mod manager;
pub mod notify;
pub mod projection;
pub mod reschedule;
pub mod sqlite_store;
pub mod store;

pub use attendance::{AttendanceTracker, AttendanceWindow, WindowPhase};
pub use auto_fail::{AutoFailPolicy, AutoFailReport, AutoFailWatcher};
pub use clock::{Clock, SimulatedClock, SystemClock};
pub use confirmation::{ClaimJournal, PendingClaim, RecoveryReport};
pub use error::LifecycleError;
pub use feed::{ChangeFeed, FeedEvent, FeedSubscription};
pub use items::{InMemoryItemStore, ItemStore, ItemStoreError};
pub use manager::{LifecycleConfig, RequestLifecycleManager};
pub use notify::{NotificationDispatcher, NotifyError, RecordingDispatcher, TracingDispatcher};
pub use projection::{ItemProjection, ViewState};
pub use reschedule::{RescheduleCoordinator, WritePlan};
pub use sqlite_store::SqliteStore;
pub use store::{
    InMemoryStore, Precondition, RecordPatch, ScheduleRequestStore, StateTransition, StoreError,
};
