pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{BootstrapResult, bootstrap_workspace};
pub use application::dialog_flow::{DialogFlowStateMachine, ExclusiveSection, Step};
pub use application::edit_buffer::{EditTarget, EditTiming, OptimisticEditBuffer, RemoteMerge};
pub use application::session::{RoastTimerSession, SessionHandle};
pub use application::timer::{
    ChangeOrigin, NowProvider, StatusChange, TimerOrchestrator, Transition, timer_key,
};
pub use domain::clock::{ClockSample, format_clock, sample};
pub use domain::models::{
    DialogState, RoastMetadata, ScheduleEntry, TimerRecord, TimerStatus, TodaySchedule,
};
pub use domain::recommendation::{DurationRecommendation, RoastRecord, recommend_duration};
pub use infrastructure::audio::{AudioPort, Notifier, PlayRequest, SoundCue};
pub use infrastructure::config::{SoundSettings, SyncConfig};
pub use infrastructure::document_store::{
    Document, DocumentSubscription, InMemoryDocumentStore, Patch, RemoteDocumentStore,
};
pub use infrastructure::error::SyncError;
pub use infrastructure::navigation::{NavigationPort, NavigationTarget};
pub use infrastructure::sqlite_store::SqliteDocumentStore;
