pub mod bitvavo;
pub mod config;
pub mod control;
pub mod scheduler;

pub use bitvavo::BitvavoClient;
pub use config::{BotFileConfig, SchedulerConfig, StoreSection};
pub use control::{ControlSurface, StatusReport, SummaryReport};
pub use scheduler::{Scheduler, SchedulerDeps, SchedulerHandle, TickOutcome};
