pub mod event;
pub mod manager;
pub mod processor;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use event::{EventPosition, RawEvent, StreamKey};
pub use manager::{ManagerStats, WindowManager, WindowPolicy, WindowStatus};
pub use processor::{ProcessorError, WindowProcessor};
pub use registry::WindowRegistry;
pub use scheduler::CloseReason;
pub use types::{EmbeddedWindow, ScoredWindow, Window, SUMMARY_EVENT_LIMIT};
