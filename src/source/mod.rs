pub mod channel;
pub mod file;
pub mod traits;

pub use channel::ChannelSource;
pub use file::FileSource;
pub use traits::{EventSource, SourceError};
