pub mod processor;
pub mod runner;

pub use processor::EmbeddingProcessor;
pub use runner::{run_consumer, start_stream, ConsumerStats, PipelineError, StreamHandle};
