//! Chunk-oriented read, process, write pipeline run by each partition worker
//!
//! A worker moves through `OPENED -> (READ -> PROCESS -> WRITE)* -> CLOSED`.
//! Chunks within one partition are handled strictly in sequence.

pub mod output;
pub mod processor;
pub mod projection;
pub mod reader;
pub mod step;
pub mod writer;

pub use output::{LogKind, PartitionOutput};
pub use processor::RecordProcessor;
pub use projection::{
    EchoProjection, ProjectionParameters, ProjectionRequest, ProjectionService, ECHO_YIELD_HEADER,
};
pub use reader::{LoadedChunk, PartitionReader};
pub use step::{ChunkStep, StepOutcome};
pub use writer::ProjectionWriter;
