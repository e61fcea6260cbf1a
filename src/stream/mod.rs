//! 流式摄取：容错增量 JSON 解码与批次产出

pub mod ingestor;
pub mod partial_json;

pub use ingestor::{
    batches_from_deltas, extract_cells, ingest_batches, snapshots, strip_fences, BatchStream,
    GeneratedBatch, GeneratedItem, Payload, SnapshotStream, MAX_CONSECUTIVE_PARSE_FAILURES,
};
pub use partial_json::{parse_partial, PartialJsonError};
