//! 文档层：内容块、文档存储与执行协作方

pub mod block;
pub mod execution;
pub mod store;

pub use block::{AuthorRole, Block, BlockId, BlockKind, BlockOutput};
pub use execution::{BlockExecutor, NoopExecutor};
pub use store::{DocumentStore, InMemoryDocument};
