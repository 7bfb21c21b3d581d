// Scanpipe Query Execution Core

pub mod common;
pub mod index;
pub mod query;
pub mod server;

// Re-export key items for convenient access
pub use index::{Keyspace, MemoryIndex, PrimaryIndex};
pub use query::executor::{CollectingOutput, Context, ExecutionConfig, Item, Output, State};
pub use query::executor::result::{QueryError, QueryResult};
pub use query::planner::PlanNode;
pub use server::{Request, RequestOptions, ServerSettings};
