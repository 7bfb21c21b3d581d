// Query Executor Module
//
// Turns an operator plan into a running pipeline: operators, the per-request
// context they share, the items they exchange and the output contract the
// response layer implements.

pub mod config;
pub mod context;
pub mod item;
pub mod operators;
pub mod output;
pub mod phase;
pub mod pipeline;
pub mod result;

pub use self::config::ExecutionConfig;
pub use self::context::Context;
pub use self::item::Item;
pub use self::operators::Operator;
pub use self::output::{CollectingOutput, Output, State};
pub use self::phase::{Phase, PhaseTable};
pub use self::pipeline::{Pipeline, RunningPipeline, run_query};
pub use self::result::{QueryError, QueryResult};
