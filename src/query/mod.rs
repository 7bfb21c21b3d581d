// Query Processing Module
//
// Operator plans and the streaming executor that runs them.

pub mod executor;
pub mod planner;

pub use executor::{Context, Pipeline, QueryError, QueryResult};
pub use planner::PlanNode;
