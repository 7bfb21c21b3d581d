// Query Planner Module
//
// Plan nodes and the expression surface consumed by the executor. Plans are
// built by the caller; this crate does not choose them.

pub mod expression;
pub mod plan;

pub use self::expression::{Condition, Expression, eval_limit_offset};
pub use self::plan::{
    Cover, FetchPlan, FilterPlan, ParallelPlan, PlanNode, PrimaryScanPlan, ProjectPlan, Projection,
    ProjectionTerm,
};
