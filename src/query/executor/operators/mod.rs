// Query Operators Module
//
// The operators a pipeline is built from. Every operator runs on its own
// thread, reads items from an input channel (scans read index entries
// instead), writes items to an output channel and shares its lifecycle
// bookkeeping through `OperatorBase`.

pub mod base;
pub mod fetch;
pub mod filter;
pub mod limit;
pub mod parallel;
pub mod project;
pub mod scan;
pub mod stream;

use std::sync::Arc;

use serde_json::Value;

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::phase::Phase;

pub use self::base::{EntryEvent, OperatorBase, OperatorState, PhaseCounter};
pub use self::fetch::Fetch;
pub use self::filter::Filter;
pub use self::limit::{Limit, Offset};
pub use self::parallel::Parallel;
pub use self::project::InitialProject;
pub use self::scan::PrimaryScan;
pub use self::stream::Stream;

/// The closed set of operator kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    PrimaryScan,
    Fetch,
    Filter,
    InitialProject,
    Offset,
    Limit,
    Parallel,
    Stream,
}

impl OperatorKind {
    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::PrimaryScan => "PrimaryScan3",
            OperatorKind::Fetch => "Fetch",
            OperatorKind::Filter => "Filter",
            OperatorKind::InitialProject => "InitialProject",
            OperatorKind::Offset => "Offset",
            OperatorKind::Limit => "Limit",
            OperatorKind::Parallel => "Parallel",
            OperatorKind::Stream => "Stream",
        }
    }

    /// Phase this operator's time and documents are attributed to
    pub fn phase(self) -> Option<Phase> {
        match self {
            OperatorKind::PrimaryScan => Some(Phase::PrimaryScan),
            OperatorKind::Fetch => Some(Phase::Fetch),
            OperatorKind::Filter => Some(Phase::Filter),
            OperatorKind::InitialProject => Some(Phase::Project),
            OperatorKind::Stream => Some(Phase::Stream),
            OperatorKind::Offset | OperatorKind::Limit | OperatorKind::Parallel => None,
        }
    }
}

/// One stage of an execution pipeline
pub trait Operator: Send + Sync {
    fn base(&self) -> &OperatorBase;

    /// Run the operator's logic to completion. Safe to call from several
    /// threads; the body executes at most once.
    fn run_once(&self, context: &Arc<Context>, parent: Option<&Item>);

    /// New instance over the same plan with an independent lifecycle
    fn copy(&self) -> Arc<dyn Operator>;

    /// Ask the operator to stop. Never blocks; repeated calls are no-ops.
    fn send_stop(&self) {
        self.base().send_stop();
    }

    fn kind(&self) -> OperatorKind {
        self.base().kind()
    }

    /// Execution timings for the profile
    fn timings(&self) -> Value {
        self.base().timings_json()
    }
}
