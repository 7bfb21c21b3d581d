// Response Server Module
//
// The output side of a query request: settings, the transport the response
// is written to, the buffered writer in front of it and the request that
// renders the response document.

pub mod request;
mod response;
pub mod settings;
pub mod transport;
pub mod writer;

use std::sync::Arc;

use log::warn;
use serde_json::Value;

pub use self::request::Request;
pub use self::settings::{Profile, RequestOptions, ServerSettings, WriterConfig};
pub use self::transport::{IoTransport, RecordingTransport, Transport};
pub use self::writer::BufferedWriter;

use crate::query::executor::config::ExecutionConfig;
use crate::query::executor::output::Output;
use crate::query::executor::pipeline::run_query;
use crate::query::executor::result::QueryResult;
use crate::query::planner::plan::PlanNode;

/// Run `plan` for `request` and write its response. A plan that cannot be
/// turned into a pipeline still produces a (failed) response document.
pub fn execute(
    request: &Arc<Request>,
    plan: &PlanNode,
    config: ExecutionConfig,
    signature: Option<&Value>,
) -> QueryResult<()> {
    let context = Arc::new(request.new_context(config));
    if let Err(err) = run_query(plan, &context, signature) {
        warn!("request {} failed before execution: {}", request.id(), err);
        request.fail(err.clone());
        request.failed();
        return Err(err);
    }
    Ok(())
}
