#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use scanpipe::index::MemoryIndex;
use scanpipe::query::executor::pipeline::run_query;
use scanpipe::query::planner::{Expression, FetchPlan, PlanNode, PrimaryScanPlan};
use scanpipe::server::{self, RecordingTransport, Request, RequestOptions, ServerSettings};
use scanpipe::{CollectingOutput, Context, ExecutionConfig};

// Key of the i-th generated document
pub fn key(i: usize) -> String {
    format!("doc{:05}", i)
}

// Keyspace with `n` documents keyed in scan order
pub fn create_test_index(n: usize) -> Arc<MemoryIndex> {
    Arc::new(MemoryIndex::with_documents(
        "orders",
        (0..n).map(|i| (key(i), json!({"seq": i, "even": i % 2 == 0}))),
    ))
}

pub fn expected_keys(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(key).collect()
}

// scan -> fetch -> [limit] -> stream, with the limit also bounding the scan
pub fn scan_fetch_plan(index: &Arc<MemoryIndex>, limit: Option<i64>) -> PlanNode {
    let mut scan = PrimaryScanPlan::new(Arc::clone(index) as _);
    if let Some(limit) = limit {
        scan = scan.with_limit(Expression::constant(limit));
    }
    let mut stages = vec![
        PlanNode::PrimaryScan(Arc::new(scan)),
        PlanNode::Fetch(Arc::new(FetchPlan::new(Arc::clone(index) as _))),
    ];
    if let Some(limit) = limit {
        stages.push(PlanNode::Limit(Expression::constant(limit)));
    }
    stages.push(PlanNode::Stream);
    PlanNode::sequence(stages)
}

// Run a plan into a collecting output
pub fn collect(plan: &PlanNode) -> Result<(Arc<CollectingOutput>, Arc<Context>)> {
    collect_with(plan, ExecutionConfig::default())
}

pub fn collect_with(
    plan: &PlanNode,
    config: ExecutionConfig,
) -> Result<(Arc<CollectingOutput>, Arc<Context>)> {
    let output = Arc::new(CollectingOutput::new());
    let context = Arc::new(Context::new("test-request", output.clone()).with_config(config));
    run_query(plan, &context, None)?;
    Ok((output, context))
}

// Run a plan through a request writing into a recording transport
pub fn respond(
    plan: &PlanNode,
    settings: ServerSettings,
    options: RequestOptions,
) -> (RecordingTransport, Arc<Request>) {
    let transport = RecordingTransport::new();
    let request = Arc::new(Request::new(
        Arc::new(settings),
        options,
        Box::new(transport.clone()),
    ));
    // failures are rendered into the response document
    let _ = server::execute(&request, plan, ExecutionConfig::default(), None);
    (transport, request)
}
