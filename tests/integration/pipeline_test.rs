use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, json};

use scanpipe::index::ScanFault;
use scanpipe::query::executor::pipeline::run_query;
use scanpipe::query::executor::Phase;
use scanpipe::query::planner::{
    Condition, Expression, FetchPlan, FilterPlan, PlanNode, PrimaryScanPlan, ProjectPlan,
};
use scanpipe::{CollectingOutput, Context, QueryError, State};

#[path = "../common/mod.rs"]
mod common;
use common::{collect, create_test_index, expected_keys, key};

fn even_filter() -> PlanNode {
    PlanNode::Filter(Arc::new(FilterPlan::new(Condition::equals(
        Expression::field("even"),
        Expression::constant(true),
    ))))
}

/// Test the full operator chain, including projection and paging
#[test]
fn test_filter_project_page() -> Result<()> {
    let index = create_test_index(40);
    let plan = PlanNode::sequence(vec![
        PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index.clone()))),
        PlanNode::Fetch(Arc::new(FetchPlan::new(index.clone()))),
        even_filter(),
        PlanNode::InitialProject(Arc::new(ProjectPlan::terms([
            ("id", Expression::MetaId),
            ("seq", Expression::field("seq")),
        ]))),
        PlanNode::Offset(Expression::constant(3)),
        PlanNode::Limit(Expression::constant(4)),
        PlanNode::Stream,
    ]);
    let (output, context) = collect(&plan)?;

    let values: Vec<_> = output.items().into_iter().map(|item| item.into_value()).collect();
    assert_eq!(
        values,
        vec![
            json!({"id": key(6), "seq": 6}),
            json!({"id": key(8), "seq": 8}),
            json!({"id": key(10), "seq": 10}),
            json!({"id": key(12), "seq": 12}),
        ]
    );
    assert_eq!(context.phases().count(Phase::Stream), 4);
    assert_eq!(output.state(), State::Completed);
    Ok(())
}

#[test]
fn test_named_parameter_limit() -> Result<()> {
    let index = create_test_index(20);
    let scan = PrimaryScanPlan::new(index.clone())
        .with_limit(Expression::NamedParameter("$n".into()));
    let plan = PlanNode::sequence(vec![PlanNode::PrimaryScan(Arc::new(scan)), PlanNode::Stream]);

    let mut args = Map::new();
    args.insert("$n".into(), json!(7));
    let output = Arc::new(CollectingOutput::new());
    let context = Arc::new(Context::new("req-args", output.clone()).with_named_args(args));
    run_query(&plan, &context, None)?;

    assert_eq!(output.keys(), expected_keys(0..7));
    assert_eq!(index.entries_produced(), 7);
    Ok(())
}

#[test]
fn test_missing_parameter_is_reported() -> Result<()> {
    let index = create_test_index(5);
    let scan = PrimaryScanPlan::new(index.clone()).with_limit(Expression::PositionalParameter(1));
    let plan = PlanNode::sequence(vec![PlanNode::PrimaryScan(Arc::new(scan)), PlanNode::Stream]);
    let (output, _) = collect(&plan)?;

    assert!(output.keys().is_empty());
    assert_eq!(output.errors().len(), 1);
    assert_eq!(output.errors()[0].code(), QueryError::PLAN);
    assert!(index.calls().is_empty());
    Ok(())
}

#[test]
fn test_fetch_failure_reported_once() -> Result<()> {
    let index = create_test_index(50);
    index.fail_fetches("keyspace offline");
    let plan = common::scan_fetch_plan(&index, None);
    let (output, _) = collect(&plan)?;

    assert!(output.keys().is_empty());
    let errors = output.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), QueryError::DATASTORE);
    Ok(())
}

/// An output that refuses results stops the whole pipeline
#[test]
fn test_refusing_output_stops_scan() -> Result<()> {
    let index = create_test_index(10_000);
    let plan = PlanNode::sequence(vec![
        PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index.clone()))),
        PlanNode::Stream,
    ]);
    let output = Arc::new(CollectingOutput::with_capacity(5));
    let context = Arc::new(Context::new("req-refuse", output.clone()));
    run_query(&plan, &context, None)?;

    assert_eq!(output.keys(), expected_keys(0..5));
    assert_eq!(output.state(), State::Stopped);
    assert!(index.entries_produced() < 10_000);
    Ok(())
}

#[test]
fn test_parallel_stages_survive_chunked_scan() -> Result<()> {
    let index = create_test_index(120);
    index.script_faults(vec![
        Some(ScanFault::TimeoutAfter(30)),
        Some(ScanFault::TimeoutAfter(45)),
    ]);
    let plan = PlanNode::sequence(vec![
        PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index.clone()))),
        PlanNode::parallel(PlanNode::Fetch(Arc::new(FetchPlan::new(index.clone())))),
        PlanNode::parallel(even_filter()),
        PlanNode::Stream,
    ]);
    let (output, _) = collect(&plan)?;

    let mut keys = output.keys();
    keys.sort();
    let expected: Vec<String> = (0..120).filter(|i| i % 2 == 0).map(key).collect();
    assert_eq!(keys, expected);
    assert_eq!(output.warnings(), vec![QueryError::ChunkedScan]);
    assert_eq!(index.calls().len(), 3);
    Ok(())
}
