use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use rand::Rng;

use scanpipe::index::{ScanCall, ScanFault};
use scanpipe::query::executor::operators::{Operator, PrimaryScan};
use scanpipe::query::planner::{Expression, PlanNode, PrimaryScanPlan};
use scanpipe::{ExecutionConfig, QueryError, State};

#[path = "../common/mod.rs"]
mod common;
use common::{collect, collect_with, create_test_index, expected_keys, scan_fetch_plan};

/// Timeouts at random positions never reorder, duplicate or over-deliver
#[test]
fn test_chunked_scan_with_random_timeouts() -> Result<()> {
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let docs = rng.gen_range(10..60);
        let limit = rng.gen_range(1..80);
        let index = create_test_index(docs);

        let faults = (0..rng.gen_range(1..4))
            .map(|_| Some(ScanFault::TimeoutAfter(rng.gen_range(1..10))))
            .collect();
        index.script_faults(faults);

        let (output, _) = collect(&scan_fetch_plan(&index, Some(limit as i64)))?;
        let keys = output.keys();

        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len(), "duplicate keys delivered");
        assert!(keys.len() <= limit);
        assert_eq!(keys, expected_keys(0..docs.min(limit)));
        assert!(output.errors().is_empty());
        assert!(output.warnings().len() <= 1);
    }
    Ok(())
}

#[test]
fn test_limit_does_not_over_read() -> Result<()> {
    let index = create_test_index(100);
    let (output, _) = collect(&scan_fetch_plan(&index, Some(5)))?;

    assert_eq!(output.keys(), expected_keys(0..5));
    assert_eq!(index.entries_produced(), 5);
    assert_eq!(index.calls(), vec![ScanCall::Entries { offset: 0, limit: 5 }]);
    Ok(())
}

#[test]
fn test_timeout_after_three_resumes() -> Result<()> {
    let index = create_test_index(10);
    index.script_faults(vec![Some(ScanFault::TimeoutAfter(3))]);
    let (output, _) = collect(&scan_fetch_plan(&index, None))?;

    assert_eq!(output.keys(), expected_keys(0..10));
    assert_eq!(output.warnings(), vec![QueryError::ChunkedScan]);
    assert!(output.errors().is_empty());
    match &index.calls()[1] {
        ScanCall::Range { low, inclusive, .. } => {
            assert_eq!(low.as_deref(), Some("doc00002"));
            assert!(!inclusive);
        }
        other => panic!("expected a range scan, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_timeout_before_any_entry_is_an_error() -> Result<()> {
    let index = create_test_index(10);
    index.script_faults(vec![Some(ScanFault::TimeoutAfter(0))]);
    let (output, _) = collect(&scan_fetch_plan(&index, None))?;

    assert!(output.keys().is_empty());
    assert_eq!(output.errors(), vec![QueryError::IndexScanTimeout]);
    assert!(output.warnings().is_empty());
    Ok(())
}

#[test]
fn test_timeout_with_offset_is_terminal() -> Result<()> {
    let index = create_test_index(10);
    index.script_faults(vec![Some(ScanFault::TimeoutAfter(2))]);
    let scan = PrimaryScanPlan::new(index.clone()).with_offset(Expression::constant(3));
    let plan = PlanNode::sequence(vec![PlanNode::PrimaryScan(Arc::new(scan)), PlanNode::Stream]);
    let (output, _) = collect(&plan)?;

    assert_eq!(output.keys(), expected_keys(3..5));
    assert_eq!(output.errors(), vec![QueryError::IndexScanTimeout]);
    assert_eq!(index.calls().len(), 1);
    Ok(())
}

#[test]
fn test_phase_counts_cover_every_entry() -> Result<()> {
    let index = create_test_index(250);
    let config = ExecutionConfig {
        phase_update_count: 16,
        ..Default::default()
    };
    let (output, context) = collect_with(&scan_fetch_plan(&index, None), config)?;

    assert_eq!(output.keys().len(), 250);
    assert_eq!(context.phases().count(scanpipe::query::executor::Phase::PrimaryScan), 250);
    assert_eq!(context.phases().count(scanpipe::query::executor::Phase::Fetch), 250);
    assert_eq!(output.state(), State::Completed);
    Ok(())
}

#[test]
fn test_send_stop_is_idempotent() {
    let index = create_test_index(3);
    let scan = PrimaryScan::new(Arc::new(PrimaryScanPlan::new(index)));
    scan.send_stop();
    scan.send_stop();
    assert!(scan.base().is_stopped());

    let copy = scan.copy();
    assert!(!copy.base().is_stopped());
}
