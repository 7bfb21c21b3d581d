// Pipeline
//
// Instantiates a plan as a chain of operators connected by bounded item
// channels, runs every operator on its own thread and tears the chain down
// once the request is finished.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver};
use log::{debug, error};
use serde_json::Value;

use crate::query::executor::context::Context;
use crate::query::executor::operators::{
    Fetch, Filter, InitialProject, Limit, Offset, Operator, OperatorKind, Parallel, PrimaryScan,
    Stream,
};
use crate::query::executor::phase::Phase;
use crate::query::executor::result::{QueryError, QueryResult};
use crate::query::planner::plan::PlanNode;

/// A wired but not yet running chain of operators
pub struct Pipeline {
    stages: Vec<Arc<dyn Operator>>,
    done: Receiver<()>,
}

impl Pipeline {
    /// Instantiate and wire `plan`. The plan must be a scan, any number of
    /// intermediate operators and a terminal stream.
    pub fn build(plan: &PlanNode, context: &Context) -> QueryResult<Self> {
        let started = Instant::now();
        let mut stages = Vec::new();
        collect_stages(plan, &mut stages)?;

        let (first, last) = match (stages.first(), stages.last()) {
            (Some(first), Some(last)) => (first.kind(), last.kind()),
            _ => return Err(QueryError::Plan("empty plan".into())),
        };
        if first != OperatorKind::PrimaryScan || last != OperatorKind::Stream {
            return Err(QueryError::Plan(format!(
                "a pipeline runs from a scan to a stream, not from {} to {}",
                first.name(),
                last.name()
            )));
        }
        if let Some(misplaced) = stages[1..stages.len() - 1]
            .iter()
            .find(|stage| matches!(stage.kind(), OperatorKind::PrimaryScan | OperatorKind::Stream))
        {
            return Err(QueryError::Plan(format!(
                "{} can only appear at the end of a pipeline",
                misplaced.kind().name()
            )));
        }

        let capacity = context.config().item_channel_capacity.max(1);
        for pair in stages.windows(2) {
            let (tx, rx) = channel::bounded(capacity);
            pair[0].base().set_output(tx);
            pair[1].base().set_input(rx);
            pair[1].base().add_upstream(pair[0].base().stop_signal());
        }
        let (done_tx, done) = channel::bounded(0);
        if let Some(last) = stages.last() {
            last.base().set_done(done_tx);
        }

        context.add_phase_time(Phase::Instantiate, started.elapsed());
        debug!("pipeline built with {} stages", stages.len());
        Ok(Self { stages, done })
    }

    pub fn stages(&self) -> &[Arc<dyn Operator>] {
        &self.stages
    }

    /// Start every operator on its own thread
    pub fn start(self, context: &Arc<Context>) -> QueryResult<RunningPipeline> {
        let mut handles = Vec::with_capacity(self.stages.len());
        let mut failure = None;
        for (i, stage) in self.stages.iter().enumerate() {
            let operator = Arc::clone(stage);
            let operator_context = Arc::clone(context);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", stage.kind().name(), i))
                .spawn(move || operator.run_once(&operator_context, None));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    failure = Some(QueryError::Internal(format!("cannot start operator: {}", err)));
                    break;
                }
            }
        }

        let running = RunningPipeline {
            stages: self.stages,
            handles,
            done: self.done,
        };
        match failure {
            Some(err) => {
                context.cancel();
                running.teardown();
                Err(err)
            }
            None => Ok(running),
        }
    }
}

fn collect_stages(node: &PlanNode, stages: &mut Vec<Arc<dyn Operator>>) -> QueryResult<()> {
    match node {
        PlanNode::Sequence(children) => {
            for child in children {
                collect_stages(child, stages)?;
            }
        }
        PlanNode::Parallel(plan) => {
            let child = instantiate(&plan.child)?;
            if matches!(
                child.kind(),
                OperatorKind::PrimaryScan | OperatorKind::Stream | OperatorKind::Parallel
            ) {
                return Err(QueryError::Plan(format!(
                    "{} cannot run in parallel",
                    child.kind().name()
                )));
            }
            stages.push(Arc::new(Parallel::new(child, plan.max_parallelism)));
        }
        other => stages.push(instantiate(other)?),
    }
    Ok(())
}

/// One operator per plan node kind
fn instantiate(node: &PlanNode) -> QueryResult<Arc<dyn Operator>> {
    let operator: Arc<dyn Operator> = match node {
        PlanNode::PrimaryScan(plan) => Arc::new(PrimaryScan::new(Arc::clone(plan))),
        PlanNode::Fetch(plan) => Arc::new(Fetch::new(Arc::clone(plan))),
        PlanNode::Filter(plan) => Arc::new(Filter::new(Arc::clone(plan))),
        PlanNode::InitialProject(plan) => Arc::new(InitialProject::new(Arc::clone(plan))),
        PlanNode::Offset(expr) => Arc::new(Offset::new(expr.clone())),
        PlanNode::Limit(expr) => Arc::new(Limit::new(expr.clone())),
        PlanNode::Stream => Arc::new(Stream::new()),
        PlanNode::Sequence(_) | PlanNode::Parallel(_) => {
            return Err(QueryError::Plan(
                "nested sequences cannot be instantiated as a single operator".into(),
            ));
        }
    };
    Ok(operator)
}

/// A started pipeline
pub struct RunningPipeline {
    stages: Vec<Arc<dyn Operator>>,
    handles: Vec<JoinHandle<()>>,
    done: Receiver<()>,
}

impl RunningPipeline {
    /// Becomes ready (disconnected) once the terminal stream has closed
    pub fn done(&self) -> &Receiver<()> {
        &self.done
    }

    pub fn operators(&self) -> &[Arc<dyn Operator>] {
        &self.stages
    }

    /// Ask every operator to stop
    pub fn stop(&self) {
        for stage in &self.stages {
            stage.send_stop();
        }
    }

    /// Stop and join every operator; returns their execution timings
    pub fn teardown(self) -> Value {
        self.stop();
        for handle in self.handles {
            if handle.join().is_err() {
                error!("operator thread exited abnormally");
            }
        }
        Value::Array(self.stages.iter().map(|stage| stage.timings()).collect())
    }
}

/// Build and start a pipeline for `plan`, then let the context's output
/// drive it to completion
pub fn run_query(plan: &PlanNode, context: &Arc<Context>, signature: Option<&Value>) -> QueryResult<()> {
    let running = Pipeline::build(plan, context)?.start(context)?;
    context.output().execute(context, running, signature);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, ScanFault};
    use crate::query::executor::output::{CollectingOutput, State};
    use crate::query::planner::expression::{Condition, Expression};
    use crate::query::planner::plan::{FetchPlan, FilterPlan, PrimaryScanPlan, ProjectPlan};
    use serde_json::json;

    fn index_with(n: usize) -> Arc<MemoryIndex> {
        Arc::new(MemoryIndex::with_documents(
            "users",
            (0..n).map(|i| (format!("u{:03}", i), json!({"n": i, "even": i % 2 == 0}))),
        ))
    }

    fn run(plan: PlanNode, output: Arc<CollectingOutput>) -> Arc<Context> {
        let context = Arc::new(Context::new("req", output));
        run_query(&plan, &context, None).unwrap();
        context
    }

    #[test]
    fn test_full_pipeline() {
        let index = index_with(30);
        let plan = PlanNode::sequence(vec![
            PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index.clone()))),
            PlanNode::Fetch(Arc::new(FetchPlan::new(index))),
            PlanNode::Filter(Arc::new(FilterPlan::new(Condition::equals(
                Expression::field("even"),
                Expression::constant(true),
            )))),
            PlanNode::InitialProject(Arc::new(ProjectPlan::raw(Expression::field("n")))),
            PlanNode::Offset(Expression::constant(2)),
            PlanNode::Limit(Expression::constant(3)),
            PlanNode::Stream,
        ]);
        let output = Arc::new(CollectingOutput::new());
        let context = run(plan, output.clone());

        let values: Vec<_> = output.items().iter().map(|item| item.value().clone()).collect();
        assert_eq!(values, vec![json!(4), json!(6), json!(8)]);
        assert_eq!(output.state(), State::Completed);
        assert_eq!(context.phases().count(Phase::Stream), 3);
    }

    #[test]
    fn test_parallel_fetch() {
        let index = index_with(200);
        let plan = PlanNode::sequence(vec![
            PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index.clone()))),
            PlanNode::parallel(PlanNode::Fetch(Arc::new(FetchPlan::new(index)))),
            PlanNode::Stream,
        ]);
        let output = Arc::new(CollectingOutput::new());
        let context = run(plan, output.clone());

        let mut keys = output.keys();
        keys.sort();
        assert_eq!(keys.len(), 200);
        keys.dedup();
        assert_eq!(keys.len(), 200);
        assert_eq!(context.phases().operators(Phase::Fetch), 4);
    }

    #[test]
    fn test_limit_stops_long_scan() {
        let index = index_with(5000);
        index.set_entry_delay(std::time::Duration::from_micros(50));
        let plan = PlanNode::sequence(vec![
            PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index.clone()))),
            PlanNode::Limit(Expression::constant(10)),
            PlanNode::Stream,
        ]);
        let output = Arc::new(CollectingOutput::new());
        run(plan, output.clone());

        assert_eq!(output.items().len(), 10);
        assert!(index.entries_produced() < 5000);
    }

    #[test]
    fn test_scan_timeout_recovers_through_pipeline() {
        let index = index_with(12);
        index.script_faults(vec![Some(ScanFault::TimeoutAfter(5))]);
        let plan = PlanNode::sequence(vec![
            PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index))),
            PlanNode::Stream,
        ]);
        let output = Arc::new(CollectingOutput::new());
        run(plan, output.clone());

        assert_eq!(output.keys().len(), 12);
        assert_eq!(output.warnings(), vec![QueryError::ChunkedScan]);
    }

    #[test]
    fn test_invalid_shapes_are_rejected() {
        let index = index_with(1);
        let context = Context::new("req", Arc::new(CollectingOutput::new()));
        let scan = || PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index.clone())));

        let no_stream = PlanNode::sequence(vec![scan()]);
        let two_scans = PlanNode::sequence(vec![scan(), scan(), PlanNode::Stream]);
        let parallel_scan = PlanNode::sequence(vec![PlanNode::parallel(scan()), PlanNode::Stream]);
        let empty = PlanNode::sequence(vec![]);

        for plan in [no_stream, two_scans, parallel_scan, empty] {
            let err = Pipeline::build(&plan, &context).err().unwrap();
            assert_eq!(err.code(), QueryError::PLAN);
        }
    }

    #[test]
    fn test_teardown_reports_timings() {
        let index = index_with(3);
        let plan = PlanNode::sequence(vec![
            PlanNode::PrimaryScan(Arc::new(PrimaryScanPlan::new(index))),
            PlanNode::Stream,
        ]);
        let context = Arc::new(Context::new("req", Arc::new(CollectingOutput::new())));
        let running = Pipeline::build(&plan, &context).unwrap().start(&context).unwrap();
        running.done().recv().unwrap_err();

        let timings = running.teardown();
        assert_eq!(timings[0]["#operator"], "PrimaryScan3");
        assert_eq!(timings[0]["#stats"]["#itemsOut"], 3);
        assert_eq!(timings[1]["#stats"]["#itemsIn"], 3);
    }
}
