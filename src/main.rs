// Scanpipe demo
//
// Runs a generated keyspace through a primary scan pipeline and streams the
// JSON response document to stdout.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;
use serde_json::json;

use scanpipe::index::{MemoryIndex, ScanFault};
use scanpipe::query::planner::{
    Condition, Expression, FetchPlan, FilterPlan, ParallelPlan, PlanNode, PrimaryScanPlan,
    ProjectPlan,
};
use scanpipe::server::{self, IoTransport, Profile, Request, RequestOptions, ServerSettings};
use scanpipe::ExecutionConfig;

#[derive(Parser)]
#[command(author, version, about = "Scanpipe - stream a primary scan pipeline as a JSON response")]
struct Cli {
    /// Number of generated documents in the keyspace
    #[arg(short, long, default_value_t = 100)]
    documents: usize,

    /// LIMIT of the query
    #[arg(short, long)]
    limit: Option<i64>,

    /// OFFSET of the query
    #[arg(short, long)]
    offset: Option<i64>,

    /// Only return documents with an even sequence number
    #[arg(long)]
    even: bool,

    /// Run fetch, filter and projection with this many copies each
    #[arg(long)]
    parallel: Option<usize>,

    /// Make successive index scans time out after this many entries
    #[arg(long = "timeout-after", value_name = "ENTRIES")]
    timeout_after: Vec<usize>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pretty print the response
    #[arg(long)]
    pretty: bool,

    /// Profile to include: off, phases or timings
    #[arg(long, default_value = "off", value_parser = parse_profile)]
    profile: Profile,

    /// Leave the metrics out of the response
    #[arg(long)]
    no_metrics: bool,

    /// Log to stderr; RUST_LOG adds further directives
    #[arg(short, long)]
    verbose: bool,
}

fn parse_profile(s: &str) -> Result<Profile, String> {
    match s.to_ascii_lowercase().as_str() {
        "off" => Ok(Profile::Off),
        "phases" => Ok(Profile::Phases),
        "timings" => Ok(Profile::Timings),
        other => Err(format!("unknown profile '{}'", other)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        // `log` records are forwarded through the tracing-log bridge
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("scanpipe=debug".parse()?),
            )
            .init();
    }

    let index = Arc::new(MemoryIndex::with_documents(
        "users",
        (0..cli.documents).map(|i| {
            (
                format!("user{:06}", i),
                json!({"seq": i, "even": i % 2 == 0, "name": format!("user {}", i)}),
            )
        }),
    ));
    if !cli.timeout_after.is_empty() {
        index.script_faults(
            cli.timeout_after
                .iter()
                .map(|n| Some(ScanFault::TimeoutAfter(*n)))
                .collect(),
        );
    }

    let plan = build_plan(&cli, &index);
    info!("plan: {}", plan.to_json());

    let mut settings = ServerSettings::new();
    settings.pretty = cli.pretty;
    settings.metrics = !cli.no_metrics;
    settings.profile = cli.profile;
    let settings = Arc::new(settings);
    let options = RequestOptions {
        timeout: cli.timeout_ms.map(Duration::from_millis),
        ..Default::default()
    };
    let request = Arc::new(Request::new(
        settings,
        options,
        Box::new(IoTransport::new(io::stdout())),
    ));

    let signature = json!({"*": "*"});
    server::execute(&request, &plan, ExecutionConfig::default(), Some(&signature))?;
    info!(
        "request {} {}: {} results",
        request.id(),
        request.state(),
        request.result_count()
    );
    Ok(())
}

/// scan -> fetch -> [filter] -> project -> [offset] -> [limit] -> stream
///
/// The scan is bounded by offset + limit unless a filter may drop documents.
fn build_plan(cli: &Cli, index: &Arc<MemoryIndex>) -> PlanNode {
    let mut scan = PrimaryScanPlan::new(Arc::clone(index) as _);
    if let (false, Some(limit)) = (cli.even, cli.limit) {
        let bound = limit.saturating_add(cli.offset.unwrap_or(0).max(0));
        scan = scan.with_limit(Expression::constant(bound));
    }

    let mut body = vec![PlanNode::Fetch(Arc::new(FetchPlan::new(Arc::clone(index) as _)))];
    if cli.even {
        body.push(PlanNode::Filter(Arc::new(FilterPlan::new(Condition::equals(
            Expression::field("even"),
            Expression::constant(true),
        )))));
    }
    body.push(PlanNode::InitialProject(Arc::new(ProjectPlan::terms([
        ("id", Expression::MetaId),
        ("seq", Expression::field("seq")),
        ("name", Expression::field("name")),
    ]))));

    let mut stages = vec![PlanNode::PrimaryScan(Arc::new(scan))];
    match cli.parallel {
        Some(n) => stages.extend(body.into_iter().map(|node| {
            PlanNode::Parallel(ParallelPlan {
                child: Box::new(node),
                max_parallelism: Some(n),
            })
        })),
        None => stages.extend(body),
    }
    if let Some(offset) = cli.offset {
        stages.push(PlanNode::Offset(Expression::constant(offset)));
    }
    if let Some(limit) = cli.limit {
        stages.push(PlanNode::Limit(Expression::constant(limit)));
    }
    stages.push(PlanNode::Stream);
    PlanNode::sequence(stages)
}
