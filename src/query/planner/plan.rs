// Operator Plans
//
// Immutable plan nodes handed to the pipeline builder. Each node names the
// operator that implements it and carries everything that operator reads
// while running; plan data is shared between copies of an operator.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::index::{GroupAggregates, IndexKeyOrder, IndexProjection, Keyspace, PrimaryIndex};
use crate::query::planner::expression::{Condition, Expression};

/// Closed set of plan nodes the pipeline knows how to instantiate
#[derive(Debug, Clone)]
pub enum PlanNode {
    PrimaryScan(Arc<PrimaryScanPlan>),
    Fetch(Arc<FetchPlan>),
    Filter(Arc<FilterPlan>),
    InitialProject(Arc<ProjectPlan>),
    Offset(Expression),
    Limit(Expression),
    Parallel(ParallelPlan),
    Sequence(Vec<PlanNode>),
    Stream,
}

impl PlanNode {
    pub fn sequence(children: Vec<PlanNode>) -> Self {
        PlanNode::Sequence(children)
    }

    pub fn parallel(child: PlanNode) -> Self {
        PlanNode::Parallel(ParallelPlan {
            child: Box::new(child),
            max_parallelism: None,
        })
    }

    /// Explain-style rendering of the plan
    pub fn to_json(&self) -> Value {
        match self {
            PlanNode::PrimaryScan(plan) => plan.to_json(),
            PlanNode::Fetch(plan) => json!({"#operator": "Fetch", "keyspace": plan.keyspace.name()}),
            PlanNode::Filter(_) => json!({"#operator": "Filter"}),
            PlanNode::InitialProject(plan) => json!({
                "#operator": "InitialProject",
                "raw": matches!(plan.projection, Projection::Raw(_)),
            }),
            PlanNode::Offset(_) => json!({"#operator": "Offset"}),
            PlanNode::Limit(_) => json!({"#operator": "Limit"}),
            PlanNode::Parallel(plan) => json!({
                "#operator": "Parallel",
                "maxParallelism": plan.max_parallelism,
                "~child": plan.child.to_json(),
            }),
            PlanNode::Sequence(children) => json!({
                "#operator": "Sequence",
                "~children": children.iter().map(PlanNode::to_json).collect::<Vec<_>>(),
            }),
            PlanNode::Stream => json!({"#operator": "Stream"}),
        }
    }
}

/// A covered field: value taken straight from an index entry key position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cover {
    pub alias: String,
    pub entry_key_pos: usize,
}

/// Full scan of a primary index
pub struct PrimaryScanPlan {
    index: Arc<dyn PrimaryIndex>,
    keyspace: String,
    offset: Option<Expression>,
    limit: Option<Expression>,
    order_terms: Vec<IndexKeyOrder>,
    group_aggs: Option<GroupAggregates>,
    projection: Option<IndexProjection>,
    covers: Vec<Cover>,
}

impl PrimaryScanPlan {
    pub fn new(index: Arc<dyn PrimaryIndex>) -> Self {
        let keyspace = index.keyspace_id().to_string();
        Self {
            index,
            keyspace,
            offset: None,
            limit: None,
            order_terms: Vec::new(),
            group_aggs: None,
            projection: None,
            covers: Vec::new(),
        }
    }

    pub fn with_offset(mut self, offset: Expression) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: Expression) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, order_terms: Vec<IndexKeyOrder>) -> Self {
        self.order_terms = order_terms;
        self
    }

    pub fn with_group_aggs(mut self, group_aggs: GroupAggregates) -> Self {
        self.group_aggs = Some(group_aggs);
        self
    }

    pub fn with_projection(mut self, projection: IndexProjection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_cover(mut self, alias: &str, entry_key_pos: usize) -> Self {
        self.covers.push(Cover {
            alias: alias.to_string(),
            entry_key_pos,
        });
        self
    }

    pub fn index(&self) -> &Arc<dyn PrimaryIndex> {
        &self.index
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn offset(&self) -> Option<&Expression> {
        self.offset.as_ref()
    }

    pub fn limit(&self) -> Option<&Expression> {
        self.limit.as_ref()
    }

    pub fn order_terms(&self) -> &[IndexKeyOrder] {
        &self.order_terms
    }

    pub fn group_aggs(&self) -> Option<&GroupAggregates> {
        self.group_aggs.as_ref()
    }

    pub fn projection(&self) -> Option<&IndexProjection> {
        self.projection.as_ref()
    }

    pub fn covers(&self) -> &[Cover] {
        &self.covers
    }

    pub fn to_json(&self) -> Value {
        json!({
            "#operator": "PrimaryScan3",
            "index": self.index.name(),
            "keyspace": self.keyspace,
            "offset": self.offset.is_some(),
            "limit": self.limit.is_some(),
            "ordered": !self.order_terms.is_empty(),
            "grouped": self.group_aggs.is_some(),
        })
    }
}

impl fmt::Debug for PrimaryScanPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryScanPlan")
            .field("index", &self.index.name())
            .field("keyspace", &self.keyspace)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("order_terms", &self.order_terms)
            .field("group_aggs", &self.group_aggs)
            .field("covers", &self.covers)
            .finish()
    }
}

/// Fetch full documents for the keys produced by a scan
pub struct FetchPlan {
    keyspace: Arc<dyn Keyspace>,
}

impl FetchPlan {
    pub fn new(keyspace: Arc<dyn Keyspace>) -> Self {
        Self { keyspace }
    }

    pub fn keyspace(&self) -> &Arc<dyn Keyspace> {
        &self.keyspace
    }
}

impl fmt::Debug for FetchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchPlan")
            .field("keyspace", &self.keyspace.name())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FilterPlan {
    pub condition: Condition,
}

impl FilterPlan {
    pub fn new(condition: Condition) -> Self {
        Self { condition }
    }
}

/// One `expr AS alias` term of a projection
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionTerm {
    pub alias: String,
    pub expr: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Terms(Vec<ProjectionTerm>),
    /// `SELECT RAW expr`
    Raw(Expression),
}

#[derive(Debug, Clone)]
pub struct ProjectPlan {
    pub projection: Projection,
}

impl ProjectPlan {
    pub fn terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = (S, Expression)>,
        S: Into<String>,
    {
        Self {
            projection: Projection::Terms(
                terms
                    .into_iter()
                    .map(|(alias, expr)| ProjectionTerm {
                        alias: alias.into(),
                        expr,
                    })
                    .collect(),
            ),
        }
    }

    pub fn raw(expr: Expression) -> Self {
        Self {
            projection: Projection::Raw(expr),
        }
    }
}

/// Run copies of a subtree concurrently over one shared input stream
#[derive(Debug, Clone)]
pub struct ParallelPlan {
    pub child: Box<PlanNode>,
    /// Overrides the execution config's default when set
    pub max_parallelism: Option<usize>,
}
