// Initial Projection Operator
//
// Builds the result value of each item from the projection terms, or from
// a single expression for `SELECT RAW`. Item metadata is kept.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::operators::{Operator, OperatorBase, OperatorKind, PhaseCounter};
use crate::query::executor::phase::Phase;
use crate::query::executor::result::{QueryError, QueryResult};
use crate::query::planner::plan::{ProjectPlan, Projection};

pub struct InitialProject {
    base: OperatorBase,
    plan: Arc<ProjectPlan>,
}

impl InitialProject {
    pub fn new(plan: Arc<ProjectPlan>) -> Self {
        Self {
            base: OperatorBase::new(OperatorKind::InitialProject),
            plan,
        }
    }

    fn project_items(&self, context: &Context) {
        let (Some(input), Some(output)) = (self.base.input(), self.base.output()) else {
            context.error(QueryError::Plan("projection is not connected".into()));
            return;
        };
        let mut counter = PhaseCounter::new(context, Phase::Project);

        while let Some(mut item) = self.base.get_item(context, &input) {
            counter.add(1);
            match self.project(&item, context) {
                Ok(Some(value)) => item.set_value(value),
                // RAW of MISSING produces no result
                Ok(None) => continue,
                Err(err) => {
                    context.error(err);
                    return;
                }
            }
            if !self.base.send_item(context, &output, item) {
                return;
            }
        }
    }

    fn project(&self, item: &Item, context: &Context) -> QueryResult<Option<Value>> {
        match &self.plan.projection {
            Projection::Raw(expr) => expr.evaluate(Some(item), context),
            Projection::Terms(terms) => {
                let mut fields = Map::new();
                for term in terms {
                    if let Some(value) = term.expr.evaluate(Some(item), context)? {
                        fields.insert(term.alias.clone(), value);
                    }
                }
                Ok(Some(Value::Object(fields)))
            }
        }
    }
}

impl Operator for InitialProject {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_once(&self, context: &Arc<Context>, _parent: Option<&Item>) {
        self.base.run_once(context, || self.project_items(context));
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(Self {
            base: self.base.copy(),
            plan: Arc::clone(&self.plan),
        })
    }
}
