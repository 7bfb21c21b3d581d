// Filter Operator
//
// Forwards only the items for which the condition evaluates to TRUE.

use std::sync::Arc;

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::operators::{Operator, OperatorBase, OperatorKind, PhaseCounter};
use crate::query::executor::phase::Phase;
use crate::query::executor::result::QueryError;
use crate::query::planner::plan::FilterPlan;

pub struct Filter {
    base: OperatorBase,
    plan: Arc<FilterPlan>,
}

impl Filter {
    pub fn new(plan: Arc<FilterPlan>) -> Self {
        Self {
            base: OperatorBase::new(OperatorKind::Filter),
            plan,
        }
    }

    fn filter_items(&self, context: &Context) {
        let (Some(input), Some(output)) = (self.base.input(), self.base.output()) else {
            context.error(QueryError::Plan("filter is not connected".into()));
            return;
        };
        let mut counter = PhaseCounter::new(context, Phase::Filter);

        while let Some(item) = self.base.get_item(context, &input) {
            counter.add(1);
            match self.plan.condition.evaluate(Some(&item), context) {
                Ok(true) => {
                    if !self.base.send_item(context, &output, item) {
                        return;
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    context.error(err);
                    return;
                }
            }
        }
    }
}

impl Operator for Filter {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_once(&self, context: &Arc<Context>, _parent: Option<&Item>) {
        self.base.run_once(context, || self.filter_items(context));
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(Self {
            base: self.base.copy(),
            plan: Arc::clone(&self.plan),
        })
    }
}
