// Offset and Limit Operators
//
// Offset skips the first n items. Limit forwards at most n items and then
// closes, which stops every operator upstream of it.

use std::sync::Arc;

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::operators::{Operator, OperatorBase, OperatorKind};
use crate::query::executor::result::QueryError;
use crate::query::planner::expression::{Expression, eval_limit_offset};

pub struct Offset {
    base: OperatorBase,
    expr: Expression,
}

impl Offset {
    pub fn new(expr: Expression) -> Self {
        Self {
            base: OperatorBase::new(OperatorKind::Offset),
            expr,
        }
    }

    fn skip_items(&self, context: &Context, parent: Option<&Item>) {
        let (Some(input), Some(output)) = (self.base.input(), self.base.output()) else {
            context.error(QueryError::Plan("offset is not connected".into()));
            return;
        };
        let offset = match eval_limit_offset(Some(&self.expr), parent, 0, context) {
            Ok(offset) => offset,
            Err(err) => {
                context.error(err);
                return;
            }
        };

        let mut skipped = 0;
        while let Some(item) = self.base.get_item(context, &input) {
            if skipped < offset {
                skipped += 1;
                continue;
            }
            if !self.base.send_item(context, &output, item) {
                return;
            }
        }
    }
}

impl Operator for Offset {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_once(&self, context: &Arc<Context>, parent: Option<&Item>) {
        self.base.run_once(context, || self.skip_items(context, parent));
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(Self::new(self.expr.clone()))
    }
}

pub struct Limit {
    base: OperatorBase,
    expr: Expression,
}

impl Limit {
    pub fn new(expr: Expression) -> Self {
        Self {
            base: OperatorBase::new(OperatorKind::Limit),
            expr,
        }
    }

    fn limit_items(&self, context: &Context, parent: Option<&Item>) {
        let (Some(input), Some(output)) = (self.base.input(), self.base.output()) else {
            context.error(QueryError::Plan("limit is not connected".into()));
            return;
        };
        let limit = match eval_limit_offset(Some(&self.expr), parent, i64::MAX, context) {
            Ok(limit) => limit,
            Err(err) => {
                context.error(err);
                return;
            }
        };

        let mut sent = 0;
        while sent < limit {
            let Some(item) = self.base.get_item(context, &input) else {
                return;
            };
            if !self.base.send_item(context, &output, item) {
                return;
            }
            sent += 1;
        }
        // Satisfied; closing stops the operators feeding us
    }
}

impl Operator for Limit {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn run_once(&self, context: &Arc<Context>, parent: Option<&Item>) {
        self.base.run_once(context, || self.limit_items(context, parent));
    }

    fn copy(&self) -> Arc<dyn Operator> {
        Arc::new(Self::new(self.expr.clone()))
    }
}
