//! The user-facing transform trait.

use recast_types::{Record, Routed, TransformError};

use crate::context::InvocationContext;

/// Outputs of one invocation, in emission order. Empty means filtered.
pub type TransformResult = Result<Vec<Routed>, TransformError>;

/// A record transform.
///
/// Any `FnMut(Record, &InvocationContext) -> TransformResult` closure is a
/// transform; implement the trait directly to keep state or to emit final
/// records at teardown.
pub trait TransformFunction: Send + 'static {
    fn transform(&mut self, record: Record, ctx: &InvocationContext) -> TransformResult;

    /// Called once on teardown. Returned records are flushed before the
    /// instance stops.
    fn on_teardown(&mut self) -> TransformResult {
        Ok(Vec::new())
    }
}

impl<F> TransformFunction for F
where
    F: FnMut(Record, &InvocationContext) -> TransformResult + Send + 'static,
{
    fn transform(&mut self, record: Record, ctx: &InvocationContext) -> TransformResult {
        self(record, ctx)
    }
}
