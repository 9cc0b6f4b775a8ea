//! Task handlers.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::TaskContext;

/// Error a handler returns instead of reporting an outcome itself. It is
/// reported to the engine as a failure.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Runs the business logic for one task.
///
/// Implemented for async closures taking `Arc<dyn TaskContext>`:
///
/// ```ignore
/// worker.subscribe(topics, |ctx: Arc<dyn TaskContext>| async move {
///     let amount = ctx.variables().int("amount")?;
///     ctx.complete(Variables::new(), Variables::new()).await?;
///     Ok::<(), HandlerError>(())
/// });
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Arc<dyn TaskContext>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arc<dyn TaskContext>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, ctx: Arc<dyn TaskContext>) -> Result<(), HandlerError> {
        (self)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Outcome, StubContext};
    use extask_core::Variables;

    struct CountingHandler;

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, ctx: Arc<dyn TaskContext>) -> Result<(), HandlerError> {
            let n = ctx.variables().int("n")?;
            let mut out = Variables::new();
            out.insert_long("n", n + 1);
            ctx.complete(out, Variables::new()).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_struct_handler() {
        let mut vars = Variables::new();
        vars.insert_long("n", 41);
        let ctx = Arc::new(StubContext::new(vars));

        CountingHandler.handle(ctx.clone()).await.unwrap();

        match &ctx.outcomes()[..] {
            [Outcome::Completed { variables, .. }] => {
                assert_eq!(variables.int("n").unwrap(), 42);
            }
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closure_handler_propagates_errors() {
        let handler = |ctx: Arc<dyn TaskContext>| async move {
            ctx.variables().string("missing")?;
            Ok::<(), HandlerError>(())
        };

        let ctx = Arc::new(StubContext::new(Variables::new()));
        let err = handler.handle(ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "variable 'missing' not found");
    }
}
