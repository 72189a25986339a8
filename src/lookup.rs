//! Ordered fallback lookups
//!
//! A [`LookupChain`] evaluates its strategies in priority order and stops at the
//! first one that produces a value. A strategy answers `None` when it does not
//! apply, which moves on to the next one. An error stops the chain: a lower
//! priority strategy must not answer for a higher one that could not be asked.

use async_trait::async_trait;

use crate::gateway::GatewayError;

#[async_trait]
pub trait LookupStrategy<C: ?Sized + Sync, T>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, ctx: &C) -> Option<Result<T, GatewayError>>;
}

pub struct LookupChain<C: ?Sized + Sync, T> {
    strategies: Vec<Box<dyn LookupStrategy<C, T>>>,
}

impl<C: ?Sized + Sync, T: Send> LookupChain<C, T> {
    pub fn new() -> Self { Self { strategies: Vec::new() } }

    pub fn with(mut self, strategy: impl LookupStrategy<C, T> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn names(&self) -> Vec<&'static str> { self.strategies.iter().map(|s| s.name()).collect() }

    pub async fn resolve(&self, ctx: &C) -> Result<Option<T>, GatewayError> {
        for strategy in &self.strategies {
            match strategy.lookup(ctx).await {
                Some(Ok(value)) => {
                    tracing::debug!(strategy = strategy.name(), "Lookup resolved");
                    return Ok(Some(value));
                }
                Some(Err(e)) => {
                    tracing::warn!(strategy = strategy.name(), error = %e, "Lookup strategy failed");
                    return Err(e);
                }
                None => {}
            }
        }
        Ok(None)
    }
}

impl<C: ?Sized + Sync, T: Send> Default for LookupChain<C, T> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed(&'static str, Option<Result<u32, GatewayError>>, Arc<AtomicUsize>);

    #[async_trait]
    impl LookupStrategy<str, u32> for Fixed {
        fn name(&self) -> &'static str { self.0 }
        async fn lookup(&self, _ctx: &str) -> Option<Result<u32, GatewayError>> {
            self.2.fetch_add(1, Ordering::SeqCst);
            self.1.clone()
        }
    }

    #[tokio::test]
    async fn test_first_success_wins_after_skips() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = LookupChain::new()
            .with(Fixed("absent", None, calls.clone()))
            .with(Fixed("hit", Some(Ok(7)), calls.clone()))
            .with(Fixed("never", Some(Ok(9)), calls.clone()));
        assert_eq!(chain.resolve("ctx").await, Ok(Some(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(chain.names(), vec!["absent", "hit", "never"]);
    }

    #[tokio::test]
    async fn test_error_stops_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let down = GatewayError::Storage("down".into());
        let chain = LookupChain::new()
            .with(Fixed("broken", Some(Err(down.clone())), calls.clone()))
            .with(Fixed("fallback", Some(Ok(9)), calls.clone()));
        assert_eq!(chain.resolve("ctx").await, Err(down));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_yields_none() {
        let chain: LookupChain<str, u32> = LookupChain::new().with(Fixed("absent", None, Arc::new(AtomicUsize::new(0))));
        assert_eq!(chain.resolve("ctx").await, Ok(None));
    }
}
