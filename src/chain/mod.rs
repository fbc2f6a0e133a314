//! Operator chain and per-chunk executor
//!
//! A chain is the ordered composition of lazy pipeline stages; together with
//! exactly one aggregator it forms the executor that workers run against
//! each chunk. Composition order equals append order, and execution is a
//! pure function of (chunk, chain): no state is shared across chunks, so
//! chunks of one query can be processed by different workers concurrently.

mod aggregators;
mod operators;

use std::sync::Arc;

pub use aggregators::{
    Aggregator, All, Any, ArgMax, Collect, Contains, Count, Dict, FirstOrNone, LastOrNone, Max,
    Min, Sum, SumAndCount,
};
pub use operators::{Flatten, Operator, Select, Where};

/// Owned boxed iterator handed from one pipeline stage to the next.
pub type BoxIter<T> = Box<dyn Iterator<Item = T> + Send>;

/// Ordered, type-erased composition of operators from input items `I` to
/// output items `O`. Cloning is cheap and yields an immutable copy safe to
/// hand to another thread.
pub(crate) struct Chain<I, O> {
    apply: Arc<dyn Fn(BoxIter<I>) -> BoxIter<O> + Send + Sync>,
}

impl<I, O> Clone for Chain<I, O> {
    fn clone(&self) -> Self {
        Self {
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<I: Send + 'static> Chain<I, I> {
    /// The empty chain: output equals input unchanged.
    pub(crate) fn identity() -> Self {
        Self {
            apply: Arc::new(|input| input),
        }
    }
}

impl<I, O> Chain<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Append an operator. The new stage consumes this chain's output.
    pub(crate) fn then<P, Op>(self, operator: Op) -> Chain<I, P>
    where
        P: Send + 'static,
        Op: Operator<O, P> + 'static,
    {
        let prev = self.apply;
        Chain {
            apply: Arc::new(move |input| operator.apply(prev(input))),
        }
    }

    /// Run one chunk through every stage, left to right, lazily.
    pub(crate) fn execute(&self, chunk: Vec<I>) -> BoxIter<O> {
        (self.apply)(Box::new(chunk.into_iter()))
    }
}

/// A chain paired with its aggregator: the unit of work a worker executes
/// against each chunk. `execute` is pure; clones share the same immutable
/// stages.
pub(crate) struct Executor<I, R> {
    run: Arc<dyn Fn(Vec<I>) -> R + Send + Sync>,
}

impl<I, R> Clone for Executor<I, R> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<I, R> Executor<I, R>
where
    I: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new<T, A>(chain: Chain<I, T>, aggregator: A) -> Self
    where
        T: Send + 'static,
        A: Aggregator<T, Output = R> + 'static,
    {
        Self {
            run: Arc::new(move |chunk| aggregator.aggregate(chain.execute(chunk))),
        }
    }

    pub(crate) fn execute(&self, chunk: Vec<I>) -> R {
        (self.run)(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(x: i64) -> i64 {
        x * 2
    }

    fn positive(x: &i64) -> bool {
        *x > 0
    }

    #[test]
    fn test_empty_chain_passes_input_through() {
        let chain: Chain<i64, i64> = Chain::identity();
        let out: Vec<i64> = chain.execute(vec![3, 1, 2]).collect();
        assert_eq!(out, vec![3, 1, 2]);
    }

    #[test]
    fn test_chain_applies_stages_in_append_order() {
        // filter-then-map keeps -1 out before doubling
        let chain = Chain::identity()
            .then(Where::new(positive))
            .then(Select::new(double));
        let out: Vec<i64> = chain.execute(vec![-1, 1, 2]).collect();
        assert_eq!(out, vec![2, 4]);

        // map-then-filter doubles first, so -1 stays out for a different reason
        let chain = Chain::identity()
            .then(Select::new(double))
            .then(Where::new(positive));
        let out: Vec<i64> = chain.execute(vec![-1, 1, 2]).collect();
        assert_eq!(out, vec![2, 4]);
    }

    #[test]
    fn test_executor_reduces_each_chunk() {
        let chain = Chain::identity().then(Where::new(positive));
        let executor = Executor::new(chain, Count);
        assert_eq!(executor.execute(vec![-2, -1, 0, 1, 2]), 2);
        // clones share the same stages
        let clone = executor.clone();
        assert_eq!(clone.execute(vec![5, 6]), 2);
    }

    #[test]
    fn test_executor_default_collect() {
        let executor = Executor::new(Chain::<i64, i64>::identity(), Collect);
        assert_eq!(executor.execute(vec![1, 2, 3]), vec![1, 2, 3]);
    }
}
