//! Distributed query facade
//!
//! Builds the operator chain declaratively, wires the execution engine per
//! run, and exposes the terminal operations. Builder calls are lazy; the
//! engine spins up on the first terminal call or on iteration.
//!
//! A query executes at most once: terminal operations and `into_iter` take
//! the query by value, so re-execution is rejected by the compiler rather
//! than at run time. Dropping the running iterator tears the pipeline down,
//! which makes an early `break` inside a `for` loop safe without further
//! ceremony; `QueryIter::close` does the same thing explicitly.

use std::collections::HashMap;
use std::hash::Hash;

use log::debug;

use crate::chain::{
    ArgMax, Chain, Collect, Contains, Count, Dict, Executor, FirstOrNone, Flatten, LastOrNone,
    Max, Min, Select, Sum, SumAndCount, Where,
};
use crate::chain::{Aggregator, All, Any};
use crate::engine::{self, Pipeline};
use crate::errors::{QueryError, QueryResult};

/// A query that distributes execution across multiple worker threads.
///
/// The source is consumed exactly once, in fixed-size chunks, by a pool of
/// workers that each run the full operator chain plus a per-chunk
/// aggregator. Results arrive in whatever order workers finish, so output
/// order is unspecified whenever more than one worker is used; with
/// `with_workers(1)` the output order matches sequential evaluation.
///
/// Every transform or predicate handed to the query must be
/// `Send + Sync + 'static`, since it is shared with worker threads. Types that
/// capture thread-local or borrowed state are rejected at compile time.
///
/// ```
/// use plinq::DistributedQuery;
///
/// fn square(x: i64) -> i64 {
///     x * x
/// }
///
/// fn less_than_five(x: &i64) -> bool {
///     *x < 5
/// }
///
/// let mut result = DistributedQuery::new(0..100i64)
///     .filter(less_than_five)
///     .select(square)
///     .with_workers(4)
///     .to_list()
///     .unwrap();
/// result.sort_unstable();
/// assert_eq!(result, vec![0, 1, 4, 9, 16]);
/// ```
pub struct DistributedQuery<S: IntoIterator, T> {
    source: S,
    chain: Chain<S::Item, T>,
    workers: usize,
    chunk_size: usize,
}

impl<S> DistributedQuery<S, S::Item>
where
    S: IntoIterator,
    S::Item: Send + 'static,
{
    /// Create a query over `source` with an empty chain, one worker per
    /// logical CPU and a chunk size of 1.
    pub fn new(source: S) -> Self {
        Self {
            source,
            chain: Chain::identity(),
            workers: num_cpus::get(),
            chunk_size: 1,
        }
    }
}

impl<S, T> DistributedQuery<S, T>
where
    S: IntoIterator,
    S::IntoIter: Send + 'static,
    S::Item: Send + 'static,
    T: Send + 'static,
{
    /// Set the number of worker threads. Values below 1 are clamped to 1.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the chunk size. Larger chunks amortize per-chunk dispatch
    /// overhead when the per-element work is cheap. Defaults to 1.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Applies a transformation to each element.
    pub fn select<U, F>(self, transform: F) -> DistributedQuery<S, U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        DistributedQuery {
            source: self.source,
            chain: self.chain.then(Select::new(transform)),
            workers: self.workers,
            chunk_size: self.chunk_size,
        }
    }

    /// Keeps the elements for which the predicate holds. This is the
    /// `Where` operator; `where` is a reserved word in Rust.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        DistributedQuery {
            source: self.source,
            chain: self.chain.then(Where::new(predicate)),
            workers: self.workers,
            chunk_size: self.chunk_size,
        }
    }

    /// Flattens the elements one level: a query over lists of `U` becomes a
    /// query over `U`.
    pub fn flatten<U>(self) -> DistributedQuery<S, U>
    where
        T: IntoIterator<Item = U>,
        T::IntoIter: Send + 'static,
        U: Send + 'static,
    {
        DistributedQuery {
            source: self.source,
            chain: self.chain.then(Flatten),
            workers: self.workers,
            chunk_size: self.chunk_size,
        }
    }

    /// Start the engine with the given per-chunk aggregator.
    fn run<A>(self, aggregator: A) -> Pipeline<A::Output>
    where
        A: Aggregator<T> + 'static,
    {
        debug!(
            "query: executing with {} workers, chunk_size {}",
            self.workers, self.chunk_size
        );
        let executor = Executor::new(self.chain, aggregator);
        engine::launch(
            self.source.into_iter(),
            executor,
            self.workers,
            self.chunk_size,
        )
    }

    /// Executes the query and collects every output element. Element order
    /// is unspecified for more than one worker.
    pub fn to_list(self) -> QueryResult<Vec<T>> {
        let mut pipeline = self.run(Collect);
        let mut out = Vec::new();
        while let Some(partial) = pipeline.next_partial() {
            out.extend(partial?);
        }
        Ok(out)
    }

    /// Counts the output elements.
    pub fn count(self) -> QueryResult<usize> {
        let mut pipeline = self.run(Count);
        let mut total = 0;
        while let Some(partial) = pipeline.next_partial() {
            total += partial?;
        }
        Ok(total)
    }

    /// Sums the output elements. Assumes associative, commutative addition.
    pub fn sum(self) -> QueryResult<T>
    where
        T: std::iter::Sum,
    {
        let mut pipeline = self.run(Sum);
        let mut partials = Vec::new();
        while let Some(partial) = pipeline.next_partial() {
            partials.push(partial?);
        }
        Ok(partials.into_iter().sum())
    }

    /// Mean of the output elements, computed from per-chunk sum/count pairs
    /// in a single pass. Fails with [`QueryError::NoSuchElement`] when the
    /// query produces nothing.
    pub fn mean(self) -> QueryResult<f64>
    where
        T: Into<f64>,
    {
        let mut pipeline = self.run(SumAndCount);
        let mut sum = 0.0;
        let mut count = 0usize;
        while let Some(partial) = pipeline.next_partial() {
            let (chunk_sum, chunk_count) = partial?;
            sum += chunk_sum;
            count += chunk_count;
        }
        if count == 0 {
            return Err(QueryError::NoSuchElement);
        }
        Ok(sum / count as f64)
    }

    /// Largest output element, as the max of per-chunk maxima.
    pub fn max(self) -> QueryResult<T>
    where
        T: Ord,
    {
        let mut pipeline = self.run(Max);
        let mut best: Option<T> = None;
        while let Some(partial) = pipeline.next_partial() {
            if let Some(candidate) = partial? {
                best = Some(match best.take() {
                    Some(current) => std::cmp::max(current, candidate),
                    None => candidate,
                });
            }
        }
        best.ok_or(QueryError::NoSuchElement)
    }

    /// Smallest output element.
    pub fn min(self) -> QueryResult<T>
    where
        T: Ord,
    {
        let mut pipeline = self.run(Min);
        let mut best: Option<T> = None;
        while let Some(partial) = pipeline.next_partial() {
            if let Some(candidate) = partial? {
                best = Some(match best.take() {
                    Some(current) => std::cmp::min(current, candidate),
                    None => candidate,
                });
            }
        }
        best.ok_or(QueryError::NoSuchElement)
    }

    /// True when the condition holds for every output element. Vacuously
    /// true on an empty output sequence.
    pub fn all<F>(self, condition: F) -> QueryResult<bool>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let mut pipeline = self.select(move |x| condition(&x)).run(All);
        let mut result = true;
        while let Some(partial) = pipeline.next_partial() {
            result &= partial?;
        }
        Ok(result)
    }

    /// True when the condition holds for at least one output element.
    pub fn any<F>(self, condition: F) -> QueryResult<bool>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let mut pipeline = self.select(move |x| condition(&x)).run(Any);
        let mut result = false;
        while let Some(partial) = pipeline.next_partial() {
            result |= partial?;
        }
        Ok(result)
    }

    /// True when the given value appears among the output elements.
    pub fn contains(self, value: T) -> QueryResult<bool>
    where
        T: PartialEq + Sync,
    {
        let mut pipeline = self.run(Contains::new(value));
        let mut found = false;
        while let Some(partial) = pipeline.next_partial() {
            found |= partial?;
        }
        Ok(found)
    }

    /// Element for which `value_fn` returns the largest key. Strictly
    /// greater wins, so ties keep the earlier-seen element (within the
    /// arrival order of chunk winners).
    pub fn argmax<K, F>(self, value_fn: F) -> QueryResult<T>
    where
        K: PartialOrd + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.best_by(ArgMax::new(value_fn))
    }

    /// Element for which `value_fn` returns the smallest key.
    pub fn argmin<K, F>(self, value_fn: F) -> QueryResult<T>
    where
        K: PartialOrd + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.best_by(ArgMax::inverted(value_fn))
    }

    /// Per-chunk winners reduced by the same comparison.
    fn best_by<K>(self, aggregator: ArgMax<T, K>) -> QueryResult<T>
    where
        K: PartialOrd + 'static,
    {
        let combiner = aggregator.clone();
        let mut pipeline = self.run(aggregator);
        let mut winners = Vec::new();
        while let Some(partial) = pipeline.next_partial() {
            if let Some(winner) = partial? {
                winners.push(winner);
            }
        }
        combiner
            .best(winners.into_iter())
            .ok_or(QueryError::NoSuchElement)
    }

    /// First element found to satisfy the condition, or `None`. With more
    /// than one worker the result is not deterministic: "first" means
    /// first in arrival order. Remaining chunks are abandoned.
    pub fn first_or_none<F>(self, condition: F) -> QueryResult<Option<T>>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let mut pipeline = self.run(FirstOrNone::new(condition));
        while let Some(partial) = pipeline.next_partial() {
            if let Some(element) = partial? {
                pipeline.close();
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// First element found to satisfy the condition. Fails with
    /// [`QueryError::NoSuchElement`] when nothing matches.
    pub fn first<F>(self, condition: F) -> QueryResult<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.first_or_none(condition)?
            .ok_or(QueryError::NoSuchElement)
    }

    /// Last element found to satisfy the condition, or `None`. Like
    /// `first_or_none`, not deterministic with more than one worker.
    pub fn last_or_none<F>(self, condition: F) -> QueryResult<Option<T>>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let mut pipeline = self.run(LastOrNone::new(condition));
        let mut last = None;
        while let Some(partial) = pipeline.next_partial() {
            if let Some(element) = partial? {
                last = Some(element);
            }
        }
        Ok(last)
    }

    /// Last element found to satisfy the condition. Fails with
    /// [`QueryError::NoSuchElement`] when nothing matches.
    pub fn last<F>(self, condition: F) -> QueryResult<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.last_or_none(condition)?
            .ok_or(QueryError::NoSuchElement)
    }

    /// Projects the output elements into a map. When the key function is
    /// not injective, later elements silently overwrite earlier ones.
    pub fn to_dict<K, V, KF, VF>(self, key_fn: KF, value_fn: VF) -> QueryResult<HashMap<K, V>>
    where
        K: Eq + Hash + Send + 'static,
        V: Send + 'static,
        KF: Fn(&T) -> K + Send + Sync + 'static,
        VF: Fn(&T) -> V + Send + Sync + 'static,
    {
        let mut pipeline = self.run(Dict::new(key_fn, value_fn));
        let mut out = HashMap::new();
        while let Some(partial) = pipeline.next_partial() {
            out.extend(partial?);
        }
        Ok(out)
    }
}

impl<S, T> IntoIterator for DistributedQuery<S, T>
where
    S: IntoIterator,
    S::IntoIter: Send + 'static,
    S::Item: Send + 'static,
    T: Send + 'static,
{
    type Item = T;
    type IntoIter = QueryIter<T>;

    /// Start execution and iterate the output elements as workers complete
    /// chunks. A worker panic resurfaces as a panic on the consuming
    /// thread.
    fn into_iter(self) -> QueryIter<T> {
        QueryIter {
            pipeline: self.run(Collect),
            buffer: Vec::new().into_iter(),
        }
    }
}

/// Running iteration over a query's output. Dropping it tears the engine
/// down, so abandoning the loop early releases every background thread.
pub struct QueryIter<T> {
    pipeline: Pipeline<Vec<T>>,
    buffer: std::vec::IntoIter<T>,
}

impl<T> QueryIter<T> {
    /// Stop the engine without consuming the remaining elements.
    /// Equivalent to dropping the iterator; provided for call sites where
    /// the intent should be explicit.
    pub fn close(mut self) {
        self.pipeline.close();
    }
}

impl<T> Iterator for QueryIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(element) = self.buffer.next() {
                return Some(element);
            }
            match self.pipeline.next_partial() {
                Some(Ok(chunk)) => self.buffer = chunk.into_iter(),
                Some(Err(err)) => panic!("{err}"),
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i64) -> i64 {
        x * x
    }

    fn even(x: &i64) -> bool {
        x % 2 == 0
    }

    #[test]
    fn test_builder_is_lazy() {
        // no terminal call: no engine, nothing to clean up
        let _query = DistributedQuery::new(0..1_000_000i64)
            .filter(even)
            .select(square);
    }

    #[test]
    fn test_single_worker_preserves_input_order() {
        let result = DistributedQuery::new(0..20i64)
            .with_workers(1)
            .with_chunk_size(3)
            .select(square)
            .to_list()
            .unwrap();
        assert_eq!(result, (0..20i64).map(square).collect::<Vec<_>>());
    }

    #[test]
    fn test_iterator_yields_every_element() {
        let mut seen: Vec<i64> = DistributedQuery::new(0..50i64)
            .with_workers(4)
            .with_chunk_size(7)
            .into_iter()
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_abandoned_iteration_closes_cleanly() {
        let mut iter = DistributedQuery::new(0..10_000_000i64)
            .with_workers(2)
            .into_iter();
        assert!(iter.next().is_some());
        iter.close();
    }
}
