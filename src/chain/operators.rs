//! Pipeline stage operators
//!
//! Each operator has a single capability: given an input stream, produce a
//! lazily generated output stream. Operators are pure and stateless with
//! respect to chain position, and every captured function must be
//! `Send + Sync + 'static` so a stage can be handed to a worker thread.

use std::sync::Arc;

use super::BoxIter;

/// One stage of a lazy transform/filter pipeline.
pub trait Operator<I, O>: Send + Sync {
    /// Transform the input stream into the output stream without consuming
    /// it eagerly.
    fn apply(&self, input: BoxIter<I>) -> BoxIter<O>;
}

/// Keeps elements matching a predicate.
pub struct Where<F> {
    predicate: Arc<F>,
}

impl<F> Where<F> {
    pub fn new(predicate: F) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl<T, F> Operator<T, T> for Where<F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn apply(&self, input: BoxIter<T>) -> BoxIter<T> {
        let predicate = Arc::clone(&self.predicate);
        Box::new(input.filter(move |x| predicate(x)))
    }
}

/// Maps a transform over every element.
pub struct Select<F> {
    transform: Arc<F>,
}

impl<F> Select<F> {
    pub fn new(transform: F) -> Self {
        Self {
            transform: Arc::new(transform),
        }
    }
}

impl<I, O, F> Operator<I, O> for Select<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    fn apply(&self, input: BoxIter<I>) -> BoxIter<O> {
        let transform = Arc::clone(&self.transform);
        Box::new(input.map(move |x| transform(x)))
    }
}

/// Expands one level of nested sequences.
pub struct Flatten;

impl<I, O> Operator<I, O> for Flatten
where
    I: IntoIterator<Item = O> + Send + 'static,
    I::IntoIter: Send + 'static,
    O: Send + 'static,
{
    fn apply(&self, input: BoxIter<I>) -> BoxIter<O> {
        Box::new(input.flat_map(|x| x.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed<T: Send + 'static>(items: Vec<T>) -> BoxIter<T> {
        Box::new(items.into_iter())
    }

    #[test]
    fn test_where_keeps_matching_elements() {
        let op = Where::new(|x: &i64| x % 2 == 0);
        let out: Vec<i64> = op.apply(boxed(vec![1, 2, 3, 4])).collect();
        assert_eq!(out, vec![2, 4]);
    }

    #[test]
    fn test_select_transforms_every_element() {
        let op = Select::new(|x: i64| x + 1);
        let out: Vec<i64> = op.apply(boxed(vec![1, 2, 3])).collect();
        assert_eq!(out, vec![2, 3, 4]);
    }

    #[test]
    fn test_flatten_expands_one_level() {
        let out: Vec<i64> = Flatten
            .apply(boxed(vec![vec![1, 2], vec![], vec![3]]))
            .collect();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_operators_are_lazy() {
        let op = Select::new(|x: i64| x * 10);
        let mut out = op.apply(boxed(vec![1, 2, 3]));
        // pulling one element must not drain the rest
        assert_eq!(out.next(), Some(10));
        assert_eq!(out.count(), 2);
    }
}
