//! Per-chunk terminal reductions
//!
//! An aggregator reduces a stream to a single value. It runs inside each
//! worker against one chunk at a time; the query facade combines the
//! resulting partials (max-of-maxes, sum-of-sums, dict-merge, ...). Only
//! reductions that compose across chunks this way are provided;
//! non-associative reductions are out of scope.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use super::BoxIter;

/// Reduce a stream to a single value.
pub trait Aggregator<T>: Send + Sync {
    /// Value produced per chunk.
    type Output: Send + 'static;

    fn aggregate(&self, data: BoxIter<T>) -> Self::Output;
}

/// Default aggregator: collect the chunk's output into a list.
pub struct Collect;

impl<T: Send + 'static> Aggregator<T> for Collect {
    type Output = Vec<T>;

    fn aggregate(&self, data: BoxIter<T>) -> Vec<T> {
        data.collect()
    }
}

/// True when every element is true. Vacuously true on an empty chunk.
pub struct All;

impl Aggregator<bool> for All {
    type Output = bool;

    fn aggregate(&self, mut data: BoxIter<bool>) -> bool {
        data.all(|x| x)
    }
}

/// True when at least one element is true.
pub struct Any;

impl Aggregator<bool> for Any {
    type Output = bool;

    fn aggregate(&self, mut data: BoxIter<bool>) -> bool {
        data.any(|x| x)
    }
}

/// Largest element of the chunk, `None` when the chunk produced nothing.
pub struct Max;

impl<T: Ord + Send + 'static> Aggregator<T> for Max {
    type Output = Option<T>;

    fn aggregate(&self, data: BoxIter<T>) -> Option<T> {
        data.max()
    }
}

/// Smallest element of the chunk.
pub struct Min;

impl<T: Ord + Send + 'static> Aggregator<T> for Min {
    type Output = Option<T>;

    fn aggregate(&self, data: BoxIter<T>) -> Option<T> {
        data.min()
    }
}

/// Sum of the chunk's elements. Assumes associative, commutative addition.
pub struct Sum;

impl<T: std::iter::Sum + Send + 'static> Aggregator<T> for Sum {
    type Output = T;

    fn aggregate(&self, data: BoxIter<T>) -> T {
        data.sum()
    }
}

/// Number of elements the chunk produced.
pub struct Count;

impl<T: Send + 'static> Aggregator<T> for Count {
    type Output = usize;

    fn aggregate(&self, data: BoxIter<T>) -> usize {
        data.count()
    }
}

/// True when the chunk contains the given value.
pub struct Contains<T> {
    value: T,
}

impl<T> Contains<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Aggregator<T> for Contains<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    type Output = bool;

    fn aggregate(&self, mut data: BoxIter<T>) -> bool {
        data.any(|x| x == self.value)
    }
}

/// Element for which a value function returns the largest (or, inverted,
/// smallest) key. Comparison is strict, so ties keep the earlier-seen
/// element.
pub struct ArgMax<T, K> {
    value_fn: Arc<dyn Fn(&T) -> K + Send + Sync>,
    invert: bool,
}

impl<T, K> Clone for ArgMax<T, K> {
    fn clone(&self) -> Self {
        Self {
            value_fn: Arc::clone(&self.value_fn),
            invert: self.invert,
        }
    }
}

impl<T, K: PartialOrd> ArgMax<T, K> {
    pub fn new<F>(value_fn: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self {
            value_fn: Arc::new(value_fn),
            invert: false,
        }
    }

    /// Inverted comparison: the smallest key wins (argmin).
    pub fn inverted<F>(value_fn: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self {
            value_fn: Arc::new(value_fn),
            invert: true,
        }
    }

    /// Winner among `data` under this aggregator's comparison. Also used by
    /// the facade to combine per-chunk winners.
    pub fn best(&self, data: impl Iterator<Item = T>) -> Option<T> {
        let mut best: Option<(K, T)> = None;
        for x in data {
            let key = (self.value_fn)(&x);
            match &best {
                None => best = Some((key, x)),
                Some((best_key, _)) => {
                    let wins = if self.invert {
                        key < *best_key
                    } else {
                        key > *best_key
                    };
                    if wins {
                        best = Some((key, x));
                    }
                }
            }
        }
        best.map(|(_, x)| x)
    }
}

impl<T, K> Aggregator<T> for ArgMax<T, K>
where
    T: Send + 'static,
    K: PartialOrd + 'static,
{
    type Output = Option<T>;

    fn aggregate(&self, data: BoxIter<T>) -> Option<T> {
        self.best(data)
    }
}

/// First element of the chunk satisfying a condition.
pub struct FirstOrNone<T> {
    condition: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> FirstOrNone<T> {
    pub fn new<F>(condition: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            condition: Arc::new(condition),
        }
    }
}

impl<T: Send + 'static> Aggregator<T> for FirstOrNone<T> {
    type Output = Option<T>;

    fn aggregate(&self, mut data: BoxIter<T>) -> Option<T> {
        data.find(|x| (self.condition)(x))
    }
}

/// Last element of the chunk satisfying a condition.
pub struct LastOrNone<T> {
    condition: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> LastOrNone<T> {
    pub fn new<F>(condition: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            condition: Arc::new(condition),
        }
    }
}

impl<T: Send + 'static> Aggregator<T> for LastOrNone<T> {
    type Output = Option<T>;

    fn aggregate(&self, data: BoxIter<T>) -> Option<T> {
        data.filter(|x| (self.condition)(x)).last()
    }
}

/// Key/value projection of the chunk into a map. Later duplicate keys
/// silently overwrite earlier ones.
pub struct Dict<T, K, V> {
    key_fn: Arc<dyn Fn(&T) -> K + Send + Sync>,
    value_fn: Arc<dyn Fn(&T) -> V + Send + Sync>,
}

impl<T, K, V> Dict<T, K, V> {
    pub fn new<KF, VF>(key_fn: KF, value_fn: VF) -> Self
    where
        KF: Fn(&T) -> K + Send + Sync + 'static,
        VF: Fn(&T) -> V + Send + Sync + 'static,
    {
        Self {
            key_fn: Arc::new(key_fn),
            value_fn: Arc::new(value_fn),
        }
    }
}

impl<T, K, V> Aggregator<T> for Dict<T, K, V>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    type Output = HashMap<K, V>;

    fn aggregate(&self, data: BoxIter<T>) -> HashMap<K, V> {
        data.map(|x| ((self.key_fn)(&x), (self.value_fn)(&x)))
            .collect()
    }
}

/// Sum and element count in one pass, for computing a mean without
/// reopening the sequence.
pub struct SumAndCount;

impl<T> Aggregator<T> for SumAndCount
where
    T: Into<f64> + Send + 'static,
{
    type Output = (f64, usize);

    fn aggregate(&self, data: BoxIter<T>) -> (f64, usize) {
        let mut sum = 0.0;
        let mut count = 0;
        for x in data {
            sum += x.into();
            count += 1;
        }
        (sum, count)
    }
}
