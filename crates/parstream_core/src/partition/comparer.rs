use std::cmp::Ordering;
use std::fmt::Debug;

/// Marker for types usable as order keys.
pub trait OrderKey: Debug + Sync + Send + 'static {}

impl<K> OrderKey for K where K: Debug + Sync + Send + 'static {}

/// Total order over order keys, used when merging partitions back into a
/// single sequence.
pub trait KeyComparer<K>: Debug + Sync + Send {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Compares keys using their `Ord` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<K: Ord> KeyComparer<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Inverts the order of an inner comparer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseOrder<C>(pub C);

impl<K, C> KeyComparer<K> for ReverseOrder<C>
where
    C: KeyComparer<K>,
{
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self.0.compare(b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order() {
        assert_eq!(Ordering::Less, NaturalOrder.compare(&1_usize, &2));
        assert_eq!(Ordering::Equal, NaturalOrder.compare(&4_u64, &4));
    }

    #[test]
    fn reverse_order() {
        let cmp = ReverseOrder(NaturalOrder);
        assert_eq!(Ordering::Greater, cmp.compare(&1_usize, &2));
    }
}
