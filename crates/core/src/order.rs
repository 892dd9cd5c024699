//! Display ordering for sibling nodes.
//!
//! Destination servers do not reliably expose an explicit order field, so
//! siblings are ordered by the first key that every sibling carries:
//! explicit order, then position, then identifier, then case-sensitive name.
//! Choosing one key per sibling list keeps the comparison a total order.

use std::cmp::Ordering;

/// Sort keys an item may expose.
pub trait Ordered {
    fn order(&self) -> Option<i64>;
    fn position(&self) -> Option<i64>;
    fn identifier(&self) -> Option<i64>;
    fn name(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKey {
    Order,
    Position,
    Identifier,
    Name,
    /// No key is shared by every item; input order is kept.
    Unordered,
}

/// The key [`sort_items`] will use for this sibling list.
pub fn order_key<T: Ordered>(items: &[T]) -> OrderKey {
    if items.iter().all(|i| i.order().is_some()) {
        OrderKey::Order
    } else if items.iter().all(|i| i.position().is_some()) {
        OrderKey::Position
    } else if items.iter().all(|i| i.identifier().is_some()) {
        OrderKey::Identifier
    } else if items.iter().all(|i| i.name().is_some()) {
        OrderKey::Name
    } else {
        OrderKey::Unordered
    }
}

fn compare_by<T: Ordered>(key: OrderKey, a: &T, b: &T) -> Ordering {
    match key {
        OrderKey::Order => a.order().cmp(&b.order()),
        OrderKey::Position => a.position().cmp(&b.position()),
        OrderKey::Identifier => a.identifier().cmp(&b.identifier()),
        OrderKey::Name => a.name().cmp(&b.name()),
        OrderKey::Unordered => Ordering::Equal,
    }
}

/// Stable in-place sort of siblings into UI order.
pub fn sort_items<T: Ordered>(items: &mut [T]) {
    let key = order_key(items);
    items.sort_by(|a, b| compare_by(key, a, b));
}
