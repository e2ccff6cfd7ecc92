//! Channel Operators
//!
//! Each operator subscribes to an upstream channel and drives a new
//! downstream channel from a dedicated thread:
//!
//! - [`map`]: pointwise, order-preserving transformation
//! - [`collect`]: blocking barrier that emits one list after upstream close
//! - [`flatten`]: recursive expansion of nested lists
//!
//! The returned join handle finishes when the upstream channel closes; the
//! engine joins every operator thread before a run returns.

use std::thread::{self, JoinHandle};

use crate::channel::item::Item;
use crate::channel::stream::{Channel, Multiplicity};
use crate::error::Result;

/// Returns a channel carrying `f` applied to each upstream item, in order.
///
/// Closes when upstream closes; never blocks except on upstream.
pub fn map<F>(upstream: &Channel, f: F) -> Result<(Channel, JoinHandle<()>)>
where
    F: Fn(Item) -> Item + Send + 'static,
{
    let mut sub = upstream.subscribe()?;
    let out = Channel::new(Multiplicity::Broadcast);
    let tx = out.clone();

    let handle = thread::spawn(move || {
        while let Some(item) = sub.recv() {
            tx.emit(f(item));
        }
        tx.close();
    });

    Ok((out, handle))
}

/// Returns a channel that emits exactly one `List` holding all upstream
/// items in arrival order, strictly after upstream closes, then closes.
///
/// This is a blocking barrier: nothing is observable downstream before the
/// upstream is exhausted. If upstream never closes the output stays pending.
pub fn collect(upstream: &Channel) -> Result<(Channel, JoinHandle<()>)> {
    let mut sub = upstream.subscribe()?;
    let out = Channel::new(Multiplicity::Broadcast);
    let tx = out.clone();

    let handle = thread::spawn(move || {
        let items = sub.drain();
        tx.emit(Item::List(items));
        tx.close();
    });

    Ok((out, handle))
}

/// Returns a channel where every `List` item is recursively expanded into
/// its elements, preserving order.
///
/// Tuples pass through intact: a tuple is a correlated record, not a
/// collection, and flattening it would destroy its join key.
pub fn flatten(upstream: &Channel) -> Result<(Channel, JoinHandle<()>)> {
    let mut sub = upstream.subscribe()?;
    let out = Channel::new(Multiplicity::Broadcast);
    let tx = out.clone();

    let handle = thread::spawn(move || {
        while let Some(item) = sub.recv() {
            flatten_into(item, &tx);
        }
        tx.close();
    });

    Ok((out, handle))
}

fn flatten_into(item: Item, out: &Channel) {
    match item {
        Item::List(items) => {
            for inner in items {
                flatten_into(inner, out);
            }
        }
        other => out.emit(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(items: Vec<Item>) -> Channel {
        let ch = Channel::new(Multiplicity::Broadcast);
        for item in items {
            ch.emit(item);
        }
        ch.close();
        ch
    }

    #[test]
    fn test_map_preserves_order() {
        let upstream = source(vec![Item::Int(1), Item::Int(2), Item::Int(3)]);
        let (out, handle) = map(&upstream, |item| match item {
            Item::Int(n) => Item::Int(n * 2),
            other => other,
        })
        .unwrap();

        let mut sub = out.subscribe().unwrap();
        assert_eq!(
            sub.drain(),
            vec![Item::Int(2), Item::Int(4), Item::Int(6)]
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_collect_emits_single_ordered_list_after_close() {
        let upstream = Channel::new(Multiplicity::Broadcast);
        let (out, handle) = collect(&upstream).unwrap();
        let mut sub = out.subscribe().unwrap();

        upstream.emit(Item::Int(1));
        upstream.emit(Item::Int(2));

        // Nothing observable before upstream close.
        assert!(sub.try_recv().is_err());

        upstream.emit(Item::Int(3));
        upstream.close();
        handle.join().unwrap();

        assert_eq!(
            sub.recv(),
            Some(Item::List(vec![Item::Int(1), Item::Int(2), Item::Int(3)]))
        );
        assert_eq!(sub.recv(), None);
    }

    #[test]
    fn test_collect_empty_upstream() {
        let upstream = source(vec![]);
        let (out, handle) = collect(&upstream).unwrap();
        handle.join().unwrap();

        let mut sub = out.subscribe().unwrap();
        assert_eq!(sub.recv(), Some(Item::List(vec![])));
        assert_eq!(sub.recv(), None);
    }

    #[test]
    fn test_flatten_expands_nested_lists() {
        let nested = Item::List(vec![
            Item::Int(1),
            Item::List(vec![Item::Int(2), Item::List(vec![Item::Int(3)])]),
        ]);
        let upstream = source(vec![nested, Item::Int(4)]);

        let (out, handle) = flatten(&upstream).unwrap();
        let mut sub = out.subscribe().unwrap();
        assert_eq!(
            sub.drain(),
            vec![Item::Int(1), Item::Int(2), Item::Int(3), Item::Int(4)]
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_flatten_leaves_tuples_intact() {
        let tuple = Item::Tuple(vec![Item::str("k"), Item::Int(1), Item::Int(2)]);
        let upstream = source(vec![Item::List(vec![tuple.clone()])]);

        let (out, handle) = flatten(&upstream).unwrap();
        let mut sub = out.subscribe().unwrap();
        assert_eq!(sub.drain(), vec![tuple]);
        handle.join().unwrap();
    }

    #[test]
    fn test_operators_chain() {
        let upstream = source(vec![Item::Int(1), Item::Int(2)]);
        let (doubled, h1) = map(&upstream, |item| match item {
            Item::Int(n) => Item::Int(n * 2),
            other => other,
        })
        .unwrap();
        let (collected, h2) = collect(&doubled).unwrap();

        let mut sub = collected.subscribe().unwrap();
        assert_eq!(
            sub.drain(),
            vec![Item::List(vec![Item::Int(2), Item::Int(4)])]
        );
        h1.join().unwrap();
        h2.join().unwrap();
    }

    #[test]
    fn test_map_on_exclusive_channel_respects_subscription_limit() {
        let upstream = Channel::new(Multiplicity::Exclusive);
        let (_out, _handle) = map(&upstream, |i| i).unwrap();
        // The operator now owns the only allowed subscription.
        assert!(collect(&upstream).is_err());
        upstream.close();
    }
}
