//! Channel Primitives
//!
//! A [`Channel`] is an ordered stream of [`Item`]s with exactly one producer
//! and, depending on multiplicity, one or many consumers. Items are buffered
//! internally; each [`Subscription`] walks the buffer with its own cursor,
//! so broadcast subscribers each observe the full stream in emission order.
//!
//! Once a channel is closed no further items are accepted; blocked consumers
//! wake and observe end-of-stream.

use std::sync::{Arc, Condvar, Mutex};

use log::warn;

use crate::channel::item::Item;
use crate::error::{EngineError, Result};

/// How many consumers a channel admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    /// Every subscriber observes every item.
    Broadcast,
    /// Exactly one subscriber; a second subscription is a configuration
    /// error.
    Exclusive,
}

/// Error returned by [`Subscription::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// No item is currently buffered, but the channel is still open.
    Empty,
    /// The channel is closed and fully drained.
    Closed,
}

struct ChannelState {
    items: Vec<Item>,
    closed: bool,
    subscribers: usize,
    multiplicity: Multiplicity,
}

struct ChannelInner {
    state: Mutex<ChannelState>,
    cond: Condvar,
}

/// An ordered asynchronous stream of items.
///
/// Cloning a `Channel` clones the handle, not the stream; all clones refer
/// to the same buffer.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Creates an empty open channel with the given multiplicity.
    pub fn new(multiplicity: Multiplicity) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                state: Mutex::new(ChannelState {
                    items: Vec::new(),
                    closed: false,
                    subscribers: 0,
                    multiplicity,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Appends an item to the buffer and wakes blocked consumers.
    ///
    /// Emitting on a closed channel is a no-op; the item is dropped with a
    /// warning, preserving the closed-means-no-further-items invariant.
    pub fn emit(&self, item: Item) {
        let mut state = self.lock();
        if state.closed {
            warn!("Item emitted on a closed channel was dropped: {:?}", item);
            return;
        }
        state.items.push(item);
        self.inner.cond.notify_all();
    }

    /// Marks end-of-stream and wakes all blocked consumers.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.inner.cond.notify_all();
    }

    /// Registers a consumer and returns its subscription.
    ///
    /// A second subscription to an [`Multiplicity::Exclusive`] channel fails
    /// with a configuration error.
    pub fn subscribe(&self) -> Result<Subscription> {
        let mut state = self.lock();
        if state.multiplicity == Multiplicity::Exclusive && state.subscribers >= 1 {
            return Err(EngineError::Configuration(
                "exclusive channel already has a subscriber".to_string(),
            ));
        }
        state.subscribers += 1;
        Ok(Subscription {
            inner: Arc::clone(&self.inner),
            cursor: 0,
        })
    }

    /// Switches an unconsumed channel to exclusive multiplicity.
    pub fn set_exclusive(&self) -> Result<()> {
        let mut state = self.lock();
        if state.subscribers > 0 {
            return Err(EngineError::Configuration(
                "cannot mark a channel exclusive after it has subscribers".to_string(),
            ));
        }
        state.multiplicity = Multiplicity::Exclusive;
        Ok(())
    }

    /// Returns true if the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items emitted so far.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if nothing has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current multiplicity.
    pub fn multiplicity(&self) -> Multiplicity {
        self.lock().multiplicity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Channel")
            .field("items", &state.items.len())
            .field("closed", &state.closed)
            .field("subscribers", &state.subscribers)
            .field("multiplicity", &state.multiplicity)
            .finish()
    }
}

/// A consumer-side cursor into a channel.
pub struct Subscription {
    inner: Arc<ChannelInner>,
    cursor: usize,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Subscription {
    /// Blocks until the next item is available, or returns `None` at
    /// end-of-stream.
    pub fn recv(&mut self) -> Option<Item> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if self.cursor < state.items.len() {
                let item = state.items[self.cursor].clone();
                self.cursor += 1;
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .inner
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> std::result::Result<Item, TryRecvError> {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.cursor < state.items.len() {
            let item = state.items[self.cursor].clone();
            self.cursor += 1;
            return Ok(item);
        }
        if state.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Drains every remaining item, blocking until the channel closes.
    pub fn drain(&mut self) -> Vec<Item> {
        let mut items = Vec::new();
        while let Some(item) = self.recv() {
            items.push(item);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_emit_and_recv_in_order() {
        let ch = Channel::new(Multiplicity::Broadcast);
        let mut sub = ch.subscribe().unwrap();

        ch.emit(Item::Int(1));
        ch.emit(Item::Int(2));
        ch.close();

        assert_eq!(sub.recv(), Some(Item::Int(1)));
        assert_eq!(sub.recv(), Some(Item::Int(2)));
        assert_eq!(sub.recv(), None);
    }

    #[test]
    fn test_broadcast_subscribers_each_see_full_stream() {
        let ch = Channel::new(Multiplicity::Broadcast);
        let mut a = ch.subscribe().unwrap();
        ch.emit(Item::Int(1));
        ch.emit(Item::Int(2));
        // Late subscriber still observes items emitted before it joined.
        let mut b = ch.subscribe().unwrap();
        ch.close();

        assert_eq!(a.drain(), vec![Item::Int(1), Item::Int(2)]);
        assert_eq!(b.drain(), vec![Item::Int(1), Item::Int(2)]);
        assert!(format!("{:?}", a).contains("cursor: 2"));
    }

    #[test]
    fn test_exclusive_second_subscription_fails() {
        let ch = Channel::new(Multiplicity::Exclusive);
        let _first = ch.subscribe().unwrap();

        let second = ch.subscribe();
        assert!(second.is_err());
        assert!(second.unwrap_err().is_configuration());
    }

    #[test]
    fn test_set_exclusive_after_subscribe_fails() {
        let ch = Channel::new(Multiplicity::Broadcast);
        let _sub = ch.subscribe().unwrap();
        assert!(ch.set_exclusive().is_err());
    }

    #[test]
    fn test_emit_after_close_is_dropped() {
        let ch = Channel::new(Multiplicity::Broadcast);
        let mut sub = ch.subscribe().unwrap();
        ch.close();
        ch.emit(Item::Int(99));

        assert_eq!(sub.recv(), None);
        assert_eq!(ch.len(), 0);
    }

    #[test]
    fn test_try_recv_states() {
        let ch = Channel::new(Multiplicity::Broadcast);
        let mut sub = ch.subscribe().unwrap();

        assert_eq!(sub.try_recv(), Err(TryRecvError::Empty));
        ch.emit(Item::Int(7));
        assert_eq!(sub.try_recv(), Ok(Item::Int(7)));
        ch.close();
        assert_eq!(sub.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_recv_blocks_until_emit() {
        let ch = Channel::new(Multiplicity::Broadcast);
        let mut sub = ch.subscribe().unwrap();

        let producer = ch.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.emit(Item::str("late"));
            producer.close();
        });

        assert_eq!(sub.recv(), Some(Item::str("late")));
        assert_eq!(sub.recv(), None);
        handle.join().unwrap();
    }

    #[test]
    fn test_channel_len_and_closed() {
        let ch = Channel::new(Multiplicity::Broadcast);
        assert!(ch.is_empty());
        assert!(!ch.is_closed());

        ch.emit(Item::Int(1));
        assert_eq!(ch.len(), 1);

        ch.close();
        assert!(ch.is_closed());
    }
}
