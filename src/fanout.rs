//! Fan-out broadcasting to a dynamic set of subscribers.
//!
//! A [`Fanout`] keeps a registry of subscriber channels, each registered under an identity of
//! type `I`. [`Fanout::notify`] delivers every published value to every channel that was
//! registered when the call started.
//!
//! # Lifecycle
//!
//! - [`Fanout::listen`] registers a new channel. Registering an identity that is already taken
//!   replaces the old registration.
//! - [`Fanout::unsubscribe`] removes a registration.
//! - A channel whose registration was replaced or removed is closed once no [`Fanout::notify`]
//!   in progress still holds it.
//! - Dropping a [`Subscriber`] makes delivery to it fail immediately; the next [`Fanout::notify`]
//!   removes its registration.
//! - Dropping the [`Fanout`] closes every channel.
//!
//! A [`Subscriber`] whose channel was closed still yields the values that were buffered in it,
//! and then reports [`Disconnected`].
//!
//! # Backpressure
//!
//! Channels have a fixed capacity, configured with [`FanoutBuilder::capacity`] (0 by default,
//! which makes every delivery a rendezvous with the receiving thread). [`Fanout::notify`] blocks
//! while a live subscriber's channel is full, so a slow subscriber delays all other subscribers
//! and all later values. [`Fanout::notify_timeout`] bounds that wait and drops subscribers that
//! do not keep up.
//!
//! # Examples
//!
//! ```
//! use sharekit::Fanout;
//!
//! let fanout = Fanout::new();
//! let (sub1, sub2) = (fanout.listen("01"), fanout.listen("02"));
//!
//! let bg1 = std::thread::spawn(move || sub1.into_iter().collect::<Vec<_>>());
//! let bg2 = std::thread::spawn(move || sub2.into_iter().collect::<Vec<_>>());
//!
//! fanout.notify([1, 2, 3, 4, 5]);
//! drop(fanout);
//!
//! assert_eq!(bg1.join().unwrap(), [1, 2, 3, 4, 5]);
//! assert_eq!(bg2.join().unwrap(), [1, 2, 3, 4, 5]);
//! ```

use std::{borrow::Borrow, collections::HashMap, error::Error, fmt, hash::Hash, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::sync::RwLock;

/// A builder object that can be used to configure a [`Fanout`].
#[derive(Clone)]
pub struct FanoutBuilder {
    capacity: usize,
}

impl FanoutBuilder {
    /// Sets the capacity of each subscriber channel.
    ///
    /// By default, a capacity of 0 is used, which means that [`Fanout::notify`] will block until
    /// each subscriber has received the value.
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity }
    }

    /// Creates an empty [`Fanout`] with this configuration.
    pub fn build<I, T>(self) -> Fanout<I, T> {
        Fanout {
            subscribers: RwLock::new(HashMap::new()),
            capacity: self.capacity,
        }
    }
}

/// Delivers published values of type `T` to subscribers identified by values of type `I`.
///
/// See the [module documentation](self) for the registration lifecycle and delivery policy.
pub struct Fanout<I, T> {
    subscribers: RwLock<HashMap<I, Sender<T>>>,
    capacity: usize,
}

impl Fanout<(), ()> {
    /// Returns a builder that can be used to configure a [`Fanout`].
    #[inline]
    pub fn builder() -> FanoutBuilder {
        FanoutBuilder { capacity: 0 }
    }
}

impl<I, T> Fanout<I, T> {
    /// Creates a [`Fanout`] with no subscribers and rendezvous channels.
    pub fn new() -> Self {
        Fanout::builder().build()
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<I: Eq + Hash, T> Fanout<I, T> {
    /// Registers a new subscriber channel under `id`, and returns its receiving end.
    ///
    /// If `id` was already registered, the previous registration is replaced. Its channel is closed
    /// once no [`Fanout::notify`] in progress still holds it.
    pub fn listen(&self, id: I) -> Subscriber<T> {
        let (sender, receiver) = crossbeam_channel::bounded(self.capacity);
        let previous = self.subscribers.write().insert(id, sender);
        if previous.is_some() {
            log::debug!("replaced an existing fanout subscriber");
        }
        Subscriber { receiver }
    }

    /// Removes the registration of `id`. Its channel is closed once no [`Fanout::notify`] in
    /// progress still holds it.
    ///
    /// Returns whether `id` was registered. A [`Fanout::notify`] that is already in progress may
    /// still deliver its values to the removed channel.
    pub fn unsubscribe<Q>(&self, id: &Q) -> bool
    where
        I: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.subscribers.write().remove(id).is_some()
    }

    /// Returns whether a subscriber is registered under `id`.
    pub fn is_listening<Q>(&self, id: &Q) -> bool
    where
        I: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.subscribers.read().contains_key(id)
    }

    /// Delivers each of `values`, in order, to every registered subscriber.
    ///
    /// Each value is delivered to all subscribers before the next one is. Subscribers registered
    /// after this call started do not receive any of its values.
    ///
    /// This blocks while any live subscriber's channel is full. The registry is not locked while
    /// blocked, so other threads can keep registering and removing subscribers. Subscribers whose
    /// [`Subscriber`] has been dropped are skipped and unregistered.
    pub fn notify<V>(&self, values: V)
    where
        V: IntoIterator<Item = T>,
        T: Clone,
    {
        self.deliver(values, |sender, value| sender.send(value).is_ok());
    }

    /// Like [`Fanout::notify`], but waits at most `timeout` for each individual delivery.
    ///
    /// A subscriber that cannot accept a value within `timeout` is unregistered, and gets none of
    /// the remaining values. Returns the number of registrations this call removed, including
    /// those whose [`Subscriber`] had been dropped. Registrations that another thread removed or
    /// replaced while this call was running are not counted.
    pub fn notify_timeout<V>(&self, timeout: Duration, values: V) -> usize
    where
        V: IntoIterator<Item = T>,
        T: Clone,
    {
        self.deliver(values, |sender, value| {
            sender.send_timeout(value, timeout).is_ok()
        })
    }

    fn deliver<V, F>(&self, values: V, mut send: F) -> usize
    where
        V: IntoIterator<Item = T>,
        T: Clone,
        F: FnMut(&Sender<T>, T) -> bool,
    {
        // Snapshot the registry so that we don't hold the lock while blocking on a subscriber.
        let mut targets: Vec<Sender<T>> = self.subscribers.read().values().cloned().collect();
        let mut failed = Vec::new();
        for value in values {
            if targets.is_empty() {
                break;
            }
            targets.retain(|sender| {
                if send(sender, value.clone()) {
                    true
                } else {
                    failed.push(sender.clone());
                    false
                }
            });
        }

        if failed.is_empty() {
            return 0;
        }

        // The identity may have been re-registered or removed in the meantime, so only remove
        // registrations that still point at a failed channel, and only count those.
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|_, sender| !failed.iter().any(|f| f.same_channel(sender)));
        let removed = before - subscribers.len();
        drop(subscribers);
        if removed != 0 {
            log::debug!("unregistered {removed} unresponsive fanout subscriber(s)");
        }
        removed
    }
}

impl<I, T> Default for Fanout<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, T> fmt::Debug for Fanout<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Fanout");
        match self.subscribers.try_read() {
            Some(subscribers) => s.field("subscribers", &subscribers.len()),
            None => s.field("subscribers", &"<locked>"),
        }
        .field("capacity", &self.capacity)
        .finish()
    }
}

/// The receiving end of a subscriber channel registered with [`Fanout::listen`].
///
/// Iterating over a [`Subscriber`] blocks for every value, and ends once the channel is closed and
/// drained.
pub struct Subscriber<T> {
    receiver: Receiver<T>,
}

impl<T> Subscriber<T> {
    /// Blocks until the next value is delivered.
    ///
    /// Returns a [`Disconnected`] error once the registration has been removed and all values
    /// delivered before that have been received.
    pub fn recv(&self) -> Result<T, Disconnected> {
        self.receiver.recv().map_err(|_| Disconnected)
    }

    /// Returns the next value if one has already been delivered, without blocking.
    pub fn try_recv(&self) -> Result<Option<T>, Disconnected> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Disconnected),
        }
    }

    /// Waits at most `timeout` for the next value. Returns `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, Disconnected> {
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Disconnected),
        }
    }

    /// Returns the underlying channel receiver, for use with [`crossbeam_channel::select!`].
    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }
}

impl<T> IntoIterator for Subscriber<T> {
    type Item = T;
    type IntoIter = crossbeam_channel::IntoIter<T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.receiver.into_iter()
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("pending", &self.receiver.len())
            .finish()
    }
}

/// An error returned by [`Subscriber`] when its registration is gone and no values are left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl Error for Disconnected {}

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("subscriber channel is closed")
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    fn buffered<I, T>() -> Fanout<I, T> {
        Fanout::builder().capacity(16).build()
    }

    #[test]
    fn fanout_is_send_sync() {
        assert_send_sync::<Fanout<String, u32>>();
        assert_send_sync::<Subscriber<u32>>();
    }

    #[test]
    fn every_subscriber_gets_every_value_in_order() {
        let fanout = buffered();
        let a = fanout.listen("a");
        let b = fanout.listen("b");
        fanout.notify([1, 2, 3]);

        for sub in [&a, &b] {
            assert_eq!(sub.try_recv(), Ok(Some(1)));
            assert_eq!(sub.try_recv(), Ok(Some(2)));
            assert_eq!(sub.try_recv(), Ok(Some(3)));
            assert_eq!(sub.try_recv(), Ok(None));
        }
    }

    #[test]
    fn late_subscriber_gets_nothing() {
        let fanout = buffered();
        let early = fanout.listen("early");
        fanout.notify([1, 2, 3]);
        let late = fanout.listen("late");

        assert_eq!(late.try_recv(), Ok(None));
        assert_eq!(early.into_iter().take(3).collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn rendezvous_delivery() {
        let fanout = Fanout::new();
        let subs = [fanout.listen(1), fanout.listen(2)];
        let readers = subs.map(|sub| thread::spawn(move || sub.into_iter().collect::<Vec<_>>()));

        fanout.notify(0..100);
        drop(fanout);

        for reader in readers {
            assert_eq!(reader.join().unwrap(), (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn relisten_replaces_registration() {
        let fanout = buffered();
        let old = fanout.listen("id");
        fanout.notify(["first"]);
        let new = fanout.listen("id");
        fanout.notify(["second"]);

        assert_eq!(fanout.subscriber_count(), 1);
        // The old channel yields what it already had, then reports the closure.
        assert_eq!(old.recv(), Ok("first"));
        assert_eq!(old.recv(), Err(Disconnected));
        assert_eq!(new.recv(), Ok("second"));
    }

    #[test]
    fn unsubscribe_closes_channel() {
        let fanout = buffered();
        let sub = fanout.listen("id");
        assert!(fanout.is_listening("id"));
        fanout.notify([1]);

        assert!(fanout.unsubscribe("id"));
        assert!(!fanout.unsubscribe("id"));
        assert!(!fanout.is_listening("id"));

        fanout.notify([2]);
        assert_eq!(sub.recv(), Ok(1));
        assert_eq!(sub.recv(), Err(Disconnected));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let fanout = Fanout::new();
        drop(fanout.listen("gone"));
        assert_eq!(fanout.subscriber_count(), 1);

        // Would block forever on a rendezvous channel if the subscriber were not detected as gone.
        fanout.notify([1, 2]);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[test]
    fn prune_keeps_newer_registration() {
        let fanout = buffered();
        let stale = fanout.listen("id");
        drop(stale);
        let fresh = fanout.listen("id");
        fanout.notify([1]);

        assert!(fanout.is_listening("id"));
        assert_eq!(fresh.try_recv(), Ok(Some(1)));
    }

    #[test]
    fn notify_timeout_drops_slow_subscriber() {
        let fanout = Fanout::new();
        let slow = fanout.listen("slow");
        let gone = fanout.listen("gone");
        drop(gone);

        let removed = fanout.notify_timeout(Duration::from_millis(20), [1, 2]);
        assert_eq!(removed, 2);
        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(slow.recv(), Err(Disconnected));
    }

    #[test]
    fn notify_timeout_counts_only_its_own_removals() {
        let fanout = Fanout::builder().capacity(1).build();
        let full = fanout.listen("a");
        fanout.notify([1]);

        let removed = thread::scope(|s| {
            let publisher = s.spawn(|| fanout.notify_timeout(Duration::from_millis(200), [2]));
            assert!(fanout.unsubscribe("a"));
            publisher.join().unwrap()
        });
        assert_eq!(removed, 0);
        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(full.recv(), Ok(1));
    }

    #[test]
    fn notify_timeout_keeps_replacement_registration() {
        let fanout = Fanout::builder().capacity(1).build();
        let _full = fanout.listen("a");
        fanout.notify([1]);

        let (removed, fresh) = thread::scope(|s| {
            let publisher = s.spawn(|| fanout.notify_timeout(Duration::from_millis(200), [2]));
            let fresh = fanout.listen("a");
            (publisher.join().unwrap(), fresh)
        });
        // The replacement may or may not have been in the snapshot; either way it has room for
        // the value, so only the full channel can fail, and it was already replaced.
        assert_eq!(removed, 0);
        assert!(fanout.is_listening("a"));
        assert!(matches!(fresh.try_recv(), Ok(Some(2)) | Ok(None)));
    }

    #[test]
    fn unsubscribed_channel_stays_open_during_notify() {
        let fanout = Fanout::new();
        let sub = fanout.listen("id");
        thread::scope(|s| {
            let publisher = s.spawn(|| fanout.notify([1, 2]));
            // Wait until the publisher has taken its snapshot and delivered the first value.
            assert_eq!(sub.recv(), Ok(1));
            assert!(fanout.unsubscribe("id"));
            // The in-progress notify still holds the channel.
            assert_eq!(sub.recv(), Ok(2));
            publisher.join().unwrap();
        });
        assert_eq!(sub.recv(), Err(Disconnected));
    }

    #[test]
    fn listen_while_notify_is_blocked() {
        let fanout = Fanout::new();
        let slow = fanout.listen("slow");
        thread::scope(|s| {
            let publisher = s.spawn(|| fanout.notify([1]));
            // `publisher` is blocked on `slow`, but the registry must stay available. The new
            // subscriber is dropped right away, in case it ends up in the publisher's snapshot.
            drop(fanout.listen("other"));
            assert!(fanout.is_listening("slow"));
            assert_eq!(slow.recv(), Ok(1));
            publisher.join().unwrap();
        });
    }

    #[test]
    fn notify_without_subscribers() {
        let fanout: Fanout<u8, u8> = Fanout::new();
        fanout.notify([1, 2, 3]);
        assert_eq!(fanout.notify_timeout(Duration::ZERO, [4]), 0);
    }

    #[test]
    fn recv_timeout() {
        let fanout = buffered();
        let sub = fanout.listen(());
        assert_eq!(sub.recv_timeout(Duration::from_millis(1)), Ok(None));
        fanout.notify([7]);
        assert_eq!(sub.recv_timeout(Duration::from_millis(1)), Ok(Some(7)));
        drop(fanout);
        assert_eq!(sub.recv_timeout(Duration::from_millis(1)), Err(Disconnected));
    }
}
