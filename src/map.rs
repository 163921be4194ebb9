use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt,
    hash::Hash,
    ops::ControlFlow,
};

use crate::{empty::empty, sync::RwLock};

/// A [`HashMap`] that can be shared between threads.
///
/// Every access goes through a single reader/writer lock: operations that only look at the map
/// ([`Map::get`], [`Map::load`], [`Map::range`], [`Map::keys`], ...) share the lock, while
/// operations that modify it ([`Map::store`], [`Map::delete`], [`Map::clear`], [`Map::merge`],
/// ...) take it exclusively. No operation can fail.
///
/// [`Map::new`] is a `const fn` and does not allocate. The underlying [`HashMap`] is only created
/// by the first write, so an unused [`Map`] costs nothing beyond the lock itself.
///
/// To share a [`Map`] between threads, put it in an [`Arc`][std::sync::Arc], a `static`, or borrow
/// it from a scoped thread.
///
/// # Examples
///
/// ```
/// use std::thread;
/// use sharekit::Map;
///
/// let map = Map::new();
/// thread::scope(|s| {
///     s.spawn(|| for i in 5..15 { map.store(format!("i:{i:02}"), i) });
///     s.spawn(|| for i in 0..10 { map.store(format!("i:{i:02}"), i * 2) });
/// });
///
/// assert_eq!(map.len(), 15);
/// assert_eq!(map.load("i:14"), Some(14));
/// ```
pub struct Map<K, V> {
    /// `None` until the first write.
    inner: RwLock<Option<HashMap<K, V>>>,
}

impl<K, V> Map<K, V> {
    /// Creates an empty [`Map`] without allocating.
    pub const fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.inner.read().as_ref().map_or(0, HashMap::len)
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the [`Map`], returning the underlying [`HashMap`].
    pub fn into_inner(self) -> HashMap<K, V> {
        self.inner.into_inner().unwrap_or_default()
    }
}

impl<K: Eq + Hash, V> Map<K, V> {
    /// Returns a clone of the value stored under `key`, or the zero value of `V` if there is none.
    ///
    /// This cannot distinguish an absent key from a key mapped to the zero value. Use
    /// [`Map::load`] when that difference matters.
    pub fn get<Q>(&self, key: &Q) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone + Default,
    {
        self.load(key).unwrap_or_else(empty)
    }

    /// Returns a clone of the value stored under `key`, or [`None`] if the key is absent.
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.inner.read().as_ref()?.get(key).cloned()
    }

    /// Returns `true` if the map has an entry for `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner
            .read()
            .as_ref()
            .map_or(false, |map| map.contains_key(key))
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn store(&self, key: K, value: V) {
        let mut guard = self.inner.write();
        guard.get_or_insert_with(HashMap::new).insert(key, value);
    }

    /// Returns the value stored under `key` and `true` if there is one. Otherwise, stores `value`
    /// and returns it together with `false`.
    ///
    /// The lookup and the insertion happen under the same lock, so of several threads racing to
    /// initialize the same key, exactly one will observe `false`.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        let mut guard = self.inner.write();
        let map = guard.get_or_insert_with(HashMap::new);
        if let Some(existing) = map.get(&key) {
            return (existing.clone(), true);
        }
        map.insert(key, value.clone());
        (value, false)
    }

    /// Replaces the value stored under `key` with `new`, but only if it is currently equal to
    /// `current`.
    ///
    /// Returns whether the value was replaced. An absent key never matches.
    pub fn compare_and_swap<Q>(&self, key: &Q, current: &V, new: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        let mut guard = self.inner.write();
        match guard.as_mut().and_then(|map| map.get_mut(key)) {
            Some(value) if *value == *current => {
                *value = new;
                true
            }
            _ => false,
        }
    }

    /// Removes the entry for `key`. Does nothing if there is none.
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(map) = self.inner.write().as_mut() {
            map.remove(key);
        }
    }

    /// Calls `visit` with every entry in the map, in no particular order.
    ///
    /// Iteration stops early when `visit` returns [`ControlFlow::Break`].
    ///
    /// The read lock is held for the whole traversal. `visit` must not modify this [`Map`]
    /// (directly or through another thread it waits on): the lock is not reentrant, so doing so
    /// deadlocks.
    ///
    /// ```
    /// use std::ops::ControlFlow;
    /// use sharekit::Map;
    ///
    /// let map: Map<u32, u32> = (0..100).map(|i| (i, i)).collect();
    /// let mut visited = 0;
    /// map.range(|_, _| {
    ///     visited += 1;
    ///     if visited == 10 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
    /// });
    /// assert_eq!(visited, 10);
    /// ```
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V) -> ControlFlow<()>,
    {
        let guard = self.inner.read();
        for (key, value) in guard.iter().flatten() {
            if visit(key, value).is_break() {
                break;
            }
        }
    }

    /// Returns a snapshot of all keys in the map.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let guard = self.inner.read();
        guard.iter().flat_map(HashMap::keys).cloned().collect()
    }

    /// Returns a snapshot of all values in the map.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        let guard = self.inner.read();
        guard.iter().flat_map(HashMap::values).cloned().collect()
    }

    /// Removes all entries from the map.
    ///
    /// The allocated storage is kept for reuse.
    pub fn clear(&self) {
        if let Some(map) = self.inner.write().as_mut() {
            map.clear();
        }
    }

    /// Returns an independent copy of the current contents of the map.
    pub fn copy(&self) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
    {
        self.inner.read().clone().unwrap_or_default()
    }

    /// Stores every entry of `other` in this map, replacing values of keys that already exist.
    ///
    /// All entries are inserted under one write lock, so concurrent readers observe either none or
    /// all of them. `other` is iterated while the lock is held; an iterator that accesses this
    /// [`Map`] will deadlock.
    pub fn merge<I>(&self, other: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut guard = self.inner.write();
        guard.get_or_insert_with(HashMap::new).extend(other);
    }
}

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> From<HashMap<K, V>> for Map<K, V> {
    fn from(map: HashMap<K, V>) -> Self {
        Self {
            inner: RwLock::new(Some(map)),
        }
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for Map<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<HashMap<_, _>>())
    }
}

impl<K: Eq + Hash, V> Extend<(K, V)> for Map<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        // `&mut self` means nobody else can hold the lock.
        self.inner
            .get_mut()
            .get_or_insert_with(HashMap::new)
            .extend(iter);
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Map<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_read() {
            Some(guard) => f.debug_map().entries(guard.iter().flatten()).finish(),
            None => f.write_str("Map { <locked> }"),
        }
    }
}
