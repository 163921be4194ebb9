//! Zero values.
//!
//! The "zero value" of a type is its [`Default`] value. [`Map::get`] returns it for absent keys.
//!
//! [`Map::get`]: crate::Map::get

/// Returns the zero value of `T`.
#[inline]
pub fn empty<T: Default>() -> T {
    T::default()
}

/// Returns whether `value` is the zero value of its type.
///
/// ```
/// use sharekit::empty::is_empty;
///
/// assert!(is_empty(&0));
/// assert!(is_empty(&String::new()));
/// assert!(!is_empty(&Some(1)));
/// ```
pub fn is_empty<T: Default + PartialEq>(value: &T) -> bool {
    *value == empty::<T>()
}
