//! Running computations on their own thread, and containing failures of fallible ones.
//!
//! [`run_async`] starts a closure on a new thread and returns an [`AsyncResult`] that delivers
//! its return value exactly once. [`try_run`] and [`attempt`] run a fallible closure on the
//! *current* thread and turn both returned errors and panics into an ordinary value.

use std::{
    any::Any,
    error::Error,
    fmt, io,
    panic::{self, AssertUnwindSafe},
    thread,
    time::Duration,
};

use crossbeam_channel::Receiver;

/// Runs `f` on a new thread and returns a handle to its eventual result.
///
/// The thread sends the return value of `f` to the [`AsyncResult`] and exits right after, closing
/// the handle. It never waits for anyone to receive the value, so an [`AsyncResult`] that is
/// dropped without being read does not leak the thread.
///
/// If `f` panics, the panic terminates only the spawned thread; the [`AsyncResult`] is then closed
/// without ever yielding a value.
///
/// # Panics
///
/// Panics if the OS fails to create a thread, like [`std::thread::spawn`]. Use
/// [`TaskBuilder::spawn`] to handle that error instead.
///
/// # Examples
///
/// ```
/// use sharekit::run_async;
///
/// let result = run_async(|| (1..=10).sum::<u32>());
///
/// // <do other work concurrently>
///
/// assert_eq!(result.recv(), Some(55));
/// // The result is only delivered once.
/// assert_eq!(result.recv(), None);
/// ```
pub fn run_async<T, F>(f: F) -> AsyncResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        // The receiver may be gone already; the value is then simply dropped.
        sender.send(f()).ok();
    });
    AsyncResult { receiver }
}

/// A builder that can be used to configure a thread started like [`run_async`].
#[derive(Clone, Default)]
pub struct TaskBuilder {
    name: Option<String>,
}

impl TaskBuilder {
    /// Creates a new [`TaskBuilder`] with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the spawned thread.
    ///
    /// Named tasks log their start and exit at `trace` level.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Runs `f` on a new thread, like [`run_async`], but reports a failure to create the thread
    /// instead of panicking.
    pub fn spawn<T, F>(self, f: F) -> io::Result<AsyncResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        builder.spawn(move || {
            let _guard = self.name.map(|name| {
                log::trace!("task '{name}' starting");
                ExitLog(name)
            });
            sender.send(f()).ok();
        })?;
        Ok(AsyncResult { receiver })
    }
}

/// Logs the exit of a named task thread when dropped, including when the task panics.
struct ExitLog(String);

impl Drop for ExitLog {
    fn drop(&mut self) {
        log::trace!("task '{}' exiting", self.0);
    }
}

/// The eventual result of a computation started with [`run_async`] or [`TaskBuilder::spawn`].
///
/// This is a closable, single-value channel: it yields the computation's result once, and is
/// closed afterwards. Every receive operation after that returns [`None`] immediately.
pub struct AsyncResult<T> {
    receiver: Receiver<T>,
}

impl<T> AsyncResult<T> {
    /// Blocks the calling thread until the computation has finished, and returns its result.
    ///
    /// Returns [`None`] if the result has already been received, or if the computation panicked.
    pub fn recv(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Returns the result if the computation has already finished, without blocking.
    ///
    /// Returns [`None`] if the computation is still running, its result has already been
    /// received, or it panicked.
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Waits at most `timeout` for the computation to finish.
    ///
    /// Returns [`None`] on timeout, and in all cases where [`AsyncResult::recv`] would.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Returns the underlying channel receiver.
    ///
    /// This allows waiting on several results (or other channels) at once with
    /// [`crossbeam_channel::select!`].
    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }
}

/// Iterating over an [`AsyncResult`] blocks until the computation finishes, and yields at most
/// one item.
impl<T> IntoIterator for AsyncResult<T> {
    type Item = T;
    type IntoIter = crossbeam_channel::IntoIter<T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.receiver.into_iter()
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("ready", &!self.receiver.is_empty())
            .finish()
    }
}

/// Runs `f` and returns whether it completed without panicking and without returning an error.
///
/// Panics raised by `f` are caught and never propagated. The error or panic payload itself is
/// discarded; use [`attempt`] to inspect it.
///
/// The panic hook still runs before the panic is caught, so the default hook will print the panic
/// message to stderr.
///
/// # Examples
///
/// ```
/// use sharekit::try_run;
///
/// assert!(try_run(|| Ok::<_, ()>(())));
/// assert!(!try_run(|| Err::<(), _>("error")));
/// assert!(!try_run(|| -> Result<(), ()> { panic!("test") }));
/// ```
pub fn try_run<T, E, F>(f: F) -> bool
where
    F: FnOnce() -> Result<T, E>,
{
    attempt(f).is_ok()
}

/// Runs `f`, turning both a returned error and a panic into a [`Failure`].
///
/// `f` is treated as unwind safe. If it panics while mutating state it has captured by reference,
/// that state may be observed half-updated afterwards.
pub fn attempt<T, E, F>(f: F) -> Result<T, Failure<E>>
where
    F: FnOnce() -> Result<T, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(Failure::Error(error)),
        Err(payload) => Err(Failure::Panic(payload)),
    }
}

/// The ways in which a computation run by [`attempt`] can fail.
pub enum Failure<E> {
    /// The computation returned an error.
    Error(E),
    /// The computation panicked. Contains the panic payload.
    Panic(Box<dyn Any + Send + 'static>),
}

impl<E> Failure<E> {
    /// Returns `true` if the computation panicked.
    pub fn is_panic(&self) -> bool {
        matches!(self, Failure::Panic(_))
    }

    /// Returns the panic message, if the computation panicked with a string payload (which is the
    /// case for all uses of [`panic!`] with a message).
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            Failure::Error(_) => None,
            Failure::Panic(payload) => payload
                .downcast_ref::<&'static str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str)),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Failure::Panic(_) => match self.panic_message() {
                Some(msg) => f.debug_tuple("Panic").field(&msg).finish(),
                None => f.debug_tuple("Panic").field(&"<non-string payload>").finish(),
            },
        }
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(error) => fmt::Display::fmt(error, f),
            Failure::Panic(_) => match self.panic_message() {
                Some(msg) => write!(f, "computation panicked: {msg}"),
                None => f.write_str("computation panicked"),
            },
        }
    }
}

impl<E: Error + 'static> Error for Failure<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Failure::Error(error) => Some(error),
            Failure::Panic(_) => None,
        }
    }
}
