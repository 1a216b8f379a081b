//! Connection lifecycle, thread affinity, and memory pressure.
//!
//! A [`Database`](crate::Database) moves through [`ConnectionState`]s as
//! transactions open, initialize and close it. All processing for one
//! connection happens on one owning thread, checked by [`SequenceChecker`].
//!
//! Memory-pressure signals come from the host through a
//! [`MemoryPressureNotifier`]. Listeners only record the signal; the owner
//! performs the actual trim between transactions, so a trim never lands in
//! the middle of an open transaction.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseLocation {
    /// A database file, created on first open.
    File(PathBuf),
    /// A private in-memory database, discarded on close.
    InMemory,
}

impl DatabaseLocation {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Path used in diagnostics.
    pub fn display_path(&self) -> PathBuf {
        match self {
            Self::File(path) => path.clone(),
            Self::InMemory => PathBuf::from(":memory:"),
        }
    }
}

/// Lifecycle state of the connection.
///
/// ```text
/// Unopened ──open──▶ Open{initialized: false} ──Initialize──▶ Open{initialized: true}
///                          ▲                                          │
///                          └──────────── next batch ◀── Closed ◀──Close┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection has been opened yet.
    #[default]
    Unopened,
    /// The connection is open; `initialized` is set by a committed Initialize.
    Open { initialized: bool },
    /// The connection was closed by a Close command. A later batch reopens it.
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn is_initialized(self) -> bool {
        matches!(self, Self::Open { initialized: true })
    }
}

/// Binds an owner to the first thread that uses it.
///
/// Using the owner from any other thread afterwards is a programming error
/// and panics. [`detach`](Self::detach) allows the next use to rebind, which
/// is how ownership moves to a worker thread.
#[derive(Debug, Default)]
pub struct SequenceChecker {
    owner: Option<ThreadId>,
}

impl SequenceChecker {
    /// Asserts that the caller runs on the owning thread, binding it on first use.
    pub fn check(&mut self) {
        let current = thread::current().id();
        match self.owner {
            None => self.owner = Some(current),
            Some(owner) => assert!(
                owner == current,
                "database accessed from {current:?} but owned by {owner:?}"
            ),
        }
    }

    pub fn detach(&mut self) {
        self.owner = None;
    }
}

/// Severity of a host memory-pressure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemoryPressureLevel {
    Moderate,
    Critical,
}

impl MemoryPressureLevel {
    fn to_raw(self) -> u8 {
        match self {
            Self::Moderate => 1,
            Self::Critical => 2,
        }
    }

    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Moderate),
            2 => Some(Self::Critical),
            _ => None,
        }
    }
}

type Callback = Arc<dyn Fn(MemoryPressureLevel) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Callback)>,
}

/// Host-side hub that fans memory-pressure signals out to listeners.
///
/// Cloning yields another handle to the same hub.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use dbcommand_sqlite::{MemoryPressureLevel, MemoryPressureNotifier};
///
/// let notifier = MemoryPressureNotifier::new();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&hits);
/// let listener = notifier.listen(move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// notifier.notify(MemoryPressureLevel::Moderate);
/// drop(listener);
/// notifier.notify(MemoryPressureLevel::Critical);
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct MemoryPressureNotifier {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryPressureNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback. It stays registered until the returned guard drops.
    pub fn listen(
        &self,
        callback: impl Fn(MemoryPressureLevel) + Send + Sync + 'static,
    ) -> MemoryPressureListener {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(callback)));
        MemoryPressureListener {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Delivers a signal to every registered listener.
    pub fn notify(&self, level: MemoryPressureLevel) {
        // Callbacks run outside the lock so they may register or drop listeners.
        let callbacks: Vec<Callback> = lock(&self.registry)
            .listeners
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(level);
        }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }
}

impl std::fmt::Debug for MemoryPressureNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPressureNotifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registration guard returned by [`MemoryPressureNotifier::listen`].
#[derive(Debug)]
pub struct MemoryPressureListener {
    registry: Weak<Mutex<Registry>>,
    id: u64,
}

impl Drop for MemoryPressureListener {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hook run after a signal is recorded, so an owner blocked on its own
/// queue can be woken up to service it.
#[derive(Clone)]
pub(crate) struct PressureWaker(Arc<dyn Fn() + Send + Sync>);

impl PressureWaker {
    pub(crate) fn new(wake: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(wake))
    }

    pub(crate) fn wake(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for PressureWaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PressureWaker")
    }
}

/// Highest memory-pressure level recorded since the owner last looked.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingPressure(Arc<AtomicU8>);

impl PendingPressure {
    pub(crate) fn record(&self, level: MemoryPressureLevel) {
        self.0.fetch_max(level.to_raw(), Ordering::AcqRel);
    }

    pub(crate) fn take(&self) -> Option<MemoryPressureLevel> {
        MemoryPressureLevel::from_raw(self.0.swap(0, Ordering::AcqRel))
    }
}
