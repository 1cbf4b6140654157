//! Deferred GPU object teardown.
//!
//! A [`TeardownLedger`] collects cleanup actions as objects are created and replays
//! them newest-first, so an object is always released before anything it was built
//! from. The engine keeps one ledger for the whole session and one per frame slot;
//! a slot's ledger is flushed only after that slot's fence has signaled, which is when
//! the GPU can no longer reference what it releases.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use ember_renderer::TeardownLedger;
//!
//! let order = Arc::new(Mutex::new(Vec::new()));
//! let mut ledger = TeardownLedger::new();
//! for name in ["allocator", "image", "view"] {
//!     let order = order.clone();
//!     ledger.record(move || order.lock().unwrap().push(name));
//! }
//!
//! ledger.flush();
//! assert_eq!(*order.lock().unwrap(), ["view", "image", "allocator"]);
//! ```

use std::fmt;

use tracing::{debug, warn};

/// One cleanup step. Runs at most once and cannot fail.
pub type TeardownAction = Box<dyn FnOnce() + Send>;

/// Append-only list of cleanup actions, replayed in reverse.
#[derive(Default)]
pub struct TeardownLedger {
    actions: Vec<TeardownAction>,
}

impl TeardownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `action`. It runs before every action recorded earlier.
    pub fn record(&mut self, action: impl FnOnce() + Send + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Runs every recorded action newest-first and empties the ledger.
    ///
    /// Returns the number of actions executed.
    pub fn flush(&mut self) -> usize {
        let count = self.actions.len();
        while let Some(action) = self.actions.pop() {
            action();
        }
        if count > 0 {
            debug!("Flushed {} teardown action(s)", count);
        }
        count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for TeardownLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownLedger")
            .field("pending", &self.actions.len())
            .finish()
    }
}

impl Drop for TeardownLedger {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            warn!(
                "Teardown ledger dropped with {} pending action(s); they will not run",
                self.actions.len()
            );
        }
    }
}
