//! Dispatch table
//!
//! Maps registration ids to compiled patterns and their handlers. The table
//! is shared between callers registering handlers and the server's receive
//! loop; a lookup holds the read lock for the whole scan, so it always sees
//! either the state before or after a concurrent `map`/`unmap`.

use oscroute_core::{Message, Pattern};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::delivery::Lane;
use crate::error::{HandlerError, Result};

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Receives messages whose address matched a registered pattern.
///
/// Closures taking `&Message` implement this directly; use [`fallible`] for
/// closures that report errors.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, message: &Message) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&Message) + Send + Sync + 'static,
{
    fn handle(&self, message: &Message) -> HandlerResult {
        self(message);
        Ok(())
    }
}

/// Adapter for closures returning a [`HandlerResult`]
pub struct Fallible<F>(F);

impl<F> Handler for Fallible<F>
where
    F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, message: &Message) -> HandlerResult {
        (self.0)(message)
    }
}

/// Wrap a closure whose errors should be reported as handler failures
pub fn fallible<F>(f: F) -> Fallible<F>
where
    F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
{
    Fallible(f)
}

/// Token returned by [`Dispatcher::map`]; ids increase in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pattern bound to a handler
pub struct Registration {
    pub id: RegistrationId,
    pub pattern: Pattern,
    pub(crate) handler: Arc<dyn Handler>,
    /// Orders deliveries to this handler
    pub(crate) lane: Lane,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

struct DispatchTable {
    /// Keyed by id, so iteration order is registration order
    registrations: RwLock<BTreeMap<RegistrationId, Arc<Registration>>>,
    next_id: AtomicU64,
}

/// Shared handle to a dispatch table; clones refer to the same table
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatchTable>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatchTable {
                registrations: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for every address matching `pattern`.
    ///
    /// The pattern is compiled here; a syntax error is returned and the
    /// table is left unchanged.
    pub fn map<H: Handler>(&self, pattern: &str, handler: H) -> Result<RegistrationId> {
        self.map_arc(pattern, Arc::new(handler))
    }

    /// Register an already shared handler
    pub fn map_arc(&self, pattern: &str, handler: Arc<dyn Handler>) -> Result<RegistrationId> {
        let pattern = Pattern::compile(pattern)?;
        let id = RegistrationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let registration = Arc::new(Registration {
            id,
            pattern,
            handler,
            lane: Lane::new(),
        });

        debug!("Mapped {} -> {}", registration.pattern, id);
        self.inner.registrations.write().insert(id, registration);
        Ok(id)
    }

    /// Remove a registration. Returns false if `id` is unknown.
    ///
    /// Once this returns, the handler is never invoked again and any call to
    /// it running on another thread has finished. Called from inside a
    /// handler it does not wait for a call in progress, so two handlers may
    /// unmap each other.
    pub fn unmap(&self, id: RegistrationId) -> bool {
        let removed = self.inner.registrations.write().remove(&id);
        match removed {
            Some(registration) => {
                registration.lane.retire();
                debug!("Unmapped {} ({})", registration.pattern, id);
                true
            }
            None => false,
        }
    }

    /// Ids of the registrations matching `address`, in registration order
    pub fn matches(&self, address: &str) -> Vec<RegistrationId> {
        self.lookup(address).iter().map(|r| r.id).collect()
    }

    /// Registrations matching `address`, in registration order
    pub(crate) fn lookup(&self, address: &str) -> Vec<Arc<Registration>> {
        self.inner
            .registrations
            .read()
            .values()
            .filter(|r| r.pattern.matches(address))
            .cloned()
            .collect()
    }

    /// (id, pattern) for every registration, in registration order
    pub fn patterns(&self) -> Vec<(RegistrationId, String)> {
        self.inner
            .registrations
            .read()
            .values()
            .map(|r| (r.id, r.pattern.as_str().to_string()))
            .collect()
    }

    /// Remove every registration
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.registrations.write());
        for registration in removed.values() {
            registration.lane.retire();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registrations.read().is_empty()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registrations", &self.len())
            .finish()
    }
}
