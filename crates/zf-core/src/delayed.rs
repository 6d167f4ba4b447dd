//! Delayed invocation
//!
//! [`Delayed`] is a view over a registry whose `call` returns a [`Thunk`]
//! instead of a result. The thunk looks the handler up when it runs, not when
//! it is created, so it observes whatever state the registry is in by then.

use crate::closure_set::ClosureSet;
use crate::handler::Value;
use crate::Result;
use std::fmt;
use std::sync::Arc;

/// Zero-argument, re-callable deferred computation
#[derive(Clone)]
pub struct Thunk(Arc<dyn Fn() -> Result<Value> + Send + Sync>);

impl Thunk {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// Run the deferred computation; every call runs it again
    pub fn call(&self) -> Result<Value> {
        (self.0)()
    }
}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Thunk(..)")
    }
}

/// Registry view producing thunks
pub struct Delayed<C> {
    set: Arc<ClosureSet<C>>,
}

impl<C> Clone for Delayed<C> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> Delayed<C> {
    pub fn new(set: Arc<ClosureSet<C>>) -> Self {
        Self { set }
    }

    /// Thunk performing `set.call(name, args)` when invoked
    ///
    /// Nothing is resolved here; the target may not even be registered yet.
    pub fn call(&self, name: impl Into<String>, args: Vec<Value>) -> Thunk {
        let set = self.set.clone();
        let name = name.into();
        Thunk::new(move || set.call(&name, &args))
    }
}
