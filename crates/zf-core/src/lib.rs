//! zf-core: Lazy handler registries and request dispatch
//!
//! Handlers are resolved by name on first use, either from an explicit
//! registration or from a handler file found under the registry's lookup
//! path, and memoized afterwards. The [`App`] facade ties three such
//! registries to a [`RouteTable`].
//!
//! ## Modules
//! - `closure_set` - Lazy, memoizing registry with namespace descent
//! - `loader` - Handler file discovery and TOML manifests
//! - `handler` - Handlers, declared params and argument binding
//! - `delayed` - Deferred invocations
//! - `app` - Routing plus the handler/helper/param registries
//! - `config` - `configs.toml` with per-environment overlays

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod app;
pub mod closure_set;
pub mod config;
pub mod delayed;
pub mod error;
pub mod handler;
pub mod loader;
pub mod request;

// Re-exports
pub use app::{App, AppContext, Outcome, Route};
pub use closure_set::{ClosureSet, EntryState, HandlerSource, Lookup, Namespace, Registration};
pub use config::Config;
pub use delayed::{Delayed, Thunk};
pub use error::{Error, Result};
pub use handler::{Arg, Args, BoundHandler, Handler, NamedArgs, Param, Value};
pub use loader::{Loader, ManifestLoader, Options};
pub use request::{Method, Request};

// Router re-exports
pub use zf_router::{Dispatch, Matcher, Params, RouteSource, RouteTable, Rule, CLI_METHOD};
