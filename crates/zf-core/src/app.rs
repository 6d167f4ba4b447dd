//! Application facade
//!
//! Wires the route table to three registries (request handlers, helpers and
//! param handlers) that share one manifest loader and one context.
//!
//! # Data Flow
//! ```text
//! Request (method, path, query)
//!     → RouteTable::run (first matching rule)
//!     → route params + query params
//!     → param handlers (eager: now, others: delayed thunks)
//!     → request handler, arguments bound by parameter name
//!     → Outcome
//! ```

use crate::closure_set::{ClosureSet, HandlerSource, Registration};
use crate::config::Config;
use crate::handler::{Arg, Handler, NamedArgs, Value};
use crate::loader::{Loader, ManifestLoader, Options};
use crate::request::{Method, Request};
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zf_router::RouteTable;

/// Execution context every app handler is bound to
#[derive(Debug)]
pub struct AppContext {
    config: Config,
}

impl AppContext {
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// What a rule dispatches to
#[derive(Debug, Clone)]
pub enum Route {
    /// Name resolved through the request handler registry
    Named(String),
    /// Handler supplied at registration
    Inline(Handler<AppContext>),
}

impl From<&str> for Route {
    fn from(name: &str) -> Self {
        Route::Named(name.to_string())
    }
}

impl From<String> for Route {
    fn from(name: String) -> Self {
        Route::Named(name)
    }
}

impl From<Handler<AppContext>> for Route {
    fn from(handler: Handler<AppContext>) -> Self {
        Route::Inline(handler)
    }
}

/// Result of running a request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Handled {
        value: Value,
        module: Option<String>,
    },
    NotFound,
}

impl Outcome {
    /// Handler value, or `NoRouteMatched` for `req`
    pub fn into_result(self, req: &Request) -> Result<Value> {
        match self {
            Outcome::Handled { value, .. } => Ok(value),
            Outcome::NotFound => Err(Error::NoRouteMatched {
                method: req.method.to_string(),
                path: req.path.clone(),
            }),
        }
    }
}

/// Request dispatch application
///
/// Configure fully before serving: routes and registrations are set up
/// through `&mut self`, `run` only needs `&self`.
pub struct App {
    context: Arc<AppContext>,
    router: RouteTable<Route>,
    loader: Arc<ManifestLoader<AppContext>>,
    handlers: Arc<ClosureSet<AppContext>>,
    helpers: Arc<ClosureSet<AppContext>>,
    params: Arc<ClosureSet<AppContext>>,
    eager_params: HashSet<String>,
    /// Names from the latest `param` call, for `eager`
    last_params: Vec<String>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let context = Arc::new(AppContext { config });
        let loader = Arc::new(ManifestLoader::new());
        let handlers = registry(&context, &loader, &context.config.handlers);
        let helpers = registry(&context, &loader, &context.config.helpers);
        let params = registry(&context, &loader, &context.config.params);
        Self {
            context,
            router: RouteTable::new(),
            loader,
            handlers,
            helpers,
            params,
            eager_params: HashSet::new(),
            last_params: Vec::new(),
        }
    }

    /// App configured from `basedir` (see [`Config::load`])
    pub fn load(basedir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Config::load(basedir)?))
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Override a config key during setup, e.g. `set("handlers", "controllers")`
    ///
    /// The registries move to the new lookup locations. Explicit
    /// registrations carry over and see the new config; handlers memoized
    /// from disk load again.
    pub fn set(&mut self, key: &str, value: impl Into<toml::Value>) -> Result<&mut Self> {
        let mut config = self.context.config.clone();
        config.set(key, value)?;
        let context = Arc::new(AppContext { config });
        let roots = context.config.include_roots();

        let relocate = |set: &Arc<ClosureSet<AppContext>>, lookup_path: &str| {
            Arc::new(set.relocate(Some(context.clone()), lookup_path, roots.clone()))
        };
        self.handlers = relocate(&self.handlers, &context.config.handlers);
        self.helpers = relocate(&self.helpers, &context.config.helpers);
        self.params = relocate(&self.params, &context.config.params);
        self.context = context;
        tracing::debug!(key, "config updated");
        Ok(self)
    }

    /// `basedir` joined with `parts`
    pub fn path<P: AsRef<Path>>(&self, parts: &[P]) -> PathBuf {
        let mut path = self.config().basedir.clone();
        path.extend(parts.iter());
        path
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn router(&self) -> &RouteTable<Route> {
        &self.router
    }

    pub fn handlers(&self) -> &Arc<ClosureSet<AppContext>> {
        &self.handlers
    }

    pub fn helpers(&self) -> &Arc<ClosureSet<AppContext>> {
        &self.helpers
    }

    pub fn params(&self) -> &Arc<ClosureSet<AppContext>> {
        &self.params
    }

    /// Make a factory available to handler manifests
    pub fn factory<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Options) -> Result<Handler<AppContext>> + Send + Sync + 'static,
    {
        self.loader.factory(name, factory);
        self
    }

    /// Append a rule for `method`
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        route: impl Into<Route>,
    ) -> &mut Self {
        self.router.append(method.as_str(), pattern, route.into());
        self
    }

    pub fn get(&mut self, pattern: &str, route: impl Into<Route>) -> &mut Self {
        self.route(Method::Get, pattern, route)
    }

    pub fn post(&mut self, pattern: &str, route: impl Into<Route>) -> &mut Self {
        self.route(Method::Post, pattern, route)
    }

    pub fn put(&mut self, pattern: &str, route: impl Into<Route>) -> &mut Self {
        self.route(Method::Put, pattern, route)
    }

    pub fn delete(&mut self, pattern: &str, route: impl Into<Route>) -> &mut Self {
        self.route(Method::Delete, pattern, route)
    }

    pub fn patch(&mut self, pattern: &str, route: impl Into<Route>) -> &mut Self {
        self.route(Method::Patch, pattern, route)
    }

    pub fn head(&mut self, pattern: &str, route: impl Into<Route>) -> &mut Self {
        self.route(Method::Head, pattern, route)
    }

    /// Append a command-line rule; `"extract :path"` becomes `/extract/:path`
    pub fn cmd(&mut self, pattern: &str, route: impl Into<Route>) -> &mut Self {
        let pattern = command_pattern(pattern);
        self.route(Method::Cli, &pattern, route)
    }

    /// Tag rules appended from now on with `module`
    pub fn module(&mut self, module: Option<&str>) -> &mut Self {
        self.router.module(module);
        self
    }

    /// Register a request handler
    pub fn handler(
        &mut self,
        name: &str,
        source: impl Into<HandlerSource<AppContext>>,
    ) -> &mut Self {
        self.handlers.register(name, source);
        self
    }

    /// Register a helper
    pub fn helper(
        &mut self,
        name: &str,
        source: impl Into<HandlerSource<AppContext>>,
    ) -> &mut Self {
        self.helpers.register(name, source);
        self
    }

    /// Invoke a helper
    pub fn call_helper(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.helpers.call(name, args)
    }

    /// Register a param handler; follow with [`eager`](Self::eager) to run
    /// it as soon as the param is seen instead of on first read
    pub fn param(
        &mut self,
        name: &str,
        source: impl Into<HandlerSource<AppContext>>,
    ) -> &mut Self {
        self.last_params = self.params.register(name, source);
        self
    }

    /// Register several param handlers at once
    pub fn param_all(
        &mut self,
        items: impl IntoIterator<Item = Registration<AppContext>>,
    ) -> &mut Self {
        self.last_params = self.params.register_all(items);
        self
    }

    /// Mark the param handlers from the latest `param` call as eager
    pub fn eager(&mut self) -> &mut Self {
        self.eager_params.extend(self.last_params.drain(..));
        self
    }

    /// Invoke another request handler with no arguments
    pub fn pass(&self, name: &str) -> Result<Value> {
        self.handlers.call(name, &[])
    }

    /// Route and run one request
    pub fn run(&self, req: &Request) -> Result<Outcome> {
        let Some(hit) = self.router.run(req) else {
            tracing::debug!(method = %req.method, path = %req.path, "no route matched");
            return Ok(Outcome::NotFound);
        };

        let mut args = NamedArgs::new();
        if let Some(params) = &hit.params {
            for (name, value) in params.iter() {
                let value = value.map_or(Value::Null, |v| Value::String(v.to_string()));
                args.insert(name, self.param_arg(name, value)?);
            }
        }
        // route params win over query params of the same name
        for (name, value) in req.query_pairs() {
            if !args.contains(&name) {
                let arg = self.param_arg(&name, Value::String(value))?;
                args.insert(name, arg);
            }
        }

        let value = match hit.handler {
            Route::Named(name) => self.handlers.call_named(name, &args)?,
            Route::Inline(handler) => handler
                .clone()
                .bind(req.path.clone(), Some(self.context.clone()))
                .call_named(&args)?,
        };
        Ok(Outcome::Handled {
            value,
            module: hit.module.map(str::to_string),
        })
    }

    fn param_arg(&self, name: &str, value: Value) -> Result<Arg> {
        if !self.params.registered(name) {
            return Ok(Arg::Ready(value));
        }
        if self.eager_params.contains(name) {
            Ok(Arg::Ready(self.params.call(name, &[value])?))
        } else {
            Ok(Arg::Delayed(self.params.delayed().call(name, vec![value])))
        }
    }
}

fn registry(
    context: &Arc<AppContext>,
    loader: &Arc<ManifestLoader<AppContext>>,
    lookup_path: &str,
) -> Arc<ClosureSet<AppContext>> {
    let loader: Arc<dyn Loader<AppContext>> = loader.clone();
    let set = ClosureSet::new(Some(context.clone()), lookup_path, loader)
        .with_include_roots(context.config.include_roots());
    Arc::new(set)
}

fn command_pattern(pattern: &str) -> String {
    let words: Vec<&str> = pattern
        .split(|c: char| c == '/' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .collect();
    format!("/{}", words.join("/"))
}
