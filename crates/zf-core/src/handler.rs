//! Handler types
//!
//! A [`Handler`] is a function plus its declared parameter list. The registry
//! turns it into a [`BoundHandler`] by capturing the execution context once;
//! the bound form is what callers invoke.

use crate::delayed::Thunk;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use serde_json::Value;

/// Declared handler parameter
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Param {
    name: String,
    #[serde(default)]
    default: Option<Value>,
}

impl Param {
    /// Parameter without a default
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// Parameter that falls back to `default` when not supplied
    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// Handler function type: context (if bound to one) and positional arguments
pub type HandlerFn<C> = dyn Fn(Option<&C>, &[Value]) -> Result<Value> + Send + Sync;

/// Unbound handler
pub struct Handler<C> {
    params: Arc<[Param]>,
    func: Arc<HandlerFn<C>>,
}

impl<C> Clone for Handler<C> {
    fn clone(&self) -> Self {
        Self {
            params: self.params.clone(),
            func: self.func.clone(),
        }
    }
}

impl<C> fmt::Debug for Handler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<C> Handler<C> {
    /// Handler without declared parameters; it receives arguments as given
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Option<&C>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::with_params(Vec::new(), func)
    }

    /// Handler with a declared parameter list
    ///
    /// # Example
    /// ```
    /// use zf_core::{Handler, Param, Value};
    ///
    /// let add: Handler<()> = Handler::with_params(
    ///     [Param::required("a"), Param::optional("b", 10)],
    ///     |_, args| {
    ///         let (a, b) = (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0));
    ///         Ok(Value::from(a + b))
    ///     },
    /// );
    /// assert_eq!(add.params().len(), 2);
    /// ```
    pub fn with_params<F>(params: impl IntoIterator<Item = Param>, func: F) -> Self
    where
        F: Fn(Option<&C>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            params: params.into_iter().collect(),
            func: Arc::new(func),
        }
    }

    /// Replace the declared parameter list
    pub fn declare(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Capture the execution context; `None` leaves the handler context-free
    pub(crate) fn bind(self, name: impl Into<String>, context: Option<Arc<C>>) -> BoundHandler<C> {
        BoundHandler {
            name: name.into(),
            handler: self,
            context,
        }
    }
}

/// Handler with its execution context captured
///
/// Immutable once created. Registries hand these out behind an `Arc`, so a
/// memoized lookup yields the same instance every time.
pub struct BoundHandler<C> {
    name: String,
    handler: Handler<C>,
    context: Option<Arc<C>>,
}

impl<C> fmt::Debug for BoundHandler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundHandler")
            .field("name", &self.name)
            .field("params", &self.handler.params)
            .field("bound", &self.context.is_some())
            .finish()
    }
}

impl<C> BoundHandler<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        self.handler.params()
    }

    pub fn context(&self) -> Option<&C> {
        self.context.as_deref()
    }

    pub(crate) fn unbound(&self) -> &Handler<C> {
        &self.handler
    }

    /// Invoke with positional arguments
    ///
    /// Declared parameters past the end of `args` take their defaults; a
    /// missing parameter without a default is an error.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        let declared = self.params();
        if args.len() >= declared.len() {
            return self.invoke(args);
        }

        let mut filled = Vec::with_capacity(declared.len());
        filled.extend_from_slice(args);
        for param in &declared[args.len()..] {
            filled.push(self.default_for(param)?);
        }
        self.invoke(&filled)
    }

    /// Invoke with arguments matched to declared parameters by name
    ///
    /// Only the declared parameters are read from `args`, so delayed values
    /// for anything else are never forced.
    pub fn call_named(&self, args: &NamedArgs) -> Result<Value> {
        let mut positional = Vec::with_capacity(self.params().len());
        for param in self.params() {
            let value = match args.get(param.name()) {
                Some(arg) => arg.value()?,
                None => self.default_for(param)?,
            };
            positional.push(value);
        }
        self.invoke(&positional)
    }

    fn default_for(&self, param: &Param) -> Result<Value> {
        param
            .default()
            .cloned()
            .ok_or_else(|| Error::MissingRequiredArgument {
                param: param.name().to_string(),
                handler: self.name.clone(),
            })
    }

    fn invoke(&self, args: &[Value]) -> Result<Value> {
        (self.handler.func)(self.context(), args)
    }
}

/// Argument value that may not have been computed yet
#[derive(Debug, Clone)]
pub enum Arg {
    Ready(Value),
    Delayed(Thunk),
}

impl Arg {
    /// The value, running the thunk if it is delayed
    pub fn value(&self) -> Result<Value> {
        match self {
            Arg::Ready(value) => Ok(value.clone()),
            Arg::Delayed(thunk) => thunk.call(),
        }
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, Arg::Delayed(_))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Ready(value)
    }
}

impl From<Thunk> for Arg {
    fn from(thunk: Thunk) -> Self {
        Arg::Delayed(thunk)
    }
}

/// Name-keyed arguments for keyword invocation
#[derive(Debug, Clone, Default)]
pub struct NamedArgs {
    args: HashMap<String, Arg>,
}

impl NamedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, arg: impl Into<Arg>) {
        self.args.insert(name.into(), arg.into());
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.insert(name, arg);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.args.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arg)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for NamedArgs {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            args: iter
                .into_iter()
                .map(|(k, v)| (k.into(), Arg::Ready(v)))
                .collect(),
        }
    }
}

impl From<serde_json::Map<String, Value>> for NamedArgs {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

/// Positional or keyword arguments
#[derive(Debug, Clone)]
pub enum Args {
    Positional(Vec<Value>),
    Named(NamedArgs),
}

impl From<Vec<Value>> for Args {
    fn from(args: Vec<Value>) -> Self {
        Args::Positional(args)
    }
}

impl From<NamedArgs> for Args {
    fn from(args: NamedArgs) -> Self {
        Args::Named(args)
    }
}
