//! Lazy named handler registry
//!
//! Maps names to handlers that are resolved on first use and memoized.
//!
//! ## Resolution order
//! 1. A memoized handler is returned as is.
//! 2. A name registered with a load-spec loads that spec.
//! 3. A name that is a directory under the lookup root yields a
//!    [`Namespace`] view for chained lookups (`admin` then `users`).
//! 4. Anything else is loaded as a load-spec equal to the name.
//!
//! A successful load is bound to the registry's context and memoized; the
//! entry never goes back to unset or deferred.
//!
//! Loads are claimed per name: two threads asking for the same unresolved
//! name load it once, while unrelated names load independently. A load may
//! resolve other names of the same registry; a load that needs its own name
//! fails with `InvalidHandler`.

use crate::delayed::Delayed;
use crate::handler::{Args, BoundHandler, Handler, NamedArgs, Value};
use crate::loader::{find_dir, find_file, spec_path, Loader};
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// What a name is registered with
pub enum HandlerSource<C> {
    /// Locate the handler from the name alone
    Unset,
    /// Load this spec on first use
    LoadSpec(String),
    /// Use this handler directly
    Callable(Handler<C>),
}

impl<C> From<&str> for HandlerSource<C> {
    fn from(spec: &str) -> Self {
        HandlerSource::LoadSpec(spec.to_string())
    }
}

impl<C> From<String> for HandlerSource<C> {
    fn from(spec: String) -> Self {
        HandlerSource::LoadSpec(spec)
    }
}

impl<C> From<Handler<C>> for HandlerSource<C> {
    fn from(handler: Handler<C>) -> Self {
        HandlerSource::Callable(handler)
    }
}

impl<C, S: Into<HandlerSource<C>>> From<Option<S>> for HandlerSource<C> {
    fn from(source: Option<S>) -> Self {
        source.map_or(HandlerSource::Unset, Into::into)
    }
}

/// One item of a bulk registration
pub enum Registration<C> {
    /// Name doubles as its own load-spec; located on first use
    Auto(String),
    Named(String, HandlerSource<C>),
}

impl<C> Registration<C> {
    pub fn auto(spec: impl Into<String>) -> Self {
        Registration::Auto(spec.into())
    }

    pub fn named(name: impl Into<String>, source: impl Into<HandlerSource<C>>) -> Self {
        Registration::Named(name.into(), source.into())
    }
}

enum Entry<C> {
    Unset,
    Deferred(String),
    Resolved(Arc<BoundHandler<C>>),
}

/// Observable state of a known name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Registered without a source; located from the name on first use
    Unset,
    /// Registered with a load-spec that has not been loaded yet
    Deferred,
    /// Bound and memoized
    Resolved,
}

struct Slot<C> {
    /// Explicitly registered, as opposed to found on disk
    registered: bool,
    entry: Entry<C>,
}

/// Result of resolving a name
pub enum Lookup<'a, C> {
    Handler(Arc<BoundHandler<C>>),
    Namespace(Namespace<'a, C>),
}

/// Lazy named handler registry
pub struct ClosureSet<C> {
    context: Option<Arc<C>>,
    lookup_path: PathBuf,
    include_roots: Vec<PathBuf>,
    loader: Arc<dyn Loader<C>>,
    slots: RwLock<HashMap<String, Slot<C>>>,
    /// Names being loaded, with the loading thread
    loading: Mutex<HashMap<String, ThreadId>>,
    loaded: Condvar,
}

impl<C> ClosureSet<C> {
    /// Create a registry
    ///
    /// * `context` - captured by every handler this registry binds
    /// * `lookup_path` - directory handler files live under
    /// * `loader` - turns handler files into handlers
    pub fn new(
        context: Option<Arc<C>>,
        lookup_path: impl Into<PathBuf>,
        loader: Arc<dyn Loader<C>>,
    ) -> Self {
        Self {
            context,
            lookup_path: lookup_path.into(),
            include_roots: Vec::new(),
            loader,
            slots: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
            loaded: Condvar::new(),
        }
    }

    /// Roots a relative lookup path is searched under, in order
    pub fn with_include_roots(mut self, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        self.include_roots = roots.into_iter().collect();
        self
    }

    pub fn lookup_path(&self) -> &Path {
        &self.lookup_path
    }

    /// Register one name; returns the names registered
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use zf_core::{ClosureSet, HandlerSource, ManifestLoader};
    ///
    /// let loader = Arc::new(ManifestLoader::<()>::new());
    /// let set: ClosureSet<()> = ClosureSet::new(None, "handlers", loader);
    /// assert_eq!(set.register("home", "pages.home"), vec!["home".to_string()]);
    /// set.register("about", HandlerSource::Unset);
    /// assert!(set.registered("home"));
    /// assert!(set.registered("about"));
    /// ```
    pub fn register(
        &self,
        name: impl Into<String>,
        source: impl Into<HandlerSource<C>>,
    ) -> Vec<String> {
        let name = name.into();
        self.insert(name.clone(), source.into());
        vec![name]
    }

    /// Register many names in order; returns the names registered
    pub fn register_all(&self, items: impl IntoIterator<Item = Registration<C>>) -> Vec<String> {
        items
            .into_iter()
            .map(|item| {
                let (name, source) = match item {
                    Registration::Auto(spec) => (spec, HandlerSource::Unset),
                    Registration::Named(name, source) => (name, source),
                };
                self.insert(name.clone(), source);
                name
            })
            .collect()
    }

    fn insert(&self, name: String, source: HandlerSource<C>) {
        let entry = match source {
            HandlerSource::Unset => Entry::Unset,
            HandlerSource::LoadSpec(spec) => Entry::Deferred(spec),
            HandlerSource::Callable(handler) => {
                Entry::Resolved(Arc::new(handler.bind(name.clone(), self.context.clone())))
            }
        };

        let mut slots = self.slots.write();
        let slot = slots.entry(name.clone()).or_insert(Slot {
            registered: true,
            entry: Entry::Unset,
        });
        slot.registered = true;
        if matches!(slot.entry, Entry::Resolved(_)) {
            tracing::warn!(%name, "name already resolved, registration ignored");
            return;
        }
        slot.entry = entry;
    }

    /// True iff `name` was explicitly registered
    pub fn registered(&self, name: &str) -> bool {
        self.slots
            .read()
            .get(name)
            .map_or(false, |slot| slot.registered)
    }

    /// True if `name` is registered, already resolved, or has a handler file
    ///
    /// Probes only; nothing is loaded or memoized.
    pub fn exists(&self, name: &str) -> bool {
        self.exists_in(&[], name)
    }

    fn exists_in(&self, namespace: &[String], name: &str) -> bool {
        if self.slots.read().contains_key(&qualify(namespace, name)) {
            return true;
        }
        find_file(&self.candidate(namespace, name), &self.include_roots).is_some()
    }

    /// Current state of `name`, if the registry knows it
    pub fn state(&self, name: &str) -> Option<EntryState> {
        self.slots.read().get(name).map(|slot| match slot.entry {
            Entry::Unset => EntryState::Unset,
            Entry::Deferred(_) => EntryState::Deferred,
            Entry::Resolved(_) => EntryState::Resolved,
        })
    }

    /// Resolve `name` to a handler or a namespace view
    pub fn resolve(&self, name: &str) -> Result<Lookup<'_, C>> {
        self.lookup(&[], name)
    }

    /// Resolve `name`, requiring a handler
    pub fn handler(&self, name: &str) -> Result<Arc<BoundHandler<C>>> {
        expect_handler(self.resolve(name)?, name)
    }

    /// View positioned at the sub-namespace directory `name`
    pub fn namespace(&self, name: &str) -> Result<Namespace<'_, C>> {
        Namespace::root(self).namespace(name)
    }

    /// Resolve `name` and invoke it with positional arguments
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.handler(name)?.call(args)
    }

    /// Resolve `name` and invoke it with arguments bound by parameter name
    pub fn call_named(&self, name: &str, args: &NamedArgs) -> Result<Value> {
        self.handler(name)?.call_named(args)
    }

    /// Invoke with either argument form
    pub fn apply(&self, name: &str, args: impl Into<Args>) -> Result<Value> {
        match args.into() {
            Args::Positional(args) => self.call(name, &args),
            Args::Named(args) => self.call_named(name, &args),
        }
    }

    fn lookup(&self, namespace: &[String], name: &str) -> Result<Lookup<'_, C>> {
        let key = qualify(namespace, name);
        if let Some(resolved) = self.memoized(&key) {
            return Ok(Lookup::Handler(resolved));
        }

        let _claim = self.claim(&key)?;
        // another caller may have finished the load while we waited
        let deferred = {
            let slots = self.slots.read();
            match slots.get(&key).map(|slot| &slot.entry) {
                Some(Entry::Resolved(resolved)) => {
                    return Ok(Lookup::Handler(resolved.clone()));
                }
                Some(Entry::Deferred(spec)) => Some(spec.clone()),
                Some(Entry::Unset) | None => None,
            }
        };

        let handler = match deferred {
            Some(spec) => self.load(namespace, &spec, &key)?,
            None => {
                if self.is_namespace(namespace, name) {
                    tracing::debug!(
                        name,
                        lookup_path = %self.lookup_path.display(),
                        "descending into namespace"
                    );
                    let mut path = namespace.to_vec();
                    path.push(name.to_string());
                    return Ok(Lookup::Namespace(Namespace { set: self, path }));
                }
                self.load(namespace, name, &key)?
            }
        };

        let bound = Arc::new(handler.bind(key.clone(), self.context.clone()));
        let mut slots = self.slots.write();
        let slot = slots.entry(key).or_insert(Slot {
            registered: false,
            entry: Entry::Unset,
        });
        slot.entry = Entry::Resolved(bound.clone());
        tracing::debug!(name = bound.name(), "handler memoized");
        Ok(Lookup::Handler(bound))
    }

    /// Same registrations under a new context and lookup location
    ///
    /// Explicit registrations carry over, resolved ones rebound to `context`.
    /// Handlers memoized from disk are dropped and load again from the new
    /// location.
    pub(crate) fn relocate(
        &self,
        context: Option<Arc<C>>,
        lookup_path: impl Into<PathBuf>,
        include_roots: Vec<PathBuf>,
    ) -> Self {
        let set = ClosureSet::new(context, lookup_path, self.loader.clone())
            .with_include_roots(include_roots);
        {
            let mut slots = set.slots.write();
            for (name, slot) in self.slots.read().iter().filter(|(_, s)| s.registered) {
                let entry = match &slot.entry {
                    Entry::Unset => Entry::Unset,
                    Entry::Deferred(spec) => Entry::Deferred(spec.clone()),
                    Entry::Resolved(bound) => {
                        let handler = bound.unbound().clone();
                        Entry::Resolved(Arc::new(handler.bind(name.clone(), set.context.clone())))
                    }
                };
                slots.insert(
                    name.clone(),
                    Slot {
                        registered: true,
                        entry,
                    },
                );
            }
        }
        set
    }

    /// Wait until nobody else is loading `key`, then claim it
    fn claim(&self, key: &str) -> Result<LoadClaim<'_, C>> {
        let me = thread::current().id();
        let mut loading = self.loading.lock();
        while let Some(&owner) = loading.get(key) {
            if owner == me {
                return Err(Error::InvalidHandler {
                    name: key.to_string(),
                    reason: "requires itself while loading".to_string(),
                });
            }
            self.loaded.wait(&mut loading);
        }
        loading.insert(key.to_string(), me);
        Ok(LoadClaim {
            set: self,
            key: key.to_string(),
        })
    }

    fn memoized(&self, key: &str) -> Option<Arc<BoundHandler<C>>> {
        match self.slots.read().get(key).map(|slot| &slot.entry) {
            Some(Entry::Resolved(resolved)) => Some(resolved.clone()),
            _ => None,
        }
    }

    fn load(&self, namespace: &[String], spec: &str, name: &str) -> Result<Handler<C>> {
        let candidate = self.candidate(namespace, spec);
        let Some(file) = find_file(&candidate, &self.include_roots) else {
            return Err(Error::HandlerNotFound {
                name: name.to_string(),
                root: self.lookup_path.clone(),
            });
        };

        tracing::debug!(name, file = %file.display(), "loading handler");
        self.loader
            .load(&file)?
            .ok_or_else(|| Error::InvalidHandler {
                name: name.to_string(),
                reason: format!("{} did not produce a handler", file.display()),
            })
    }

    fn is_namespace(&self, namespace: &[String], name: &str) -> bool {
        let mut candidate = self.lookup_path.clone();
        candidate.extend(namespace);
        candidate.push(name);
        find_dir(&candidate, &self.include_roots).is_some()
    }

    fn candidate(&self, namespace: &[String], spec: &str) -> PathBuf {
        let mut candidate = self.lookup_path.clone();
        candidate.extend(namespace);
        candidate.push(spec_path(spec, self.loader.extension()));
        candidate
    }
}

impl<C: Send + Sync + 'static> ClosureSet<C> {
    /// View whose calls return thunks instead of results
    pub fn delayed(self: &Arc<Self>) -> Delayed<C> {
        Delayed::new(self.clone())
    }
}

/// Exclusive right to load one name; released on drop, success or not
struct LoadClaim<'a, C> {
    set: &'a ClosureSet<C>,
    key: String,
}

impl<C> Drop for LoadClaim<'_, C> {
    fn drop(&mut self) {
        self.set.loading.lock().remove(&self.key);
        self.set.loaded.notify_all();
    }
}

/// Registry view positioned at a sub-namespace
///
/// Carries its own accumulated path, so descending never changes how the
/// registry resolves other names.
pub struct Namespace<'a, C> {
    set: &'a ClosureSet<C>,
    path: Vec<String>,
}

impl<'a, C> Namespace<'a, C> {
    fn root(set: &'a ClosureSet<C>) -> Self {
        Self {
            set,
            path: Vec::new(),
        }
    }

    /// Segments descended so far
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Resolve `name` inside this namespace
    pub fn resolve(&self, name: &str) -> Result<Lookup<'a, C>> {
        self.set.lookup(&self.path, name)
    }

    /// Resolve `name` inside this namespace, requiring a handler
    pub fn handler(&self, name: &str) -> Result<Arc<BoundHandler<C>>> {
        expect_handler(self.resolve(name)?, &qualify(&self.path, name))
    }

    /// Descend one level further
    pub fn namespace(&self, name: &str) -> Result<Namespace<'a, C>> {
        if !self.set.is_namespace(&self.path, name) {
            return Err(Error::HandlerNotFound {
                name: qualify(&self.path, name),
                root: self.set.lookup_path.clone(),
            });
        }
        let mut path = self.path.clone();
        path.push(name.to_string());
        Ok(Namespace { set: self.set, path })
    }

    /// `registered` for the qualified name
    pub fn registered(&self, name: &str) -> bool {
        self.set.registered(&qualify(&self.path, name))
    }

    /// `exists` inside this namespace; probes only
    pub fn exists(&self, name: &str) -> bool {
        self.set.exists_in(&self.path, name)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.handler(name)?.call(args)
    }

    pub fn call_named(&self, name: &str, args: &NamedArgs) -> Result<Value> {
        self.handler(name)?.call_named(args)
    }
}

fn expect_handler<C>(lookup: Lookup<'_, C>, name: &str) -> Result<Arc<BoundHandler<C>>> {
    match lookup {
        Lookup::Handler(handler) => Ok(handler),
        Lookup::Namespace(_) => Err(Error::InvalidHandler {
            name: name.to_string(),
            reason: "is a namespace, not a handler".to_string(),
        }),
    }
}

/// Memo key for `name` inside `namespace`: `admin.users.show`
fn qualify(namespace: &[String], name: &str) -> String {
    if namespace.is_empty() {
        return name.to_string();
    }
    let mut key = namespace.join(".");
    key.push('.');
    key.push_str(name);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{ManifestLoader, Options};
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, OnceLock, Weak};
    use tempfile::TempDir;

    /// Loader double: every file is a handler returning its own file stem
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl CountingLoader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl<C> Loader<C> for CountingLoader {
        fn extension(&self) -> &str {
            "toml"
        }

        fn load(&self, path: &Path) -> Result<Option<Handler<C>>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let content = fs::read_to_string(path)?;
            if content.trim() == "nothing" {
                return Ok(None);
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(Some(Handler::new(move |_, args: &[Value]| {
                Ok(json!({ "handler": stem, "args": args }))
            })))
        }
    }

    fn fixture(files: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join("handlers").join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "").unwrap();
        }
        dir
    }

    fn registry(dir: &TempDir, loader: Arc<CountingLoader>) -> ClosureSet<()> {
        ClosureSet::new(None, "handlers", loader).with_include_roots([dir.path().to_path_buf()])
    }

    #[test]
    fn test_loads_once_and_memoizes() {
        let dir = fixture(&["home.toml"]);
        let loader = CountingLoader::new();
        let set = registry(&dir, loader.clone());

        let first = set.call("home", &[json!(1)]).unwrap();
        let second = set.call("home", &[json!(2)]).unwrap();
        assert_eq!(first, json!({ "handler": "home", "args": [1] }));
        assert_eq!(second, json!({ "handler": "home", "args": [2] }));
        assert_eq!(loader.loads(), 1);

        let a = set.handler("home").unwrap();
        let b = set.handler("home").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(set.state("home"), Some(EntryState::Resolved));
    }

    #[test]
    fn test_deferred_spec_loads_under_its_own_path() {
        let dir = fixture(&["pages/landing.toml"]);
        let loader = CountingLoader::new();
        let set = registry(&dir, loader.clone());

        set.register("index", "pages.landing");
        assert_eq!(set.state("index"), Some(EntryState::Deferred));
        assert_eq!(loader.loads(), 0);

        let out = set.call("index", &[]).unwrap();
        assert_eq!(out["handler"], json!("landing"));
        assert_eq!(set.state("index"), Some(EntryState::Resolved));
        assert!(set.registered("index"));
    }

    #[test]
    fn test_callable_registration_is_bound_immediately() {
        let dir = fixture(&[]);
        let loader = CountingLoader::new();
        let set: ClosureSet<()> = registry(&dir, loader.clone());

        set.register("ping", Handler::new(|_, _: &[Value]| Ok(json!("pong"))));
        assert_eq!(set.state("ping"), Some(EntryState::Resolved));
        assert_eq!(set.call("ping", &[]).unwrap(), json!("pong"));
        assert_eq!(loader.loads(), 0);
    }

    #[test]
    fn test_resolved_entry_never_reverts() {
        let dir = fixture(&[]);
        let set: ClosureSet<()> = registry(&dir, CountingLoader::new());

        set.register("ping", Handler::new(|_, _: &[Value]| Ok(json!("pong"))));
        set.register("ping", "somewhere.else");
        assert_eq!(set.state("ping"), Some(EntryState::Resolved));
        assert_eq!(set.call("ping", &[]).unwrap(), json!("pong"));
    }

    #[test]
    fn test_bulk_registration() {
        let dir = fixture(&["users/list.toml", "reports.toml"]);
        let set = registry(&dir, CountingLoader::new());

        let names = set.register_all([
            Registration::auto("reports"),
            Registration::named("users", "users.list"),
        ]);
        assert_eq!(names, vec!["reports".to_string(), "users".to_string()]);
        assert_eq!(set.state("reports"), Some(EntryState::Unset));
        assert_eq!(set.state("users"), Some(EntryState::Deferred));

        assert_eq!(set.call("reports", &[]).unwrap()["handler"], json!("reports"));
        assert_eq!(set.call("users", &[]).unwrap()["handler"], json!("list"));
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let dir = fixture(&[]);
        let set = registry(&dir, CountingLoader::new());

        let err = set.call("missing", &[]).unwrap_err();
        assert!(matches!(err, Error::HandlerNotFound { ref name, .. } if name == "missing"));
        // failures are not memoized
        assert_eq!(set.state("missing"), None);
    }

    #[test]
    fn test_file_without_handler_is_invalid() {
        let dir = fixture(&[]);
        fs::create_dir_all(dir.path().join("handlers")).unwrap();
        fs::write(dir.path().join("handlers/empty.toml"), "nothing").unwrap();
        let set = registry(&dir, CountingLoader::new());

        assert!(matches!(
            set.call("empty", &[]),
            Err(Error::InvalidHandler { .. })
        ));
    }

    #[test]
    fn test_namespace_descent() {
        let dir = fixture(&["admin/users/show.toml", "admin/dashboard.toml"]);
        let loader = CountingLoader::new();
        let set = registry(&dir, loader.clone());

        let admin = match set.resolve("admin").unwrap() {
            Lookup::Namespace(ns) => ns,
            Lookup::Handler(_) => panic!("admin should be a namespace"),
        };
        assert_eq!(admin.path(), &["admin".to_string()]);
        assert_eq!(admin.call("dashboard", &[]).unwrap()["handler"], json!("dashboard"));

        let users = admin.namespace("users").unwrap();
        assert_eq!(users.call("show", &[json!(7)]).unwrap()["args"], json!([7]));
        assert_eq!(set.state("admin.users.show"), Some(EntryState::Resolved));
        assert!(!set.registered("admin.users.show"));

        // descending did not leave any path behind on the registry
        assert!(matches!(set.call("dashboard", &[]), Err(Error::HandlerNotFound { .. })));
        assert!(matches!(set.handler("admin"), Err(Error::InvalidHandler { .. })));
        assert!(admin.namespace("nope").is_err());
        assert_eq!(loader.loads(), 2);
    }

    #[test]
    fn test_dotted_names_load_directly() {
        let dir = fixture(&["admin/users/show.toml"]);
        let set = registry(&dir, CountingLoader::new());

        assert_eq!(set.call("admin.users.show", &[]).unwrap()["handler"], json!("show"));
        assert_eq!(set.call("admin/users/show", &[]).unwrap()["handler"], json!("show"));
    }

    #[test]
    fn test_exists_does_not_load() {
        let dir = fixture(&["report.toml"]);
        let loader = CountingLoader::new();
        let set = registry(&dir, loader.clone());

        assert!(set.exists("report"));
        assert!(!set.registered("report"));
        assert!(!set.exists("absent"));
        assert_eq!(loader.loads(), 0);
        assert_eq!(set.state("report"), None);

        // the first call still loads, binds and memoizes
        set.call("report", &[]).unwrap();
        assert_eq!(loader.loads(), 1);
        assert_eq!(set.state("report"), Some(EntryState::Resolved));
        assert!(set.exists("report"));

        set.register("planned", HandlerSource::Unset);
        assert!(set.exists("planned"));
    }

    #[test]
    fn test_apply_named() {
        let dir = fixture(&[]);
        let set: ClosureSet<()> = registry(&dir, CountingLoader::new());
        set.register(
            "pair",
            Handler::with_params(
                [crate::Param::required("a"), crate::Param::optional("b", 10)],
                |_, args: &[Value]| Ok(json!([args[0], args[1]])),
            ),
        );

        let named: NamedArgs = [("a", json!(5))].into_iter().collect();
        assert_eq!(set.apply("pair", named).unwrap(), json!([5, 10]));
        assert_eq!(set.apply("pair", vec![json!(1), json!(2)]).unwrap(), json!([1, 2]));

        let err = set.apply("pair", NamedArgs::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingRequiredArgument { ref param, ref handler }
                if param == "a" && handler == "pair"
        ));
    }

    struct AppState {
        name: &'static str,
    }

    #[test]
    fn test_handlers_bind_registry_context() {
        let set = ClosureSet::new(
            Some(Arc::new(AppState { name: "zf" })),
            "handlers",
            Arc::new(ManifestLoader::<AppState>::new()),
        );
        set.register(
            "whoami",
            Handler::new(|ctx: Option<&AppState>, _: &[Value]| {
                Ok(json!(ctx.map(|c| c.name)))
            }),
        );
        assert_eq!(set.call("whoami", &[]).unwrap(), json!("zf"));
    }

    #[test]
    fn test_manifest_handlers_resolve_through_registry() {
        let dir = fixture(&[]);
        fs::create_dir_all(dir.path().join("handlers/math")).unwrap();
        fs::write(
            dir.path().join("handlers/math/scale.toml"),
            "factory = \"scale\"\n\n[[params]]\nname = \"value\"\n\n[options]\nfactor = 3\n",
        )
        .unwrap();

        let loader = ManifestLoader::<()>::new();
        loader.factory("scale", |options: &crate::loader::Options| {
            let factor = options.get("factor").and_then(Value::as_i64).unwrap_or(1);
            Ok(Handler::new(move |_, args: &[Value]| {
                Ok(json!(args[0].as_i64().unwrap_or(0) * factor))
            }))
        });
        let set: ClosureSet<()> = ClosureSet::new(None, "handlers", Arc::new(loader))
            .with_include_roots([dir.path().to_path_buf()]);

        let named = NamedArgs::new().with("value", json!(4));
        assert_eq!(set.call_named("math.scale", &named).unwrap(), json!(12));
    }

    #[test]
    fn test_concurrent_first_lookups_load_once() {
        let dir = fixture(&["home.toml"]);
        let loader = CountingLoader::new();
        let set = Arc::new(registry(&dir, loader.clone()));
        let start = Arc::new(Barrier::new(8));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let set = set.clone();
                let start = start.clone();
                std::thread::spawn(move || {
                    start.wait();
                    set.handler("home").unwrap()
                })
            })
            .collect();
        let resolved: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(loader.loads(), 1);
        assert!(resolved.iter().all(|h| Arc::ptr_eq(h, &resolved[0])));
    }

    /// Registry whose `wrap` factory resolves `options.target` from the
    /// registry that is loading it
    fn nesting_registry(dir: &TempDir) -> Arc<ClosureSet<()>> {
        let this: Arc<OnceLock<Weak<ClosureSet<()>>>> = Arc::default();
        let loader = Arc::new(ManifestLoader::<()>::new());
        loader.factory("leaf", |_: &Options| {
            Ok(Handler::new(|_, _: &[Value]| Ok(json!("inner"))))
        });
        let registry = this.clone();
        loader.factory("wrap", move |options: &Options| {
            let set = registry
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| Error::handler("registry dropped"))?;
            let target = options.get("target").and_then(Value::as_str).unwrap_or_default();
            let inner = set.handler(target)?;
            Ok(Handler::new(move |_, args: &[Value]| {
                Ok(json!({ "wrapped": inner.call(args)? }))
            }))
        });

        let set = ClosureSet::new(None, "handlers", loader)
            .with_include_roots([dir.path().to_path_buf()]);
        let set = Arc::new(set);
        this.set(Arc::downgrade(&set)).unwrap();
        set
    }

    fn manifests(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("handlers")).unwrap();
        for (name, content) in files {
            fs::write(dir.path().join("handlers").join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn test_load_may_resolve_sibling_names() {
        let dir = manifests(&[
            ("outer.toml", "factory = \"wrap\"\n[options]\ntarget = \"inner\"\n"),
            ("inner.toml", "factory = \"leaf\"\n"),
        ]);
        let set = nesting_registry(&dir);

        assert_eq!(set.call("outer", &[]).unwrap(), json!({ "wrapped": "inner" }));
        assert_eq!(set.state("outer"), Some(EntryState::Resolved));
        assert_eq!(set.state("inner"), Some(EntryState::Resolved));
    }

    #[test]
    fn test_load_requiring_itself_fails() {
        let dir = manifests(&[(
            "selfish.toml",
            "factory = \"wrap\"\n[options]\ntarget = \"selfish\"\n",
        )]);
        let set = nesting_registry(&dir);

        assert!(matches!(
            set.call("selfish", &[]),
            Err(Error::InvalidHandler { ref name, .. }) if name == "selfish"
        ));
        // the claim is released, so asking again fails the same way
        assert!(matches!(set.handler("selfish"), Err(Error::InvalidHandler { .. })));
        assert_eq!(set.state("selfish"), None);
    }

    #[test]
    fn test_namespace_exists_and_registered() {
        let dir = fixture(&["admin/users/show.toml"]);
        let loader = CountingLoader::new();
        let set = registry(&dir, loader.clone());
        set.register("admin.audit", HandlerSource::Unset);

        let admin = set.namespace("admin").unwrap();
        assert!(admin.exists("audit"));
        assert!(admin.registered("audit"));

        let users = admin.namespace("users").unwrap();
        assert!(users.exists("show"));
        assert!(!users.registered("show"));
        assert!(!users.exists("edit"));
        assert!(!set.exists("show"));
        assert_eq!(loader.loads(), 0);
    }
}
