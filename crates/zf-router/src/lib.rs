//! zf-router: Ordered, regex-backed route table
//!
//! Rules are kept per HTTP method (plus the synthetic `CLI` method) in the
//! order they were appended. Dispatch walks that list and returns the first
//! rule whose pattern matches the path.
//!
//! ## Path Syntax
//! - Literal segments: `/users`, `/api/v1/health`
//! - `:name` - Named placeholder (captures one non-empty segment)
//!
//! ## Priority
//! First registered, first tried. There is no most-specific-wins ordering:
//! `/users/:id` appended before `/users/me` shadows it.
//!
//! ## Fast reject
//! A pattern with placeholders only runs its regex when the path starts with
//! the pattern's literal prefix (everything before the first placeholder).
//! Static patterns are compared with plain string equality.
//!
//! ## Example
//! ```
//! use zf_router::RouteTable;
//!
//! let mut table = RouteTable::new();
//! table.append("GET", "/users", "users.list");
//! table.append("GET", "/users/:id", "users.show");
//!
//! let hit = table.dispatch("GET", "/users/42").unwrap();
//! assert_eq!(*hit.handler, "users.show");
//! assert_eq!(hit.params.unwrap().get("id"), Some("42"));
//! ```
//!
//! Configure fully before serving: `append` takes `&mut self`, so the table
//! cannot change while it is being dispatched against.

use parking_lot::RwLock;
use regex::Regex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Method name used for command-line rules
pub const CLI_METHOD: &str = "CLI";

/// Captured placeholder values, in the order the placeholders appear
///
/// A placeholder that took part in the match but captured nothing is kept
/// with a `None` value rather than dropped. When a pattern repeats a
/// placeholder name, the last capture wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: SmallVec<[(String, Option<String>); 4]>,
}

impl Params {
    /// Captured value for `name`, if the placeholder exists and captured text
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether the pattern declared a placeholder called `name`
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Captured params as a HashMap; placeholders without a value are skipped
    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    fn push(&mut self, name: &str, value: Option<&str>) {
        self.entries.push((name.to_string(), value.map(str::to_string)));
    }
}

/// Compiled form of a route pattern
#[derive(Debug)]
pub struct Matcher {
    names: Vec<String>,
    regex: Regex,
}

impl Matcher {
    /// Compile a pattern into an anchored regex
    ///
    /// Literal segments become `(?:/literal)` groups matching exactly that
    /// text, placeholder segments become `(?:/([^/?]+))`.
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let (names, source) = translate(pattern);
        let regex = Regex::new(&source)?;
        debug_assert_eq!(names.len() + 1, regex.captures_len());
        Ok(Self { names, regex })
    }

    /// Placeholder names, left to right
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Run the regex against `path`
    pub fn captures(&self, path: &str) -> Option<Params> {
        let caps = self.regex.captures(path)?;
        let mut params = Params::default();
        for (idx, name) in self.names.iter().enumerate() {
            params.push(name, caps.get(idx + 1).map(|m| m.as_str()));
        }
        Some(params)
    }
}

/// Build the placeholder list and regex source for a pattern
fn translate(pattern: &str) -> (Vec<String>, String) {
    let mut names = Vec::new();
    let mut source = String::with_capacity(pattern.len() * 2 + 2);
    source.push('^');

    let mut segments = pattern.split('/');
    // Text before the first slash is not a segment and can never be a placeholder
    if let Some(head) = segments.next() {
        source.push_str(&regex::escape(head));
    }
    for segment in segments {
        match placeholder_name(segment) {
            Some(name) => {
                names.push(name.to_string());
                source.push_str("(?:/([^/?]+))");
            }
            None => {
                source.push_str("(?:/");
                source.push_str(&regex::escape(segment));
                source.push(')');
            }
        }
    }

    source.push('$');
    (names, source)
}

fn placeholder_name(segment: &str) -> Option<&str> {
    segment.strip_prefix(':').filter(|name| !name.is_empty())
}

/// Byte offset of the first placeholder segment's leading `/`
fn placeholder_start(pattern: &str) -> Option<usize> {
    pattern.match_indices("/:").map(|(at, _)| at).find(|&at| {
        let rest = &pattern[at + 1..];
        let segment = rest.split('/').next().unwrap_or(rest);
        placeholder_name(segment).is_some()
    })
}

/// One registered route
#[derive(Debug, Clone)]
pub struct Rule<H> {
    pattern: String,
    handler: H,
    module: Option<String>,
    placeholder_at: Option<usize>,
}

impl<H> Rule<H> {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// True when the pattern has no placeholder segment
    pub fn is_static(&self) -> bool {
        self.placeholder_at.is_none()
    }

    /// Literal text before the first placeholder (the whole pattern if static)
    pub fn prefix(&self) -> &str {
        match self.placeholder_at {
            Some(at) => &self.pattern[..at],
            None => &self.pattern,
        }
    }
}

/// Successful dispatch
#[derive(Debug)]
pub struct Dispatch<'a, H> {
    /// Handler reference stored with the rule
    pub handler: &'a H,
    /// Captured params; `None` for static patterns
    pub params: Option<Params>,
    /// Module tag active when the rule was appended
    pub module: Option<&'a str>,
}

/// Anything that can hand a method and path to [`RouteTable::run`]
pub trait RouteSource {
    fn method(&self) -> &str;
    fn path(&self) -> &str;
}

/// Ordered per-method route table
///
/// Matchers are compiled lazily on first use and cached per pattern.
#[derive(Debug)]
pub struct RouteTable<H> {
    rules: HashMap<String, Vec<Rule<H>>>,
    module: Option<String>,
    /// `None` caches a pattern that failed to compile
    matchers: RwLock<HashMap<String, Option<Arc<Matcher>>>>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
            module: None,
            matchers: RwLock::new(HashMap::new()),
        }
    }
}

impl<H> RouteTable<H> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the module tag attached to rules appended from now on
    pub fn module(&mut self, module: Option<&str>) {
        self.module = module.map(str::to_string);
    }

    /// Append a rule
    ///
    /// The pattern is not validated here. A pattern that cannot compile
    /// simply never matches.
    ///
    /// # Example
    /// ```
    /// use zf_router::RouteTable;
    ///
    /// let mut table = RouteTable::new();
    /// table.append("get", "/users/:id", 0);
    /// assert!(table.has_method("GET"));
    /// ```
    pub fn append(&mut self, method: &str, pattern: &str, handler: H) {
        let method = method.to_uppercase();
        tracing::debug!(%method, pattern, module = ?self.module, "route appended");
        self.rules.entry(method).or_default().push(Rule {
            pattern: pattern.to_string(),
            handler,
            module: self.module.clone(),
            placeholder_at: placeholder_start(pattern),
        });
    }

    /// Append many `(method, pattern, handler)` rules in order
    pub fn bulk<M, P>(&mut self, rules: impl IntoIterator<Item = (M, P, H)>)
    where
        M: AsRef<str>,
        P: AsRef<str>,
    {
        for (method, pattern, handler) in rules {
            self.append(method.as_ref(), pattern.as_ref(), handler);
        }
    }

    /// Compiled matcher for `pattern`, reusing the cache
    pub fn parse(&self, pattern: &str) -> Option<Arc<Matcher>> {
        if let Some(cached) = self.matchers.read().get(pattern) {
            return cached.clone();
        }
        let compiled = match Matcher::compile(pattern) {
            Ok(matcher) => Some(Arc::new(matcher)),
            Err(err) => {
                tracing::warn!(pattern, error = %err, "route pattern failed to compile");
                None
            }
        };
        self.matchers
            .write()
            .entry(pattern.to_string())
            .or_insert(compiled)
            .clone()
    }

    /// Match `path` against `pattern`, returning the captured params
    pub fn match_pattern(&self, pattern: &str, path: &str) -> Option<Params> {
        self.parse(pattern)?.captures(path)
    }

    /// Find the first rule for `method` that matches `path`
    ///
    /// # Example
    /// ```
    /// use zf_router::RouteTable;
    ///
    /// let mut table = RouteTable::new();
    /// table.append("GET", "/about", "about");
    ///
    /// let hit = table.dispatch("GET", "/about").unwrap();
    /// assert_eq!(*hit.handler, "about");
    /// assert!(hit.params.is_none());
    /// assert!(table.dispatch("GET", "/about/").is_none());
    /// ```
    pub fn dispatch(&self, method: &str, path: &str) -> Option<Dispatch<'_, H>> {
        let method = method.to_uppercase();
        let Some(rules) = self.rules.get(&method) else {
            tracing::trace!(%method, path, "no rules for method");
            return None;
        };

        for rule in rules {
            let params = match rule.placeholder_at {
                None if rule.pattern == path => None,
                None => continue,
                Some(at) => {
                    let prefix = &rule.pattern[..at];
                    if !prefix.is_empty() && !path.starts_with(prefix) {
                        tracing::trace!(pattern = %rule.pattern, path, "prefix rejected");
                        continue;
                    }
                    match self.match_pattern(&rule.pattern, path) {
                        Some(params) => Some(params),
                        None => continue,
                    }
                }
            };
            tracing::debug!(%method, path, pattern = %rule.pattern, "route matched");
            return Some(Dispatch {
                handler: &rule.handler,
                params,
                module: rule.module.as_deref(),
            });
        }

        None
    }

    /// Dispatch using the method and path carried by `source`
    pub fn run(&self, source: &impl RouteSource) -> Option<Dispatch<'_, H>> {
        self.dispatch(source.method(), source.path())
    }

    /// Rules for a method, in registration order
    pub fn rules(&self, method: &str) -> &[Rule<H>] {
        self.rules
            .get(&method.to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Check if a method has any routes registered
    pub fn has_method(&self, method: &str) -> bool {
        self.rules.contains_key(&method.to_uppercase())
    }

    /// Get all registered methods
    pub fn methods(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    /// Number of patterns compiled so far
    pub fn compiled_len(&self) -> usize {
        self.matchers.read().len()
    }
}
