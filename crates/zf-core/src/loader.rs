//! Handler loading
//!
//! A load-spec such as `users.show` maps to the relative file
//! `users/show.<ext>`, which is searched under each include root in order.
//! What the file contains is up to the [`Loader`]; the default
//! [`ManifestLoader`] reads a TOML manifest naming a compiled-in factory.
//!
//! ```toml
//! factory = "users.show"
//!
//! [[params]]
//! name = "id"
//!
//! [[params]]
//! name = "format"
//! default = "json"
//!
//! [options]
//! table = "users"
//! ```

use crate::handler::{Handler, Param, Value};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Turns a handler file into a handler
pub trait Loader<C>: Send + Sync {
    /// Extension handler files carry, without the dot
    fn extension(&self) -> &str;

    /// Evaluate the file at `path`
    ///
    /// `Ok(None)` means the file was read but produced no handler.
    fn load(&self, path: &Path) -> Result<Option<Handler<C>>>;
}

/// Relative file path for a load-spec: `.` and `/` become path separators
///
/// Empty components are dropped, so a spec can never climb out of its root.
pub fn spec_path(spec: &str, extension: &str) -> PathBuf {
    let mut path: PathBuf = spec
        .split(['.', '/'])
        .filter(|part| !part.is_empty())
        .collect();
    if !extension.is_empty() {
        path.set_extension(extension);
    }
    path
}

/// First existing file for `candidate` across `roots`
pub fn find_file(candidate: &Path, roots: &[PathBuf]) -> Option<PathBuf> {
    find(candidate, roots, Path::is_file)
}

/// First existing directory for `candidate` across `roots`
pub fn find_dir(candidate: &Path, roots: &[PathBuf]) -> Option<PathBuf> {
    find(candidate, roots, Path::is_dir)
}

fn find(candidate: &Path, roots: &[PathBuf], accept: fn(&Path) -> bool) -> Option<PathBuf> {
    if candidate.is_absolute() || roots.is_empty() {
        return accept(candidate).then(|| candidate.to_path_buf());
    }
    roots
        .iter()
        .map(|root| root.join(candidate))
        .find(|path| accept(path))
}

/// Factory options from a manifest's `[options]` table
pub type Options = serde_json::Map<String, Value>;

type Factory<C> = Arc<dyn Fn(&Options) -> Result<Handler<C>> + Send + Sync>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    factory: Option<String>,
    #[serde(default)]
    params: Vec<Param>,
    #[serde(default)]
    options: Options,
}

/// Default loader: TOML manifests resolved against a catalog of factories
pub struct ManifestLoader<C> {
    factories: RwLock<HashMap<String, Factory<C>>>,
}

impl<C> Default for ManifestLoader<C> {
    fn default() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }
}

impl<C> ManifestLoader<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory manifests can name
    pub fn factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Options) -> Result<Handler<C>> + Send + Sync + 'static,
    {
        self.factories.write().insert(name.into(), Arc::new(factory));
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    fn invalid(path: &Path, reason: impl Into<String>) -> Error {
        Error::InvalidHandler {
            name: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl<C> Loader<C> for ManifestLoader<C> {
    fn extension(&self) -> &str {
        "toml"
    }

    fn load(&self, path: &Path) -> Result<Option<Handler<C>>> {
        let content = fs::read_to_string(path)?;
        let manifest: Manifest =
            toml::from_str(&content).map_err(|e| Self::invalid(path, e.to_string()))?;

        let Some(name) = manifest.factory else {
            return Ok(None);
        };
        let factory = self
            .factories
            .read()
            .get(&name)
            .cloned()
            .ok_or_else(|| Self::invalid(path, format!("unknown factory \"{name}\"")))?;

        let handler = (*factory)(&manifest.options)?;
        tracing::debug!(path = %path.display(), factory = %name, "manifest loaded");
        if manifest.params.is_empty() {
            Ok(Some(handler))
        } else {
            Ok(Some(handler.declare(manifest.params)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_loader() -> ManifestLoader<()> {
        let loader = ManifestLoader::new();
        loader.factory("echo", |options: &Options| {
            let prefix = options
                .get("prefix")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            Ok(Handler::new(move |_, args: &[Value]| {
                Ok(json!(format!("{prefix}{}", args[0].as_str().unwrap_or(""))))
            }))
        });
        loader
    }

    #[test]
    fn test_spec_path() {
        assert_eq!(spec_path("users.show", "toml"), PathBuf::from("users/show.toml"));
        assert_eq!(spec_path("users/show", "toml"), PathBuf::from("users/show.toml"));
        assert_eq!(spec_path("../secret", "toml"), PathBuf::from("secret.toml"));
        assert_eq!(spec_path("index", ""), PathBuf::from("index"));
    }

    #[test]
    fn test_find_across_roots() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::create_dir(second.path().join("handlers")).unwrap();
        fs::write(second.path().join("handlers/home.toml"), "").unwrap();

        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(
            find_file(Path::new("handlers/home.toml"), &roots),
            Some(second.path().join("handlers/home.toml"))
        );
        assert_eq!(
            find_dir(Path::new("handlers"), &roots),
            Some(second.path().join("handlers"))
        );
        assert!(find_file(Path::new("handlers"), &roots).is_none());
        assert!(find_file(Path::new("missing.toml"), &roots).is_none());

        let absolute = second.path().join("handlers/home.toml");
        assert_eq!(find_file(&absolute, &[]), Some(absolute.clone()));
    }

    #[test]
    fn test_manifest_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.toml");
        fs::write(
            &path,
            concat!(
                "factory = \"echo\"\n\n",
                "[[params]]\nname = \"who\"\ndefault = \"world\"\n\n",
                "[options]\nprefix = \"hi \"\n",
            ),
        )
        .unwrap();

        let handler = echo_loader().load(&path).unwrap().unwrap();
        assert_eq!(handler.params(), &[Param::optional("who", "world")]);
        let bound = handler.bind("hello", None);
        assert_eq!(bound.call(&[]).unwrap(), json!("hi world"));
    }

    #[test]
    fn test_manifest_without_factory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        fs::write(&path, "[options]\nx = 1\n").unwrap();
        assert!(echo_loader().load(&path).unwrap().is_none());
    }

    #[test]
    fn test_manifest_errors() {
        let dir = tempfile::tempdir().unwrap();
        let unknown = dir.path().join("unknown.toml");
        fs::write(&unknown, "factory = \"nope\"\n").unwrap();
        assert!(matches!(
            echo_loader().load(&unknown),
            Err(Error::InvalidHandler { .. })
        ));

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "factory = ").unwrap();
        assert!(matches!(
            echo_loader().load(&broken),
            Err(Error::InvalidHandler { .. })
        ));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(echo_loader().load(&missing), Err(Error::Io(_))));
    }
}
