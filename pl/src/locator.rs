//! Template Locator
//!
//! Resolves a logical template name (`users.profile` or `users/profile`) to an
//! absolute source path. Modules are searched first, in configured order, and
//! the default views directory is the fallback.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::config::ModuleLocation;
use crate::error::{Error, Result};

static DOTTED_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][\w-]*)\.").expect("static regex"));

/// Finds a view inside a module search scheme
pub trait ModuleResolver: Send + Sync {
    /// Returns the directory holding the view and the view's file name
    fn resolve(&self, view_file: &str, module: Option<&str>) -> Option<(PathBuf, String)>;
}

/// Ordered `(base, offset)` module locations; the first existing file wins
#[derive(Debug, Clone, Default)]
pub struct ModuleLocations {
    locations: Vec<ModuleLocation>,
}

impl ModuleLocations {
    pub fn new(locations: Vec<ModuleLocation>) -> Self {
        Self { locations }
    }

    /// Candidate `(module, subpath)` pairs for a view file
    ///
    /// The current module is tried with the full directory of the view, then
    /// the first directory segment of the view is tried as a module name.
    fn candidates(view_file: &str, module: Option<&str>) -> (Vec<(String, String)>, String) {
        let (dir, file) = match view_file.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", view_file),
        };

        let mut candidates = Vec::new();
        if let Some(module) = module.filter(|m| !m.is_empty()) {
            candidates.push((module.to_string(), dir.to_string()));
        }
        if !dir.is_empty() {
            let (first, rest) = dir.split_once('/').unwrap_or((dir, ""));
            candidates.push((first.to_string(), rest.to_string()));
        }

        (candidates, file.to_string())
    }
}

impl ModuleResolver for ModuleLocations {
    fn resolve(&self, view_file: &str, module: Option<&str>) -> Option<(PathBuf, String)> {
        let (candidates, file) = Self::candidates(view_file, module);

        for location in &self.locations {
            for (module, subpath) in &candidates {
                let dir = location.base.join(module).join(&location.offset).join(subpath);
                if dir.join(&file).is_file() {
                    debug!(?dir, %file, "ModuleLocations::resolve: found");
                    return Some((dir, file));
                }
            }
        }

        None
    }
}

/// A located template file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    /// Name as written by the caller, e.g. `users.profile`
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

impl TemplateSource {
    /// Reads file metadata; an unreadable file counts as missing
    pub fn stat(name: &str, path: PathBuf) -> Result<Self> {
        match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => Ok(Self {
                name: name.to_string(),
                path,
                modified: modified.into(),
            }),
            Err(e) => {
                warn!(?path, error = %e, "TemplateSource::stat: unreadable");
                Err(Error::TemplateNotFound { name: name.to_string() })
            }
        }
    }

    pub fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path).map_err(|e| {
            warn!(path = ?self.path, error = %e, "TemplateSource::read: unreadable");
            Error::TemplateNotFound {
                name: self.name.clone(),
            }
        })
    }
}

/// Resolves logical template names to files
#[derive(Clone)]
pub struct Locator {
    views_path: PathBuf,
    extension: String,
    modules: Option<Arc<dyn ModuleResolver>>,
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("views_path", &self.views_path)
            .field("extension", &self.extension)
            .field("modules", &self.modules.is_some())
            .finish()
    }
}

impl Locator {
    pub fn new(views_path: impl AsRef<Path>, extension: impl Into<String>) -> Self {
        Self {
            views_path: views_path.as_ref().to_path_buf(),
            extension: extension.into(),
            modules: None,
        }
    }

    /// Consult a module resolver before the default views directory
    pub fn with_modules(mut self, modules: Arc<dyn ModuleResolver>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn views_path(&self) -> &Path {
        &self.views_path
    }

    /// Turns `users.profile` into `users/profile.<ext>`
    pub fn normalize(&self, name: &str) -> String {
        let name = name.trim().trim_start_matches('/');
        let name = DOTTED_SEGMENT.replace_all(name, "$1/");
        format!("{}{}", name, self.extension)
    }

    /// Finds the absolute path of a template, if it exists
    pub fn find(&self, name: &str, module: Option<&str>) -> Option<PathBuf> {
        let view_file = self.normalize(name);
        debug!(%name, %view_file, ?module, "Locator::find: called");

        let path = self
            .modules
            .as_ref()
            .and_then(|modules| modules.resolve(&view_file, module))
            .map(|(dir, file)| dir.join(file))
            .unwrap_or_else(|| self.views_path.join(&view_file));

        if !path.is_file() {
            debug!(?path, "Locator::find: not a file");
            return None;
        }

        Some(fs::canonicalize(&path).unwrap_or(path))
    }

    /// Locate a template; fails loudly with `TemplateNotFound` or returns `None`
    pub fn locate(&self, name: &str, module: Option<&str>, fail_on_missing: bool) -> Result<Option<PathBuf>> {
        match self.find(name, module) {
            Some(path) => Ok(Some(path)),
            None if fail_on_missing => Err(Error::TemplateNotFound { name: name.to_string() }),
            None => Ok(None),
        }
    }

    /// Locates a template and reads its modification time
    pub fn source(&self, name: &str, module: Option<&str>) -> Result<TemplateSource> {
        let path = self
            .locate(name, module, true)?
            .ok_or_else(|| Error::TemplateNotFound { name: name.to_string() })?;
        TemplateSource::stat(name, path)
    }

    /// Cheap existence check used by `@includeIf`
    pub fn exists(&self, name: &str, module: Option<&str>) -> bool {
        self.find(name, module).is_some()
    }
}
