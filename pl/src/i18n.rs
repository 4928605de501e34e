//! Translation lookup, placeholder substitution and pluralization
//!
//! Keys are `file.key`: `auth.failed` looks up `failed` in the `auth` file of
//! the active locale. Each `(file, locale)` pair is loaded at most once per
//! [`Translator`].

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::script::ucfirst;

static EXACT_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\d+)\}\s?").expect("static regex"));
static COUNT_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+),\s?(\d+|\*)\]\s?").expect("static regex"));

/// Translation lines for one file in one locale
pub type Lines = HashMap<String, String>;

/// Source of translation files
pub trait LocaleLoader: Send + Sync {
    fn load(&self, file: &str, locale: &str) -> Result<Lines>;
}

/// Reads `<root>/<locale>/<file>.{yml,yaml,json}`
#[derive(Debug, Clone)]
pub struct DirLocaleLoader {
    root: PathBuf,
}

impl DirLocaleLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl LocaleLoader for DirLocaleLoader {
    fn load(&self, file: &str, locale: &str) -> Result<Lines> {
        let dir = self.root.join(locale);
        for ext in ["yml", "yaml", "json"] {
            let path = dir.join(format!("{}.{}", file, ext));
            if !path.is_file() {
                continue;
            }

            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Locale(format!("failed to read {}: {}", path.display(), e)))?;
            let lines: Lines = if ext == "json" {
                serde_json::from_str(&content)
                    .map_err(|e| Error::Locale(format!("failed to parse {}: {}", path.display(), e)))?
            } else {
                serde_yaml::from_str(&content)
                    .map_err(|e| Error::Locale(format!("failed to parse {}: {}", path.display(), e)))?
            };

            debug!(?path, count = lines.len(), "DirLocaleLoader::load: loaded");
            return Ok(lines);
        }

        Err(Error::Locale(format!(
            "no translation file '{}' for locale '{}' under {}",
            file,
            locale,
            self.root.display()
        )))
    }
}

/// Translation files held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryLocaleLoader {
    files: HashMap<(String, String), Lines>,
}

impl MemoryLocaleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, K, V>(&mut self, locale: &str, file: &str, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.files.insert(
            (file.to_string(), locale.to_string()),
            lines.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        self
    }
}

impl LocaleLoader for MemoryLocaleLoader {
    fn load(&self, file: &str, locale: &str) -> Result<Lines> {
        self.files
            .get(&(file.to_string(), locale.to_string()))
            .cloned()
            .ok_or_else(|| Error::Locale(format!("no translation file '{}' for locale '{}'", file, locale)))
    }
}

/// Per-render translation state
pub struct Translator {
    loader: Arc<dyn LocaleLoader>,
    locale: String,
    /// `(file, locale)` pairs already attempted
    loaded: HashSet<(String, String)>,
    lines: HashMap<(String, String), Lines>,
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("locale", &self.locale)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

impl Translator {
    pub fn new(loader: Arc<dyn LocaleLoader>, locale: impl Into<String>) -> Self {
        Self {
            loader,
            locale: locale.into(),
            loaded: HashSet::new(),
            lines: HashMap::new(),
        }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn set_locale(&mut self, locale: impl Into<String>) {
        self.locale = locale.into();
    }

    /// Whether `(file, locale)` has been loaded or attempted
    pub fn is_loaded(&self, file: &str, locale: &str) -> bool {
        self.loaded.contains(&(file.to_string(), locale.to_string()))
    }

    fn ensure_loaded(&mut self, file: &str) {
        let id = (file.to_string(), self.locale.clone());
        if !self.loaded.insert(id.clone()) {
            return;
        }
        match self.loader.load(file, &self.locale) {
            Ok(lines) => {
                self.lines.insert(id, lines);
            }
            Err(e) => warn!(%file, locale = %self.locale, error = %e, "Translator: load failed"),
        }
    }

    /// Raw line for `file.key`; `None` when it has no translation
    pub fn lookup(&mut self, key: &str) -> Option<String> {
        match key.split_once('.') {
            Some((file, name)) => {
                self.ensure_loaded(file);
                self.lines
                    .get(&(file.to_string(), self.locale.clone()))
                    .and_then(|lines| lines.get(name))
                    .cloned()
            }
            None => self
                .lines
                .iter()
                .filter(|((_, locale), _)| *locale == self.locale)
                .find_map(|(_, lines)| lines.get(key))
                .cloned(),
        }
    }

    /// Translated line with placeholders substituted; the key itself when untranslated
    pub fn line(&mut self, key: &str, params: &[(String, String)]) -> String {
        let line = self.lookup(key).unwrap_or_else(|| key.to_string());
        substitute(&line, params)
    }

    /// Pluralized line for `count`
    pub fn choice(&mut self, key: &str, count: i64, params: &[(String, String)]) -> String {
        let line = self.lookup(key).unwrap_or_else(|| key.to_string());
        substitute(&inflect(&line, count), params)
    }
}

/// Replaces `:NAME`, `:Name` and `:name` placeholders
///
/// The all-caps form receives the uppercased value and the capitalized form
/// the value with its first letter uppercased.
pub fn substitute(line: &str, params: &[(String, String)]) -> String {
    let mut out = line.to_string();
    for (name, value) in params {
        out = out
            .replace(&format!(":{}", name.to_uppercase()), &value.to_uppercase())
            .replace(&format!(":{}", ucfirst(name)), &ucfirst(value))
            .replace(&format!(":{}", name), value);
    }
    out
}

/// Picks the `|`-separated alternative matching `count`
///
/// `{n}` matches exactly n, `[a,b]` matches a through b and `[a,*]` matches a
/// or more. Without a match the second alternative is used for counts above
/// one and the first otherwise.
pub fn inflect(line: &str, count: i64) -> String {
    let alternatives: Vec<&str> = line.split('|').collect();

    for alternative in &alternatives {
        if let Some(caps) = EXACT_COUNT.captures(alternative) {
            if caps[1].parse::<i64>().ok() == Some(count) {
                return EXACT_COUNT.replace(alternative, "").trim().to_string();
            }
            continue;
        }

        if let Some(caps) = COUNT_RANGE.captures(alternative) {
            let low = caps[1].parse::<i64>().unwrap_or(i64::MAX);
            let in_range = match &caps[2] {
                "*" => count >= low,
                high => high.parse::<i64>().is_ok_and(|high| (low..=high).contains(&count)),
            };
            if in_range {
                return COUNT_RANGE.replace(alternative, "").trim().to_string();
            }
        }
    }

    let fallback = if count > 1 {
        alternatives.get(1).or(alternatives.first())
    } else {
        alternatives.first()
    };
    let fallback = fallback.copied().unwrap_or_default();
    let fallback = EXACT_COUNT.replace(fallback, "");
    COUNT_RANGE.replace(&fallback, "").trim().to_string()
}
