//! Engine facade
//!
//! Ties the locator, compiler, artifact cache, renderer and translator
//! together. One [`Engine`] serves many renders; each render gets its own
//! output buffers, sections and translation state.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{ArtifactCache, CacheBackend, FileCache};
use crate::compiler::{CompileContext, Compiler};
use crate::config::Config;
use crate::error::{Error, RenderError, Result};
use crate::i18n::{DirLocaleLoader, LocaleLoader, Translator};
use crate::locator::{Locator, ModuleLocations, ModuleResolver};
use crate::minify::minify_html;
use crate::render::{ErrorPresenter, HtmlErrorPresenter, RenderHost, RenderState, Renderer};
use crate::script::value::escape_html;
use crate::script::{Scope, ValueExt, builtin_names};

/// A function templates may call by name
pub type HostFunction = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

/// Helpers every render provides; user functions may not shadow them
pub const HELPERS: &[&str] = &[
    "include",
    "partial",
    "section",
    "component",
    "each",
    "exists",
    "yield",
    "start_section",
    "close_section",
    "untouch",
    "lang",
    "choice",
    "json",
    "javascript",
];

/// Per-render options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Locale for `@lang`/`@choice`; the configured default when `None`
    pub locale: Option<String>,
    /// Module searched first when locating templates
    pub module: Option<String>,
}

impl RenderOptions {
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

/// Builds an [`Engine`] with non-default collaborators
pub struct EngineBuilder {
    config: Config,
    cache: Option<Arc<dyn CacheBackend>>,
    locales: Option<Arc<dyn LocaleLoader>>,
    presenter: Option<Arc<dyn ErrorPresenter>>,
    modules: Option<Arc<dyn ModuleResolver>>,
    compiler: Compiler,
    functions: HashMap<String, HostFunction>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: None,
            locales: None,
            presenter: None,
            modules: None,
            compiler: Compiler::new(),
            functions: HashMap::new(),
        }
    }

    pub fn cache(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(backend);
        self
    }

    pub fn locales(mut self, loader: Arc<dyn LocaleLoader>) -> Self {
        self.locales = Some(loader);
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn ErrorPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn modules(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.modules = Some(resolver);
        self
    }

    pub fn directive<F>(mut self, name: impl Into<String>, rewrite: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.compiler.directive(name, rewrite);
        self
    }

    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate().map_err(|e| Error::Config(e.to_string()))?;
        let config = self.config;

        let modules = self.modules.or_else(|| {
            (!config.modules.is_empty())
                .then(|| Arc::new(ModuleLocations::new(config.modules.clone())) as Arc<dyn ModuleResolver>)
        });
        let mut locator = Locator::new(&config.views_path, config.extension.clone());
        if let Some(modules) = modules {
            locator = locator.with_modules(modules);
        }

        let backend = self
            .cache
            .unwrap_or_else(|| Arc::new(FileCache::new(&config.cache_path)));
        let cache = ArtifactCache::new(backend, config.environment, config.cache_ttl_secs);

        let presenter = self.presenter.unwrap_or_else(|| Arc::new(HtmlErrorPresenter));
        let renderer = Renderer::new(presenter).with_denylist_extra(&config.denylist_extra);

        let locales = self
            .locales
            .unwrap_or_else(|| Arc::new(DirLocaleLoader::new(&config.locale_path)));

        let mut engine = Engine {
            locator,
            compiler: self.compiler,
            cache,
            renderer,
            locales,
            functions: HashMap::new(),
            globals: Map::new(),
            config,
        };
        for (name, f) in self.functions {
            engine.register(name, f);
        }

        info!(views = ?engine.config.views_path, environment = ?engine.config.environment, "Engine built");
        Ok(engine)
    }
}

/// Compiles, caches and renders templates
pub struct Engine {
    config: Config,
    locator: Locator,
    compiler: Compiler,
    cache: ArtifactCache,
    renderer: Renderer,
    locales: Arc<dyn LocaleLoader>,
    functions: HashMap<String, HostFunction>,
    globals: Map<String, Value>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("locator", &self.locator)
            .field("compiler", &self.compiler)
            .field("cache", &self.cache)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine with the default collaborators for `config`
    pub fn new(config: Config) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Registers a custom directive, run before the built-in passes
    ///
    /// Artifacts compiled earlier are not recompiled; purge them if needed.
    pub fn directive<F>(&mut self, name: impl Into<String>, rewrite: F) -> &mut Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.compiler.directive(name, rewrite);
        self
    }

    /// Exposes a function to templates
    pub fn function<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name.into(), Arc::new(f));
        self
    }

    fn register(&mut self, name: String, f: HostFunction) {
        if HELPERS.contains(&name.as_str()) || builtin_names().contains(&name.as_str()) {
            warn!(%name, "Engine::function: name is reserved, ignoring");
            return;
        }
        self.functions.insert(name, f);
    }

    /// Sets a binding visible to every render
    pub fn share(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<&mut Self> {
        self.globals.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Pushes onto a shared array, or concatenates onto a shared string
    pub fn append(&mut self, key: &str, value: impl Serialize) -> Result<&mut Self> {
        let value = serde_json::to_value(value)?;
        match self.globals.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let joined = existing.render_to_string() + &value.render_to_string();
                *existing = Value::String(joined);
            }
            None => {
                self.globals.insert(key.to_string(), value);
            }
        }
        Ok(self)
    }

    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }

    /// Whether a template can be located
    pub fn exists(&self, name: &str, module: Option<&str>) -> bool {
        self.locator.exists(name, module)
    }

    /// Compiled script for a template, from cache when fresh
    pub fn compile(&self, name: &str, module: Option<&str>) -> Result<String> {
        let source = self.locator.source(name, module)?;

        if let Some(artifact) = self.cache.lookup(&source.path, source.modified) {
            return Ok(artifact.source);
        }

        let raw = source.read()?;
        let compiled = self.compiler.compile(&raw, &CompileContext::new(&self.locator, module));
        self.cache.store(&source.path, &compiled);
        info!(%name, path = ?source.path, "Compiled template");
        Ok(compiled)
    }

    /// Compiles template text that has no file
    pub fn compile_string(&self, raw: &str) -> String {
        self.compiler.compile(raw, &CompileContext::new(&self.locator, None))
    }

    /// Drops the cached artifact for one template
    pub fn purge(&self, name: &str, module: Option<&str>) -> Result<()> {
        let source = self.locator.source(name, module)?;
        self.cache.purge(&source.path)?;
        info!(%name, "Purged compiled template");
        Ok(())
    }

    /// Drops every cached artifact
    pub fn purge_all(&self) -> Result<()> {
        self.cache.clear()?;
        Ok(())
    }

    pub fn render(&self, name: &str, data: impl Serialize) -> Result<String> {
        self.render_with(name, data, &RenderOptions::default())
    }

    pub fn render_with(&self, name: &str, data: impl Serialize, options: &RenderOptions) -> Result<String> {
        debug!(%name, ?options, "Engine::render_with: called");
        let bindings = self.bindings(data)?;
        let mut session = Session::new(self, options);
        let output = self.execute_template(name, bindings, &mut session)?;
        Ok(self.finish(output))
    }

    /// Renders template text directly; nothing is cached
    pub fn render_string(&self, raw: &str, data: impl Serialize) -> Result<String> {
        let bindings = self.bindings(data)?;
        let compiled = self.compile_string(raw);
        let mut session = Session::new(self, &RenderOptions::default());
        let output = self.renderer.execute(&compiled, bindings, &mut session)?;
        Ok(self.finish(output))
    }

    /// Minifies HTML with the configured comment policy
    pub fn minify(&self, html: &str) -> String {
        minify_html(html, self.config.minify_keep_comments)
    }

    fn finish(&self, output: String) -> String {
        if self.config.compress_content {
            self.minify(&output)
        } else {
            output
        }
    }

    fn bindings(&self, data: impl Serialize) -> Result<Scope> {
        let mut scope: Scope = self.globals.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        match serde_json::to_value(data)? {
            Value::Object(map) => scope.extend(map),
            Value::Null => {}
            other => {
                return Err(Error::Data(<serde_json::Error as serde::de::Error>::custom(format!(
                    "render data must be an object, got {}",
                    other.type_name()
                ))));
            }
        }
        Ok(scope)
    }

    fn execute_template(&self, name: &str, bindings: Scope, session: &mut Session<'_>) -> Result<String> {
        let limit = self.config.max_include_depth;
        if session.depth >= limit {
            return Err(RenderError::IncludeDepth {
                name: name.to_string(),
                limit,
            }
            .into());
        }

        let compiled = self.compile(name, session.module.as_deref())?;
        session.depth += 1;
        let result = self.renderer.execute(&compiled, bindings, session);
        session.depth -= 1;
        Ok(result?)
    }
}

/// State for one top-level render
struct Session<'e> {
    engine: &'e Engine,
    state: RenderState,
    translator: Translator,
    module: Option<String>,
    depth: usize,
}

impl<'e> Session<'e> {
    fn new(engine: &'e Engine, options: &RenderOptions) -> Self {
        let locale = options.locale.clone().unwrap_or_else(|| engine.config.locale.clone());
        Self {
            engine,
            state: RenderState::new(),
            translator: Translator::new(engine.locales.clone(), locale),
            module: options.module.clone(),
            depth: 0,
        }
    }

    fn include(&mut self, helper: &str, args: &[Value], scope: &Scope) -> std::result::Result<Value, RenderError> {
        let name = string_arg(helper, args, 0)?;
        let mut bindings = scope.clone();
        match args.get(1) {
            Some(Value::Object(overrides)) => bindings.extend(overrides.clone()),
            Some(Value::Null) | None => {}
            Some(other) => {
                return Err(RenderError::type_error(format!(
                    "{}() data must be an array with keys, got {}",
                    helper,
                    other.type_name()
                )));
            }
        }
        self.include_template(&name, bindings)
    }

    fn include_template(&mut self, name: &str, bindings: Scope) -> std::result::Result<Value, RenderError> {
        let engine = self.engine;
        match engine.execute_template(name, bindings, self) {
            Ok(output) => Ok(Value::String(output)),
            Err(Error::Render(fault)) => Err(fault),
            Err(other) => Err(RenderError::Include {
                name: name.to_string(),
                source: Box::new(other),
            }),
        }
    }

    /// `each(view, items, label, empty_view?)`
    fn each(&mut self, args: &[Value], scope: &Scope) -> std::result::Result<Value, RenderError> {
        let view = string_arg("each", args, 0)?;
        let items: Vec<Value> = match args.get(1) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Object(map)) => map.values().cloned().collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(RenderError::type_error(format!(
                    "each() expects array, got {}",
                    other.type_name()
                )));
            }
        };
        let label = string_arg("each", args, 2)?;

        if items.is_empty() {
            return match args.get(3).filter(|v| !v.is_null()) {
                Some(fallback) => self.include_template(&fallback.render_to_string(), scope.clone()),
                None => Ok(Value::from("")),
            };
        }

        let mut output = String::new();
        for item in items {
            let mut bindings = scope.clone();
            bindings.insert(label.clone(), item);
            if let Value::String(rendered) = self.include_template(&view, bindings)? {
                output.push_str(&rendered);
            }
        }
        Ok(Value::String(output))
    }

    fn lang(&mut self, args: &[Value]) -> std::result::Result<Value, RenderError> {
        let key = string_arg("lang", args, 0)?;
        Ok(Value::String(self.translator.line(&key, &params(args.get(1)))))
    }

    fn choice(&mut self, args: &[Value]) -> std::result::Result<Value, RenderError> {
        let key = string_arg("choice", args, 0)?;
        let count = match args.get(1) {
            Some(Value::Array(items)) => items.len() as i64,
            Some(Value::Object(map)) => map.len() as i64,
            Some(value) => value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| RenderError::type_error(format!("choice() count must be a number, got {}", value.type_name())))?,
            None => return Err(missing("choice", 1)),
        };
        Ok(Value::String(self.translator.choice(&key, count, &params(args.get(2)))))
    }
}

impl RenderHost for Session<'_> {
    fn state(&mut self) -> &mut RenderState {
        &mut self.state
    }

    fn call(&mut self, name: &str, args: Vec<Value>, scope: &Scope) -> Option<std::result::Result<Value, RenderError>> {
        let result = match name {
            "include" | "partial" | "section" | "component" => self.include(name, &args, scope),
            "each" => self.each(&args, scope),
            "exists" => string_arg(name, &args, 0)
                .map(|view| Value::Bool(self.engine.exists(&view, self.module.as_deref()))),
            "yield" => string_arg(name, &args, 0).and_then(|section| {
                let default = args.get(1).map(ValueExt::render_to_string).unwrap_or_default();
                self.state.sections.yield_section(&section, &default).map(Value::String)
            }),
            "start_section" => string_arg(name, &args, 0).map(|section| {
                let value = args.get(1).filter(|v| !v.is_null()).map(ValueExt::render_to_string);
                let state = &mut self.state;
                state.sections.start(&section, value, &mut state.output);
                Value::Null
            }),
            "close_section" => {
                let value = args.first().filter(|v| !v.is_null()).map(ValueExt::render_to_string);
                let state = &mut self.state;
                state.sections.close(value, &mut state.output).map(Value::String)
            }
            "untouch" => string_arg(name, &args, 0).map(|text| Value::String(format!("{{{{{}}}}}", text))),
            "lang" => self.lang(&args),
            "choice" => self.choice(&args),
            "json" => Ok(Value::String(json_attribute(args.first()))),
            "javascript" => Ok(Value::String(script_tag(args.first(), args.get(1)))),
            _ => {
                let f = self.engine.functions.get(name)?;
                f(&args).map_err(|message| RenderError::Function {
                    name: name.to_string(),
                    message,
                })
            }
        };
        Some(result)
    }
}

fn missing(name: &str, index: usize) -> RenderError {
    RenderError::Function {
        name: name.to_string(),
        message: format!("missing argument {}", index + 1),
    }
}

fn string_arg(name: &str, args: &[Value], index: usize) -> std::result::Result<String, RenderError> {
    match args.get(index) {
        Some(Value::Array(_) | Value::Object(_)) => Err(RenderError::type_error(format!(
            "{}() argument {} must be a string",
            name,
            index + 1
        ))),
        Some(value) => Ok(value.render_to_string()),
        None => Err(missing(name, index)),
    }
}

/// Placeholder parameters from an object argument
fn params(value: Option<&Value>) -> Vec<(String, String)> {
    match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.render_to_string())).collect(),
        _ => Vec::new(),
    }
}

/// ` <json>` for a non-empty value, nothing otherwise
fn json_attribute(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Array(items)) if items.is_empty() => String::new(),
        Some(Value::Object(map)) if map.is_empty() => String::new(),
        Some(value) => format!(" {}", value),
    }
}

fn script_tag(src: Option<&Value>, attributes: Option<&Value>) -> String {
    let mut parts = Vec::new();
    if let Some(src) = src.map(ValueExt::render_to_string).filter(|s| !s.is_empty()) {
        parts.push(format!("src=\"{}\"", escape_html(&src)));
    }
    match attributes {
        Some(Value::Object(map)) => {
            for (key, value) in map {
                parts.push(format!("{}=\"{}\"", key, escape_html(&value.render_to_string())));
            }
        }
        Some(Value::Array(flags)) => parts.extend(flags.iter().map(ValueExt::render_to_string)),
        Some(value) if value.is_truthy() => parts.push(value.render_to_string()),
        _ => {}
    }
    format!("\n\n\t<script {}></script>\n", parts.join(" "))
}
