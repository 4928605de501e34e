//! Plates - directive-based templates with a cached, sandboxed renderer
//!
//! Templates are written with `{{ echo }}` and `@directive` syntax, lowered
//! by the [`Compiler`] into template script, cached as compiled artifacts and
//! executed by the [`Renderer`] against caller-supplied data.
//!
//! # Layout
//!
//! ```text
//! views/
//! ├── layouts/
//! │   └── main.plate.html     # @yield('content')
//! └── home.plate.html         # @extends('layouts.main')
//! ```
//!
//! # Example
//!
//! ```ignore
//! use plates::{Config, Engine};
//! use serde_json::json;
//!
//! let engine = Engine::new(Config::default())?;
//! let html = engine.render("home", json!({"name": "Ada"}))?;
//! ```

pub mod cache;
pub mod cli;
pub mod compiler;
pub mod config;
mod engine;
pub mod error;
pub mod i18n;
pub mod locator;
pub mod minify;
pub mod render;
pub mod script;
pub mod sections;

pub use cache::{ArtifactCache, CacheBackend, FileCache, MemoryCache};
pub use compiler::{CompileContext, Compiler};
pub use config::{Config, Environment, ModuleLocation};
pub use engine::{Engine, EngineBuilder, HELPERS, HostFunction, RenderOptions};
pub use error::{CacheError, Error, RenderError, Result};
pub use i18n::{DirLocaleLoader, LocaleLoader, MemoryLocaleLoader, Translator};
pub use locator::{Locator, ModuleLocations, ModuleResolver, TemplateSource};
pub use minify::minify_html;
pub use render::{ErrorPresenter, HtmlErrorPresenter, PropagateErrors, Renderer};
