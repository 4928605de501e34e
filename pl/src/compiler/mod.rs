//! Directive Compiler
//!
//! Lowers template text into template script by running an ordered list of
//! textual rewrite passes. User-registered directives run first, then the
//! built-in passes in [`directives::PASSES`] order.
//!
//! The compiler never inspects render data, so the same source always compiles
//! to the same script.

pub mod directives;
mod scan;

use tracing::debug;

use crate::locator::Locator;

/// A user-supplied rewrite, run before the built-in passes
pub type CustomDirective = Box<dyn Fn(&str) -> String + Send + Sync>;

/// What a compile pass may consult besides the text itself
#[derive(Clone, Copy)]
pub struct CompileContext<'a> {
    locator: Option<&'a Locator>,
    module: Option<&'a str>,
}

impl<'a> CompileContext<'a> {
    pub fn new(locator: &'a Locator, module: Option<&'a str>) -> Self {
        Self {
            locator: Some(locator),
            module,
        }
    }

    /// A context with no filesystem; every existence check fails
    pub fn detached() -> Self {
        Self {
            locator: None,
            module: None,
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.locator.is_some_and(|locator| locator.exists(name, self.module))
    }
}

/// Ordered pipeline of directive passes
#[derive(Default)]
pub struct Compiler {
    custom: Vec<(String, CustomDirective)>,
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("custom", &self.custom.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .finish()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom directive; custom directives run in registration order
    pub fn directive<F>(&mut self, name: impl Into<String>, rewrite: F) -> &mut Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.custom.push((name.into(), Box::new(rewrite)));
        self
    }

    /// Names of all passes in execution order
    pub fn pass_names(&self) -> Vec<&str> {
        self.custom
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(directives::PASSES.iter().map(|pass| pass.name))
            .collect()
    }

    /// Compile raw template text into template script
    pub fn compile(&self, raw: &str, ctx: &CompileContext<'_>) -> String {
        debug!(len = raw.len(), custom = self.custom.len(), "Compiler::compile: called");
        let mut text = raw.to_string();

        for (_, rewrite) in &self.custom {
            text = rewrite(&text);
        }

        for pass in directives::PASSES {
            text = (pass.rewrite)(&text, ctx);
        }

        text
    }
}
