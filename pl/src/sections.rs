//! Section Stack
//!
//! Named content regions shared between a child template and its layouts.
//! Opening a section starts a fresh output buffer; closing it captures the
//! buffer and stores it under the section's name.

use std::collections::HashMap;
use tracing::debug;

use crate::error::RenderError;
use crate::render::Output;

/// Placeholder that pulls in the other side's content when sections compose
pub const PARENT_MARKER: &str = "@parent";

#[derive(Debug, Clone)]
struct OpenSection {
    name: String,
    /// Output level once the section's buffer is open
    level: usize,
}

/// Open sections plus the content stored so far in one render
#[derive(Debug, Default)]
pub struct SectionStack {
    open: Vec<OpenSection>,
    contents: HashMap<String, String>,
}

impl SectionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `name`, or stores `value` directly when one is given
    pub fn start(&mut self, name: &str, value: Option<String>, output: &mut Output) {
        debug!(%name, inline = value.is_some(), "SectionStack::start: called");
        match value {
            Some(value) => self.extend(name, value),
            None => {
                output.start();
                self.open.push(OpenSection {
                    name: name.to_string(),
                    level: output.level(),
                });
            }
        }
    }

    /// Closes the innermost section and returns its name
    ///
    /// The captured buffer is stored unless `value` overrides it.
    pub fn close(&mut self, value: Option<String>, output: &mut Output) -> Result<String, RenderError> {
        let Some(top) = self.open.last() else {
            return Err(RenderError::Section("cannot close a section: no section is open".to_string()));
        };
        if top.level != output.level() {
            return Err(RenderError::Section(format!(
                "section '{}' must be closed in the template that opened it",
                top.name
            )));
        }

        let top = self.open.pop().ok_or_else(|| RenderError::Section("section stack underflow".to_string()))?;
        let captured = output.end().unwrap_or_default();
        debug!(name = %top.name, len = captured.len(), "SectionStack::close: captured");
        self.extend(&top.name, value.unwrap_or(captured));
        Ok(top.name)
    }

    /// Content stored for `name`, or `default`
    pub fn yield_section(&self, name: &str, default: &str) -> Result<String, RenderError> {
        if self.is_open(name) {
            return Err(RenderError::Section(format!(
                "cannot yield section '{}' while it is still open",
                name
            )));
        }
        Ok(self.contents.get(name).cloned().unwrap_or_else(|| default.to_string()))
    }

    /// Composes `content` with what is already stored under `name`
    ///
    /// Whichever side holds [`PARENT_MARKER`] receives the other side in its
    /// place. Without a marker the first stored content stays, so a child's
    /// sections survive the layout defaults rendered after them.
    pub fn extend(&mut self, name: &str, content: String) {
        let composed = match self.contents.remove(name) {
            None => content,
            Some(previous) if previous.contains(PARENT_MARKER) => previous.replace(PARENT_MARKER, &content),
            Some(previous) if content.contains(PARENT_MARKER) => content.replace(PARENT_MARKER, &previous),
            Some(previous) => previous,
        };
        self.contents.insert(name.to_string(), composed);
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open.iter().any(|s| s.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.contents.get(name).map(String::as_str)
    }

    /// Number of open sections
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Name of the innermost open section
    pub fn innermost(&self) -> Option<&str> {
        self.open.last().map(|s| s.name.as_str())
    }

    /// Drops sections opened after `depth`; their buffers are unwound separately
    pub fn unwind_to(&mut self, depth: usize) {
        self.open.truncate(depth);
    }
}
