//! Sandboxed Renderer
//!
//! Executes compiled template script against a set of bindings. Before
//! parsing, denylisted substrings are removed from the source. A fault unwinds
//! every output buffer and section opened by the failing execution and is
//! handed to the configured [`ErrorPresenter`].

use std::sync::Arc;
use tracing::{debug, error};

use crate::error::RenderError;
use crate::script::value::escape_html;
use crate::script::{self, Host, Interpreter, Scope};
use crate::sections::SectionStack;

/// Substrings removed from compiled source before it runs
pub const DENYLIST: &[&str] = &[
    "exec(",
    "shell_exec(",
    "pcntl_exec(",
    "passthru(",
    "proc_open(",
    "proc_close(",
    "proc_get_status(",
    "proc_nice(",
    "proc_terminate(",
    "system(",
    "popen(",
    "posix_kill(",
    "posix_setsid(",
    "posix_setpgid(",
    "posix_setuid(",
    "posix_getpwuid(",
    "posix_mkfifo(",
    "posix_uname(",
    "pcntl_fork(",
    "php_uname(",
    "phpinfo(",
    "eval(",
    "inject_code(",
    "file_get_contents(",
    "file_put_contents(",
    "highlight_file(",
    "highlight_contents(",
    "mkdir(",
    "rmdir(",
    "unlink(",
    "symlink(",
    "fput(",
    "escapeshellarg(",
    "escapeshellcmd(",
    "ftp_connect(",
    "ftp_exec(",
    "ftp_get(",
    "ftp_login(",
    "ftp_nb_fput(",
    "ftp_put(",
    "ftp_raw(",
    "ftp_rawlist(",
    "ini_alter(",
    "ini_get_all(",
    "ini_restore(",
    "mysql_pconnect(",
    "openlog(",
    "syslog(",
    "define_syslog_variables(",
    "apache_child_terminate(",
    "apache_setenv(",
    "xmlrpc_entity_decode(",
];

/// Stack of output buffers
#[derive(Debug, Default)]
pub struct Output {
    buffers: Vec<String>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open buffers
    pub fn level(&self) -> usize {
        self.buffers.len()
    }

    pub fn start(&mut self) {
        self.buffers.push(String::new());
    }

    /// Appends to the innermost buffer; text written with no buffer open is dropped
    pub fn write(&mut self, text: &str) {
        if let Some(buffer) = self.buffers.last_mut() {
            buffer.push_str(text);
        }
    }

    /// Closes the innermost buffer and returns its contents
    pub fn end(&mut self) -> Option<String> {
        self.buffers.pop()
    }

    /// Discards every buffer above `level`
    pub fn unwind_to(&mut self, level: usize) {
        self.buffers.truncate(level);
    }
}

/// Mutable state shared by every execution within one render
#[derive(Debug, Default)]
pub struct RenderState {
    pub output: Output,
    pub sections: SectionStack,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What the renderer needs from its caller during an execution
pub trait RenderHost {
    fn state(&mut self) -> &mut RenderState;

    /// Host functions beyond the built-ins; `None` when `name` is unknown
    fn call(&mut self, name: &str, args: Vec<serde_json::Value>, scope: &Scope)
    -> Option<Result<serde_json::Value, RenderError>>;
}

/// Decides what a faulting execution produces
pub trait ErrorPresenter: Send + Sync {
    /// Returns replacement output, or an error to propagate
    fn present(&self, fault: RenderError) -> Result<String, RenderError>;
}

/// Replaces the failed output with an HTML error block
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlErrorPresenter;

impl ErrorPresenter for HtmlErrorPresenter {
    fn present(&self, fault: RenderError) -> Result<String, RenderError> {
        Ok(format!(
            "<div class=\"plates-error\" style=\"border:1px solid #c00;padding:8px;margin:8px 0\">\
             <strong>Template error</strong><pre>{}</pre></div>",
            escape_html(&fault.to_string())
        ))
    }
}

/// Hands every fault back to the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagateErrors;

impl ErrorPresenter for PropagateErrors {
    fn present(&self, fault: RenderError) -> Result<String, RenderError> {
        Err(fault)
    }
}

/// Adapts a [`RenderHost`] to the interpreter's [`Host`]
struct Bridge<'a> {
    host: &'a mut dyn RenderHost,
}

impl Host for Bridge<'_> {
    fn write(&mut self, text: &str) {
        self.host.state().output.write(text);
    }

    fn call(
        &mut self,
        name: &str,
        args: Vec<serde_json::Value>,
        scope: &Scope,
    ) -> Option<Result<serde_json::Value, RenderError>> {
        self.host.call(name, args, scope)
    }
}

pub struct Renderer {
    denylist: Vec<String>,
    presenter: Arc<dyn ErrorPresenter>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("denylist", &self.denylist.len())
            .finish_non_exhaustive()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Arc::new(HtmlErrorPresenter))
    }
}

impl Renderer {
    pub fn new(presenter: Arc<dyn ErrorPresenter>) -> Self {
        Self {
            denylist: DENYLIST.iter().map(|s| s.to_string()).collect(),
            presenter,
        }
    }

    /// Adds entries to the denylist; empty entries are ignored
    pub fn with_denylist_extra(mut self, extra: &[String]) -> Self {
        self.denylist
            .extend(extra.iter().filter(|s| !s.is_empty()).cloned());
        self
    }

    /// Removes denylisted substrings until none remain
    pub fn filter(&self, source: &str) -> String {
        let mut text = source.to_string();
        loop {
            let before = text.len();
            for entry in &self.denylist {
                if text.contains(entry.as_str()) {
                    text = text.replace(entry.as_str(), "");
                }
            }
            if text.len() == before {
                return text;
            }
        }
    }

    /// Runs `source` with `bindings`, returning its output
    ///
    /// On a fault, everything this execution pushed onto the output and
    /// section stacks is discarded and the presenter decides the result.
    pub fn execute(&self, source: &str, bindings: Scope, host: &mut dyn RenderHost) -> Result<String, RenderError> {
        let level = host.state().output.level();
        let sections = host.state().sections.depth();
        debug!(len = source.len(), level, sections, "Renderer::execute: called");

        host.state().output.start();
        let result = self.run(source, bindings, host).and_then(|()| {
            let state = host.state();
            if state.sections.depth() > sections {
                return Err(RenderError::Section(format!(
                    "section '{}' was never closed",
                    state.sections.innermost().unwrap_or_default()
                )));
            }
            if state.output.level() != level + 1 {
                return Err(RenderError::Section("output buffers left unbalanced".to_string()));
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(host.state().output.end().unwrap_or_default()),
            Err(fault) => {
                error!(%fault, "Renderer::execute: template fault");
                let state = host.state();
                state.output.unwind_to(level);
                state.sections.unwind_to(sections);
                self.presenter.present(fault)
            }
        }
    }

    fn run(&self, source: &str, bindings: Scope, host: &mut dyn RenderHost) -> Result<(), RenderError> {
        let program = script::parse(&self.filter(source))?;
        let mut bridge = Bridge { host };
        Interpreter::new(bindings, &mut bridge).run(&program)
    }
}
