//! Options for rendering one document through the worker.

use crate::config::EnvConfig;
use crate::source_ranges::MappedDocument;
use serde_json::Value;
use std::io::IsTerminal;
use std::path::PathBuf;

/// Lifetime of the worker's per-file session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Close the file's session before and after the render.
    OneShot,
    /// Keep the file's session alive across renders.
    Daemon,
}

impl ExecutionMode {
    /// Daemon mode for interactive sessions outside CI, one-shot otherwise.
    pub fn detect() -> Self {
        let interactive = std::io::stderr().is_terminal();
        let in_ci = std::env::var_os(EnvConfig::CI).is_some();
        Self::for_session(interactive, in_ci)
    }

    pub fn for_session(interactive: bool, in_ci: bool) -> Self {
        if interactive && !in_ci {
            ExecutionMode::Daemon
        } else {
            ExecutionMode::OneShot
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, ExecutionMode::OneShot)
    }
}

/// A document to render and how to render it.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Input file; sent to the worker as an absolute path.
    pub input: PathBuf,
    /// Markdown of the input with per-line origins.
    pub markdown: MappedDocument,
    pub mode: ExecutionMode,
    /// Discard an existing session for the file before running, even in daemon mode.
    pub restart: bool,
    /// Forwarded verbatim as the `options` of the `run` command.
    pub render_options: Value,
}

impl ExecuteOptions {
    pub fn new(input: impl Into<PathBuf>, markdown: MappedDocument) -> Self {
        Self {
            input: input.into(),
            markdown,
            mode: ExecutionMode::OneShot,
            restart: false,
            render_options: Value::Object(Default::default()),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_render_options(mut self, options: Value) -> Self {
        self.render_options = options;
        self
    }

    /// Whether any existing session must be closed before `run`.
    pub fn closes_existing_session(&self) -> bool {
        self.mode.is_one_shot() || self.restart
    }
}
