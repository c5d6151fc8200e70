//! Structured error records.
//!
//! An [`ErrorTrace`] is built on the exception path only. It captures the
//! error message and kind, the ordered call frames the error collected while
//! unwinding through the pipeline, and a summary of the request that failed.

use crate::error::KeystoneError;
use crate::request::Request;
use serde::{Deserialize, Serialize};
use std::panic::Location;
use std::path::{Path, PathBuf};

/// Path fragments identifying frames raised inside the framework itself or
/// inside third-party code.
const INTERNAL_MARKERS: &[&str] = &[
    "keystone-core/",
    "keystone-pipeline/",
    "keystone-server/",
    ".cargo/registry/",
    "/rustc/",
];

/// A single call frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Source file, relative to the trace root when possible.
    pub file: String,
    /// Line number.
    pub line: u32,
    /// Routine or stage name.
    pub name: String,
    /// Source excerpt surrounding `line`, when the file is readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// First line number of `code`.
    pub start_line: u32,
    /// `true` for frames inside the framework or a dependency.
    pub is_internal: bool,
}

impl Frame {
    /// Creates a frame without a source excerpt.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, name: impl Into<String>) -> Self {
        let file = file.into();
        let is_internal = is_internal_path(&file);
        Self {
            file,
            line,
            name: name.into(),
            code: None,
            start_line: line,
            is_internal,
        }
    }

    /// Creates a frame pointing at a source location.
    #[must_use]
    pub fn from_location(location: &Location<'_>, name: impl Into<String>) -> Self {
        Self::new(location.file(), location.line(), name)
    }

    /// Creates a frame pointing at the caller of this function.
    #[track_caller]
    #[must_use]
    pub fn caller(name: impl Into<String>) -> Self {
        Self::from_location(Location::caller(), name)
    }

    /// Loads the source excerpt surrounding this frame's line.
    ///
    /// `context` lines are read on each side. Unreadable files leave the
    /// frame without an excerpt. The file is read with blocking I/O.
    #[must_use]
    pub fn with_source(mut self, root: &Path, context: u32) -> Self {
        let path = resolve_path(root, &self.file);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return self;
        };
        let lines: Vec<&str> = contents.lines().collect();
        let line = self.line.max(1) as usize;
        let context = context as usize;
        let start = line.saturating_sub(context + 1);
        let end = (line + context).min(lines.len());
        if start >= end {
            return self;
        }
        self.code = Some(lines[start..end].join("\n"));
        self.start_line = u32::try_from(start + 1).unwrap_or(self.line);
        if let Ok(relative) = path.strip_prefix(root) {
            self.file = relative.display().to_string();
        }
        self
    }
}

fn resolve_path(root: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn is_internal_path(file: &str) -> bool {
    let normalized = file.replace('\\', "/");
    INTERNAL_MARKERS
        .iter()
        .any(|marker| normalized.contains(marker))
}

/// Request summary attached to a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    /// HTTP method.
    pub method: String,
    /// `Host` header, or `localhost` when absent.
    pub host: String,
    /// Request path.
    pub path: String,
}

impl Default for RequestSummary {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            host: "localhost".to_string(),
            path: "/".to_string(),
        }
    }
}

/// Options controlling how traces are built.
#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// Directory that relative frame paths are resolved against.
    pub root: PathBuf,
    /// Lines of source read on each side of a frame.
    pub context_lines: u32,
    /// Whether to read source excerpts at all.
    pub include_source: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_default(),
            context_lines: 9,
            include_source: true,
        }
    }
}

/// Structured error record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorTrace {
    /// The error message.
    pub message: String,
    /// The error kind (originating type name).
    #[serde(rename = "type")]
    pub kind: String,
    /// Root directory frame paths are relative to.
    pub root: String,
    /// Call frames, innermost first.
    pub frames: Vec<Frame>,
    /// The request that failed.
    pub request: RequestSummary,
}

impl ErrorTrace {
    /// Builds a trace for `error`, raised while serving `request`.
    ///
    /// Source excerpts are read with blocking I/O on the calling thread. Use
    /// [`ErrorTrace::capture`] from async code.
    #[must_use]
    pub fn build(error: &KeystoneError, request: Option<&Request>, options: &TraceOptions) -> Self {
        let frames = error
            .frames()
            .into_iter()
            .map(|frame| {
                if options.include_source {
                    frame.with_source(&options.root, options.context_lines)
                } else {
                    frame
                }
            })
            .collect();
        let request = request.map_or_else(RequestSummary::default, |req| RequestSummary {
            method: req.method().to_string(),
            host: req.header("host").unwrap_or("localhost").to_string(),
            path: req.path().to_string(),
        });
        Self {
            message: error.message().to_string(),
            kind: error.kind().to_string(),
            root: options.root.display().to_string(),
            frames,
            request,
        }
    }

    /// Builds a trace like [`ErrorTrace::build`], reading source excerpts on
    /// the blocking thread pool.
    ///
    /// If the blocking task fails the frames are kept without excerpts.
    pub async fn capture(
        error: &KeystoneError,
        request: Option<&Request>,
        options: &TraceOptions,
    ) -> Self {
        let without_source = TraceOptions {
            include_source: false,
            ..options.clone()
        };
        let mut trace = Self::build(error, request, &without_source);
        if !options.include_source || trace.frames.is_empty() {
            return trace;
        }

        let frames = trace.frames.clone();
        let root = options.root.clone();
        let context = options.context_lines;
        let loaded = tokio::task::spawn_blocking(move || {
            frames
                .into_iter()
                .map(|frame| frame.with_source(&root, context))
                .collect::<Vec<_>>()
        })
        .await;
        match loaded {
            Ok(frames) => trace.frames = frames,
            Err(e) => tracing::warn!(error = %e, "Failed to load trace source excerpts"),
        }
        trace
    }
}
