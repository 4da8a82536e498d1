//! Defines the diagnostic type shared by every phase of the generator.  Unlike a typical error
//! type, diagnostics here are plain values: each one carries a kind, a rendered message, and an
//! optional source position, and phases accumulate them in an `ErrorCollector` rather than
//! returning early.  That way a single run reports every problem in the user's declarations at
//! once, the same way a compiler does.

#![allow(non_local_definitions)]

use failure::Fail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use strum_macros::AsRefStr;

/// A position in one of the loaded source files.  Renders as `file:line:col`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub file: PathBuf,
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(file: impl Into<PathBuf>, line: usize, col: usize) -> Pos {
        Pos {
            file: file.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.col)
    }
}

/// The closed taxonomy of diagnostic kinds.  The string forms are stable and appear in the
/// `check --json` output, so treat them as part of the tool's interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Serialize, Deserialize)]
pub enum ErrorKind {
    #[strum(serialize = "no_provider")]
    NoProvider,

    #[strum(serialize = "cycle")]
    Cycle,

    #[strum(serialize = "multiple_bindings")]
    MultipleBindings,

    #[strum(serialize = "unused_declaration")]
    UnusedDeclaration,

    #[strum(serialize = "incompatible_binding")]
    IncompatibleBinding,

    #[strum(serialize = "invalid_argument")]
    InvalidArgument,

    #[strum(serialize = "bad_provider_signature")]
    BadProviderSignature,

    #[strum(serialize = "cleanup_mismatch")]
    CleanupMismatch,

    #[strum(serialize = "error_mismatch")]
    ErrorMismatch,

    #[strum(serialize = "visibility")]
    Visibility,

    #[strum(serialize = "invalid_injector")]
    InvalidInjector,

    #[strum(serialize = "parse_error")]
    ParseError,

    #[strum(serialize = "io_error")]
    IoError,

    #[strum(serialize = "code_generation")]
    CodeGeneration,
}

/// One diagnostic.  Display renders `file:line:col: message` when a position is attached and the
/// bare message otherwise.
#[derive(Debug, Clone, Fail, Serialize, Deserialize)]
pub struct WeftError {
    kind: ErrorKind,
    message: String,
    pos: Option<Pos>,
}

impl fmt::Display for WeftError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.pos {
            Some(ref pos) => write!(f, "{}: {}", pos, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl PartialEq<WeftError> for WeftError {
    fn eq(&self, other: &WeftError) -> bool {
        //Positions and messages together identify a diagnostic; comparing the rendered form
        //covers both
        self.to_string() == other.to_string()
    }
}

impl WeftError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> WeftError {
        WeftError {
            kind,
            message: message.into(),
            pos: None,
        }
    }

    /// Attaches a position to this diagnostic.  The first (innermost, most precise) annotation
    /// wins; wrapping an already-positioned diagnostic is a no-op.
    pub fn at(mut self, pos: Pos) -> WeftError {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn pos(&self) -> Option<&Pos> {
        self.pos.as_ref()
    }

    pub fn no_provider(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::NoProvider, message)
    }

    pub fn cycle(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::Cycle, message)
    }

    pub fn multiple_bindings(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::MultipleBindings, message)
    }

    pub fn unused_declaration(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::UnusedDeclaration, message)
    }

    pub fn incompatible_binding(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::IncompatibleBinding, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn bad_provider_signature(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::BadProviderSignature, message)
    }

    pub fn cleanup_mismatch(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::CleanupMismatch, message)
    }

    pub fn error_mismatch(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::ErrorMismatch, message)
    }

    pub fn visibility(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::Visibility, message)
    }

    pub fn invalid_injector(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::InvalidInjector, message)
    }

    pub fn parse_error(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::ParseError, message)
    }

    pub fn io_error(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::IoError, message)
    }

    pub fn code_generation(message: impl Into<String>) -> WeftError {
        Self::new(ErrorKind::CodeGeneration, message)
    }
}

pub type WeftResult<T> = std::result::Result<T, WeftError>;

/// Accumulates diagnostics across a phase (or the whole pipeline).  Consumed at boundary points
/// via `into_errors`, which collapses duplicates with identical position and message while
/// preserving first-occurrence order.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<WeftError>,
}

impl ErrorCollector {
    pub fn new() -> ErrorCollector {
        ErrorCollector { errors: Vec::new() }
    }

    pub fn add(&mut self, error: WeftError) {
        self.errors.push(error);
    }

    /// Adds the diagnostic if there is one; `None` entries are silently dropped.
    pub fn add_opt(&mut self, error: Option<WeftError>) {
        if let Some(error) = error {
            self.errors.push(error);
        }
    }

    /// Records the error half of a result, handing the success half back to the caller.
    pub fn add_err<T>(&mut self, result: WeftResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.errors.push(error);
                None
            }
        }
    }

    pub fn add_all(&mut self, errors: impl IntoIterator<Item = WeftError>) {
        self.errors.extend(errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn into_errors(self) -> Vec<WeftError> {
        let mut seen: Vec<String> = Vec::new();
        let mut deduped = Vec::new();
        for error in self.errors {
            let rendered = error.to_string();
            if !seen.contains(&rendered) {
                seen.push(rendered);
                deduped.push(error);
            }
        }
        deduped
    }
}
