//! Domain models for payloads, commands, and dispatch batches.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Languages understood by Maya's command ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Mel,
}

impl Language {
    /// Resolution order: Python is tried before MEL.
    pub const ALL: [Language; 2] = [Language::Python, Language::Mel];

    /// Token searched for in editor syntax identifiers.
    pub fn syntax_token(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Mel => "mel",
        }
    }

    /// Separator used to join selected lines into one wire command.
    ///
    /// MEL's command port executes on carriage returns.
    pub fn separator(&self) -> &'static str {
        match self {
            Language::Python => "\n",
            Language::Mel => "\r",
        }
    }

    /// Single-line comment marker.
    pub fn comment_marker(&self) -> &'static str {
        match self {
            Language::Python => "#",
            Language::Mel => "//",
        }
    }

    /// Glob matching sibling source files in package mode.
    pub fn source_glob(&self) -> &'static str {
        match self {
            Language::Python => "*.py",
            Language::Mel => "*.mel",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.syntax_token()
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a command is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionTarget {
    pub host: String,
    pub port: u16,
    pub language: Language,
}

impl ExecutionTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Selection,
    File,
}

/// Source gathered for one user action. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePayload {
    lines: Vec<String>,
    origin: Origin,
    file_path: Option<PathBuf>,
}

impl SourcePayload {
    /// Lines taken from the selected regions, in order. `file_path` is the buffer's path if saved.
    pub fn selection(lines: Vec<String>, file_path: Option<PathBuf>) -> Self {
        Self {
            lines,
            origin: Origin::Selection,
            file_path,
        }
    }

    /// A whole file to be loaded from disk by the remote side.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            lines: Vec::new(),
            origin: Origin::File,
            file_path: Some(path.into()),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
}

/// Final text written to a command port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    wire_text: String,
}

impl Command {
    /// Returns `None` when the text is blank; blank commands are never sent.
    pub fn new(wire_text: impl Into<String>) -> Option<Self> {
        let wire_text = wire_text.into();
        if wire_text.trim().is_empty() {
            None
        } else {
            Some(Self { wire_text })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.wire_text
    }

    /// UTF-8 bytes as they go on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.wire_text.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.wire_text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wire_text.is_empty()
    }

    /// First `max_chars` characters, for log lines.
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.wire_text.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.wire_text[..idx],
            None => &self.wire_text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub command: Command,
}

/// Ordered package-mode sends. The entry file is always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchBatch {
    entries: Vec<BatchEntry>,
}

impl DispatchBatch {
    pub fn new(siblings: Vec<BatchEntry>, entry: BatchEntry) -> Self {
        let mut entries = siblings;
        entries.push(entry);
        Self { entries }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self) -> Option<&BatchEntry> {
        self.entries.last()
    }
}

/// Snapshot of an editor buffer as seen by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    pub syntax: String,
    pub selections: Vec<String>,
    /// Send the selections even if they are all empty, instead of falling back to the file.
    pub selecting: bool,
    pub file_path: Option<PathBuf>,
    pub dirty: bool,
}

impl Buffer {
    pub fn new(syntax: impl Into<String>) -> Self {
        Self {
            syntax: syntax.into(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_selection(mut self, text: impl Into<String>) -> Self {
        self.selections.push(text.into());
        self
    }

    pub fn selecting(mut self, selecting: bool) -> Self {
        self.selecting = selecting;
        self
    }

    pub fn dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        self
    }
}
