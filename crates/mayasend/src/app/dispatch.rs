//! The send action: picks a mode, builds commands, and drives the transport.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::app::language;
use crate::app::strip;
use crate::app::package::{self, PackageError};
use crate::app::payload::{self, PayloadOptions};
use crate::domain::errors::{PreconditionError, ResolutionError, TransportError};
use crate::domain::model::{
    BatchEntry, Buffer, Command, DispatchBatch, ExecutionTarget, Language, SourcePayload,
};
use crate::infra::config::Config;
use crate::infra::transport::Transport;

/// Characters of each command echoed to the log.
const LOG_PREVIEW_CHARS: usize = 200;

/// What the dispatcher needs to know about the active editor buffer.
pub trait EditorView {
    /// Editor syntax identifier, e.g. `Packages/Python/Python.sublime-syntax`.
    fn syntax(&self) -> &str;
    /// Text of each non-empty selected region, in document order.
    fn selections(&self) -> Vec<String>;
    /// True when the user explicitly asked for selection mode, so an empty selection is a
    /// no-op rather than a request to send the whole file.
    fn selection_requested(&self) -> bool {
        false
    }
    fn file_path(&self) -> Option<&Path>;
    /// Whether the buffer has unsaved changes.
    fn is_dirty(&self) -> bool;
}

impl EditorView for Buffer {
    fn syntax(&self) -> &str {
        &self.syntax
    }

    fn selections(&self) -> Vec<String> {
        self.selections
            .iter()
            .filter(|region| !region.is_empty())
            .cloned()
            .collect()
    }

    fn selection_requested(&self) -> bool {
        self.selecting
    }

    fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// User-facing message channel owned by the editor.
pub trait Notifier {
    /// Modal error shown to the user.
    fn error(&self, message: &str);
    /// Console-only note.
    fn note(&self, message: &str);
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("package send stopped after {sent} of {total} files")]
    BatchAborted {
        sent: usize,
        total: usize,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Selection,
    File,
    Package,
}

/// One command that reached the transport successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentCommand {
    pub path: Option<PathBuf>,
    pub bytes: usize,
}

/// Summary of a finished send action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub language: Language,
    pub mode: DispatchMode,
    pub target: ExecutionTarget,
    pub sent: Vec<SentCommand>,
}

impl DispatchReport {
    /// True when nothing was left to send after stripping.
    pub fn is_noop(&self) -> bool {
        self.sent.is_empty()
    }
}

/// Drives one send action at a time, strictly sequentially.
#[derive(Debug)]
pub struct Dispatcher<T, N> {
    transport: T,
    notifier: N,
}

impl<T: Transport, N: Notifier> Dispatcher<T, N> {
    pub fn new(transport: T, notifier: N) -> Self {
        Self {
            transport,
            notifier,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Send the selection, the whole file, or (with `send_package`) the file's package.
    ///
    /// A non-empty selection, or an explicit request for selection mode, always wins over file
    /// and package mode. `config` is used as a
    /// single snapshot for the whole action.
    pub fn send(
        &self,
        config: &Config,
        editor: &dyn EditorView,
        send_package: bool,
    ) -> Result<DispatchReport, DispatchError> {
        let language = match language::require(editor.syntax()) {
            Ok(language) => language,
            Err(err) => {
                self.notifier.note(&err.to_string());
                return Err(err.into());
            }
        };

        let target = config.target_for(language);
        let options = config.payload_options();
        let selections = editor.selections();

        let (mode, sent) = if editor.selection_requested() || !selections.is_empty() {
            let sent = self.send_selection(&target, options, editor, &selections)?;
            (DispatchMode::Selection, sent)
        } else {
            let entry = self.file_precondition(editor)?;
            if send_package {
                (
                    DispatchMode::Package,
                    self.send_package(&target, options, entry)?,
                )
            } else {
                (
                    DispatchMode::File,
                    self.send_file(&target, options, entry)?,
                )
            }
        };

        Ok(DispatchReport {
            language,
            mode,
            target,
            sent,
        })
    }

    fn send_selection(
        &self,
        target: &ExecutionTarget,
        options: PayloadOptions,
        editor: &dyn EditorView,
        selections: &[String],
    ) -> Result<Vec<SentCommand>, DispatchError> {
        let lines = selections
            .iter()
            .flat_map(|region| strip::split_lines(region).into_iter().map(str::to_owned))
            .collect();
        let file_path = editor.file_path().map(Path::to_path_buf);
        let payload = SourcePayload::selection(lines, file_path);

        let Some(command) = self.build(&payload, target.language, options)? else {
            tracing::debug!("selection is empty after stripping, nothing sent");
            return Ok(Vec::new());
        };
        self.deliver(target, &command)?;
        Ok(vec![SentCommand {
            path: None,
            bytes: command.len(),
        }])
    }

    fn file_precondition<'a>(&self, editor: &'a dyn EditorView) -> Result<&'a Path, DispatchError> {
        tracing::info!("nothing selected, sending entire file");
        let checked = if editor.is_dirty() {
            Err(PreconditionError::UnsavedChanges)
        } else {
            editor.file_path().ok_or(PreconditionError::MissingFilePath)
        };
        checked.map_err(|err| {
            self.notifier.error(&err.to_string());
            err.into()
        })
    }

    fn send_file(
        &self,
        target: &ExecutionTarget,
        options: PayloadOptions,
        path: &Path,
    ) -> Result<Vec<SentCommand>, DispatchError> {
        let payload = SourcePayload::file(path);
        let Some(command) = self.build(&payload, target.language, options)? else {
            return Ok(Vec::new());
        };
        self.deliver(target, &command)?;
        Ok(vec![SentCommand {
            path: Some(path.to_path_buf()),
            bytes: command.len(),
        }])
    }

    fn send_package(
        &self,
        target: &ExecutionTarget,
        options: PayloadOptions,
        entry: &Path,
    ) -> Result<Vec<SentCommand>, DispatchError> {
        let batch = self.package_batch(entry, target.language, options)?;
        let total = batch.len();
        let mut sent = Vec::with_capacity(total);

        for item in batch.entries() {
            tracing::info!(path = %item.path.display(), "sending package file");
            if let Err(source) = self.deliver(target, &item.command) {
                let err = DispatchError::BatchAborted {
                    sent: sent.len(),
                    total,
                    source,
                };
                self.notifier.error(&err.to_string());
                return Err(err);
            }
            sent.push(SentCommand {
                path: Some(item.path.clone()),
                bytes: item.command.len(),
            });
        }
        Ok(sent)
    }

    /// Every command is built before anything is sent, so a bad path never leaves a
    /// half-sent package behind.
    fn package_batch(
        &self,
        entry: &Path,
        language: Language,
        options: PayloadOptions,
    ) -> Result<DispatchBatch, DispatchError> {
        let plan = package::plan(entry, language).inspect_err(|err| {
            self.notifier.error(&err.to_string());
        })?;

        let mut siblings = Vec::with_capacity(plan.siblings.len());
        for path in &plan.siblings {
            if let Some(entry) = self.file_entry(path, language, options)? {
                siblings.push(entry);
            }
        }

        let entry = self
            .file_entry(&plan.entry, language, options)?
            .ok_or(PreconditionError::MissingFilePath)?;
        Ok(DispatchBatch::new(siblings, entry))
    }

    fn file_entry(
        &self,
        path: &Path,
        language: Language,
        options: PayloadOptions,
    ) -> Result<Option<BatchEntry>, DispatchError> {
        let payload = SourcePayload::file(path);
        Ok(self
            .build(&payload, language, options)?
            .map(|command| BatchEntry {
                path: path.to_path_buf(),
                command,
            }))
    }

    fn build(
        &self,
        payload: &SourcePayload,
        language: Language,
        options: PayloadOptions,
    ) -> Result<Option<Command>, DispatchError> {
        payload::build_command(payload, language, options).map_err(|err| {
            self.notifier.error(&err.to_string());
            err.into()
        })
    }

    /// Reports a failed send to the user and hands the error back to the caller.
    fn deliver(&self, target: &ExecutionTarget, command: &Command) -> Result<(), TransportError> {
        tracing::info!(
            language = %target.language,
            address = %target.address(),
            "sending {}:\n{:?}\n...",
            target.language,
            command.preview(LOG_PREVIEW_CHARS)
        );
        self.transport.send(target, command).inspect_err(|err| {
            self.notifier.error(&err.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::fs;
    use std::io;

    use anyhow::Result;

    use crate::infra::transport::RecordingTransport;

    #[derive(Debug, Default)]
    struct Messages {
        errors: RefCell<Vec<String>>,
        notes: RefCell<Vec<String>>,
    }

    impl Notifier for &Messages {
        fn error(&self, message: &str) {
            self.errors.borrow_mut().push(message.to_owned());
        }

        fn note(&self, message: &str) {
            self.notes.borrow_mut().push(message.to_owned());
        }
    }

    /// Accepts `ok` sends, then refuses every later one.
    struct FailAfter {
        ok: usize,
        calls: RefCell<usize>,
    }

    impl Transport for FailAfter {
        fn send(&self, target: &ExecutionTarget, _: &Command) -> Result<(), TransportError> {
            let mut calls = self.calls.borrow_mut();
            *calls += 1;
            if *calls > self.ok {
                return Err(TransportError::new(
                    target.host.clone(),
                    target.port,
                    io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                ));
            }
            Ok(())
        }
    }

    fn python_buffer() -> Buffer {
        Buffer::new("Packages/Python/Python.sublime-syntax")
    }

    #[test]
    fn unsupported_syntax_sends_nothing() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = Buffer::new("Plain Text").with_selection("print(1)");

        let err = dispatcher
            .send(&Config::default(), &buffer, false)
            .unwrap_err();

        assert!(matches!(err, DispatchError::Resolution(_)));
        assert!(dispatcher.transport().sent().is_empty());
        assert_eq!(messages.notes.borrow().len(), 1);
        assert!(messages.errors.borrow().is_empty());
    }

    #[test]
    fn dirty_buffer_in_file_mode_is_rejected() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = python_buffer().with_file("/tmp/tool.py").dirty(true);

        let err = dispatcher
            .send(&Config::default(), &buffer, false)
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Precondition(PreconditionError::UnsavedChanges)
        ));
        assert!(dispatcher.transport().sent().is_empty());
        assert_eq!(
            messages.errors.borrow().as_slice(),
            ["Save Changes Before Maya Source/Import"]
        );
    }

    #[test]
    fn unsaved_buffer_without_path_is_rejected() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);

        let err = dispatcher
            .send(&Config::default(), &python_buffer(), true)
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Precondition(PreconditionError::MissingFilePath)
        ));
        assert!(dispatcher.transport().sent().is_empty());
    }

    #[test]
    fn dirty_buffer_still_sends_selection() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = Buffer::new("MEL")
            .with_selection("// setup\nsphere;")
            .dirty(true);

        let report = dispatcher.send(&Config::default(), &buffer, true).unwrap();

        assert_eq!(report.mode, DispatchMode::Selection);
        let sent = dispatcher.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command.as_str(), "sphere;");
        assert_eq!(sent[0].target.port, 7001);
    }

    #[test]
    fn comment_only_selection_is_a_silent_noop() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = python_buffer().with_selection("# one\n   # two");

        let report = dispatcher.send(&Config::default(), &buffer, false).unwrap();

        assert!(report.is_noop());
        assert!(dispatcher.transport().sent().is_empty());
        assert!(messages.errors.borrow().is_empty());
    }

    #[test]
    fn empty_regions_do_not_count_as_selection() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = Buffer::new("MEL")
            .with_file("/tmp/a.mel")
            .with_selection("");

        let report = dispatcher.send(&Config::default(), &buffer, false).unwrap();

        assert_eq!(report.mode, DispatchMode::File);
        let sent = dispatcher.transport().sent();
        assert_eq!(sent[0].command.as_str(), "rehash; source \"/tmp/a.mel\";");
    }

    #[test]
    fn requested_empty_selection_does_not_send_the_file() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = Buffer::new("MEL")
            .with_file("/tmp/a.mel")
            .with_selection("")
            .selecting(true);

        let report = dispatcher.send(&Config::default(), &buffer, true).unwrap();

        assert_eq!(report.mode, DispatchMode::Selection);
        assert!(report.is_noop());
        assert!(dispatcher.transport().sent().is_empty());
        assert!(messages.errors.borrow().is_empty());
    }

    #[test]
    fn carriage_return_selection_keeps_code_after_comment() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = Buffer::new("MEL").with_selection("// setup\ra();\r\nb();");

        dispatcher.send(&Config::default(), &buffer, false).unwrap();

        let sent = dispatcher.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command.as_str(), "a();\rb();");
    }

    #[test]
    fn multiple_regions_join_in_order() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = Buffer::new("MEL")
            .with_selection("a();")
            .with_selection("b();\n// c\nd();");

        dispatcher.send(&Config::default(), &buffer, false).unwrap();

        let sent = dispatcher.transport().sent();
        assert_eq!(sent[0].command.as_str(), "a();\rb();\rd();");
    }

    #[test]
    fn package_sends_siblings_then_entry() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path();
        fs::write(root.join("a.py"), "A = 1")?;
        fs::write(root.join("b.py"), "import a")?;
        fs::write(root.join("__init__.py"), "")?;

        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = python_buffer().with_file(root.join("b.py"));

        let report = dispatcher.send(&Config::default(), &buffer, true)?;

        assert_eq!(report.mode, DispatchMode::Package);
        let paths: Vec<_> = report.sent.iter().map(|s| s.path.clone().unwrap()).collect();
        assert_eq!(paths, vec![root.join("a.py"), root.join("b.py")]);

        let sent = dispatcher.transport().sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].command.as_str().contains("a.py"));
        assert!(sent[1].command.as_str().contains("b.py"));
        assert!(sent.iter().all(|s| !s.command.as_str().contains("__init__")));
        Ok(())
    }

    #[test]
    fn package_failure_stops_before_entry_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path();
        fs::write(root.join("a.py"), "")?;
        fs::write(root.join("b.py"), "")?;
        fs::write(root.join("main.py"), "")?;

        let messages = Messages::default();
        let transport = FailAfter {
            ok: 1,
            calls: RefCell::new(0),
        };
        let dispatcher = Dispatcher::new(transport, &messages);
        let buffer = python_buffer().with_file(root.join("main.py"));

        let err = dispatcher
            .send(&Config::default(), &buffer, true)
            .unwrap_err();

        match err {
            DispatchError::BatchAborted { sent, total, .. } => {
                assert_eq!((sent, total), (1, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*dispatcher.transport().calls.borrow(), 2);

        let errors = messages.errors.borrow();
        assert!(errors[0].starts_with("Failed to communicate with Maya (127.0.0.1:7002)"));
        assert_eq!(errors[1], "package send stopped after 1 of 3 files");
        Ok(())
    }

    #[test]
    fn transport_failure_is_reported_and_returned() {
        let messages = Messages::default();
        let transport = FailAfter {
            ok: 0,
            calls: RefCell::new(0),
        };
        let dispatcher = Dispatcher::new(transport, &messages);
        let buffer = python_buffer().with_selection("print('x')");
        let config = Config::default().with_endpoint(Some("maya-host".into()), Some(4434));

        let err = dispatcher.send(&config, &buffer, false).unwrap_err();

        assert!(matches!(err, DispatchError::Transport(_)));
        let errors = messages.errors.borrow();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("maya-host:4434"));
        assert!(errors[0].contains("refused"));
    }

    #[test]
    fn isolation_flag_comes_from_config() {
        let messages = Messages::default();
        let dispatcher = Dispatcher::new(RecordingTransport::new(), &messages);
        let buffer = python_buffer().with_file("/tmp/tool.py");
        let config = Config {
            no_collisions: false,
            ..Config::default()
        };

        dispatcher.send(&config, &buffer, false).unwrap();

        let sent = dispatcher.transport().sent();
        assert!(sent[0].command.as_str().contains("    execfile('/tmp/tool.py')\n"));
        assert!(!sent[0].command.as_str().contains(payload::NAMESPACE_KEY));
    }
}
