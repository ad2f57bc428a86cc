//! Builds the exact text sent to a Maya command port.
//!
//! MEL payloads go out as-is. Python payloads are wrapped so that they run inside a persistent
//! namespace on the Maya side and print their traceback there instead of failing silently.

use std::fmt::Write as _;
use std::path::Path;

use crate::app::strip;
use crate::domain::errors::PreconditionError;
use crate::domain::model::{Command, Language, Origin, SourcePayload};

/// Key of the dictionary in Maya's `__main__` that holds the shared execution namespace.
///
/// Same key as the MayaSublime editor plugin, so both tools run in one namespace.
pub const NAMESPACE_KEY: &str = "_sublime_SendToMaya_plugin";

/// Options read from configuration for one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadOptions {
    pub strip_comments: bool,
    pub no_collisions: bool,
}

impl Default for PayloadOptions {
    fn default() -> Self {
        Self {
            strip_comments: true,
            no_collisions: true,
        }
    }
}

/// Python builtin that runs the payload remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPrimitive {
    /// `execfile(path, ...)`: load and run a file from Maya's disk.
    ExecFile,
    /// `exec(source, ...)`: run inline source text.
    Exec,
}

impl ExecPrimitive {
    pub fn name(&self) -> &'static str {
        match self {
            ExecPrimitive::ExecFile => "execfile",
            ExecPrimitive::Exec => "exec",
        }
    }
}

/// Typed inputs of the Python safety wrapper.
#[derive(Debug, Clone, Copy)]
pub struct PythonWrapper<'a> {
    /// File path for [`ExecPrimitive::ExecFile`], source text for [`ExecPrimitive::Exec`].
    pub payload: &'a str,
    /// Stored as `__file__` in the namespace. Empty for unsaved selections.
    pub file_path: &'a str,
    pub isolate: bool,
    pub primitive: ExecPrimitive,
}

impl PythonWrapper<'_> {
    /// Render the wrapper. Every inserted value is a Python string literal.
    pub fn render(&self) -> String {
        let call = self.primitive.name();
        let payload = py_literal(self.payload);
        let mut out = String::new();

        out.push_str("import traceback\n");
        if self.isolate {
            let key = py_literal(NAMESPACE_KEY);
            out.push_str("import __main__\n\n");
            let _ = writeln!(out, "namespace = __main__.__dict__.get({key})");
            out.push_str("if not namespace:\n");
            out.push_str("    namespace = __main__.__dict__.copy()\n");
            let _ = writeln!(out, "    __main__.__dict__[{key}] = namespace");
        }
        out.push_str("\ntry:\n");
        if self.isolate {
            let _ = writeln!(
                out,
                "    namespace['__file__'] = {}",
                py_literal(self.file_path)
            );
            let _ = writeln!(out, "    {call}({payload}, namespace, namespace)");
        } else {
            let _ = writeln!(out, "    {call}({payload})");
        }
        out.push_str("except:\n");
        out.push_str("    traceback.print_exc()\n");
        out
    }
}

/// Quote `value` as a single-quoted Python string literal.
///
/// Backslashes, quotes, and control characters are escaped, so any input maps to exactly one
/// literal that evaluates back to it.
pub fn py_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Quote a path for use inside a MEL double-quoted string.
fn mel_string_body(path: &str) -> String {
    path.replace('\\', "\\\\").replace('"', "\\\"")
}

fn path_str(path: &Path) -> Result<&str, PreconditionError> {
    path.to_str()
        .ok_or_else(|| PreconditionError::NonUtf8Path(path.to_path_buf()))
}

/// Instruction that makes Maya load `path` from its own disk.
pub fn file_instruction(path: &Path, language: Language) -> Result<String, PreconditionError> {
    let path = path_str(path)?;
    Ok(match language {
        Language::Python => path.to_owned(),
        Language::Mel => format!("rehash; source \"{}\";", mel_string_body(path)),
    })
}

/// Join selected lines with the language separator, optionally dropping comment lines.
pub fn selection_text(lines: &[String], language: Language, strip_comments: bool) -> String {
    let lines = lines.iter().map(String::as_str);
    let kept: Vec<&str> = if strip_comments {
        strip::strip_comment_lines(lines)
    } else {
        lines.collect()
    };
    kept.join(language.separator())
}

/// Build the command for `payload`.
///
/// Returns `Ok(None)` when nothing is left to send, which callers treat as a silent no-op.
pub fn build_command(
    payload: &SourcePayload,
    language: Language,
    options: PayloadOptions,
) -> Result<Option<Command>, PreconditionError> {
    let (text, primitive, file_path) = match payload.origin() {
        Origin::File => {
            let path = payload
                .file_path()
                .ok_or(PreconditionError::MissingFilePath)?;
            (
                file_instruction(path, language)?,
                ExecPrimitive::ExecFile,
                path_str(path)?,
            )
        }
        Origin::Selection => {
            // Selected code sees the saved buffer's path as `__file__`, not an empty string.
            let file_path = match payload.file_path() {
                Some(path) => path_str(path)?,
                None => "",
            };
            (
                selection_text(payload.lines(), language, options.strip_comments),
                ExecPrimitive::Exec,
                file_path,
            )
        }
    };

    if text.trim().is_empty() {
        return Ok(None);
    }

    let wire_text = match language {
        Language::Mel => text,
        Language::Python => PythonWrapper {
            payload: &text,
            file_path,
            isolate: options.no_collisions,
            primitive,
        }
        .render(),
    };

    Ok(Command::new(wire_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|line| (*line).to_owned()).collect()
    }

    #[test]
    fn mel_file_mode_sources_the_path() {
        let payload = SourcePayload::file("/tmp/a.mel");
        let command = build_command(&payload, Language::Mel, PayloadOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(command.as_str(), "rehash; source \"/tmp/a.mel\";");
    }

    #[test]
    fn mel_paths_double_backslashes() {
        let instruction =
            file_instruction(Path::new(r"C:\scripts\tool.mel"), Language::Mel).unwrap();
        assert_eq!(instruction, r#"rehash; source "C:\\scripts\\tool.mel";"#);
    }

    #[test]
    fn mel_selection_strips_leading_comment() {
        let payload = SourcePayload::selection(lines(&["// comment", "doThing();"]), None);
        let command = build_command(&payload, Language::Mel, PayloadOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(command.as_str(), "doThing();");
    }

    #[test]
    fn mel_selection_joins_with_carriage_return() {
        let payload = SourcePayload::selection(lines(&["a();", "b();"]), None);
        let command = build_command(&payload, Language::Mel, PayloadOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(command.as_str(), "a();\rb();");
    }

    #[test]
    fn comment_only_selection_builds_nothing() {
        let payload = SourcePayload::selection(lines(&["# one", "  # two"]), None);
        let built = build_command(&payload, Language::Python, PayloadOptions::default()).unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn comments_survive_when_stripping_is_disabled() {
        let options = PayloadOptions {
            strip_comments: false,
            no_collisions: true,
        };
        let payload = SourcePayload::selection(lines(&["// keep", "go();"]), None);
        let command = build_command(&payload, Language::Mel, options)
            .unwrap()
            .unwrap();
        assert_eq!(command.as_str(), "// keep\rgo();");
    }

    #[test]
    fn empty_selection_builds_nothing() {
        let payload = SourcePayload::selection(Vec::new(), None);
        assert!(
            build_command(&payload, Language::Python, PayloadOptions::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn isolated_python_uses_namespace_once() {
        let payload = SourcePayload::file("/tmp/tool.py");
        let command = build_command(&payload, Language::Python, PayloadOptions::default())
            .unwrap()
            .unwrap();
        let text = command.as_str();

        assert_eq!(text.matches("namespace['__file__'] = '/tmp/tool.py'").count(), 1);
        assert_eq!(text.matches("namespace['__file__'] =").count(), 1);
        assert_eq!(
            text.matches("execfile('/tmp/tool.py', namespace, namespace)")
                .count(),
            1
        );
        assert_eq!(text.matches("execfile(").count(), 1);
        assert!(text.contains("traceback.print_exc()"));
    }

    #[test]
    fn isolated_python_reuses_the_plugin_namespace() {
        let payload = SourcePayload::selection(lines(&["x = 1"]), Some("/tmp/tool.py".into()));
        let command = build_command(&payload, Language::Python, PayloadOptions::default())
            .unwrap()
            .unwrap();
        let text = command.as_str();
        assert!(text.contains("namespace = __main__.__dict__.get('_sublime_SendToMaya_plugin')"));
        assert!(text.contains("    __main__.__dict__['_sublime_SendToMaya_plugin'] = namespace"));
        assert!(text.contains("namespace['__file__'] = '/tmp/tool.py'"));
    }

    #[test]
    fn shared_python_never_mentions_namespace() {
        let options = PayloadOptions {
            strip_comments: true,
            no_collisions: false,
        };
        for payload in [
            SourcePayload::file("/tmp/tool.py"),
            SourcePayload::selection(lines(&["print('hi')"]), Some("/tmp/tool.py".into())),
        ] {
            let command = build_command(&payload, Language::Python, options)
                .unwrap()
                .unwrap();
            assert!(!command.as_str().contains(NAMESPACE_KEY));
            assert!(!command.as_str().contains("namespace"));
        }
    }

    #[test]
    fn python_selection_uses_exec_with_escaped_source() {
        let payload = SourcePayload::selection(
            lines(&["# setup", "name = 'it''s'", "print(\"a\\b\")"]),
            None,
        );
        let command = build_command(&payload, Language::Python, PayloadOptions::default())
            .unwrap()
            .unwrap();
        let text = command.as_str();
        assert!(text.contains(
            r#"    exec('name = \'it\'\'s\'\nprint("a\\b")', namespace, namespace)"#
        ));
        assert!(text.contains("namespace['__file__'] = ''"));
        assert!(!text.contains("# setup"));
    }

    #[test]
    fn py_literal_escapes_everything_that_could_break_out() {
        assert_eq!(py_literal("plain"), "'plain'");
        assert_eq!(py_literal("it's"), r"'it\'s'");
        assert_eq!(py_literal(r"C:\tmp"), r"'C:\\tmp'");
        assert_eq!(py_literal("a\nb\r\tc"), r"'a\nb\r\tc'");
        assert_eq!(py_literal("\u{0}\u{1b}"), r"'\x00\x1b'");
        assert_eq!(py_literal("ünïcode"), "'ünïcode'");
    }

    #[test]
    fn py_literal_is_injective_on_tricky_pairs() {
        let pairs = [("\\n", "\n"), ("\\'", "'"), ("\\x00", "\u{0}")];
        for (a, b) in pairs {
            assert_ne!(py_literal(a), py_literal(b));
        }
    }
}
