//! Line splitting and removal of whole-line comments from selections.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::model::Language;

/// Matches a line that starts (after indentation) with any supported comment marker.
static COMMENT_LINE: Lazy<Regex> = Lazy::new(|| {
    let markers: Vec<String> = Language::ALL
        .iter()
        .map(|language| regex::escape(language.comment_marker()))
        .collect();
    let pattern = format!(r"^\s*({})", markers.join("|"));
    Regex::new(&pattern).expect("comment pattern is valid")
});

/// Split `text` into lines ending at `\r\n`, `\n`, or a lone `\r`.
///
/// Terminators are not kept and a trailing terminator does not start an empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find(['\r', '\n']) {
            Some(idx) => {
                lines.push(&rest[..idx]);
                let width = if rest[idx..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[idx + width..];
            }
            None => {
                lines.push(rest);
                break;
            }
        }
    }
    lines
}

pub fn is_comment_line(line: &str) -> bool {
    COMMENT_LINE.is_match(line)
}

/// Drops comment-only lines. Trailing comments on code lines are left alone.
pub fn strip_comment_lines<'a, I>(lines: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter(|line| !is_comment_line(line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_python_and_mel_comment_lines() {
        let lines = ["# header", "    // indented", "x = 1", "\t#tabbed", "doThing();"];
        assert_eq!(strip_comment_lines(lines), vec!["x = 1", "doThing();"]);
    }

    #[test]
    fn keeps_trailing_comments_and_blank_lines() {
        let lines = ["x = 1  # set x", "", "print('#not a comment')"];
        assert_eq!(strip_comment_lines(lines), lines.to_vec());
    }

    #[test]
    fn splits_on_every_line_ending() {
        assert_eq!(split_lines("a\r\nb\nc\rd"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_lines("a\n\nb\n"), vec!["a", "", "b"]);
        assert_eq!(split_lines("\r\r"), vec!["", ""]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn carriage_return_lines_are_stripped_one_by_one() {
        let lines = split_lines("# setup\rx = 1\rprint(x)");
        assert_eq!(strip_comment_lines(lines), vec!["x = 1", "print(x)"]);
    }

    #[test]
    fn stripping_is_idempotent_after_joining() {
        let inputs: [&[&str]; 4] = [
            &["# a", "b", "  // c", "d // e"],
            &["", "#", "x"],
            &["only code"],
            &["# all", "// comments"],
        ];
        for language in Language::ALL {
            let sep = language.separator();
            for input in inputs {
                let once = strip_comment_lines(input.iter().copied()).join(sep);
                let twice = strip_comment_lines(once.split(sep)).join(sep);
                assert_eq!(once, twice, "input {input:?} with {language}");
            }
        }
    }
}
