#![forbid(unsafe_code)]

//! YAML syntax check, style lint and a conservative auto-fix.
//!
//! Linting runs in two passes. The document stream is first parsed with
//! `serde_yaml`; a parse failure is reported as [`LintStatus::InvalidSyntax`]
//! with its position. Parsable input is then checked line by line against a
//! small set of style rules modelled on yamllint's defaults.

use serde::{Deserialize as _, Serialize};

/// Longest line accepted by the `line-length` rule.
pub const MAX_LINE_LENGTH: usize = 80;

/// Blank lines allowed in a row by the `empty-lines` rule.
pub const MAX_EMPTY_LINES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LintStatus {
    Perfect,
    ValidWithIssues,
    InvalidSyntax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub line: usize,
    pub column: usize,
    pub level: Level,
    pub rule: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxError {
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub status: LintStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<Problem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SyntaxError>,
}

impl LintReport {
    fn invalid(error: SyntaxError) -> Self {
        Self {
            status: LintStatus::InvalidSyntax,
            problems: Vec::new(),
            error: Some(error),
        }
    }
}

pub fn lint(content: &str) -> LintReport {
    if content.trim().is_empty() {
        return LintReport::invalid(SyntaxError {
            line: None,
            column: None,
            message: "content must not be empty".to_owned(),
        });
    }

    if let Err(e) = parse_documents(content) {
        tracing::debug!(error = %e, "yaml syntax check failed");
        let location = e.location();
        return LintReport::invalid(SyntaxError {
            line: location.as_ref().map(serde_yaml::Location::line),
            column: location.as_ref().map(serde_yaml::Location::column),
            message: e.to_string(),
        });
    }

    let problems = style_problems(content);
    LintReport {
        status: if problems.is_empty() {
            LintStatus::Perfect
        } else {
            LintStatus::ValidWithIssues
        },
        problems,
        error: None,
    }
}

/// Adds a leading `---` and re-emits each document with uniform indentation.
///
/// Comments and quoting are not preserved. Input that does not parse is
/// returned with only the document marker added.
pub fn auto_fix(content: &str) -> String {
    let marked = if content.trim_start().starts_with("---") {
        content.to_owned()
    } else {
        format!("---\n{content}")
    };

    let docs = match parse_documents(&marked) {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!(error = %e, "cannot auto-fix YAML; returning it unchanged");
            return marked;
        }
    };

    let mut out = String::new();
    for doc in &docs {
        match serde_yaml::to_string(doc) {
            Ok(text) => {
                out.push_str("---\n");
                out.push_str(text.strip_prefix("---\n").unwrap_or(&text));
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot re-emit YAML document; returning it unchanged");
                return marked;
            }
        }
    }
    out
}

fn parse_documents(content: &str) -> Result<Vec<serde_yaml::Value>, serde_yaml::Error> {
    serde_yaml::Deserializer::from_str(content)
        .map(serde_yaml::Value::deserialize)
        .collect()
}

fn style_problems(content: &str) -> Vec<Problem> {
    let mut out = Vec::new();

    let first_content = content
        .lines()
        .position(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));
    if let Some(idx) = first_content
        && !content.lines().nth(idx).is_some_and(|l| l.starts_with("---"))
    {
        out.push(Problem {
            line: idx + 1,
            column: 1,
            level: Level::Warning,
            rule: "document-start",
            message: "missing document start \"---\"".to_owned(),
        });
    }

    let mut blank_run = 0usize;
    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;

        let trimmed = line.trim_end_matches([' ', '\t']);
        if trimmed.len() != line.len() {
            out.push(Problem {
                line: line_no,
                column: trimmed.chars().count() + 1,
                level: Level::Error,
                rule: "trailing-spaces",
                message: "trailing spaces".to_owned(),
            });
        }

        let width = line.chars().count();
        if width > MAX_LINE_LENGTH {
            out.push(Problem {
                line: line_no,
                column: MAX_LINE_LENGTH + 1,
                level: Level::Error,
                rule: "line-length",
                message: format!("line too long ({width} > {MAX_LINE_LENGTH} characters)"),
            });
        }

        let body = line.trim_start();
        if let Some(rest) = body.strip_prefix('#')
            && !rest.is_empty()
            && !rest.starts_with([' ', '#', '!'])
        {
            out.push(Problem {
                line: line_no,
                column: line.len() - body.len() + 2,
                level: Level::Warning,
                rule: "comments",
                message: "missing starting space in comment".to_owned(),
            });
        }

        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == MAX_EMPTY_LINES + 1 {
                out.push(Problem {
                    line: line_no,
                    column: 1,
                    level: Level::Error,
                    rule: "empty-lines",
                    message: format!("too many blank lines (> {MAX_EMPTY_LINES})"),
                });
            }
        } else {
            blank_run = 0;
        }
    }

    if !content.ends_with('\n') {
        out.push(Problem {
            line: content.lines().count().max(1),
            column: content.lines().last().map_or(0, |l| l.chars().count()) + 1,
            level: Level::Error,
            rule: "new-line-at-end-of-file",
            message: "no new line character at the end of file".to_owned(),
        });
    }

    out.sort_by_key(|p| (p.line, p.column));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(report: &LintReport) -> Vec<&'static str> {
        report.problems.iter().map(|p| p.rule).collect()
    }

    #[test]
    fn clean_document_is_perfect() {
        let report = lint("---\nname: widgets\nitems:\n  - a\n  - b\n");
        assert_eq!(report.status, LintStatus::Perfect);
        assert!(report.problems.is_empty());
        assert!(report.error.is_none());
    }

    #[test]
    fn style_issues_keep_the_document_valid() {
        let report = lint("name: widgets   \nkey: value");
        assert_eq!(report.status, LintStatus::ValidWithIssues);
        assert_eq!(
            rules(&report),
            vec!["document-start", "trailing-spaces", "new-line-at-end-of-file"]
        );

        let trailing = &report.problems[1];
        assert_eq!((trailing.line, trailing.column), (1, 14));
        assert_eq!(trailing.level, Level::Error);
        assert_eq!(report.problems[0].level, Level::Warning);
    }

    #[test]
    fn long_lines_comments_and_blank_runs_are_reported() {
        let long = format!("---\nkey: {}\n#note\n\n\n\nnext: 1\n", "x".repeat(90));
        let report = lint(&long);
        assert_eq!(report.status, LintStatus::ValidWithIssues);
        assert_eq!(rules(&report), vec!["line-length", "comments", "empty-lines"]);
        assert_eq!(report.problems[0].line, 2);
        assert_eq!(report.problems[1].line, 3);
        assert_eq!(report.problems[2].line, 6);
    }

    #[test]
    fn broken_syntax_is_reported_with_position() {
        let report = lint("---\nkey: [1, 2\nother: 3\n");
        assert_eq!(report.status, LintStatus::InvalidSyntax);
        assert!(report.problems.is_empty());
        let err = report.error.unwrap();
        assert!(err.line.is_some_and(|l| l >= 1));
        assert!(!err.message.is_empty());
    }

    #[test]
    fn empty_content_is_invalid() {
        let report = lint("  \n");
        assert_eq!(report.status, LintStatus::InvalidSyntax);
        assert_eq!(report.error.unwrap().line, None);
    }

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&lint("a: 1\n")).unwrap();
        assert!(json.contains("\"VALID_WITH_ISSUES\""), "{json}");
        assert!(json.contains("\"level\":\"warning\""), "{json}");
    }

    #[test]
    fn auto_fix_adds_document_start_and_stays_equivalent() {
        let input = "name: widgets\nlist:\n- a\n- b\n";
        let fixed = auto_fix(input);
        assert!(fixed.starts_with("---\n"), "{fixed}");
        assert_eq!(lint(&fixed).status, LintStatus::Perfect, "{fixed}");

        let before: serde_yaml::Value = serde_yaml::from_str(input).unwrap();
        let after: serde_yaml::Value = serde_yaml::from_str(&fixed).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn auto_fix_leaves_unparsable_input_alone() {
        assert_eq!(auto_fix("key: [1, 2\n"), "---\nkey: [1, 2\n");
    }
}
