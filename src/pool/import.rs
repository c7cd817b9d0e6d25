// src/pool/import.rs

//! Bulk import of newline-delimited `id|secret` records.
//!
//! Every line is an independent create; one bad line never aborts the batch.

use crate::error::{AppError, Result};
use serde::Serialize;

/// One parsed line, with its 1-based position in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportLine {
    pub line: usize,
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportFailure {
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn record(&mut self, line: usize, id: Option<String>, outcome: Result<String>) {
        match outcome {
            Ok(id) => self.succeeded.push(id),
            Err(e) => self.failed.push(ImportFailure {
                line,
                id,
                error: e.to_string(),
            }),
        }
    }
}

/// Splits `data` into records. Blank lines and `#` comments are skipped;
/// malformed lines come back as `Err` with their line number.
pub fn parse_lines(data: &str) -> Vec<(usize, Result<ImportLine>)> {
    data.lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }
            Some((line, parse_line(line, trimmed)))
        })
        .collect()
}

fn parse_line(line: usize, trimmed: &str) -> Result<ImportLine> {
    let Some((id, secret)) = trimmed.split_once('|') else {
        return Err(AppError::validation(
            "data",
            format!("line {line}: expected 'id|secret'"),
        ));
    };
    let (id, secret) = (id.trim(), secret.trim());
    if id.is_empty() {
        return Err(AppError::validation("id", format!("line {line}: empty id")));
    }
    if secret.is_empty() {
        return Err(AppError::validation(
            "secret",
            format!("line {line}: empty secret"),
        ));
    }
    Ok(ImportLine {
        line,
        id: id.to_string(),
        secret: secret.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_blank_and_comment_lines() {
        let parsed = parse_lines("# header\n\n  k1 | sk-one  \nk2|sk-two\n");
        let lines: Vec<_> = parsed.into_iter().map(|(n, r)| (n, r.unwrap())).collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, 3);
        assert_eq!(lines[0].1.id, "k1");
        assert_eq!(lines[0].1.secret, "sk-one");
        assert_eq!(lines[1].1.id, "k2");
    }

    #[test]
    fn test_malformed_lines_fail_individually() {
        let parsed = parse_lines("no-separator\n|sk-x\nk3|\nk4|sk-four");

        assert_eq!(parsed.len(), 4);
        assert!(parsed[0].1.is_err());
        assert!(parsed[1].1.is_err());
        assert!(parsed[2].1.is_err());
        assert_eq!(parsed[3].1.as_ref().unwrap().id, "k4");
    }

    #[test]
    fn test_secret_may_contain_separator() {
        let parsed = parse_lines("k1|abc|def");
        assert_eq!(parsed[0].1.as_ref().unwrap().secret, "abc|def");
    }
}
