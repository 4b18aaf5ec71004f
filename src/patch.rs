//! Unified-diff parsing and application.
//!
//! The generation stage produces patches as unified diffs; this module turns
//! them into structured edits and applies them to file content. Hunks are
//! applied with exact context matching, first at the declared position and
//! then by scanning for a unique match, so small line drift in the model's
//! output does not reject an otherwise correct patch.

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchLine {
    Context(String),
    Add(String),
    Remove(String),
}

#[derive(Debug, Clone)]
pub struct Hunk {
    pub old_start: usize,
    pub lines: Vec<PatchLine>,
}

/// One file's worth of edits from a unified diff.
#[derive(Debug, Clone)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    /// `--- /dev/null` means the file is being created.
    pub fn is_new_file(&self) -> bool {
        self.old_path.is_none()
    }

    /// `+++ /dev/null` means the file is being deleted.
    pub fn is_delete(&self) -> bool {
        self.new_path.is_none()
    }

    /// Repository-relative path this patch targets.
    pub fn target_path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }
}

fn strip_diff_path(raw: &str) -> Option<String> {
    // Paths may carry a trailing timestamp after a tab
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    if path == "/dev/null" {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(path.to_string())
}

fn parse_hunk_header(line: &str) -> Result<usize> {
    // @@ -old_start,old_count +new_start,new_count @@
    let inner = line
        .trim_start_matches('@')
        .trim_end_matches(|c| c != '@')
        .trim_matches('@')
        .trim();
    let old_part = inner
        .split_whitespace()
        .find(|p| p.starts_with('-'))
        .ok_or_else(|| AppError::Patch(format!("invalid hunk header: {line}")))?;
    let start = old_part[1..]
        .split(',')
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| AppError::Patch(format!("invalid hunk header: {line}")))?;
    Ok(start)
}

/// Parse a unified diff into per-file patches.
pub fn parse(diff: &str) -> Result<Vec<FilePatch>> {
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut current: Option<FilePatch> = None;

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("--- ") {
            if let Some(patch) = current.take() {
                if !patch.hunks.is_empty() {
                    patches.push(patch);
                }
            }
            current = Some(FilePatch {
                old_path: strip_diff_path(rest),
                new_path: None,
                hunks: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            let patch = current.as_mut().ok_or_else(|| {
                AppError::Patch("'+++' header without preceding '---'".to_string())
            })?;
            patch.new_path = strip_diff_path(rest);
        } else if line.starts_with("@@") {
            let patch = current
                .as_mut()
                .ok_or_else(|| AppError::Patch("hunk without file header".to_string()))?;
            patch.hunks.push(Hunk {
                old_start: parse_hunk_header(line)?,
                lines: Vec::new(),
            });
        } else if let Some(patch) = current.as_mut() {
            let Some(hunk) = patch.hunks.last_mut() else {
                // Text between the +++ header and the first hunk (e.g. index
                // lines) is ignored.
                continue;
            };
            if let Some(text) = line.strip_prefix('+') {
                hunk.lines.push(PatchLine::Add(text.to_string()));
            } else if let Some(text) = line.strip_prefix('-') {
                hunk.lines.push(PatchLine::Remove(text.to_string()));
            } else if let Some(text) = line.strip_prefix(' ') {
                hunk.lines.push(PatchLine::Context(text.to_string()));
            } else if line.is_empty() {
                hunk.lines.push(PatchLine::Context(String::new()));
            } else if line.starts_with('\\') {
                // "\ No newline at end of file"
                continue;
            }
        }
    }

    if let Some(patch) = current.take() {
        if !patch.hunks.is_empty() {
            patches.push(patch);
        }
    }

    if patches.is_empty() {
        return Err(AppError::Patch("no file patches found in diff".to_string()));
    }
    Ok(patches)
}

/// Lines a hunk expects to find in the old file, in order.
fn expected_old_lines(hunk: &Hunk) -> Vec<&str> {
    hunk.lines
        .iter()
        .filter_map(|l| match l {
            PatchLine::Context(s) | PatchLine::Remove(s) => Some(s.as_str()),
            PatchLine::Add(_) => None,
        })
        .collect()
}

fn matches_at(lines: &[&str], at: usize, expected: &[&str]) -> bool {
    at + expected.len() <= lines.len() && lines[at..at + expected.len()] == *expected
}

/// Apply one file's hunks to its current content, returning the new content.
pub fn apply(content: &str, patch: &FilePatch) -> Result<String> {
    let target = patch.target_path().unwrap_or("<unknown>");

    if patch.is_new_file() {
        let mut out = String::new();
        for hunk in &patch.hunks {
            for line in &hunk.lines {
                match line {
                    PatchLine::Add(text) => {
                        out.push_str(text);
                        out.push('\n');
                    }
                    _ => {
                        return Err(AppError::Patch(format!(
                            "new-file patch for {target} has non-addition lines"
                        )))
                    }
                }
            }
        }
        return Ok(out);
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize;

    for (index, hunk) in patch.hunks.iter().enumerate() {
        let expected = expected_old_lines(hunk);

        // Declared position first (1-based), then scan forward for a match
        let declared = hunk.old_start.saturating_sub(1);
        let position = if matches_at(&lines, declared, &expected) {
            declared
        } else {
            (cursor..lines.len())
                .find(|&at| matches_at(&lines, at, &expected))
                .ok_or_else(|| {
                    AppError::Patch(format!(
                        "hunk #{} does not apply to {target}: context mismatch",
                        index + 1
                    ))
                })?
        };

        if position < cursor {
            return Err(AppError::Patch(format!(
                "hunk #{} overlaps an earlier hunk in {target}",
                index + 1
            )));
        }

        out.extend(lines[cursor..position].iter().map(|s| s.to_string()));

        let mut old_at = position;
        for line in &hunk.lines {
            match line {
                PatchLine::Context(text) => {
                    out.push(text.clone());
                    old_at += 1;
                }
                PatchLine::Remove(_) => {
                    old_at += 1;
                }
                PatchLine::Add(text) => {
                    out.push(text.clone());
                }
            }
        }
        cursor = old_at;
    }

    out.extend(lines[cursor..].iter().map(|s| s.to_string()));

    let mut result = out.join("\n");
    if content.ends_with('\n') || content.is_empty() {
        result.push('\n');
    }
    Ok(result)
}
