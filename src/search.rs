use std::path::Path;
use std::process::Stdio;

use crate::error::Result;
use crate::workflow::data::SearchHit;

/// Pattern-based codebase search over a checked-out workspace, backed by grep.
pub struct CodeSearcher {
    max_results: usize,
}

impl CodeSearcher {
    pub fn new(max_results: usize) -> Self {
        Self { max_results }
    }

    /// Search for a fixed pattern, returning matching lines with file paths
    /// and line numbers. Matches are capped at `max_results`.
    pub async fn search(&self, workspace_root: &Path, pattern: &str) -> Result<Vec<SearchHit>> {
        let output = tokio::process::Command::new("grep")
            .args([
                "-rnF",
                "--max-count=5",
                "--exclude-dir=.git",
                "--exclude-dir=node_modules",
                "--exclude-dir=target",
                "--exclude-dir=.venv",
                "--exclude-dir=vendor",
                pattern,
                ".",
            ])
            .current_dir(workspace_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        // grep exits 1 on no matches; only exit codes above 1 are faults
        if !output.status.success() && output.status.code() != Some(1) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(pattern = %pattern, error = %stderr, "grep failed");
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let hits = stdout
            .lines()
            .take(self.max_results)
            .filter_map(parse_grep_line)
            .collect();
        Ok(hits)
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }
}

fn parse_grep_line(line: &str) -> Option<SearchHit> {
    // ./path/to/file:42:matched content
    let mut parts = line.splitn(3, ':');
    let file = parts.next()?.trim_start_matches("./").to_string();
    let line_number = parts.next()?.parse::<u64>().ok()?;
    let content = parts.next()?.trim_end().to_string();
    Some(SearchHit {
        file,
        line: line_number,
        content,
    })
}
