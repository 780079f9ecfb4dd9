use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use regex::Regex;

use super::{ExecStatus, ExecutionResult};
use crate::utils;

/// Most filtered stdout lines kept per command in the report.
const MAX_SUMMARY_LINES: usize = 20;
/// Longest stderr excerpt included in the report.
const MAX_STDERR_CHARS: usize = 500;
const TABLE_PADDING: usize = 2;

/// Data-driven output noise filter: configured regex patterns matched
/// case-insensitively per line, matching lines dropped entirely.
pub struct NoiseFilter {
    patterns: Vec<Regex>,
}

impl NoiseFilter {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Skipping invalid noise pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Drop noise lines and blank lines, keeping at most
    /// [`MAX_SUMMARY_LINES`] trimmed lines.
    pub fn filter(&self, raw: &str) -> String {
        raw.lines()
            .filter(|line| !self.patterns.iter().any(|p| p.is_match(line)))
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(MAX_SUMMARY_LINES)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Persist one command's full transcript to a timestamp-qualified log file.
/// Returns `None` when the write fails; a missing log is tolerated and
/// rendered as "N/A" downstream.
pub fn write_command_log(
    output_dir: &Path,
    tool: &str,
    command: &str,
    return_code: i32,
    stdout: &str,
    stderr: &str,
) -> Option<PathBuf> {
    let timestamp = Local::now();
    let file_name = format!(
        "{}_{}.log",
        utils::sanitize_filename(tool),
        timestamp.format("%Y%m%d_%H%M%S_%6f")
    );
    let path = output_dir.join(file_name);

    let contents = format!(
        "Command: {}\nTimestamp: {}\nReturn Code: {}\n\n--- STDOUT ---\n{}\n\n--- STDERR ---\n{}\n",
        command,
        timestamp.to_rfc3339(),
        return_code,
        stdout,
        stderr
    );

    match fs::write(&path, contents) {
        Ok(()) => {
            log::debug!("Command output saved to {}", path.display());
            Some(path)
        }
        Err(e) => {
            log::error!("Could not write output to {}: {}", path.display(), e);
            None
        }
    }
}

fn log_file_display(result: &ExecutionResult) -> String {
    result
        .log_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn log_basename_display(result: &ExecutionResult) -> String {
    result
        .log_file
        .as_deref()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Render the persisted batch report: header with timestamp and target,
/// then one block per result with the filtered stdout excerpt and a capped
/// stderr excerpt.
pub fn render_report(results: &[ExecutionResult], target: &str, filter: &NoiseFilter) -> String {
    let mut out = Vec::new();
    out.push(format!(
        "--- Execution Report - {} ---",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    out.push(format!(
        "Target: {}",
        if target.is_empty() { "N/A" } else { target }
    ));
    out.push("-".repeat(60));

    for result in results {
        out.push(format!("\nCommand: {}", result.command));
        out.push(format!("Tool: {}", result.tool));
        out.push(format!("Status: {}", result.status.as_str().to_uppercase()));
        out.push(format!("Return Code: {}", result.return_code));
        if result.status == ExecStatus::Interrupted {
            out.push("Note: Command was interrupted by user.".to_string());
        }
        out.push(format!("Log File: {}", log_file_display(result)));

        out.push("\n--- Summary/Error Output ---".to_string());
        let summary = filter.filter(&result.stdout);
        if !summary.is_empty() {
            out.push(summary.clone());
        }
        if !result.stderr.is_empty() {
            out.push("\n--- STDERR ---".to_string());
            let cut = result
                .stderr
                .char_indices()
                .nth(MAX_STDERR_CHARS)
                .map(|(i, _)| i)
                .unwrap_or(result.stderr.len());
            let truncated = cut < result.stderr.len();
            out.push(format!(
                "{}{}",
                &result.stderr[..cut],
                if truncated { "..." } else { "" }
            ));
        }
        if summary.is_empty() && result.stderr.is_empty() {
            out.push("[No detailed output available or filtered]".to_string());
        }
        out.push("-".repeat(30));
    }

    out.join("\n")
}

/// Render the console summary table. Column widths track the widest cell
/// per column plus fixed padding.
pub fn summary_table(results: &[ExecutionResult]) -> String {
    let headers = ["Tool", "Status", "Return Code", "Log File"];
    let rows: Vec<[String; 4]> = results
        .iter()
        .map(|r| {
            [
                r.tool.clone(),
                r.status.as_str().to_uppercase(),
                r.return_code.to_string(),
                log_basename_display(r),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    for w in &mut widths {
        *w += TABLE_PADDING;
    }

    let separator = format!(
        "+{}+",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("+")
    );
    let format_row = |cells: &[String]| {
        format!(
            "| {} |",
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:<width$}", cell, width = w - TABLE_PADDING))
                .collect::<Vec<_>>()
                .join(" | ")
        )
    };

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let mut lines = vec![separator.clone(), format_row(&header_cells), separator.clone()];
    for row in &rows {
        lines.push(format_row(row));
    }
    lines.push(separator);
    lines.join("\n")
}

/// Write the aggregate report file and print the console summary.
/// An empty result set is an informational no-op.
pub fn generate_and_save_report(
    results: &[ExecutionResult],
    target: &str,
    output_dir: &Path,
    filter: &NoiseFilter,
) -> Option<PathBuf> {
    if results.is_empty() {
        crate::ui::info("No commands were executed to generate a report.");
        return None;
    }

    let report_text = render_report(results, target, filter);
    let report_path = output_dir.join(format!(
        "penpilot_report_{}.txt",
        Local::now().format("%Y%m%d_%H%M%S")
    ));

    let saved = match fs::write(&report_path, &report_text) {
        Ok(()) => {
            crate::ui::success(&format!("Report saved to: {}", report_path.display()));
            Some(report_path)
        }
        Err(e) => {
            log::error!("Failed to save report to {}: {}", report_path.display(), e);
            None
        }
    };

    crate::ui::heading("--- Execution Summary ---");
    println!("{}", summary_table(results));
    crate::ui::info(&format!(
        "For full details, check logs in '{}'",
        output_dir.display()
    ));

    saved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn result(tool: &str, status: ExecStatus, rc: i32) -> ExecutionResult {
        ExecutionResult {
            id: "test".to_string(),
            command: format!("{} arg", tool),
            tool: tool.to_string(),
            return_code: rc,
            stdout: String::new(),
            stderr: String::new(),
            status,
            log_file: None,
        }
    }

    #[test]
    fn noise_filter_drops_matching_lines_case_insensitively() {
        let filter = NoiseFilter::new(&[r"Starting Nmap \d+\.\d+".to_string()]);
        let raw = "STARTING NMAP 7.94\n22/tcp open ssh\n\n80/tcp open http";
        assert_eq!(filter.filter(raw), "22/tcp open ssh\n80/tcp open http");
    }

    #[test]
    fn noise_filter_caps_retained_lines() {
        let filter = NoiseFilter::new(&[]);
        let raw = (0..40).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        assert_eq!(filter.filter(&raw).lines().count(), MAX_SUMMARY_LINES);
    }

    #[test]
    fn default_patterns_compile_and_drop_nmap_noise() {
        let filter = NoiseFilter::new(&Config::default().noise_patterns);
        let raw = "Starting Nmap 7.94 ( https://nmap.org )\n22/tcp open ssh\nNmap done: 1 IP addresses";
        assert_eq!(filter.filter(raw), "22/tcp open ssh");
    }

    #[test]
    fn command_log_round_trips_return_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_command_log(dir.path(), "echo", "echo hi", 0, "hi", "").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("Command: echo hi\n"));
        assert!(contents.contains("Return Code: 0"));
        assert!(contents.contains("--- STDOUT ---\nhi"));
        assert!(contents.contains("--- STDERR ---"));
    }

    #[test]
    fn report_includes_interruption_note_and_stderr_cap() {
        let filter = NoiseFilter::new(&[]);
        let mut interrupted = result("nmap", ExecStatus::Interrupted, -15);
        interrupted.stderr = "e".repeat(600);
        let text = render_report(&[interrupted], "10.0.0.5", &filter);
        assert!(text.contains("Target: 10.0.0.5"));
        assert!(text.contains("Status: INTERRUPTED"));
        assert!(text.contains("Note: Command was interrupted by user."));
        assert!(text.contains(&format!("{}...", "e".repeat(500))));
        assert!(!text.contains(&"e".repeat(501)));
    }

    #[test]
    fn stderr_cap_counts_characters_not_bytes() {
        let filter = NoiseFilter::new(&[]);
        // 400 chars but 800 bytes: under the cap, so no ellipsis.
        let mut short = result("nmap", ExecStatus::Failure, 1);
        short.stderr = "é".repeat(400);
        let text = render_report(&[short], "", &filter);
        assert!(text.contains(&"é".repeat(400)));
        assert!(!text.contains("..."));

        let mut long = result("nmap", ExecStatus::Failure, 1);
        long.stderr = "é".repeat(600);
        let text = render_report(&[long], "", &filter);
        assert!(text.contains(&format!("{}...", "é".repeat(500))));
        assert!(!text.contains(&"é".repeat(501)));
    }

    #[test]
    fn summary_table_sizes_columns_to_widest_cell() {
        let rows = vec![
            result("nmap", ExecStatus::Success, 0),
            result("a_very_long_tool_name", ExecStatus::ToolMissing, -1),
        ];
        let table = summary_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        // Separator, header, separator, two rows, separator.
        assert_eq!(lines.len(), 6);
        let width = lines[0].len();
        assert!(lines.iter().all(|l| l.len() == width));
        assert!(table.contains("TOOL_MISSING"));
        assert!(table.contains("a_very_long_tool_name"));
        assert!(table.contains("N/A"));
    }
}
