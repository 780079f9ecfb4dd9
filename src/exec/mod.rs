use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

pub mod classify;
pub mod extract;
pub mod report;
pub mod runner;

use classify::{Category, Classification};
use extract::RawBlock;
use report::NoiseFilter;

use crate::config::{Config, Session};
use crate::{ui, utils};

/// Final status of one executed (or deliberately not executed) command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Success,
    Failure,
    Interrupted,
    Skipped,
    ToolMissing,
}

impl ExecStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecStatus::Success => "success",
            ExecStatus::Failure => "failure",
            ExecStatus::Interrupted => "interrupted",
            ExecStatus::Skipped => "skipped",
            ExecStatus::ToolMissing => "tool_missing",
        }
    }
}

/// One outcome record per command in a batch. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub id: String,
    pub command: String,
    pub tool: String,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub status: ExecStatus,
    pub log_file: Option<PathBuf>,
}

/// Shared edge-triggered interruption signal. Raised by the Ctrl-C handler,
/// observed by the orchestrator and the active runner, cleared after each
/// recovery and before every new batch.
#[derive(Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// Closed yes/no choice with default = yes on empty input.
pub fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

/// Interactive confirmation seam: batch approval, tool installation and
/// privilege escalation all go through this.
pub trait Prompter {
    fn confirm(&self, prompt: &str) -> bool;
}

pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{}", prompt);
        let _ = io::stdout().flush();
        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            return false;
        }
        is_yes(&input)
    }
}

/// Drives one batch: target substitution, classification, gating, dispatch
/// to the runner, per-command logging and the final report.
pub struct Orchestrator<'a, P: Prompter> {
    session: &'a Session,
    config: &'a Config,
    prompter: &'a P,
    interrupt: Interrupt,
    filter: NoiseFilter,
}

impl<'a, P: Prompter> Orchestrator<'a, P> {
    pub fn new(session: &'a Session, config: &'a Config, prompter: &'a P, interrupt: Interrupt) -> Self {
        let filter = NoiseFilter::new(&config.noise_patterns);
        Self {
            session,
            config,
            prompter,
            interrupt,
            filter,
        }
    }

    /// Extract commands from a generated response and execute them in
    /// order. Returns one result per attempted command; an interruption
    /// truncates the batch after the interrupted command's record.
    pub async fn execute_batch(&self, response: &str) -> Result<Vec<ExecutionResult>> {
        let blocks = extract::extract_blocks(response);
        if blocks.is_empty() {
            log::debug!("No executable commands found in response");
            return Ok(Vec::new());
        }

        utils::ensure_directory(&self.session.output_dir)?;

        self.show_command_list(&blocks);
        if !self
            .prompter
            .confirm("Do you want to execute these commands? (Y/n): ")
        {
            ui::warn("Command execution cancelled by user.");
            return Ok(Vec::new());
        }

        self.interrupt.clear();
        let mut results = Vec::new();

        for block in &blocks {
            if self.interrupt.is_raised() {
                ui::warn("Skipping remaining commands due to interruption.");
                break;
            }

            let command = block.content.trim();
            if command.is_empty() {
                continue;
            }
            let command = self.substitute_target(command);
            let classification = classify::classify(&command, &self.config.privileged_flags);

            let result = match classification.category {
                Category::FileCreate | Category::PermissionChange => {
                    self.run_immediate(command, &classification).await
                }
                Category::ToolInvocation => self.run_tool(command, &classification).await,
            };

            let interrupted = result.status == ExecStatus::Interrupted;
            results.push(result);
            if interrupted {
                break;
            }
        }

        // Edge-triggered: handled interruptions must not leak into the
        // next batch.
        if self.interrupt.is_raised() {
            self.interrupt.clear();
        }

        report::generate_and_save_report(
            &results,
            &self.session.target,
            &self.session.output_dir,
            &self.filter,
        );

        Ok(results)
    }

    fn show_command_list(&self, blocks: &[RawBlock]) {
        ui::heading("The assistant has suggested the following commands:");
        for block in blocks {
            ui::dim(&format!("--- Command {} ---", block.index + 1));
            ui::command_text(&self.substitute_target(block.content.trim()));
        }
        ui::dim("-------------------");
    }

    /// Replace target placeholders only when a target is set; unset targets
    /// leave placeholders intact and the command fails naturally.
    fn substitute_target(&self, command: &str) -> String {
        if self.session.target.is_empty() {
            return command.to_string();
        }
        command
            .replace("<target_IP>", &self.session.target)
            .replace("<TARGET_IP>", &self.session.target)
            .replace("$TARGET", &self.session.target)
    }

    /// File-creation and permission commands run immediately and
    /// unconditionally: a synchronous spawn-and-wait with no tool or root
    /// gating and no interruption handling.
    async fn run_immediate(&self, command: String, class: &Classification) -> ExecutionResult {
        let label = match class.category {
            Category::PermissionChange => "chmod",
            _ => "file creation",
        };
        let first_line = command.lines().next().unwrap_or_default();
        ui::command(&format!("Executing {}: {}", label, first_line));

        let (status, return_code, stdout, stderr) = match tokio::process::Command::new("bash")
            .arg("-c")
            .arg(&command)
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                log::debug!("{} completed: {}", label, first_line);
                (
                    ExecStatus::Success,
                    0,
                    format!("{} completed successfully.", label),
                    String::new(),
                )
            }
            Ok(output) => {
                let code = output.status.code().unwrap_or(runner::RC_SPAWN_FAILED);
                ui::error(&format!("{} failed (exit code {})", label, code));
                (
                    ExecStatus::Failure,
                    code,
                    String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                )
            }
            Err(e) => {
                ui::error(&format!("{} failed: {}", label, e));
                (
                    ExecStatus::Failure,
                    runner::RC_SPAWN_FAILED,
                    String::new(),
                    e.to_string(),
                )
            }
        };

        ExecutionResult {
            id: Uuid::new_v4().to_string(),
            command,
            tool: class.tool.clone(),
            return_code,
            stdout,
            stderr,
            status,
            log_file: None,
        }
    }

    async fn run_tool(&self, command: String, class: &Classification) -> ExecutionResult {
        let tool = &class.tool;

        if !utils::tool_installed(tool) {
            ui::error(&format!("Tool '{}' not found.", tool));
            if !utils::install_tool_interactive(tool, self.prompter) {
                return ExecutionResult {
                    id: Uuid::new_v4().to_string(),
                    command,
                    tool: tool.clone(),
                    return_code: runner::RC_SPAWN_FAILED,
                    stdout: String::new(),
                    stderr: format!("Tool '{}' not found and could not be installed.", tool),
                    status: ExecStatus::ToolMissing,
                    log_file: None,
                };
            }
        }

        let mut command = command;
        if class.requires_root && !self.session.has_root {
            ui::warn("Command requires root privileges:");
            ui::command_text(&command);
            if self.prompter.confirm("Run with sudo? (Y/n): ") {
                if !command.trim_start().starts_with("sudo") {
                    command = format!("sudo {}", command);
                }
            } else {
                ui::info(&format!("Skipping root-required command: {}", command));
                return ExecutionResult {
                    id: Uuid::new_v4().to_string(),
                    command,
                    tool: tool.clone(),
                    return_code: runner::RC_SPAWN_FAILED,
                    stdout: String::new(),
                    stderr: "Skipped due to missing root privileges.".to_string(),
                    status: ExecStatus::Skipped,
                    log_file: None,
                };
            }
        }

        ui::command(&format!("Executing: {}", command));
        let spinner = ui::Spinner::start(format!("Running {}", tool));
        let target = (!self.session.target.is_empty()).then_some(self.session.target.as_str());
        let outcome = runner::run_command(&command, target, self.interrupt.subscribe()).await;
        spinner.stop().await;

        let status = if outcome.interrupted || self.interrupt.is_raised() {
            ExecStatus::Interrupted
        } else if outcome.return_code == 0 {
            ExecStatus::Success
        } else {
            ExecStatus::Failure
        };

        let log_file = report::write_command_log(
            &self.session.output_dir,
            tool,
            &command,
            outcome.return_code,
            &outcome.stdout,
            &outcome.stderr,
        );

        match status {
            ExecStatus::Interrupted => {
                ui::warn(&format!("Execution of '{}' interrupted by user.", tool));
            }
            ExecStatus::Success => {
                ui::success(&format!("Command '{}' completed successfully.", tool));
                if self.session.verbose {
                    let summary = self.filter.filter(&outcome.stdout);
                    ui::dim(if summary.is_empty() {
                        "[No filtered output]"
                    } else {
                        summary.as_str()
                    });
                }
            }
            _ => {
                ui::error(&format!(
                    "Command '{}' failed (Exit Code: {}).",
                    tool, outcome.return_code
                ));
                if !outcome.stderr.is_empty() {
                    let cut = outcome
                        .stderr
                        .char_indices()
                        .nth(500)
                        .map(|(i, _)| i)
                        .unwrap_or(outcome.stderr.len());
                    ui::error(&outcome.stderr[..cut]);
                }
            }
        }

        ExecutionResult {
            id: Uuid::new_v4().to_string(),
            command,
            tool: tool.clone(),
            return_code: outcome.return_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            status,
            log_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct YesPrompter;
    impl Prompter for YesPrompter {
        fn confirm(&self, _prompt: &str) -> bool {
            true
        }
    }

    struct NoPrompter;
    impl Prompter for NoPrompter {
        fn confirm(&self, _prompt: &str) -> bool {
            false
        }
    }

    /// Answers prompts in order from a fixed script.
    struct ScriptedPrompter {
        answers: Mutex<Vec<bool>>,
    }

    impl ScriptedPrompter {
        fn new(answers: Vec<bool>) -> Self {
            Self {
                answers: Mutex::new(answers),
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn confirm(&self, _prompt: &str) -> bool {
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                false
            } else {
                answers.remove(0)
            }
        }
    }

    fn test_session(output_dir: &std::path::Path) -> Session {
        Session {
            target: String::new(),
            verbose: false,
            explain: false,
            has_root: false,
            output_dir: output_dir.to_path_buf(),
        }
    }

    #[test]
    fn yes_tokens_default_affirmative() {
        assert!(is_yes(""));
        assert!(is_yes("y"));
        assert!(is_yes("YES"));
        assert!(is_yes("  Y \n"));
        assert!(!is_yes("n"));
        assert!(!is_yes("anything else"));
    }

    #[tokio::test]
    async fn single_echo_block_executes_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let config = Config::default();
        let orch = Orchestrator::new(&session, &config, &YesPrompter, Interrupt::new());

        let results = orch.execute_batch("```bash\necho hi\n```").await.unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.tool, "echo");
        assert_eq!(r.return_code, 0);
        assert_eq!(r.status, ExecStatus::Success);
        assert_eq!(r.stdout, "hi");
        let log = std::fs::read_to_string(r.log_file.as_ref().unwrap()).unwrap();
        assert!(log.contains("Return Code: 0"));
    }

    #[tokio::test]
    async fn target_placeholders_are_substituted() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = test_session(dir.path());
        session.target = "10.0.0.5".to_string();
        let config = Config::default();
        let orch = Orchestrator::new(&session, &config, &YesPrompter, Interrupt::new());

        let results = orch.execute_batch("```bash\necho $TARGET\n```").await.unwrap();
        assert_eq!(results[0].command, "echo 10.0.0.5");
        assert_eq!(results[0].stdout, "10.0.0.5");
    }

    #[tokio::test]
    async fn unset_target_leaves_placeholders_intact() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let config = Config::default();
        let orch = Orchestrator::new(&session, &config, &YesPrompter, Interrupt::new());

        let results = orch
            .execute_batch("```bash\necho '<target_IP>'\n```")
            .await
            .unwrap();
        assert_eq!(results[0].command, "echo '<target_IP>'");
    }

    #[tokio::test]
    async fn declined_batch_produces_no_results_or_report() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let config = Config::default();
        let orch = Orchestrator::new(&session, &config, &NoPrompter, Interrupt::new());

        let results = orch.execute_batch("```bash\necho hi\n```").await.unwrap();
        assert!(results.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn declined_escalation_is_recorded_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let config = Config::default();
        // Approve the batch, decline the sudo escalation.
        let prompter = ScriptedPrompter::new(vec![true, false]);
        let orch = Orchestrator::new(&session, &config, &prompter, Interrupt::new());

        let results = orch
            .execute_batch("```bash\nsudo sleep 0\n```")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ExecStatus::Skipped);
        assert_eq!(results[0].return_code, -1);
        assert!(results[0].stdout.is_empty());
        assert!(results[0].log_file.is_none());
    }

    #[tokio::test]
    async fn missing_tool_is_recorded_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let config = Config::default();
        // Approve the batch, decline the install offer.
        let prompter = ScriptedPrompter::new(vec![true, false]);
        let orch = Orchestrator::new(&session, &config, &prompter, Interrupt::new());

        let text = "```bash\ndefinitely_not_a_real_tool_xyz --probe\n```\n```bash\necho after\n```";
        let results = orch.execute_batch(text).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ExecStatus::ToolMissing);
        assert_eq!(results[0].return_code, -1);
        assert_eq!(results[1].status, ExecStatus::Success);
    }

    #[tokio::test]
    async fn interruption_truncates_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let config = Config::default();
        let interrupt = Interrupt::new();
        let orch = Orchestrator::new(&session, &config, &YesPrompter, interrupt.clone());

        let raiser = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                interrupt.raise();
            })
        };

        let text = "```bash\necho first\n```\n```bash\nsleep 30\n```\n```bash\necho third\n```";
        let results = orch.execute_batch(text).await.unwrap();
        raiser.await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ExecStatus::Success);
        assert_eq!(results[1].status, ExecStatus::Interrupted);
        // The flag is cleared once handled so the next batch starts clean.
        assert!(!interrupt.is_raised());
    }

    #[tokio::test]
    async fn file_creation_runs_without_gating() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let config = Config::default();
        let orch = Orchestrator::new(&session, &config, &YesPrompter, Interrupt::new());

        let marker = dir.path().join("created.txt");
        let text = format!("```bash\necho 'hello' > {}\n```", marker.display());
        let results = orch.execute_batch(&text).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool, "file_creation_echo");
        assert_eq!(results[0].status, ExecStatus::Success);
        assert!(results[0].log_file.is_none());
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn batch_writes_an_aggregate_report() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(dir.path());
        let config = Config::default();
        let orch = Orchestrator::new(&session, &config, &YesPrompter, Interrupt::new());

        orch.execute_batch("```bash\necho hi\n```").await.unwrap();
        let report_written = std::fs::read_dir(dir.path()).unwrap().any(|entry| {
            entry
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with("penpilot_report_")
        });
        assert!(report_written);
    }
}
