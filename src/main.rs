mod ai;
mod config;
mod exec;
mod ui;
mod utils;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use ai::{ChatBackend, Conversation, OpenRouterClient};
use config::{Config, Session};
use exec::{extract, Interrupt, Orchestrator, StdinPrompter};

#[derive(Parser)]
#[command(name = "penpilot", about = "AI-assisted penetration testing shell")]
struct Cli {
    /// Target IP address or URL used for placeholder substitution
    #[arg(long)]
    target: Option<String>,

    /// Directory for command logs and execution reports
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Show filtered command output after successful runs
    #[arg(long, short)]
    verbose: bool,

    /// Model to use first, overriding the configured order
    #[arg(long)]
    model: Option<String>,

    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".penpilot").join("config.toml")
}

fn read_input() -> Option<String> {
    ui::print_prompt();
    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) => None,
        Ok(_) => Some(input.trim().to_string()),
        Err(e) => {
            log::error!("Failed to read input: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = Config::load(&config_path)?;

    let mut session = Session {
        target: cli.target.unwrap_or_default(),
        verbose: cli.verbose,
        explain: false,
        has_root: utils::is_root(),
        output_dir: cli.output_dir.unwrap_or_else(|| config.output_dir.clone()),
    };
    utils::ensure_directory(&session.output_dir)?;

    let mut backend = match OpenRouterClient::new(config.models.clone()) {
        Ok(backend) => backend,
        Err(e) => {
            ui::error(&e.to_string());
            ui::info("Set it with: export OPENROUTER_API_KEY=\"your-api-key\"");
            return Ok(());
        }
    };
    if let Some(model) = cli.model {
        if !backend.set_model(&model) {
            ui::warn(&format!("Model '{}' is not in the configured list.", model));
        }
    }

    let interrupt = Interrupt::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
                interrupt.raise();
                ui::warn("Operation interrupted by user. Type 'exit' to quit or continue.");
            }
        });
    }

    let prompter = StdinPrompter;
    let mut conversation = Conversation::new();

    ui::clear_screen();
    ui::banner();
    ui::dim("Type 'help' for available commands");
    ui::print_status(&session, backend.current_model());

    loop {
        let Some(input) = read_input() else { break };
        if input.is_empty() {
            continue;
        }

        let lowered = input.to_lowercase();
        let mut parts = lowered.splitn(2, char::is_whitespace);
        let main_command = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or("").trim();

        match main_command {
            "help" => print_help(&session),
            "exit" | "quit" => {
                ui::info("Exiting PenPilot. Goodbye!");
                break;
            }
            "clear" => {
                ui::clear_screen();
                ui::banner();
                ui::print_status(&session, backend.current_model());
            }
            "status" => ui::print_status(&session, backend.current_model()),
            "set" => {
                if rest == "target" || rest.starts_with("target ") {
                    let value = rest["target".len()..].trim();
                    if value.is_empty() {
                        ui::warn("Please provide a target IP address or URL.");
                    } else {
                        session.target = value.to_string();
                        ui::success(&format!("Target set to: {}", session.target));
                        conversation.add_user(&format!("Target set to {}", session.target));
                    }
                } else {
                    ui::warn("Invalid 'set' command. Usage: 'set target <IP|URL>'");
                }
            }
            "unset" => {
                if rest == "target" {
                    if session.target.is_empty() {
                        ui::dim("No target is currently set.");
                    } else {
                        ui::success(&format!("Target {} unset.", session.target));
                        session.target.clear();
                        conversation.add_user("Target unset.");
                    }
                } else {
                    ui::warn("Invalid 'unset' command. Usage: 'unset target'");
                }
            }
            "verbose" => {
                session.verbose = toggle(rest, session.verbose, "Verbose command output");
                ui::print_status(&session, backend.current_model());
            }
            "explain" => {
                session.explain = toggle(rest, session.explain, "AI explanations");
                ui::print_status(&session, backend.current_model());
            }
            "model" => {
                if rest == "list" || rest.is_empty() {
                    ui::heading("--- Available Models ---");
                    for (idx, model) in backend.models().iter().enumerate() {
                        let marker = if model == backend.current_model() {
                            " (current)"
                        } else {
                            ""
                        };
                        ui::info(&format!("{}. {}{}", idx + 1, model, marker));
                    }
                } else if backend.set_model(rest) {
                    ui::success(&format!("AI model set to: {}", backend.current_model()));
                } else {
                    ui::warn(&format!(
                        "Model '{}' not found. Use 'model list' to see available models.",
                        rest
                    ));
                }
            }
            "history" => print_history(&conversation),
            "reset" => {
                print!("Are you sure you want to clear all conversation history and reset settings? (y/N): ");
                let _ = io::stdout().flush();
                let mut answer = String::new();
                let _ = io::stdin().read_line(&mut answer);
                if answer.trim().eq_ignore_ascii_case("y") {
                    conversation.reset();
                    session.target.clear();
                    session.verbose = false;
                    session.explain = false;
                    ui::success("PenPilot has been reset.");
                    ui::print_status(&session, backend.current_model());
                } else {
                    ui::dim("Reset cancelled.");
                }
            }
            _ => {
                handle_assistant_turn(
                    &input,
                    &mut conversation,
                    &mut backend,
                    &session,
                    &config,
                    &prompter,
                    &interrupt,
                )
                .await;
            }
        }
    }

    Ok(())
}

fn toggle(argument: &str, current: bool, label: &str) -> bool {
    let next = match argument {
        "on" => true,
        "off" => false,
        "" => !current,
        _ => {
            ui::warn(&format!("Invalid usage. Use '{} on' or 'off'.", label.to_lowercase()));
            return current;
        }
    };
    ui::success(&format!(
        "{} is now {}.",
        label,
        if next { "ON" } else { "OFF" }
    ));
    next
}

async fn handle_assistant_turn(
    input: &str,
    conversation: &mut Conversation,
    backend: &mut OpenRouterClient,
    session: &Session,
    config: &Config,
    prompter: &StdinPrompter,
    interrupt: &Interrupt,
) {
    let mut content = input.to_string();
    if session.explain {
        content.push_str("\n\n(Provide detailed explanations)");
    }
    if !session.target.is_empty() {
        content.push_str(&format!("\n\n(Current target: '{}')", session.target));
    }
    conversation.add_user(&content);

    let spinner = ui::Spinner::start("AI is thinking".to_string());
    let response = backend.complete(conversation.messages()).await;
    spinner.stop().await;

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            ui::error(&e.to_string());
            return;
        }
    };
    conversation.add_assistant(&response);

    let blocks = extract::extract_blocks(&response);
    if blocks.is_empty() {
        ui::assistant(&response);
        return;
    }

    // Commands are executed separately; show only the conversational part.
    let narrative = extract::strip_code_blocks(&response);
    if !narrative.is_empty() {
        ui::assistant(&narrative);
    }

    let orchestrator = Orchestrator::new(session, config, prompter, interrupt.clone());
    match orchestrator.execute_batch(&response).await {
        Ok(results) => {
            log::debug!("Batch finished with {} results", results.len());
        }
        Err(e) => ui::error(&format!("Batch execution failed: {}", e)),
    }
}

fn print_help(session: &Session) {
    ui::heading("--- Available Commands ---");
    ui::info("help: Show this help message.");
    ui::info("exit: Exit the application.");
    ui::info("clear: Clear the terminal screen.");
    ui::info("status: Display current configuration and status.");
    ui::info("set target <IP|URL>: Set the target for actions.");
    ui::info("unset target: Clear the currently set target.");
    ui::info(&format!(
        "verbose [on|off]: Toggle verbose command output. (Currently: {})",
        session.verbose
    ));
    ui::info(&format!(
        "explain [on|off]: Toggle AI explanations. (Currently: {})",
        session.explain
    ));
    ui::info("model [list|<model_name>]: List available models or set one.");
    ui::info("history: Show the conversation history.");
    ui::info("reset: Clear the conversation history and reset settings.");
    ui::dim("Any other input will be sent to the AI for processing.");
}

fn print_history(conversation: &Conversation) {
    if conversation.history().count() == 0 {
        ui::dim("No conversation history yet.");
        return;
    }
    ui::heading("--- Conversation History ---");
    for message in conversation.history() {
        let (who, content) = match message.role {
            ai::Role::User => ("You", message.content.clone()),
            _ => {
                let content = if extract::extract_blocks(&message.content).is_empty() {
                    message.content.clone()
                } else {
                    "[AI generated commands]".to_string()
                };
                ("AI", content)
            }
        };
        ui::info(&format!("{}: {}", who, content));
    }
}
