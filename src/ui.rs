use std::io::{self, Write};
use std::time::Duration;

use crossterm::{
    cursor::MoveTo,
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Session;

const BANNERS: [&str; 3] = [
    r"
  ____  _____ _   _ ____ ___ _     ___ _____
 |  _ \| ____| \ | |  _ \_ _| |   / _ \_   _|
 | |_) |  _| |  \| | |_) | || |  | | | || |
 |  __/| |___| |\  |  __/| || |__| |_| || |
 |_|   |_____|_| \_|_|  |___|_____\___/ |_|
",
    r"
  ___  ___  _  _  ___  ___  _     ___  _____
 | _ \| __|| \| || _ \|_ _|| |   / _ \|_   _|
 |  _/| _| | .` ||  _/ | | | |__| (_) | | |
 |_|  |___||_|\_||_|  |___||____| \___/  |_|
",
    r"
 ######  ####### #     # ######  ### #       ####### #######
 #     # #       ##    # #     #  #  #       #     #    #
 ######  #####   # #   # ######   #  #       #     #    #
 #       #       #   # # #        #  #       #     #    #
 #       ####### #     # #       ### ####### #######    #
",
];

fn print_colored(color: Color, prefix: &str, message: &str) {
    let mut stdout = io::stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(color),
        Print(format!("{}{}\n", prefix, message)),
        ResetColor
    );
}

pub fn info(message: &str) {
    print_colored(Color::Blue, "[i] ", message);
}

pub fn warn(message: &str) {
    print_colored(Color::Yellow, "[!] ", message);
}

pub fn error(message: &str) {
    print_colored(Color::Red, "[x] ", message);
}

pub fn success(message: &str) {
    print_colored(Color::Green, "[+] ", message);
}

/// Command echo, shown before dispatching to the runner.
pub fn command(message: &str) {
    print_colored(Color::Magenta, "$> ", message);
}

/// Raw command text, no prefix.
pub fn command_text(message: &str) {
    print_colored(Color::Yellow, "", message);
}

pub fn heading(message: &str) {
    print_colored(Color::Cyan, "", message);
}

pub fn dim(message: &str) {
    print_colored(Color::DarkGrey, "", message);
}

pub fn assistant(message: &str) {
    print_colored(Color::Magenta, "", message);
}

pub fn clear_screen() {
    let mut stdout = io::stdout();
    let _ = execute!(stdout, Clear(ClearType::All), MoveTo(0, 0));
}

/// Rotates among the banner variants so repeated `clear` calls feel alive.
pub fn banner() {
    let pick = chrono::Local::now().timestamp_subsec_nanos() as usize % BANNERS.len();
    let mut stdout = io::stdout();
    let _ = execute!(
        stdout,
        SetForegroundColor(Color::Red),
        Print(BANNERS[pick]),
        ResetColor,
        Print("\n=== AI-Powered Cybersecurity Assistant ===\n")
    );
}

pub fn print_prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

pub fn print_status(session: &Session, model: &str) {
    heading("=== PenPilot Status ===");
    info(&format!(
        "Target: {}",
        if session.target.is_empty() {
            "Not set"
        } else {
            &session.target
        }
    ));
    info(&format!("Model: {}", model));
    info(&format!("Verbose Command Output: {}", session.verbose));
    info(&format!("AI Explanations: {}", session.explain));
    info(&format!("Output Directory: {}", session.output_dir.display()));
    println!();
}

/// In-progress indicator rendered by its own task while a command runs,
/// stopped through a dedicated signal once the runner completes.
pub struct Spinner {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Spinner {
    pub fn start(label: String) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let frames = ['⣾', '⣽', '⣻', '⢿', '⡿', '⣟', '⣯', '⣷'];
            let mut idx = 0usize;
            let mut ticker = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        print!("\r{} {}", label, frames[idx % frames.len()]);
                        let _ = io::stdout().flush();
                        idx += 1;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            print!("\r{}\r", " ".repeat(label.len() + 4));
            let _ = io::stdout().flush();
        });
        Self { stop_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}
