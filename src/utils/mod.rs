use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use crate::exec::Prompter;
use crate::ui;

pub fn ensure_directory(path: &PathBuf) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

/// Does the running process hold elevated privileges?
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    false
}

fn which(tool: &str) -> bool {
    Command::new("which")
        .arg(tool)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Is the tool on the executable search path? `python` is accepted under
/// either of its two common binary names.
pub fn tool_installed(tool: &str) -> bool {
    if tool == "python" {
        return which("python") || which("python3");
    }
    which(tool)
}

/// Detect the system package manager, preferring the most specific one.
pub fn package_manager() -> Option<&'static str> {
    let candidates = ["apt-get", "apt", "dnf", "yum", "pacman", "zypper", "brew"];
    candidates.into_iter().find(|pm| which(pm))
}

fn install_command(pkg_manager: &str, tool: &str) -> Option<String> {
    match pkg_manager {
        "apt" | "apt-get" => Some(format!(
            "sudo {pm} update && sudo {pm} install -y {tool}",
            pm = pkg_manager
        )),
        "dnf" | "yum" => Some(format!("sudo {} install -y {}", pkg_manager, tool)),
        "pacman" => Some(format!("sudo pacman -Sy --noconfirm {}", tool)),
        "zypper" => Some(format!("sudo zypper install -y {}", tool)),
        "brew" => Some(format!("brew install {}", tool)),
        _ => None,
    }
}

/// Offer to install a missing tool through the detected package manager.
/// Returns true only when the tool is available afterwards.
pub fn install_tool_interactive(tool: &str, prompter: &dyn Prompter) -> bool {
    let Some(pkg_manager) = package_manager() else {
        log::error!("Could not determine package manager for this system");
        return false;
    };

    // python installs ship as python3 everywhere that matters.
    let package = if tool == "python" { "python3" } else { tool };

    let Some(cmd) = install_command(pkg_manager, package) else {
        log::error!("Unsupported package manager: {}", pkg_manager);
        return false;
    };

    ui::info(&format!("To install {}, run: {}", package, cmd));
    if !prompter.confirm("Run installation command? (Y/n): ") {
        return false;
    }

    match Command::new("bash").arg("-c").arg(&cmd).status() {
        Ok(status) if status.success() => tool_installed(package),
        Ok(status) => {
            log::error!("Installation failed with exit code {:?}", status.code());
            false
        }
        Err(e) => {
            log::error!("Installation failed: {}", e);
            false
        }
    }
}
