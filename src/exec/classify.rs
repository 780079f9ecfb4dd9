use regex::Regex;

use crate::config::PrivilegedFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    FileCreate,
    PermissionChange,
    ToolInvocation,
}

/// Derived category and tool identity for one raw command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub tool: String,
    pub requires_root: bool,
}

/// Inspect a raw command and derive its execution category and primary tool.
///
/// Match order: heredoc file creation, echo redirection, chmod +x, then the
/// first whitespace token (skipping a leading `sudo`) with script-name and
/// interpreter handling.
pub fn classify(command: &str, privileged_flags: &[PrivilegedFlags]) -> Classification {
    let command = command.trim();

    let requires_root = command.split_whitespace().any(|tok| tok == "sudo")
        || privileged_flags.iter().any(|entry| {
            command.contains(&entry.tool)
                && entry.flags.iter().any(|flag| command.contains(flag.as_str()))
        });

    if command.contains("cat <<") && command.contains("EOF") && command.contains('>') {
        return Classification {
            category: Category::FileCreate,
            tool: "file_creation_cat".to_string(),
            requires_root,
        };
    }

    let echo_create = Regex::new(r#"^echo\s+(['"`].*?['"`]\s*)?>\s*\S+"#).unwrap();
    if echo_create.is_match(command) {
        return Classification {
            category: Category::FileCreate,
            tool: "file_creation_echo".to_string(),
            requires_root,
        };
    }

    let chmod_exec = Regex::new(r"^chmod\s+\+x\s+\S+").unwrap();
    if chmod_exec.is_match(command) {
        return Classification {
            category: Category::PermissionChange,
            tool: "chmod".to_string(),
            requires_root,
        };
    }

    let mut tokens = command.split_whitespace();
    let first = tokens.next().unwrap_or("unknown_command");
    let candidate = if first == "sudo" {
        tokens.next().unwrap_or("unknown_command")
    } else {
        first
    };

    let tool = if candidate.ends_with(".py") || candidate.ends_with(".sh") {
        basename(candidate)
    } else if candidate.contains("python") {
        match tokens.next() {
            Some(arg) if arg.ends_with(".py") => basename(arg),
            _ => "python_interpreter".to_string(),
        }
    } else {
        basename(candidate)
    };

    Classification {
        category: Category::ToolInvocation,
        tool,
        requires_root,
    }
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
