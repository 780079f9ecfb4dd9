use regex::Regex;

/// A fenced command block lifted out of a generated response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub content: String,
    pub index: usize,
}

/// Extract `bash`/`sh` fenced blocks from generated text, in source order.
///
/// A block opens on a line that trims to exactly ```` ```bash ```` or
/// ```` ```sh ```` and closes on a trimmed ```` ``` ````. Narrative text
/// outside fences is dropped. A trailing unterminated fence yields nothing:
/// a truncated generation must never turn into a partially executed command.
pub fn extract_blocks(text: &str) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_block = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if !in_block {
            if trimmed == "```bash" || trimmed == "```sh" {
                in_block = true;
                current.clear();
            }
        } else if trimmed == "```" {
            in_block = false;
            if !current.is_empty() {
                blocks.push(RawBlock {
                    content: current.join("\n"),
                    index: blocks.len(),
                });
            }
            current.clear();
        } else {
            current.push(line);
        }
    }

    blocks
}

/// Remove fenced code blocks from a response so only the conversational
/// part is shown when commands are being executed separately.
pub fn strip_code_blocks(text: &str) -> String {
    let re = Regex::new(r"(?s)```(bash|sh)?.*?```").unwrap();
    re.replace_all(text, "").trim().to_string()
}
