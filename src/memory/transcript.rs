//! Turn extraction from a JSON-lines conversation transcript.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct TranscriptMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    ToolUse {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        input: Option<Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum TranscriptEntry {
    User {
        #[serde(default)]
        message: Option<TranscriptMessage>,
    },
    Assistant {
        #[serde(default)]
        message: Option<TranscriptMessage>,
    },
    /// A line that was not valid transcript JSON.
    #[serde(skip)]
    Skipped,
    #[serde(other)]
    Other,
}

impl TranscriptEntry {
    pub fn parse(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or(Self::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Turn {
    pub query: String,
    pub response: String,
    pub files_edited: Vec<String>,
    pub tools_used: Vec<String>,
}

/// Unwraps `<user_query>...</user_query>` when present.
pub fn extract_user_query(text: &str) -> String {
    const OPEN: &str = "<user_query>";
    const CLOSE: &str = "</user_query>";
    if let Some(start) = text.find(OPEN) {
        let body = &text[start + OPEN.len()..];
        if let Some(end) = body.find(CLOSE) {
            return body[..end].trim().to_string();
        }
    }
    text.trim().to_string()
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Folds a batch of transcript lines into one Turn: the last non-empty user
/// query, the last non-empty assistant reply, and every distinct tool and
/// file path the assistant used. `None` when no user query was found.
pub fn parse_turn<'a, I>(lines: I) -> Option<Turn>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut turn = Turn::default();

    for line in lines {
        match TranscriptEntry::parse(line) {
            TranscriptEntry::User {
                message: Some(message),
            } => {
                for block in &message.content {
                    if let ContentBlock::Text { text: Some(text) } = block {
                        let query = extract_user_query(text);
                        if !query.is_empty() {
                            turn.query = query;
                        }
                    }
                }
            }
            TranscriptEntry::Assistant {
                message: Some(message),
            } => {
                let reply = message
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text: Some(text) } if !text.trim().is_empty() => {
                            Some(text.trim())
                        }
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                if !reply.is_empty() {
                    turn.response = reply;
                }

                for block in &message.content {
                    let ContentBlock::ToolUse { name: Some(name), input } = block else {
                        continue;
                    };
                    push_unique(&mut turn.tools_used, name);
                    if let Some(path) = input
                        .as_ref()
                        .and_then(|i| i.get("path"))
                        .and_then(Value::as_str)
                    {
                        push_unique(&mut turn.files_edited, path);
                    }
                }
            }
            _ => {}
        }
    }

    if turn.query.is_empty() {
        return None;
    }
    Some(turn)
}

pub fn daily_header(date: &str) -> String {
    format!("# {date} Daily Notes\n\n")
}

fn file_label(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

pub fn format_turn(turn: &Turn, time_label: &str) -> String {
    let mut lines = vec![
        format!("### {time_label} Conversation"),
        String::new(),
        format!("**Query:** {}", turn.query),
        String::new(),
    ];

    if !turn.response.is_empty() {
        lines.push(format!("**Response:** {}", turn.response));
        lines.push(String::new());
    }
    if !turn.files_edited.is_empty() {
        let files = turn
            .files_edited
            .iter()
            .map(|f| format!("`{}`", file_label(f)))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("**Files touched:** {files}"));
        lines.push(String::new());
    }
    if !turn.tools_used.is_empty() {
        lines.push(format!("**Tools:** {}", turn.tools_used.join(", ")));
        lines.push(String::new());
    }

    lines.push("---".to_string());
    lines.push(String::new());
    lines.join("\n")
}
