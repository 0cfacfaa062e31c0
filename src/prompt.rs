//! Chat-completion payloads for SQL drafting.
//!
//! Read-only intent is expressed only through the system instruction below.
//! Nothing here, or anywhere else in the crate, parses the returned SQL; a
//! caller that needs a guarantee must verify the statement itself.

use serde::{Deserialize, Serialize};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

pub const SYSTEM_INSTRUCTION: &str = "\
You translate questions about business data into SQL for an analytics platform.
Rules:
- Produce exactly one read-only query. Only SELECT statements (optionally with WITH clauses) are allowed; never write INSERT, UPDATE, DELETE, MERGE, DDL or administrative commands.
- Prefer the tables and columns named in the hints below.
- Do not invent tables or columns that are not listed. If the hints are insufficient, say so.
- If you are unsure, state the uncertainty in a leading SQL comment instead of guessing silently.
- Return only the SQL text, without markdown fences or explanation.";

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// System message: the fixed instruction followed by whichever hints the
/// caller supplied, in the order given.
pub fn system_prompt(schema_hint: Option<&str>, table_hints: &[String]) -> String {
    let mut prompt = String::from(SYSTEM_INSTRUCTION);
    if let Some(hint) = schema_hint.map(str::trim).filter(|h| !h.is_empty()) {
        prompt.push_str("\n\nSchema hint:\n");
        prompt.push_str(hint);
    }
    let tables: Vec<&str> = table_hints
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if !tables.is_empty() {
        prompt.push_str("\n\nPreferred tables: ");
        prompt.push_str(&tables.join(", "));
    }
    prompt
}

pub fn chat_request<'a>(
    model: &'a str,
    question: &str,
    schema_hint: Option<&str>,
    table_hints: &[String],
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system_prompt(schema_hint, table_hints),
            },
            ChatMessage {
                role: "user",
                content: question.to_string(),
            },
        ],
        temperature: 0.0,
    }
}

/// First completion's text, trimmed.  `None` when there is nothing usable.
/// Only `choices[0]` is decoded; later choices may have any shape.
pub fn first_completion(payload: &serde_json::Value) -> Option<String> {
    let first = payload.get("choices")?.get(0)?;
    let choice: Choice = serde_json::from_value(first.clone()).ok()?;
    choice
        .message
        .and_then(|m| m.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
