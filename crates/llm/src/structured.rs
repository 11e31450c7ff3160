//! Schema-enforced structured output
//!
//! Providers return free text; this layer turns a chat backend into a
//! structured one: the schema is rendered into the prompt, the reply is
//! parsed (code fences tolerated), validated against the JSON Schema, and
//! non-conformant replies are re-asked a bounded number of times before
//! the call fails as `ExternalPermanent`.

use jsonschema::JSONSchema;
use serde_json::Value;
use tracing::warn;

use engram_core::{ChatMessage, MemoryError, Result};

/// Re-asks after the first non-conformant reply
const MAX_REPAIR_ATTEMPTS: usize = 2;

/// Extract the first JSON object/array from a reply, tolerating markdown
/// code fences and prose around it.
pub fn extract_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    // ```json ... ``` fences
    if let Some(fenced) = trimmed.split("```").nth(1) {
        let fenced = fenced.trim_start_matches("json").trim();
        if let Ok(value) = serde_json::from_str::<Value>(fenced) {
            return Some(value);
        }
    }

    // First balanced {...} block.
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in trimmed[start..].char_indices() {
        match c {
            '\\' if in_string => {
                escaped = !escaped;
                continue;
            }
            '"' if !escaped => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
        escaped = false;
    }
    None
}

/// Validate a candidate value against a schema, returning the first error
/// as text.
pub fn validate(schema: &JSONSchema, value: &Value) -> std::result::Result<(), String> {
    let result = schema.validate(value);
    match result {
        Ok(()) => Ok(()),
        Err(errors) => {
            let first = errors
                .into_iter()
                .next()
                .map(|e| format!("{} at {}", e, e.instance_path))
                .unwrap_or_else(|| "schema violation".to_string());
            Err(first)
        }
    }
}

/// Drive a chat-only backend to produce a schema-conformant value.
///
/// `ask` is called with the message sequence for each attempt; repair
/// attempts append the validation error so the model can correct itself.
pub async fn structured_via_chat<F, Fut>(
    context: &str,
    messages: &[ChatMessage],
    schema: &Value,
    mut ask: F,
) -> Result<Value>
where
    F: FnMut(Vec<ChatMessage>) -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| MemoryError::permanent(context, format!("invalid schema: {e}")))?;

    let mut conversation: Vec<ChatMessage> = messages.to_vec();
    conversation.push(ChatMessage::system(format!(
        "Respond with a single JSON value conforming to this JSON Schema, and nothing else:\n{schema}"
    )));

    let mut last_error = String::new();
    for attempt in 0..=MAX_REPAIR_ATTEMPTS {
        let reply = ask(conversation.clone()).await?;

        match extract_json(&reply) {
            Some(value) => match validate(&compiled, &value) {
                Ok(()) => return Ok(value),
                Err(violation) => {
                    warn!(context, attempt, %violation, "structured reply violates schema");
                    last_error = violation;
                }
            },
            None => {
                warn!(context, attempt, "structured reply contained no JSON");
                last_error = "no JSON value found in reply".to_string();
            }
        }

        conversation.push(ChatMessage::assistant(reply));
        conversation.push(ChatMessage::user(format!(
            "That reply was not valid: {last_error}. Respond again with only the corrected JSON."
        )));
    }

    Err(MemoryError::permanent(
        context,
        format!("structured output failed after retries: {last_error}"),
    ))
}
