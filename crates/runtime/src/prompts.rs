//! Prompt builders and schemas for the read dataflow

use serde_json::{json, Value};

use engram_config::Language;

/// Schema for problem splitting: typed sub-questions
pub fn split_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": {"type": "string", "minLength": 1},
                        "type": {
                            "enum": ["factual", "temporal", "definitional", "relational", "causal"]
                        },
                        "reason": {"type": "string"}
                    },
                    "required": ["question", "type"]
                }
            }
        },
        "required": ["questions"]
    })
}

/// Schema for question expansion: rephrasings per question
pub fn expansion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "expansions": {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": ["expansions"]
    })
}

/// Schema for evidence verification verdicts
pub fn verification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "verdicts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "index": {"type": "integer", "minimum": 0},
                        "supported": {"type": "boolean"}
                    },
                    "required": ["index", "supported"]
                }
            }
        },
        "required": ["verdicts"]
    })
}

pub fn split_system_prompt(history: &str) -> String {
    let history_block = if history.is_empty() {
        String::new()
    } else {
        format!("Recent conversation:\n{history}\n\n")
    };
    format!(
        "{history_block}Decompose the user's question into the minimal set of \
         sub-questions needed to answer it from a personal memory store. Type \
         each one (factual, temporal, definitional, relational, causal) and \
         give a one-line reason. Respond with the JSON object only."
    )
}

pub fn expansion_system_prompt() -> String {
    "Rephrase the given question into 2-3 alternative formulations that could \
     match differently-worded memories (synonyms, implied context, related \
     phrasings). Respond with the JSON object only."
        .to_string()
}

pub fn verification_system_prompt() -> String {
    "You check retrieved statements against their source excerpts. For each \
     numbered statement decide whether the excerpt actually supports it. \
     Respond with the JSON object only."
        .to_string()
}

pub fn verification_user_prompt(items: &[(String, String)]) -> String {
    let mut prompt = String::from("Statements with their source excerpts:\n");
    for (index, (statement, source)) in items.iter().enumerate() {
        prompt.push_str(&format!(
            "{index}. statement: {statement}\n   source: {source}\n"
        ));
    }
    prompt
}

pub fn answer_system_prompt(language: Language, history: &str) -> String {
    let language_rule = match language {
        Language::Zh => "Answer in Chinese.",
        Language::En => "Answer in English.",
    };
    let history_block = if history.is_empty() {
        String::new()
    } else {
        format!("\n\nRecent conversation:\n{history}")
    };
    format!(
        "You answer questions from a personal long-term memory store. Use only \
         the evidence provided; when the evidence does not answer the \
         question, say so plainly. Be concise and concrete. \
         {language_rule}{history_block}"
    )
}

pub fn answer_user_prompt(query: &str, evidence: &[String]) -> String {
    let evidence_block = evidence
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{i}] {e}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Evidence:\n{evidence_block}\n\nQuestion: {query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_are_objects_with_required() {
        for schema in [split_schema(), expansion_schema(), verification_schema()] {
            assert_eq!(schema["type"], "object");
            assert!(schema["required"].is_array());
        }
    }

    #[test]
    fn test_answer_prompt_numbers_evidence() {
        let prompt = answer_user_prompt(
            "when did Alice join?",
            &["Alice joined in 2021".to_string(), "Acme is a client".to_string()],
        );
        assert!(prompt.contains("[0] Alice joined in 2021"));
        assert!(prompt.contains("[1] Acme is a client"));
    }
}
