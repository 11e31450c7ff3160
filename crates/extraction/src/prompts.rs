//! Prompt builders for the write path

use engram_config::{Language, OntologyRegistry, StatementGranularity};
use engram_core::Predicate;

/// System prompt for statement/entity/relation extraction
pub fn extraction_system_prompt(
    ontology: &OntologyRegistry,
    granularity: StatementGranularity,
) -> String {
    let granularity_rule = match granularity {
        StatementGranularity::Fine => {
            "Split compound claims into atomic statements, one proposition each."
        }
        StatementGranularity::Coarse => {
            "Keep closely related claims together in a single statement."
        }
    };
    let predicates = Predicate::all()
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You extract long-term memory from one turn of a dialogue.\n\
         Return statements the speaker asserted, each typed as FACT, OPINION, \
         PREDICTION or EVENT and tagged STATIC, DYNAMIC or ATEMPORAL.\n\
         {granularity_rule}\n\
         Dates: emit valid_at/invalid_at as YYYY-MM-DD when the text pins them \
         down; otherwise leave them null. Never invent dates.\n\
         Tag the speaker's emotion (emotion_type, emotion_intensity in [0,1]) \
         and an importance_score in [0,1] reflecting how much this is worth \
         remembering long-term.\n\n\
         Entity mentions must use exactly one of these types:\n{ontology}\n\n\
         Entity-entity relations must use one of these predicates: {predicates}. \
         subject_idx and object_idx point into the statement's entities array.\n\
         Respond with the JSON object only.",
        ontology = ontology.prompt_block(),
    )
}

/// User prompt for one chunk, optionally with recent session context
pub fn extraction_user_prompt(chunk_text: &str, speaker: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.is_empty() => format!(
            "Recent conversation context:\n{context}\n\n\
             Extract memory from this {speaker} turn:\n{chunk_text}"
        ),
        _ => format!("Extract memory from this {speaker} turn:\n{chunk_text}"),
    }
}

/// System prompt for per-chunk episodic summarisation
pub fn summary_system_prompt(language: Language) -> String {
    let language_rule = match language {
        Language::Zh => "Write the title and summary in Chinese.",
        Language::En => "Write the title and summary in English.",
    };
    format!(
        "You write episodic memory summaries of dialogue chunks.\n\
         Summarise what happened in at most 200 words, give it a short title, \
         and classify it as one of: conversation, project_work, learning, \
         decision, important_event.\n\
         {language_rule}\n\
         Respond with the JSON object only."
    )
}

/// System prompt for the forgetting engine's consolidation summaries
pub fn consolidation_system_prompt(language: Language) -> String {
    let language_rule = match language {
        Language::Zh => "Write in Chinese.",
        Language::En => "Write in English.",
    };
    format!(
        "You consolidate fading memories. Given a statement and what is known \
         about an entity it mentions, write a compact summary (at most 200 \
         words) preserving the retrievable gist, give it a short title, and \
         classify it as one of: conversation, project_work, learning, \
         decision, important_event. {language_rule} Respond with the JSON \
         object only."
    )
}

/// System prompt for blockwise dedup arbitration
pub fn arbitration_system_prompt() -> String {
    "You judge whether pairs of entity mentions refer to the same real-world \
     entity. For each pair give same_entity, canonical_idx (0 if the first \
     name is the better canonical form, 1 otherwise), confidence in [0,1] and \
     a one-line reason. Respond with the JSON object only."
        .to_string()
}

/// User prompt listing arbitration candidate pairs
pub fn arbitration_user_prompt(pairs: &[(String, String, String)]) -> String {
    let mut prompt = String::from("Candidate pairs:\n");
    for (index, (left, right, entity_type)) in pairs.iter().enumerate() {
        prompt.push_str(&format!(
            "{index}. [{entity_type}] \"{left}\"  vs  \"{right}\"\n"
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_mentions_ontology_and_predicates() {
        let prompt = extraction_system_prompt(
            &OntologyRegistry::curated(),
            StatementGranularity::Fine,
        );
        assert!(prompt.contains("PERSON"));
        assert!(prompt.contains("WORKS_AT"));
        assert!(prompt.contains("atomic"));
    }

    #[test]
    fn test_user_prompt_includes_context_when_present() {
        let with = extraction_user_prompt("text", "user", Some("earlier talk"));
        assert!(with.contains("earlier talk"));
        let without = extraction_user_prompt("text", "user", None);
        assert!(!without.contains("context"));
    }
}
