//! Read dataflow state
//!
//! Every node is a function from `ReadState` to `ReadState`; the state is
//! cloned and updated, never shared mutably across nodes. Streaming
//! consumers see `IntermediateOutput` events as nodes finish.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use engram_core::SearchHit;

/// Search depth selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum SearchSwitch {
    /// Summaries only, with verification
    #[default]
    Fast,
    /// Split + expand + full-label hybrid search
    Deep,
    /// Single-shot hybrid search
    Quick,
}

impl TryFrom<u8> for SearchSwitch {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SearchSwitch::Fast),
            1 => Ok(SearchSwitch::Deep),
            2 => Ok(SearchSwitch::Quick),
            other => Err(format!("unknown search_switch {other}")),
        }
    }
}

impl From<SearchSwitch> for u8 {
    fn from(value: SearchSwitch) -> u8 {
        match value {
            SearchSwitch::Fast => 0,
            SearchSwitch::Deep => 1,
            SearchSwitch::Quick => 2,
        }
    }
}

/// A typed sub-question produced by problem splitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: String,
    pub question: String,
    #[serde(rename = "type")]
    pub question_type: String,
    #[serde(default)]
    pub reason: String,
}

/// One streamed event of the read dataflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntermediateOutput {
    #[serde(rename = "type")]
    pub output_type: String,
    pub title: String,
    pub data: Value,
    /// Present when the producing node degraded to defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntermediateOutput {
    pub fn new(output_type: &str, title: &str, data: Value) -> Self {
        Self {
            output_type: output_type.to_string(),
            title: title.to_string(),
            data,
            error: None,
        }
    }

    pub fn degraded(output_type: &str, title: &str, error: String) -> Self {
        Self {
            output_type: output_type.to_string(),
            title: title.to_string(),
            data: Value::Array(vec![]),
            error: Some(error),
        }
    }
}

/// Immutable dataflow state, copied on update
#[derive(Debug, Clone, Default)]
pub struct ReadState {
    pub end_user_id: String,
    pub query: String,
    pub search_switch: SearchSwitch,
    pub session_history: String,
    pub sub_questions: Vec<SubQuestion>,
    /// Rephrasings per sub-question, flattened
    pub expansions: Vec<String>,
    pub evidence: Vec<SearchHit>,
    pub outputs: Vec<IntermediateOutput>,
    pub answer: Option<String>,
    pub truncated: bool,
}

impl ReadState {
    pub fn new(end_user_id: &str, query: &str, search_switch: SearchSwitch) -> Self {
        Self {
            end_user_id: end_user_id.to_string(),
            query: query.to_string(),
            search_switch,
            ..Default::default()
        }
    }

    pub fn with_output(mut self, output: IntermediateOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Every question retrieval should fan out over: the original query,
    /// sub-questions and their expansions.
    pub fn retrieval_questions(&self) -> Vec<String> {
        let mut questions = vec![self.query.clone()];
        questions.extend(self.sub_questions.iter().map(|q| q.question.clone()));
        questions.extend(self.expansions.iter().cloned());
        questions.dedup();
        questions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_switch_round_trip() {
        for value in 0u8..=2 {
            let switch = SearchSwitch::try_from(value).unwrap();
            assert_eq!(u8::from(switch), value);
        }
        assert!(SearchSwitch::try_from(3).is_err());
    }

    #[test]
    fn test_retrieval_questions_include_all_sources() {
        let mut state = ReadState::new("u1", "original", SearchSwitch::Deep);
        state.sub_questions.push(SubQuestion {
            id: "Q1".into(),
            question: "sub".into(),
            question_type: "factual".into(),
            reason: String::new(),
        });
        state.expansions.push("expanded".into());

        let questions = state.retrieval_questions();
        assert_eq!(questions, vec!["original", "sub", "expanded"]);
    }

    #[test]
    fn test_intermediate_output_serde_shape() {
        let output = IntermediateOutput::new("problem_split", "问题拆分", serde_json::json!([]));
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["type"], "problem_split");
        assert!(value.get("error").is_none());
    }
}
