//! Semantic pruning of low-value messages
//!
//! When enabled for a scene, a message survives iff it matches an
//! importance pattern (dates, clock times, numeric identifiers, currency
//! amounts) or scores above the scene threshold. A short curated list of
//! filler phrases is always dropped.

use once_cell::sync::Lazy;
use regex::Regex;

use engram_config::{PruningConfig, PruningScene};

static DATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}[-/.年]\d{1,2}[-/.月]\d{1,2}日?|\d{1,2}[-/]\d{1,2}[-/]\d{2,4}").unwrap()
});
static CLOCK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}[:点]\d{2}\b|\b\d{1,2}\s?(?:am|pm|AM|PM)\b").unwrap());
static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{5,}\b").unwrap());
static CURRENCY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[¥$€£₹]\s?\d+(?:[.,]\d+)?|\b\d+(?:[.,]\d+)?\s?(?:元|块|dollars?|euros?|rupees?|USD|CNY|EUR)\b")
        .unwrap()
});

/// Filler phrases dropped regardless of scene
const FILLER_PHRASES: &[&str] = &[
    "你好",
    "您好",
    "谢谢",
    "不客气",
    "好的",
    "嗯",
    "嗯嗯",
    "哦",
    "拜拜",
    "再见",
    "hello",
    "hi",
    "hey",
    "thanks",
    "thank you",
    "ok",
    "okay",
    "sure",
    "bye",
    "goodbye",
    "yeah",
    "yep",
    "uh huh",
    "got it",
    "no problem",
];

pub struct SemanticPruner {
    config: PruningConfig,
}

impl SemanticPruner {
    pub fn new(config: PruningConfig) -> Self {
        Self { config }
    }

    /// Whether a cleaned message should be kept
    pub fn keep(&self, text: &str) -> bool {
        if is_filler(text) {
            return false;
        }
        if has_important_pattern(text) {
            return true;
        }
        self.importance_score(text) >= self.config.pruning_threshold
    }

    /// Cheap structural importance score in [0, 1]; a stand-in for the
    /// small-model scorer, tuned per scene.
    fn importance_score(&self, text: &str) -> f64 {
        let chars = text.chars().count() as f64;
        let mut score: f64 = (chars / 80.0).min(0.5);

        if text.contains('?') || text.contains('？') {
            score += 0.2;
        }
        if text.chars().any(|c| c.is_ascii_digit()) {
            score += 0.15;
        }
        // Scene weighting: outbound calls skew short and transactional, so
        // short messages are penalised less there.
        score += match self.config.pruning_scene {
            PruningScene::Education => 0.0,
            PruningScene::OnlineService => 0.05,
            PruningScene::Outbound => 0.1,
        };

        score.min(1.0)
    }
}

/// Exact match against the curated filler list after lowering and trimming
/// terminal punctuation
pub fn is_filler(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['!', '.', '。', '！', '?', '？'])
        .to_lowercase();
    FILLER_PHRASES.iter().any(|f| *f == normalized)
}

/// Date, clock time, long numeric identifier or currency amount
pub fn has_important_pattern(text: &str) -> bool {
    DATE_PATTERN.is_match(text)
        || CLOCK_PATTERN.is_match(text)
        || IDENTIFIER_PATTERN.is_match(text)
        || CURRENCY_PATTERN.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pruner(threshold: f64) -> SemanticPruner {
        SemanticPruner::new(PruningConfig {
            pruning_switch: true,
            pruning_scene: PruningScene::OnlineService,
            pruning_threshold: threshold,
        })
    }

    #[test]
    fn test_filler_always_dropped() {
        let p = pruner(0.0);
        assert!(!p.keep("你好"));
        assert!(!p.keep("Thanks!"));
        assert!(!p.keep("ok"));
    }

    #[test]
    fn test_important_patterns_always_kept() {
        let p = pruner(0.9);
        assert!(p.keep("my appointment is on 2024-05-12"));
        assert!(p.keep("会议在14:30开始"));
        assert!(p.keep("order number 1234567"));
        assert!(p.keep("it costs $120.50"));
        assert!(p.keep("总共300元"));
    }

    #[test]
    fn test_threshold_gates_ordinary_messages() {
        let strict = pruner(0.9);
        assert!(!strict.keep("I was thinking about it"));

        let lenient = pruner(0.1);
        assert!(lenient.keep("could you explain how the memory engine deduplicates entities?"));
    }

    #[test]
    fn test_pattern_detection() {
        assert!(has_important_pattern("2024年3月1日"));
        assert!(has_important_pattern("9 pm works for me"));
        assert!(!has_important_pattern("no numbers here"));
        assert!(is_filler("Goodbye."));
        assert!(!is_filler("goodbye my friend"));
    }
}
