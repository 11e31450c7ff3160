//! Ontology registry
//!
//! The curated entity-type classes the extractor may assign. Mentions with
//! types outside the active registry are dropped at parse time with a
//! warning. Tenants can extend the registry through their config
//! generation; the curated core is always present.

use serde::{Deserialize, Serialize};

/// One ontology class with the description rendered into extraction prompts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyClass {
    pub name: String,
    pub description: String,
}

/// Registry of allowed entity types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyRegistry {
    classes: Vec<OntologyClass>,
}

impl Default for OntologyRegistry {
    fn default() -> Self {
        Self::curated()
    }
}

impl OntologyRegistry {
    /// The built-in class set
    pub fn curated() -> Self {
        let classes = [
            ("PERSON", "A human being, named or referred to individually"),
            ("ORGANIZATION", "A company, institution, team or other group"),
            ("LOCATION", "A geographic or physical place"),
            ("TIME", "A date, time or named period"),
            ("EVENT", "Something that happened or is planned to happen"),
            ("OBJECT", "A physical thing or artifact"),
            ("CONCEPT", "An abstract idea, topic or field"),
            ("EMOTION", "A feeling or emotional state"),
            ("SKILL", "An ability, craft or competency"),
            ("WORK", "A creative or professional work product"),
            ("CREATURE", "A non-human living being"),
        ];
        Self {
            classes: classes
                .iter()
                .map(|(name, description)| OntologyClass {
                    name: (*name).to_string(),
                    description: (*description).to_string(),
                })
                .collect(),
        }
    }

    /// Add tenant-specific classes on top of the curated core
    pub fn extend(&mut self, extra: impl IntoIterator<Item = OntologyClass>) {
        for class in extra {
            if !self.contains(&class.name) {
                self.classes.push(class);
            }
        }
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.classes
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(entity_type.trim()))
    }

    /// Canonical spelling of a class name, if registered
    pub fn canonical(&self, entity_type: &str) -> Option<&str> {
        self.classes
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(entity_type.trim()))
            .map(|c| c.name.as_str())
    }

    pub fn classes(&self) -> &[OntologyClass] {
        &self.classes
    }

    /// Render the registry for an extraction prompt
    pub fn prompt_block(&self) -> String {
        self.classes
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curated_classes_present() {
        let registry = OntologyRegistry::curated();
        assert!(registry.contains("PERSON"));
        assert!(registry.contains("person"));
        assert!(!registry.contains("SPACESHIP"));
        assert_eq!(registry.canonical("organization"), Some("ORGANIZATION"));
    }

    #[test]
    fn test_extend_skips_duplicates() {
        let mut registry = OntologyRegistry::curated();
        let before = registry.classes().len();
        registry.extend([
            OntologyClass {
                name: "PERSON".into(),
                description: "duplicate".into(),
            },
            OntologyClass {
                name: "PRODUCT".into(),
                description: "A purchasable good".into(),
            },
        ]);
        assert_eq!(registry.classes().len(), before + 1);
        assert!(registry.contains("PRODUCT"));
    }

    #[test]
    fn test_prompt_block_lists_all() {
        let registry = OntologyRegistry::curated();
        let block = registry.prompt_block();
        for class in registry.classes() {
            assert!(block.contains(&class.name));
        }
    }
}
