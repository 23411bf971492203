//! Predicate registry and verdict aggregation

use crate::BLOCKER_TARGET;
use crate::data::Entity;
use crate::rules::predicates::{BUILTIN_PREDICATES, Predicate};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Keyword lists and thresholds the predicates read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Matched case-sensitively against the display name
    #[serde(default, deserialize_with = "null_as_empty")]
    pub screen_name_keywords: Vec<String>,
    /// Matched case-insensitively against the description
    #[serde(default, deserialize_with = "null_as_empty")]
    pub profile_keywords: Vec<String>,
    /// Emoji count above which a field is flagged; 0 or absent disables the check
    #[serde(default)]
    pub emoji_count: Option<usize>,
}

impl RulesConfig {
    /// Lowercase the profile keywords so matching can ignore case
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.profile_keywords = self
            .profile_keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .collect();
        self
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// What one predicate found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evidence {
    pub predicate: String,
    /// Sorted, deduplicated matched values
    pub matched: Vec<String>,
}

/// Outcome of evaluating one entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub blockworthy: bool,
    /// One entry per predicate that fired, in registration order
    pub evidence: Vec<Evidence>,
}

impl Verdict {
    /// Names of the predicates that fired
    pub fn predicates(&self) -> impl Iterator<Item = &str> {
        self.evidence.iter().map(|e| e.predicate.as_str())
    }
}

/// Ordered registry of named predicates
pub struct RuleEngine {
    config: RulesConfig,
    predicates: Vec<(String, Predicate)>,
}

impl RuleEngine {
    /// Create an engine with every built-in predicate registered
    #[must_use]
    pub fn new(config: RulesConfig) -> Self {
        let mut engine = Self::empty(config);
        for (name, predicate) in BUILTIN_PREDICATES {
            engine.register(name, predicate);
        }
        engine
    }

    /// Create an engine with no predicates
    #[must_use]
    pub fn empty(config: RulesConfig) -> Self {
        Self {
            config: config.normalized(),
            predicates: Vec::new(),
        }
    }

    /// Append a predicate; a name already registered is replaced in place
    pub fn register(&mut self, name: impl Into<String>, predicate: Predicate) {
        let name = name.into();
        if let Some(existing) = self.predicates.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = predicate;
        } else {
            self.predicates.push((name, predicate));
        }
    }

    /// Registered predicate names in evaluation order
    pub fn predicate_names(&self) -> impl Iterator<Item = &str> {
        self.predicates.iter().map(|(name, _)| name.as_str())
    }

    /// Run every predicate against the entity
    #[must_use]
    pub fn evaluate(&self, entity: &Entity) -> Verdict {
        let mut evidence = Vec::new();
        for (name, predicate) in &self.predicates {
            let mut matched = predicate(&self.config, entity);
            if matched.is_empty() {
                continue;
            }
            matched.sort();
            matched.dedup();
            debug!(
                target: BLOCKER_TARGET,
                entity = %entity,
                predicate = %name,
                matched = %matched.join(" "),
                "Rule matched"
            );
            evidence.push(Evidence {
                predicate: name.clone(),
                matched,
            });
        }

        Verdict {
            blockworthy: !evidence.is_empty(),
            evidence,
        }
    }
}
