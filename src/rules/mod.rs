//! Rule evaluation
//!
//! A [`RuleEngine`] runs an ordered list of named predicates over an entity
//! and blocks when any of them fires.

mod engine;
mod predicates;

pub use engine::{Evidence, RuleEngine, RulesConfig, Verdict};
pub use predicates::{BUILTIN_PREDICATES, Predicate, emoji_glyphs};
