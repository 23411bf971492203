//! Built-in block predicates
//!
//! Every predicate returns the values that matched; an empty list means the
//! rule did not fire. Predicates never fail: a missing attribute deserializes
//! to its empty default and simply does not match.

use crate::data::Entity;
use crate::rules::RulesConfig;

/// A named rule over one entity
pub type Predicate = fn(&RulesConfig, &Entity) -> Vec<String>;

/// Built-in predicates in evaluation order
pub const BUILTIN_PREDICATES: [(&str, Predicate); 6] = [
    ("screen_name_has_eight_digits", screen_name_has_eight_digits),
    ("name_has_flagged_keywords", name_has_flagged_keywords),
    ("profile_has_default_profile_image", profile_has_default_profile_image),
    ("profile_description_has_keywords", profile_description_has_keywords),
    (
        "profile_description_has_too_many_emojis",
        profile_description_has_too_many_emojis,
    ),
    ("screen_name_has_too_many_emojis", screen_name_has_too_many_emojis),
];

const TRAILING_DIGITS: usize = 8;

/// Handles ending in eight digits are what the signup flow generates
pub fn screen_name_has_eight_digits(_: &RulesConfig, entity: &Entity) -> Vec<String> {
    let chars: Vec<char> = entity.screen_name.chars().collect();
    if chars.len() < TRAILING_DIGITS {
        return Vec::new();
    }
    let tail = &chars[chars.len() - TRAILING_DIGITS..];
    if tail.iter().all(char::is_ascii_digit) {
        vec![tail.iter().collect()]
    } else {
        Vec::new()
    }
}

/// Case-sensitive keyword match against the display name
pub fn name_has_flagged_keywords(config: &RulesConfig, entity: &Entity) -> Vec<String> {
    config
        .screen_name_keywords
        .iter()
        .filter(|keyword| !keyword.is_empty() && entity.name.contains(keyword.as_str()))
        .cloned()
        .collect()
}

pub fn profile_has_default_profile_image(_: &RulesConfig, entity: &Entity) -> Vec<String> {
    if entity.default_profile_image {
        vec!["True".to_string()]
    } else {
        Vec::new()
    }
}

/// Case-insensitive keyword match against the description
///
/// Expects `profile_keywords` to be lowercased already, see [`RulesConfig::normalized`].
pub fn profile_description_has_keywords(config: &RulesConfig, entity: &Entity) -> Vec<String> {
    let description = entity.description.to_lowercase();
    config
        .profile_keywords
        .iter()
        .filter(|keyword| !keyword.is_empty() && description.contains(keyword.as_str()))
        .cloned()
        .collect()
}

pub fn profile_description_has_too_many_emojis(
    config: &RulesConfig,
    entity: &Entity,
) -> Vec<String> {
    too_many_emojis(config, &entity.description)
}

pub fn screen_name_has_too_many_emojis(config: &RulesConfig, entity: &Entity) -> Vec<String> {
    too_many_emojis(config, &entity.screen_name)
}

fn too_many_emojis(config: &RulesConfig, text: &str) -> Vec<String> {
    let Some(limit) = config.emoji_count.filter(|&limit| limit > 0) else {
        return Vec::new();
    };
    let found = emoji_glyphs(text);
    if found.len() > limit {
        found
    } else {
        Vec::new()
    }
}

/// Every character of `text` that is an emoji on its own
pub fn emoji_glyphs(text: &str) -> Vec<String> {
    let mut buf = [0u8; 4];
    text.chars()
        .filter(|ch| emojis::get(ch.encode_utf8(&mut buf)).is_some())
        .map(String::from)
        .collect()
}
