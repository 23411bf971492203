use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// A discovered account, captured at discovery time and never mutated afterwards.
///
/// Only the attributes the rules inspect are typed; everything else the API
/// returned is kept in `extra` so the stored payload round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable string identifier
    pub id_str: String,
    /// Handle, e.g. `someone12345678`
    #[serde(default)]
    pub screen_name: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Free-text profile description
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Whether the account still uses the default avatar
    #[serde(default)]
    pub default_profile_image: bool,
    /// Attributes opaque to the core
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity {
    /// Create an entity with only an id and handle set
    pub fn new(id: impl Into<String>, screen_name: impl Into<String>) -> Self {
        Self {
            id_str: id.into(),
            screen_name: screen_name.into(),
            name: String::new(),
            description: String::new(),
            default_profile_image: false,
            extra: Map::new(),
        }
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the profile description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the default profile image flag
    #[must_use]
    pub fn with_default_profile_image(mut self, flag: bool) -> Self {
        self.default_profile_image = flag;
        self
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{} ({})", self.screen_name, self.id_str)
    }
}

fn null_as_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A status returned by the search endpoint; only the author and id matter here
#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub id: u64,
    pub user: Entity,
}

/// Response body of `search/tweets`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub statuses: Vec<Status>,
}

/// Response body of paginated user listings (`friends/list`, `followers/list`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPage {
    #[serde(default)]
    pub users: Vec<Entity>,
}

/// A single trend entry of `trends/place`
#[derive(Debug, Clone, Deserialize)]
pub struct Trend {
    pub name: String,
}

/// A region's trend list; `trends/place` returns an array of these
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrendLocation {
    #[serde(default)]
    pub trends: Vec<Trend>,
}

/// Response body of `account/verify_credentials`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub screen_name: String,
}

/// Terminal classification of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
pub enum Disposition {
    #[display("blocked")]
    Blocked,
    #[display("clean")]
    Clean,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_keeps_unknown_attributes() {
        let raw = serde_json::json!({
            "id_str": "42",
            "screen_name": "someone",
            "name": "Some One",
            "description": "hello",
            "default_profile_image": true,
            "followers_count": 12,
            "verified": false
        });

        let entity: Entity = serde_json::from_value(raw.clone()).expect("Failed to deserialize");
        assert_eq!(entity.id_str, "42");
        assert!(entity.default_profile_image);
        assert_eq!(entity.extra.get("followers_count"), Some(&Value::from(12)));

        let back = serde_json::to_value(&entity).expect("Failed to serialize");
        assert_eq!(back, raw);
    }

    #[test]
    fn test_entity_missing_attributes_default() {
        let entity: Entity = serde_json::from_value(serde_json::json!({
            "id_str": "7",
            "description": null
        }))
        .expect("Failed to deserialize");

        assert_eq!(entity.screen_name, "");
        assert_eq!(entity.description, "");
        assert!(!entity.default_profile_image);
    }

    #[test]
    fn test_search_response_parsing() {
        let body = serde_json::json!({
            "statuses": [
                { "id": 100, "user": { "id_str": "1", "screen_name": "a" } },
                { "id": 250, "user": { "id_str": "2", "screen_name": "b" } }
            ],
            "search_metadata": {}
        });

        let parsed: SearchResponse = serde_json::from_value(body).expect("Failed to deserialize");
        assert_eq!(parsed.statuses.len(), 2);
        assert_eq!(parsed.statuses[1].id, 250);
        assert_eq!(parsed.statuses[1].user.screen_name, "b");
    }

    #[test]
    fn test_disposition_display() {
        assert_eq!(Disposition::Blocked.to_string(), "blocked");
        assert_eq!(Disposition::Clean.to_string(), "clean");
        assert_eq!(Entity::new("9", "x").to_string(), "@x (9)");
    }
}
