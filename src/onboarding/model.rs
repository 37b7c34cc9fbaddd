//! User, profile, and content data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notifications::NotificationKind;

/// Snapshot of a newly created user, as delivered by the creation event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEntity {
    pub id: String,
    pub name: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    /// Topics the user declared during sign-up.
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Contact and notification preferences, keyed by the same id as the user.
///
/// Some provisioning paths (bulk imports, for one) create a user without
/// one of these. Onboarding stops quietly in that case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrivateProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Opted out of every notification.
    #[serde(default)]
    pub unsubscribed_all: bool,
    /// Opted out of specific notification kinds.
    #[serde(default)]
    pub opted_out: Vec<NotificationKind>,
}

impl PrivateProfile {
    /// Whether a notification of `kind` may be sent to this user.
    pub fn accepts(&self, kind: NotificationKind) -> bool {
        !self.unsubscribed_all && !self.opted_out.contains(&kind)
    }
}

/// Who may see a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Unlisted => write!(f, "unlisted"),
            Self::Private => write!(f, "private"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            _ => Err(format!("Unknown visibility: {s}")),
        }
    }
}

/// A market (content item) that can be ranked, recommended, or seeded
/// into a feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub slug: String,
    pub question: String,
    pub creator_username: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub popularity_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub visibility: Visibility,
}

impl ContentItem {
    /// Number of this item's topics that appear in `interests`
    /// (case-insensitive).
    pub fn topic_overlap(&self, interests: &[String]) -> usize {
        self.topics
            .iter()
            .filter(|t| interests.iter().any(|i| i.eq_ignore_ascii_case(t)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(topics: &[&str]) -> ContentItem {
        ContentItem {
            id: "c1".into(),
            slug: "will-it-rain".into(),
            question: "Will it rain?".into(),
            creator_username: "alice".into(),
            topics: topics.iter().map(|s| s.to_string()).collect(),
            popularity_score: 1.0,
            close_time: None,
            resolved: false,
            visibility: Visibility::Public,
        }
    }

    #[test]
    fn profile_accepts_unless_opted_out() {
        let mut profile = PrivateProfile {
            id: "u1".into(),
            email: Some("u1@example.com".into()),
            ..Default::default()
        };
        assert!(profile.accepts(NotificationKind::Welcome));

        profile.opted_out.push(NotificationKind::CreatorGuide);
        assert!(profile.accepts(NotificationKind::Welcome));
        assert!(!profile.accepts(NotificationKind::CreatorGuide));

        profile.unsubscribed_all = true;
        assert!(!profile.accepts(NotificationKind::Welcome));
    }

    #[test]
    fn topic_overlap_is_case_insensitive() {
        let c = item(&["Politics", "AI", "sports"]);
        let interests = vec!["ai".to_string(), "politics".to_string(), "music".to_string()];
        assert_eq!(c.topic_overlap(&interests), 2);
        assert_eq!(c.topic_overlap(&[]), 0);
    }

    #[test]
    fn user_entity_defaults_missing_interests() {
        let json = r#"{"id":"u1","name":"Ada","username":"ada","created_at":"2024-03-06T10:00:00Z"}"#;
        let user: UserEntity = serde_json::from_str(json).unwrap();
        assert!(user.interests.is_empty());
        assert!(user.avatar_url.is_none());
    }

    #[test]
    fn visibility_display_matches_serde() {
        for v in [Visibility::Public, Visibility::Unlisted, Visibility::Private] {
            let json = serde_json::to_string(&v).unwrap();
            assert_eq!(format!("\"{v}\""), json);
            assert_eq!(v.to_string().parse::<Visibility>().unwrap(), v);
        }
    }
}
