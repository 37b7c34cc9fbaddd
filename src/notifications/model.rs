//! Notification request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::onboarding::model::{ContentItem, PrivateProfile, UserEntity};

/// Discriminator for the onboarding notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Welcome,
    PersonalFollowup,
    CreatorGuide,
    InterestingMarkets,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 4] = [
        Self::Welcome,
        Self::PersonalFollowup,
        Self::CreatorGuide,
        Self::InterestingMarkets,
    ];

    /// Subject line handed to the delivery layer.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Welcome => "Welcome! Here's how to get started",
            Self::PersonalFollowup => "How are you finding things so far?",
            Self::CreatorGuide => "Your guide to creating great markets",
            Self::InterestingMarkets => "Interesting markets picked for you",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::PersonalFollowup => "personal_followup",
            Self::CreatorGuide => "creator_guide",
            Self::InterestingMarkets => "interesting_markets",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "welcome" => Ok(Self::Welcome),
            "personal_followup" => Ok(Self::PersonalFollowup),
            "creator_guide" => Ok(Self::CreatorGuide),
            "interesting_markets" => Ok(Self::InterestingMarkets),
            _ => Err(format!("Unknown notification kind: {s}")),
        }
    }
}

/// Notification content. Each kind carries exactly the payload it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Welcome,
    PersonalFollowup,
    CreatorGuide,
    InterestingMarkets { contracts: Vec<ContentItem> },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Welcome => NotificationKind::Welcome,
            Self::PersonalFollowup => NotificationKind::PersonalFollowup,
            Self::CreatorGuide => NotificationKind::CreatorGuide,
            Self::InterestingMarkets { .. } => NotificationKind::InterestingMarkets,
        }
    }
}

/// Recipient details copied out of the user and private profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: String,
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Recipient {
    pub fn new(user: &UserEntity, profile: &PrivateProfile) -> Self {
        Self {
            user_id: user.id.clone(),
            name: user.name.clone(),
            username: user.username.clone(),
            email: profile.email.clone(),
        }
    }
}

/// A request to deliver a notification at `deliver_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: Uuid,
    pub recipient: Recipient,
    pub notification: Notification,
    pub deliver_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledNotification {
    /// Build a request stamped with the run's invocation instant.
    pub fn new(
        recipient: Recipient,
        notification: Notification,
        deliver_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient,
            notification,
            deliver_at,
            created_at,
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.notification.kind()
    }
}

/// What the notification service did with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchReceipt {
    /// Queued for delivery.
    Accepted,
    /// Already queued for this user and kind.
    Duplicate,
    /// Not queued because of the recipient's preferences.
    Suppressed { reason: String },
}
