//! Content ranking: trending markets and new-user feed seeding.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ContentConfig;
use crate::error::{CollaboratorError, DatabaseError};
use crate::onboarding::model::ContentItem;
use crate::onboarding::services::{PersonalizationService, TrendingService};
use crate::store::Database;

/// Reason recorded on feed items seeded at sign-up.
pub const ONBOARDING_FEED_REASON: &str = "onboarding_interests";

/// One entry in a user's feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub user_id: String,
    pub contract_id: String,
    pub reason: String,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

/// Trending list straight from the store's popularity ranking.
pub struct StoreTrending {
    db: Arc<dyn Database>,
    limit: usize,
}

impl StoreTrending {
    pub fn new(db: Arc<dyn Database>, config: &ContentConfig) -> Self {
        Self {
            db,
            limit: config.trending_limit,
        }
    }
}

#[async_trait]
impl TrendingService for StoreTrending {
    async fn get_trending(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>, CollaboratorError> {
        let items = self.db.list_open_contracts(now, self.limit).await?;
        debug!(count = items.len(), "Loaded trending contracts");
        Ok(items)
    }
}

/// Score used to order seeded feed items: topic matches dominate, popularity
/// breaks ties.
fn seed_score(matches: usize, popularity: f64) -> f64 {
    matches as f64 * 1_000.0 + popularity
}

/// Rank open contracts against a user's interests. Contracts with no
/// matching topic are dropped.
pub fn rank_for_interests(
    candidates: Vec<ContentItem>,
    interests: &[String],
    limit: usize,
) -> Vec<(ContentItem, f64)> {
    let mut scored: Vec<(ContentItem, f64)> = candidates
        .into_iter()
        .filter_map(|c| {
            let matches = c.topic_overlap(interests);
            (matches > 0).then(|| {
                let score = seed_score(matches, c.popularity_score);
                (c, score)
            })
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    scored.truncate(limit);
    scored
}

/// Seeds a new user's feed with open markets matching declared interests.
pub struct FeedPersonalizer {
    config: ContentConfig,
    clock: Arc<dyn Clock>,
}

impl FeedPersonalizer {
    pub fn new(config: ContentConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }
}

#[async_trait]
impl PersonalizationService for FeedPersonalizer {
    async fn personalize(
        &self,
        user_id: &str,
        db: &dyn Database,
    ) -> Result<usize, CollaboratorError> {
        let user = db
            .get_user(user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "user".to_string(),
                id: user_id.to_string(),
            })?;

        if user.interests.is_empty() {
            debug!(user_id, "No declared interests, nothing to seed");
            return Ok(0);
        }

        let now = self.clock.now();
        let candidates = db
            .list_open_contracts(now, self.config.feed_candidate_pool)
            .await?;
        let ranked = rank_for_interests(candidates, &user.interests, self.config.feed_seed_limit);

        let items: Vec<FeedItem> = ranked
            .into_iter()
            .map(|(contract, score)| FeedItem {
                user_id: user_id.to_string(),
                contract_id: contract.id,
                reason: ONBOARDING_FEED_REASON.to_string(),
                score,
                created_at: now,
            })
            .collect();

        let inserted = db.insert_feed_items(&items).await?;
        info!(user_id, inserted, "Seeded feed from interests");
        Ok(inserted)
    }
}
