//! Outbox notifier: queues notification requests in the database.
//!
//! Delivery workers read `scheduled_notifications` and send each row once
//! its `deliver_at` has passed. This side only decides whether a request
//! is queued: recipient preferences are checked first, then the
//! `(user_id, kind)` uniqueness constraint absorbs redelivered events.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::CollaboratorError;
use crate::onboarding::services::NotificationService;
use crate::store::Database;

use super::model::{DispatchReceipt, ScheduledNotification};

pub struct OutboxNotifier {
    db: Arc<dyn Database>,
}

impl OutboxNotifier {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationService for OutboxNotifier {
    async fn dispatch(
        &self,
        request: &ScheduledNotification,
    ) -> Result<DispatchReceipt, CollaboratorError> {
        let user_id = &request.recipient.user_id;
        let kind = request.kind();

        if request.recipient.email.is_none() {
            warn!(user_id = %user_id, kind = %kind, "No email on file, notification suppressed");
            return Ok(DispatchReceipt::Suppressed {
                reason: "no email address".to_string(),
            });
        }

        let profile = self.db.get_private_profile(user_id).await?;
        if let Some(profile) = profile
            && !profile.accepts(kind)
        {
            info!(user_id = %user_id, kind = %kind, "Recipient opted out, notification suppressed");
            return Ok(DispatchReceipt::Suppressed {
                reason: format!("opted out of {kind}"),
            });
        }

        if !self.db.insert_scheduled_notification(request).await? {
            info!(user_id = %user_id, kind = %kind, "Notification already queued");
            return Ok(DispatchReceipt::Duplicate);
        }

        info!(
            user_id = %user_id,
            kind = %kind,
            deliver_at = %request.deliver_at,
            subject = kind.subject(),
            "Notification queued"
        );
        Ok(DispatchReceipt::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{Notification, NotificationKind, Recipient};
    use crate::onboarding::model::PrivateProfile;
    use crate::store::LibSqlBackend;
    use chrono::{Duration, TimeZone, Utc};

    fn request(email: Option<&str>, notification: Notification) -> ScheduledNotification {
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap();
        ScheduledNotification::new(
            Recipient {
                user_id: "u1".into(),
                name: "Ada".into(),
                username: "ada".into(),
                email: email.map(String::from),
            },
            notification,
            now + Duration::hours(48),
            now,
        )
    }

    async fn setup(profile: PrivateProfile) -> (Arc<dyn Database>, OutboxNotifier) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.upsert_private_profile(&profile).await.unwrap();
        let notifier = OutboxNotifier::new(Arc::clone(&db));
        (db, notifier)
    }

    fn profile() -> PrivateProfile {
        PrivateProfile {
            id: "u1".into(),
            email: Some("ada@example.com".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn accepts_then_deduplicates() {
        let (db, notifier) = setup(profile()).await;
        let req = request(Some("ada@example.com"), Notification::PersonalFollowup);

        assert_eq!(notifier.dispatch(&req).await.unwrap(), DispatchReceipt::Accepted);

        let retry = request(Some("ada@example.com"), Notification::PersonalFollowup);
        assert_eq!(notifier.dispatch(&retry).await.unwrap(), DispatchReceipt::Duplicate);

        let queued = db.list_notifications_for_user("u1").await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, req.id);
        assert_eq!(queued[0].deliver_at, req.deliver_at);
    }

    #[tokio::test]
    async fn missing_email_is_suppressed() {
        let (db, notifier) = setup(profile()).await;
        let receipt = notifier
            .dispatch(&request(None, Notification::Welcome))
            .await
            .unwrap();
        assert!(matches!(receipt, DispatchReceipt::Suppressed { .. }));
        assert!(db.list_notifications_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn opted_out_kind_is_suppressed() {
        let (_db, notifier) = setup(PrivateProfile {
            opted_out: vec![NotificationKind::InterestingMarkets],
            ..profile()
        })
        .await;

        let markets = request(
            Some("ada@example.com"),
            Notification::InterestingMarkets { contracts: vec![] },
        );
        assert!(matches!(
            notifier.dispatch(&markets).await.unwrap(),
            DispatchReceipt::Suppressed { .. }
        ));

        let welcome = request(Some("ada@example.com"), Notification::Welcome);
        assert_eq!(notifier.dispatch(&welcome).await.unwrap(), DispatchReceipt::Accepted);
    }

    #[tokio::test]
    async fn markets_payload_round_trips_through_store() {
        let (db, notifier) = setup(profile()).await;
        let contracts = vec![crate::onboarding::model::ContentItem {
            id: "c1".into(),
            slug: "ai-by-2030".into(),
            question: "AI by 2030?".into(),
            creator_username: "maker".into(),
            topics: vec!["ai".into()],
            popularity_score: 3.5,
            close_time: None,
            resolved: false,
            visibility: Default::default(),
        }];
        let req = request(
            Some("ada@example.com"),
            Notification::InterestingMarkets {
                contracts: contracts.clone(),
            },
        );
        notifier.dispatch(&req).await.unwrap();

        let queued = db.list_notifications_for_user("u1").await.unwrap();
        assert_eq!(
            queued[0].notification,
            Notification::InterestingMarkets { contracts }
        );
    }
}
