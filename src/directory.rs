//! User directory backed by the `private_users` table.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::onboarding::model::PrivateProfile;
use crate::onboarding::services::UserDirectory;
use crate::store::Database;

pub struct StoreDirectory {
    db: Arc<dyn Database>,
}

impl StoreDirectory {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for StoreDirectory {
    async fn get_private_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<PrivateProfile>, CollaboratorError> {
        Ok(self.db.get_private_profile(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationKind;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn missing_profile_is_none() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let directory = StoreDirectory::new(db);
        assert!(directory.get_private_profile("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn returns_stored_profile() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let profile = PrivateProfile {
            id: "u1".into(),
            email: Some("u1@example.com".into()),
            unsubscribed_all: false,
            opted_out: vec![NotificationKind::CreatorGuide],
        };
        db.upsert_private_profile(&profile).await.unwrap();

        let directory = StoreDirectory::new(db);
        assert_eq!(directory.get_private_profile("u1").await.unwrap(), Some(profile));
    }
}
