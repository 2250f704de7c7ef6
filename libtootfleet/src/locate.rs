//! Reply targeting
//!
//! Finds the status a manual reply request refers to with a linear scan
//! over a single fetch of the public timeline.

use crate::error::{FleetError, Result};
use crate::identity::AccountSession;

/// Id of the first status on the public timeline whose content contains
/// `substring`, newest first
pub async fn locate_status(admin: &AccountSession, substring: &str) -> Result<Option<String>> {
    if substring.is_empty() {
        return Err(FleetError::InvalidInput(
            "Post identifier cannot be empty".to_string(),
        ));
    }

    let timeline = admin.api.public_timeline(None).await?;
    let found = timeline
        .into_iter()
        .find(|status| status.content.contains(substring))
        .map(|status| status.id);

    match &found {
        Some(id) => tracing::debug!(status_id = %id, substring, "Reply target located"),
        None => tracing::debug!(substring, "No status matches reply target"),
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockFediverse;
    use crate::remote::{Instance, DEFAULT_SCOPES};

    async fn admin(server: &MockFediverse) -> AccountSession {
        let app = server.register_app("admin_bot", DEFAULT_SCOPES).await.unwrap();
        let token = server.log_in(&app, "admin", "adminpass", DEFAULT_SCOPES).await.unwrap();
        let api = server.connect(&token).unwrap();
        let me = api.verify_credentials().await.unwrap();
        AccountSession {
            username: "admin".to_string(),
            account_id: me.id,
            api,
        }
    }

    #[tokio::test]
    async fn test_finds_unique_marker() {
        let server = MockFediverse::new().with_admin("admin", "adminpass");
        server.seed_status("admin", "nothing to see");
        let id = server.seed_status("admin", "look: UNIQUE-MARKER-123 here").unwrap();
        server.seed_status("admin", "still nothing");

        let found = locate_status(&admin(&server).await, "UNIQUE-MARKER-123")
            .await
            .unwrap();
        assert_eq!(found, Some(id));
    }

    #[tokio::test]
    async fn test_empty_timeline_is_none() {
        let server = MockFediverse::new().with_admin("admin", "adminpass");
        let found = locate_status(&admin(&server).await, "anything").await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_literal_match_only() {
        let server = MockFediverse::new().with_admin("admin", "adminpass");
        server.seed_status("admin", "price is 10 dollars");

        let found = locate_status(&admin(&server).await, "1.0").await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_empty_substring_rejected() {
        let server = MockFediverse::new().with_admin("admin", "adminpass");
        let result = locate_status(&admin(&server).await, "").await;
        assert!(matches!(result, Err(FleetError::InvalidInput(_))));
    }
}
