//! Integration tests for the Fleet facade
//!
//! Drives the whole library against in-memory instances: identity
//! resolution, provisioning, idempotent publishing, the mirror, the roster
//! initializer and the poll scheduler.

use std::sync::Arc;
use std::time::Duration;

use libtootfleet::config::{InitialToot, RosterUser};
use libtootfleet::error::SchedulerError;
use libtootfleet::remote::mock::MockFediverse;
use libtootfleet::{Config, Fleet, FleetError, PostRequest, ReplyRequest};
use tempfile::TempDir;

struct TestFleet {
    fleet: Fleet,
    local: MockFediverse,
    remote: MockFediverse,
    _dir: TempDir,
}

fn test_config(dir: &TempDir) -> Config {
    let data = dir.path().display().to_string();

    let mut config = Config::with_api_url("https://mock.instance");
    config.paths.secrets = format!("{}/secrets", data);
    config.paths.idempotency = format!("{}/markers", data);
    config.paths.media = format!("{}/media", data);
    config.paths.remote_secrets = format!("{}/remote", data);
    config.avatar.generator_url = None;
    config.scheduler.unit_millis = 1;
    config.remote.user = Some("watcher".to_string());
    config.remote.password = Some("pw".to_string());
    config.remote.hashtags = vec!["infosec".to_string()];
    config
}

/// Fleet over a local instance with an admin and `alice`, and a remote one with `watcher`
fn setup(local: MockFediverse, customize: impl FnOnce(&mut Config)) -> TestFleet {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    customize(&mut config);

    let local = local.with_admin("admin", "adminpass");
    let remote = MockFediverse::new().with_account("watcher", "pw");
    let fleet = Fleet::with_instances(
        config,
        Arc::new(local.clone()),
        Arc::new(remote.clone()),
    )
    .unwrap();

    TestFleet {
        fleet,
        local,
        remote,
        _dir: dir,
    }
}

fn post(username: &str, text: &str) -> PostRequest {
    PostRequest {
        username: username.to_string(),
        password: Some("p1".to_string()),
        text: text.to_string(),
        media: None,
    }
}

#[tokio::test]
async fn test_same_post_is_delivered_once() {
    let t = setup(MockFediverse::new().with_account("alice", "p1"), |_| {});

    let first = t.fleet.post(&post("alice", "good morning")).await.unwrap();
    let second = t.fleet.post(&post("alice", "good morning")).await.unwrap();

    assert!(first.delivered);
    assert!(!second.delivered);
    assert_eq!(second.skipped.as_deref(), Some("already delivered"));
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(t.local.statuses_by("alice").len(), 1);
    assert_eq!(t.local.counts().post_status, 1);
}

#[tokio::test]
async fn test_failed_publish_can_be_retried() {
    let t = setup(MockFediverse::new().with_account("alice", "p1"), |_| {});
    t.local.fail_next_posts(1);

    let failed = t.fleet.post(&post("alice", "try again")).await;
    assert!(matches!(failed, Err(FleetError::Remote(_))));
    assert!(t.local.statuses_by("alice").is_empty());

    let retried = t.fleet.post(&post("alice", "try again")).await.unwrap();
    assert!(retried.delivered);

    let repeated = t.fleet.post(&post("alice", "try again")).await.unwrap();
    assert!(!repeated.delivered);
    assert_eq!(t.local.statuses_by("alice").len(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_posts_deliver_once() {
    let local = MockFediverse::new()
        .with_account("alice", "p1")
        .with_delay(Duration::from_millis(300));
    let t = setup(local, |_| {});

    let request = post("alice", "only once please");
    let (a, b) = tokio::join!(t.fleet.post(&request), t.fleet.post(&request));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.delivered ^ b.delivered);
    assert_eq!(t.local.statuses_by("alice").len(), 1);
}

#[tokio::test]
async fn test_post_to_unknown_account_is_not_found() {
    let t = setup(MockFediverse::new(), |_| {});

    let result = t.fleet.post(&post("ghost", "boo")).await;

    assert!(matches!(result, Err(FleetError::NotFound(_))));
    assert_eq!(t.local.counts().create_account, 0);
    assert!(t.local.account("ghost").is_none());
}

#[tokio::test]
async fn test_reply_and_locate() {
    let t = setup(MockFediverse::new().with_account("alice", "p1"), |_| {});
    let target = t
        .local
        .seed_status("admin", "Patch Tuesday roundup")
        .unwrap();

    let found = t.fleet.locate_status("Tuesday roundup").await.unwrap();
    assert_eq!(found.as_deref(), Some(target.as_str()));
    assert_eq!(t.fleet.locate_status("no such words").await.unwrap(), None);
    assert!(matches!(
        t.fleet.locate_status("").await,
        Err(FleetError::InvalidInput(_))
    ));

    let reply = ReplyRequest {
        username: "alice".to_string(),
        password: Some("p1".to_string()),
        text: "patched already".to_string(),
        post_identifier: "Patch Tuesday".to_string(),
        media: None,
    };
    let response = t.fleet.reply(&reply).await.unwrap();
    assert!(response.delivered);

    let statuses = t.local.statuses_by("alice");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].in_reply_to_id.as_deref(), Some(target.as_str()));

    let missing = ReplyRequest {
        post_identifier: "never posted".to_string(),
        ..reply
    };
    assert!(matches!(
        t.fleet.reply(&missing).await,
        Err(FleetError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_mirror_delivers_one_new_status_per_cycle() {
    let t = setup(MockFediverse::new(), |_| {});
    for (user, text) in [
        ("carol", "first"),
        ("dave", "second"),
        ("erin", "third"),
        ("frank", "fourth"),
        ("grace", "fifth"),
    ] {
        t.remote.add_tag_status("infosec", user, text, None);
    }

    for expected_processed in 1..=3 {
        let report = t.fleet.mirror_once().await.unwrap();
        assert_eq!(report.fetched, 5);
        assert_eq!(report.items.len(), expected_processed);
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.failures(), 0);
    }

    let texts: Vec<String> = t.local.statuses().into_iter().map(|s| s.text).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
    assert!(t.local.account("erin").is_some());
    assert!(t.local.account("frank").is_none());
    assert_eq!(t.local.counts().create_account, 3);
}

#[tokio::test]
async fn test_mirror_creates_each_author_once() {
    let t = setup(MockFediverse::new(), |_| {});
    t.remote.add_tag_status("infosec", "carol", "one", None);
    t.remote.add_tag_status("infosec", "carol", "two", None);

    t.fleet.mirror_once().await.unwrap();
    t.fleet.mirror_once().await.unwrap();

    assert_eq!(t.local.counts().create_account, 1);
    assert_eq!(t.local.statuses_by("carol").len(), 2);
}

#[tokio::test]
async fn test_mirrored_account_can_post_with_stored_credentials() {
    let t = setup(MockFediverse::new(), |_| {});
    t.remote.add_tag_status("infosec", "carol", "mirrored", None);
    t.fleet.mirror_once().await.unwrap();

    let request = PostRequest {
        password: None,
        ..post("carol", "posting on my own now")
    };
    let response = t.fleet.post(&request).await.unwrap();

    assert!(response.delivered);
    assert_eq!(t.local.statuses_by("carol").len(), 2);
    assert_eq!(t.local.counts().create_account, 1);
}

#[tokio::test]
async fn test_mirror_survives_failing_hashtag() {
    let t = setup(MockFediverse::new(), |config| {
        config.remote.hashtags = vec!["broken".to_string(), "infosec".to_string()];
    });
    t.remote.fail_tag("broken");
    t.remote.add_tag_status("infosec", "carol", "still here", None);

    let report = t.fleet.mirror_once().await.unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(report.delivered(), 1);
}

#[tokio::test]
async fn test_roster_initialization_is_repeatable() {
    let t = setup(MockFediverse::new(), |config| {
        config.users = vec![RosterUser {
            login: "alice".to_string(),
            password: Some("p1".to_string()),
            email: "a@x".to_string(),
            initial_toots: vec![InitialToot {
                text: "hello".to_string(),
                media: None,
                schedule: None,
            }],
            ..Default::default()
        }];
    });

    let first = t.fleet.initialize().await.unwrap();
    assert_eq!(first.accounts_created(), 1);
    assert_eq!(first.statuses_delivered(), 1);
    assert_eq!(first.failures(), 0);

    let second = t.fleet.initialize().await.unwrap();
    assert_eq!(second.accounts_created(), 0);
    assert_eq!(second.statuses_delivered(), 0);
    assert_eq!(second.failures(), 0);

    assert_eq!(t.local.statuses_by("alice").len(), 1);
    assert_eq!(t.local.account("alice").unwrap().email, "a@x");
}

#[tokio::test]
async fn test_mirror_item_failure_does_not_stop_batch() {
    // carol exists locally with a password the mirror does not know
    let t = setup(MockFediverse::new().with_account("carol", "not-the-mirror-password"), |_| {});
    t.remote.add_tag_status("infosec", "carol", "cannot log in", None);
    t.remote.add_tag_status("infosec", "dave", "gets through", None);

    let report = t.fleet.mirror_once().await.unwrap();

    assert_eq!(report.items.len(), 2);
    assert_eq!(report.failures(), 1);
    assert_eq!(report.delivered(), 1);
    assert_eq!(report.items[0].username, "carol");
    assert!(report.items[0].outcome.is_err());
    assert!(t.local.statuses_by("carol").is_empty());
    assert_eq!(t.local.statuses_by("dave").len(), 1);
}

#[tokio::test]
async fn test_roster_failure_leaves_siblings_alone() {
    let t = setup(MockFediverse::new(), |config| {
        config.users = vec![
            RosterUser {
                login: "nopass".to_string(),
                email: "n@x".to_string(),
                ..Default::default()
            },
            RosterUser {
                login: "alice".to_string(),
                password: Some("p1".to_string()),
                email: "a@x".to_string(),
                initial_toots: vec![InitialToot {
                    text: "hello".to_string(),
                    media: None,
                    schedule: None,
                }],
                ..Default::default()
            },
        ];
    });

    let report = t.fleet.initialize().await.unwrap();

    assert_eq!(report.failures(), 1);
    assert_eq!(report.accounts_created(), 1);
    assert_eq!(report.statuses_delivered(), 1);
    assert!(matches!(
        report.users[0].result,
        Err(FleetError::InvalidInput(_))
    ));
    assert!(t.local.account("nopass").is_none());
    assert_eq!(t.local.statuses_by("alice").len(), 1);
}

#[tokio::test]
async fn test_roster_follows_existing_accounts() {
    let t = setup(MockFediverse::new().with_account("bob", "p2"), |config| {
        config.users = vec![RosterUser {
            login: "alice".to_string(),
            password: Some("p1".to_string()),
            email: "a@x".to_string(),
            follow: vec!["bob".to_string(), "nobody".to_string()],
            ..Default::default()
        }];
    });

    let report = t.fleet.initialize().await.unwrap();
    let alice = report.users[0].result.as_ref().unwrap();

    assert_eq!(alice.followed, 1);
    let bob_id = t.local.account("bob").unwrap().id;
    assert_eq!(t.local.account("alice").unwrap().following, vec![bob_id]);
}

#[tokio::test]
async fn test_population_lifecycle() {
    let t = setup(MockFediverse::new(), |_| {});
    t.remote.add_tag_status("infosec", "carol", "from afar", None);

    t.fleet.start_population().await.unwrap();
    assert!(t.fleet.is_populating().await);
    assert!(matches!(
        t.fleet.start_population().await,
        Err(FleetError::Scheduler(SchedulerError::AlreadyRunning))
    ));

    let mut mirrored = false;
    for _ in 0..100 {
        if !t.local.statuses_by("carol").is_empty() {
            mirrored = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(mirrored, "scheduler never ran a mirror cycle");

    t.fleet.stop_population().await.unwrap();
    assert!(!t.fleet.is_populating().await);
    assert!(matches!(
        t.fleet.stop_population().await,
        Err(FleetError::Scheduler(SchedulerError::NotRunning))
    ));

    t.fleet.start_population().await.unwrap();
    t.fleet.stop_population().await.unwrap();
    assert_eq!(t.local.statuses_by("carol").len(), 1);
}

#[tokio::test]
async fn test_population_without_remote_account_is_config_error() {
    let t = setup(MockFediverse::new(), |config| {
        config.remote.user = None;
    });

    let result = t.fleet.start_population().await;

    assert!(matches!(result, Err(FleetError::Config(_))));
    assert!(!t.fleet.is_populating().await);
}

#[tokio::test]
async fn test_purge_keeps_delivery_markers() {
    let t = setup(MockFediverse::new().with_account("alice", "p1"), |_| {});
    t.fleet.post(&post("alice", "one")).await.unwrap();
    t.fleet.post(&post("alice", "two")).await.unwrap();

    let deleted = t.fleet.purge("alice", Some("p1")).await.unwrap();
    assert_eq!(deleted, 2);
    assert!(t.local.statuses_by("alice").is_empty());

    let again = t.fleet.post(&post("alice", "one")).await.unwrap();
    assert!(!again.delivered);
    assert!(t.local.statuses_by("alice").is_empty());
}
