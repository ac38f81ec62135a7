//! Sync pipeline orchestrator
//!
//! One run: acquire the lock, load the history, fetch posts per
//! configured class, filter against the history, materialize
//! attachments, deliver posts one at a time, update the history.
//!
//! Containment rules: a fetch failure skips that class, a
//! materialization failure skips that attachment, a delivery failure
//! skips that post (it stays out of the history and is retried next
//! run). Only lock and auth failures abort the run. The lock guard is
//! dropped on every exit path, so release is guaranteed whenever the
//! lock was actually held.

use crate::error::Result;
use crate::klassly::PostSource;
use crate::models::Post;
use crate::storage::{History, RunLock};
use crate::telegram::Publisher;
use std::path::{Path, PathBuf};

/// Summary of one sync run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Posts fetched across all classes
    pub fetched: usize,
    /// Posts skipped because the history already had them
    pub already_seen: usize,
    /// Posts delivered and recorded
    pub delivered: usize,
    /// Posts whose delivery failed; retried next run
    pub failed: usize,
    /// Classes skipped (fetch failure or unknown name)
    pub classes_failed: usize,
}

/// The pipeline runner, generic over its two collaborators
pub struct SyncRunner<S, P> {
    source: S,
    publisher: P,
    classes: Vec<String>,
    history_path: PathBuf,
    lock_path: PathBuf,
    dump_path: PathBuf,
}

impl<S: PostSource, P: Publisher> SyncRunner<S, P> {
    /// Create a runner keeping its state files under `home`
    pub fn new(source: S, publisher: P, classes: Vec<String>, home: &Path) -> Self {
        Self {
            source,
            publisher,
            classes,
            history_path: home.join("history.json"),
            lock_path: home.join("sync.lock"),
            dump_path: home.join("posts.json"),
        }
    }

    /// Execute one sync run
    pub async fn run(&mut self) -> Result<SyncReport> {
        let lock = RunLock::new(&self.lock_path);
        let _guard = lock.acquire()?;
        self.run_locked().await
    }

    async fn run_locked(&mut self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut history = History::load(&self.history_path)?;

        let klasses = self.source.login().await?;

        let mut pending: Vec<Post> = Vec::new();
        for name in &self.classes {
            let Some(klass) = klasses.iter().find(|k| &k.name == name) else {
                tracing::warn!(klass = %name, "configured class not found on the source");
                report.classes_failed += 1;
                continue;
            };

            match self.source.posts(klass).await {
                Ok(posts) => {
                    let total = posts.len();
                    let fresh: Vec<Post> = posts
                        .into_iter()
                        .filter(|p| !history.contains(&p.id))
                        .collect();
                    report.fetched += total;
                    report.already_seen += total - fresh.len();
                    tracing::info!(klass = %name, new_posts = fresh.len(), "class filtered");
                    pending.extend(fresh);
                }
                Err(e) => {
                    tracing::warn!(klass = %name, error = %e, "fetch failed, skipping class");
                    report.classes_failed += 1;
                }
            }
        }

        self.dump_pending(&pending);

        let attachment_failures = self.source.materialize(&mut pending).await;
        if attachment_failures > 0 {
            tracing::warn!(
                failed = attachment_failures,
                "some attachments could not be materialized"
            );
        }

        for post in &pending {
            match self.publisher.send_post(post).await {
                Ok(()) => {
                    history.record(&post.id, post.date);
                    // shrink the redelivery window: persist after every success
                    if let Err(e) = history.save() {
                        tracing::warn!(post_id = %post.id, error = %e, "incremental history save failed");
                    }
                    report.delivered += 1;
                    tracing::info!(post_id = %post.id, klass = %post.klass, "post delivered");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        post_id = %post.id,
                        klass = %post.klass,
                        error = %e,
                        "delivery failed, post will be retried next run"
                    );
                }
            }
        }

        history.save()?;

        tracing::info!(
            fetched = report.fetched,
            delivered = report.delivered,
            failed = report.failed,
            already_seen = report.already_seen,
            "sync run finished"
        );
        Ok(report)
    }

    /// Dump the filtered posts for operator inspection; best effort
    fn dump_pending(&self, pending: &[Post]) {
        match serde_json::to_string_pretty(pending) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.dump_path, json) {
                    tracing::warn!(path = %self.dump_path.display(), error = %e, "could not write posts dump");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not serialize posts dump"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{Klass, PostKind};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;

    fn date(i: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + i, 0).unwrap()
    }

    fn post(id: &str, klass: &str) -> Post {
        Post {
            id: id.to_string(),
            klass: klass.to_string(),
            date: date(0),
            from: "Mme Dupont".to_string(),
            text: "bonjour".to_string(),
            kind: PostKind::Text,
            attachments: Vec::new(),
        }
    }

    struct FakeSource {
        klasses: Vec<Klass>,
        posts: HashMap<String, Vec<Post>>,
        fail_classes: HashSet<String>,
    }

    impl FakeSource {
        fn new(entries: Vec<(&str, Vec<Post>)>) -> Self {
            let klasses = entries
                .iter()
                .map(|(name, _)| Klass {
                    id: format!("id-{name}"),
                    name: name.to_string(),
                })
                .collect();
            let posts = entries
                .into_iter()
                .map(|(name, posts)| (name.to_string(), posts))
                .collect();
            Self {
                klasses,
                posts,
                fail_classes: HashSet::new(),
            }
        }
    }

    #[async_trait]
    impl PostSource for FakeSource {
        async fn login(&mut self) -> crate::error::Result<Vec<Klass>> {
            Ok(self.klasses.clone())
        }

        async fn posts(&mut self, klass: &Klass) -> crate::error::Result<Vec<Post>> {
            if self.fail_classes.contains(&klass.name) {
                return Err(Error::Fetch {
                    klass: klass.name.clone(),
                    reason: "boom".to_string(),
                });
            }
            Ok(self.posts.get(&klass.name).cloned().unwrap_or_default())
        }

        async fn materialize(&mut self, _posts: &mut [Post]) -> usize {
            0
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        fail_ids: HashSet<String>,
        sent: Vec<String>,
        attempted: Vec<String>,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn send_post(&mut self, post: &Post) -> crate::error::Result<()> {
            self.attempted.push(post.id.clone());
            if self.fail_ids.contains(&post.id) {
                return Err(Error::Delivery {
                    status: 400,
                    description: "rejected".to_string(),
                    retry_after: None,
                });
            }
            self.sent.push(post.id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_already_seen_posts_are_not_delivered() {
        let home = TempDir::new().unwrap();

        // pre-seed the history with post "a"
        let mut history = History::load(&home.path().join("history.json")).unwrap();
        history.record("a", date(0));
        history.save().unwrap();

        let source = FakeSource::new(vec![("CM2", vec![post("a", "CM2"), post("b", "CM2")])]);
        let mut runner = SyncRunner::new(
            source,
            FakePublisher::default(),
            vec!["CM2".to_string()],
            home.path(),
        );

        let report = runner.run().await.unwrap();

        assert_eq!(runner.publisher.sent, vec!["b".to_string()]);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.already_seen, 1);
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_abort_the_loop() {
        let home = TempDir::new().unwrap();

        let source = FakeSource::new(vec![(
            "CM2",
            vec![post("p1", "CM2"), post("p2", "CM2"), post("p3", "CM2")],
        )]);
        let mut publisher = FakePublisher::default();
        publisher.fail_ids.insert("p2".to_string());

        let mut runner =
            SyncRunner::new(source, publisher, vec!["CM2".to_string()], home.path());
        let report = runner.run().await.unwrap();

        // all three attempted, failure contained to p2
        assert_eq!(runner.publisher.attempted, vec!["p1", "p2", "p3"]);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);

        let history = History::load(&home.path().join("history.json")).unwrap();
        assert!(history.contains("p1"));
        assert!(!history.contains("p2"));
        assert!(history.contains("p3"));
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_only_that_class() {
        let home = TempDir::new().unwrap();

        let mut source = FakeSource::new(vec![
            ("CM2", vec![post("p1", "CM2")]),
            ("CE1", vec![post("p2", "CE1")]),
        ]);
        source.fail_classes.insert("CM2".to_string());

        let mut runner = SyncRunner::new(
            source,
            FakePublisher::default(),
            vec!["CM2".to_string(), "CE1".to_string()],
            home.path(),
        );
        let report = runner.run().await.unwrap();

        assert_eq!(runner.publisher.sent, vec!["p2".to_string()]);
        assert_eq!(report.classes_failed, 1);
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_unknown_class_is_counted_and_skipped() {
        let home = TempDir::new().unwrap();

        let source = FakeSource::new(vec![("CM2", vec![post("p1", "CM2")])]);
        let mut runner = SyncRunner::new(
            source,
            FakePublisher::default(),
            vec!["CM2".to_string(), "Inconnue".to_string()],
            home.path(),
        );
        let report = runner.run().await.unwrap();

        assert_eq!(report.classes_failed, 1);
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_run_refused_while_lock_held() {
        let home = TempDir::new().unwrap();
        let lock = RunLock::new(&home.path().join("sync.lock"));
        let _guard = lock.acquire().unwrap();

        let source = FakeSource::new(vec![("CM2", vec![post("p1", "CM2")])]);
        let mut runner = SyncRunner::new(
            source,
            FakePublisher::default(),
            vec!["CM2".to_string()],
            home.path(),
        );

        assert!(matches!(runner.run().await, Err(Error::LockHeld)));
        assert!(runner.publisher.attempted.is_empty());
        // no history was written
        assert!(!home.path().join("history.json").exists());
    }

    #[tokio::test]
    async fn test_lock_released_after_run() {
        let home = TempDir::new().unwrap();

        let source = FakeSource::new(vec![("CM2", vec![post("p1", "CM2")])]);
        let mut runner = SyncRunner::new(
            source,
            FakePublisher::default(),
            vec!["CM2".to_string()],
            home.path(),
        );
        runner.run().await.unwrap();

        assert!(!home.path().join("sync.lock").exists());
        // posts dump written for operator inspection
        assert!(home.path().join("posts.json").exists());
    }
}
