//! The ingestion loop.
//!
//! One cycle walks every enabled source (RSS, then VK, then Telegram),
//! hands unanalyzed articles to the external analyzer, and finishes with a
//! stats pass when the stats interval has elapsed. The intervals are
//! settings, re-read every cycle, so operators can retune a running daemon.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

use crate::db::Database;
use crate::telegram::{self, TelegramManager};
use crate::vk::{self, VkClient};
use crate::{rss, stats};

/// Boundary to the external word/category analyzer. Invoked once per
/// article that has no analysis yet; a failed article stays pending and is
/// retried on the next cycle.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, article_id: i64) -> anyhow::Result<()>;
}

pub struct Orchestrator {
    db: Database,
    http: reqwest::Client,
    vk: Option<VkClient>,
    telegram: Arc<TelegramManager>,
    media_root: PathBuf,
    analyzer: Option<Arc<dyn Analyzer>>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        http: reqwest::Client,
        vk: Option<VkClient>,
        telegram: Arc<TelegramManager>,
        media_root: PathBuf,
        analyzer: Option<Arc<dyn Analyzer>>,
    ) -> Self {
        Orchestrator {
            db,
            http,
            vk,
            telegram,
            media_root,
            analyzer,
        }
    }

    pub async fn run(self) {
        // The first cycle always includes a stats pass.
        let mut last_stats: Option<Instant> = None;
        loop {
            let cycle_started = Instant::now();
            let mut added = 0;

            added += rss::run_rss_cycle(&self.db, &self.http).await;
            if let Some(vk) = &self.vk {
                added += vk::run_vk_cycle(&self.db, vk, &self.http, &self.media_root).await;
            }
            added += telegram::run_tg_cycle(&self.db, &self.telegram, &self.media_root).await;

            let analyzed = self.run_analysis_pass().await;

            let stats_interval = self.interval_setting("stats_interval", 900).await;
            let stats_due = last_stats
                .map_or(true, |at| at.elapsed() >= Duration::from_secs(stats_interval));
            if stats_due {
                stats::run_stats_cycle(&self.db, self.vk.as_ref(), &self.telegram).await;
                last_stats = Some(Instant::now());
            }

            let poll_interval = self.interval_setting("poll_interval", 300).await;
            info!(
                "Cycle complete: {} new articles, {} analyzed in {:.1}s; next pass in {}s",
                added,
                analyzed,
                cycle_started.elapsed().as_secs_f64(),
                poll_interval
            );
            sleep(Duration::from_secs(poll_interval)).await;
        }
    }

    /// Hands every still-unanalyzed article to the analyzer, recording
    /// completion so each article is analyzed exactly once.
    async fn run_analysis_pass(&self) -> usize {
        let Some(analyzer) = &self.analyzer else {
            return 0;
        };
        let pending = match self.db.unanalyzed_articles().await {
            Ok(pending) => pending,
            Err(err) => {
                warn!("Failed to list unanalyzed articles: {}", err);
                return 0;
            }
        };

        let mut analyzed = 0;
        for article_id in pending {
            match analyzer.analyze(article_id) {
                Ok(()) => match self.db.mark_analyzed(article_id, Utc::now()).await {
                    Ok(()) => analyzed += 1,
                    Err(err) => {
                        warn!("Failed to mark article {} analyzed: {}", article_id, err);
                    }
                },
                Err(err) => {
                    warn!("Analyzer failed on article {}: {:#}", article_id, err);
                }
            }
        }
        analyzed
    }

    async fn interval_setting(&self, code: &str, default: i64) -> u64 {
        match self.db.setting_int(code, default).await {
            Ok(value) => value.max(1) as u64,
            Err(err) => {
                warn!("Failed to read setting '{}': {}", code, err);
                default.max(1) as u64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::article::NewArticle;
    use crate::db::source::SourceKind;
    use std::sync::Mutex;

    struct RecordingAnalyzer {
        seen: Mutex<Vec<i64>>,
        fail_on: Option<i64>,
    }

    impl RecordingAnalyzer {
        fn new(fail_on: Option<i64>) -> Arc<Self> {
            Arc::new(RecordingAnalyzer {
                seen: Mutex::new(Vec::new()),
                fail_on,
            })
        }

        fn seen(&self) -> Vec<i64> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Analyzer for RecordingAnalyzer {
        fn analyze(&self, article_id: i64) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(article_id);
            if self.fail_on == Some(article_id) {
                anyhow::bail!("no model available");
            }
            Ok(())
        }
    }

    fn orchestrator_with(db: Database, analyzer: Arc<RecordingAnalyzer>) -> Orchestrator {
        Orchestrator::new(
            db,
            reqwest::Client::new(),
            None,
            Arc::new(TelegramManager::new(None)),
            std::env::temp_dir(),
            Some(analyzer),
        )
    }

    async fn insert_article(db: &Database, source_id: i64, n: i64) -> i64 {
        let link = format!("https://t.me/ch/{n}");
        let guid = format!("tg:ch:{n}");
        db.insert_article_if_new(&NewArticle {
            source_id,
            title: "Hello",
            link: &link,
            description: Some("Hello"),
            guid: &guid,
            published_at: Some(Utc::now()),
            fetched_at: Utc::now(),
        })
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn each_article_is_analyzed_exactly_once() {
        let db = Database::memory().await;
        let source_id = db.insert_source("ch", SourceKind::Tg, "https://t.me/ch").await;
        let first = insert_article(&db, source_id, 1).await;
        let second = insert_article(&db, source_id, 2).await;

        let analyzer = RecordingAnalyzer::new(None);
        let orchestrator = orchestrator_with(db, Arc::clone(&analyzer));

        assert_eq!(orchestrator.run_analysis_pass().await, 2);
        assert_eq!(analyzer.seen(), vec![first, second]);

        // Nothing left pending: the second pass never re-invokes.
        assert_eq!(orchestrator.run_analysis_pass().await, 0);
        assert_eq!(analyzer.seen(), vec![first, second]);
    }

    #[tokio::test]
    async fn failed_articles_stay_pending_and_are_retried() {
        let db = Database::memory().await;
        let source_id = db.insert_source("ch", SourceKind::Tg, "https://t.me/ch").await;
        let failing = insert_article(&db, source_id, 1).await;
        let healthy = insert_article(&db, source_id, 2).await;

        let analyzer = RecordingAnalyzer::new(Some(failing));
        let orchestrator = orchestrator_with(db, Arc::clone(&analyzer));

        assert_eq!(orchestrator.run_analysis_pass().await, 1);
        assert_eq!(orchestrator.run_analysis_pass().await, 0);
        // The failing article was retried; the healthy one was not.
        assert_eq!(analyzer.seen(), vec![failing, healthy, failing]);
    }

    #[tokio::test]
    async fn no_analyzer_means_a_noop_pass() {
        let db = Database::memory().await;
        let source_id = db.insert_source("ch", SourceKind::Tg, "https://t.me/ch").await;
        insert_article(&db, source_id, 1).await;

        let orchestrator = Orchestrator::new(
            db,
            reqwest::Client::new(),
            None,
            Arc::new(TelegramManager::new(None)),
            std::env::temp_dir(),
            None,
        );
        assert_eq!(orchestrator.run_analysis_pass().await, 0);
    }
}
