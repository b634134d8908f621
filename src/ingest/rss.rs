//! Periodic RSS/Atom poller.
//!
//! Fetches every configured feed on an interval and emits new entries as
//! `news` events (entry title as content, feed title as source). Entries
//! are identified by id, then link, then a title hash; a seen-set
//! suppresses duplicates across polls. Per-feed failures are logged and
//! never cancel the other feeds.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::{Entry, Feed};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::events::MarketEvent;
use crate::ingest::{is_shutdown, IngestSource};

pub struct RssPoller {
    poll_interval: Duration,
    feed_urls: Vec<String>,
    seen: HashSet<String>,
    http: reqwest::Client,
    connected: bool,
}

impl RssPoller {
    pub fn new(feed_urls: Vec<String>, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            feed_urls,
            seen: HashSet::new(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            connected: false,
        }
    }

    fn entry_id(entry: &Entry) -> String {
        if !entry.id.is_empty() {
            return entry.id.clone();
        }
        if let Some(link) = entry.links.first() {
            return link.href.clone();
        }
        let title = entry.title.as_ref().map(|t| t.content.as_str()).unwrap_or("");
        let mut hasher = DefaultHasher::new();
        title.hash(&mut hasher);
        format!("title:{:x}", hasher.finish())
    }

    fn entry_to_event(entry: &Entry, feed_title: &str) -> Option<MarketEvent> {
        let title = entry.title.as_ref()?.content.clone();
        if title.is_empty() {
            return None;
        }
        Some(MarketEvent::news(title, feed_title))
    }

    /// New (unseen) entries of one parsed feed, oldest-first as listed.
    fn collect_new(&mut self, feed: &Feed, url: &str) -> Vec<MarketEvent> {
        let feed_title = feed
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_else(|| url.to_string());

        feed.entries
            .iter()
            .filter_map(|entry| {
                let id = Self::entry_id(entry);
                if !self.seen.insert(id) {
                    return None;
                }
                let event = Self::entry_to_event(entry, &feed_title)?;
                debug!(
                    "📰 New entry from {}: {}",
                    feed_title,
                    event.content.as_deref().unwrap_or("").chars().take(50).collect::<String>(),
                );
                Some(event)
            })
            .collect()
    }

    async fn poll_feed(&mut self, url: &str) -> Vec<MarketEvent> {
        let bytes = match self.http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("📰 Failed to read feed {url}: {e}");
                    return Vec::new();
                }
            },
            Ok(resp) => {
                warn!("📰 Feed {url} returned {}", resp.status());
                return Vec::new();
            }
            Err(e) => {
                warn!("📰 Failed to fetch feed {url}: {e}");
                return Vec::new();
            }
        };

        match feed_rs::parser::parse(bytes.as_ref()) {
            Ok(feed) => self.collect_new(&feed, url),
            Err(e) => {
                warn!("📰 Failed to parse feed {url}: {e}");
                Vec::new()
            }
        }
    }

    async fn poll_all(&mut self, out: &mpsc::Sender<MarketEvent>) -> bool {
        let urls = self.feed_urls.clone();
        for url in urls {
            for event in self.poll_feed(&url).await {
                if out.send(event).await.is_err() {
                    return false;
                }
            }
        }
        true
    }
}

#[async_trait]
impl IngestSource for RssPoller {
    fn name(&self) -> &'static str {
        "rss"
    }

    async fn connect(&mut self) -> Result<(), IngestError> {
        for feed in &self.feed_urls {
            url::Url::parse(feed)
                .map_err(|e| IngestError::Connection(format!("bad feed url {feed}: {e}")))?;
        }
        self.connected = true;
        info!("📰 RSS poller connected with {} feeds", self.feed_urls.len());
        Ok(())
    }

    async fn run(
        &mut self,
        out: mpsc::Sender<MarketEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), IngestError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || is_shutdown(&shutdown) {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !self.poll_all(&out).await {
                        break;
                    }
                }
            }
        }
        self.disconnect().await;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        info!("📰 RSS poller disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Macro Wire</title>
    <item>
      <title>FED HIKE of 25bp announced</title>
      <link>https://example.com/a</link>
      <guid>guid-a</guid>
    </item>
    <item>
      <title>Weather sunny in Berlin</title>
      <link>https://example.com/b</link>
      <guid>guid-b</guid>
    </item>
  </channel>
</rss>"#;

    fn parse(xml: &str) -> Feed {
        feed_rs::parser::parse(xml.as_bytes()).unwrap()
    }

    #[test]
    fn test_entries_become_news_events() {
        let mut poller = RssPoller::new(vec![], Duration::from_secs(60));
        let events = poller.collect_new(&parse(SAMPLE_RSS), "https://example.com/feed");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].content.as_deref(), Some("FED HIKE of 25bp announced"));
        assert_eq!(events[0].source.as_deref(), Some("Macro Wire"));
        assert!(events[0].kind.is_external());
    }

    #[test]
    fn test_seen_set_suppresses_duplicates_across_polls() {
        let mut poller = RssPoller::new(vec![], Duration::from_secs(60));
        let feed = parse(SAMPLE_RSS);
        assert_eq!(poller.collect_new(&feed, "u").len(), 2);
        // Same poll result again: nothing new.
        assert_eq!(poller.collect_new(&feed, "u").len(), 0);
    }

    #[test]
    fn test_entry_id_prefers_guid() {
        let feed = parse(SAMPLE_RSS);
        assert_eq!(RssPoller::entry_id(&feed.entries[0]), "guid-a");
        assert_eq!(RssPoller::entry_id(&feed.entries[1]), "guid-b");
    }

    #[test]
    fn test_connect_rejects_bad_urls() {
        let mut poller = RssPoller::new(vec!["not a url".into()], Duration::from_secs(60));
        let err = futures::executor::block_on(poller.connect()).unwrap_err();
        assert!(matches!(err, IngestError::Connection(_)));
        assert!(!poller.is_connected());
    }
}
