use curio_core::search::{ScrapedSource, SearchResult, MAX_SCRAPED_SOURCES};
use curio_core::summary::truncate_chars;
use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::extract::extract_text;
use crate::fetch::PageFetcher;
use crate::guard::{validate_url, GuardPolicy};

const SUMMARY_CHARS: usize = 280;

/// Scrapes the top search results concurrently, degrading each failure to
/// its search snippet.
pub struct Scraper {
    fetcher: PageFetcher,
    policy: GuardPolicy,
}

impl Scraper {
    pub fn new(policy: GuardPolicy) -> Self {
        Self {
            fetcher: PageFetcher::new(policy.clone()),
            policy,
        }
    }

    /// Scrape up to `limit` non-placeholder results.
    ///
    /// The source list is fixed before any request starts and the output
    /// keeps that order, so citation indexes stay stable no matter which
    /// fetch finishes first.
    #[instrument(skip_all, fields(candidates = results.len()))]
    pub async fn scrape_top(&self, results: &[SearchResult], limit: usize) -> Vec<ScrapedSource> {
        let picked: Vec<&SearchResult> = results
            .iter()
            .filter(|r| !r.is_fallback())
            .take(limit.min(MAX_SCRAPED_SOURCES))
            .collect();

        let scraped = join_all(picked.iter().map(|r| self.scrape_one(r))).await;
        info!(scraped = scraped.len(), "scraping finished");
        scraped
    }

    async fn scrape_one(&self, result: &SearchResult) -> ScrapedSource {
        let url = match validate_url(&result.url, &self.policy) {
            Ok(url) => url,
            Err(error) => {
                warn!(url = %result.url, %error, "source rejected by URL guard");
                return ScrapedSource::degraded(result, error.to_string());
            }
        };

        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(error) => {
                warn!(url = %result.url, %error, "fetch failed");
                return ScrapedSource::degraded(result, error.to_string());
            }
        };

        let extracted = extract_text(&html);
        if extracted.content.is_empty() {
            return ScrapedSource::degraded(result, "no extractable content");
        }

        let title = if extracted.title.is_empty() {
            result.title.clone()
        } else {
            extracted.title
        };
        let summary = truncate_chars(&extracted.content, SUMMARY_CHARS);
        info!(
            url = %result.url,
            chars = extracted.content.chars().count(),
            "scraped"
        );
        ScrapedSource {
            url: result.url.clone(),
            title,
            content: extracted.content,
            summary,
            fetch_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str) -> SearchResult {
        SearchResult::normalized("Title", url, "the snippet", 0.8, "serper").unwrap()
    }

    // Guard rejections degrade without touching the network, which keeps
    // these tests hermetic.
    #[tokio::test]
    async fn rejected_urls_degrade_in_order() {
        let scraper = Scraper::new(GuardPolicy::default());
        let results = vec![
            result("javascript:alert(1)"),
            result("https://127.0.0.1/a"),
            result("https://192.168.1.1/b"),
        ];
        let scraped = scraper.scrape_top(&results, 5).await;
        assert_eq!(scraped.len(), 3);
        assert_eq!(scraped[0].url, "javascript:alert(1)");
        assert_eq!(scraped[1].url, "https://127.0.0.1/a");
        assert_eq!(scraped[2].url, "https://192.168.1.1/b");
        for source in &scraped {
            assert!(source.fetch_error.is_some());
            assert_eq!(source.content, "the snippet");
        }
    }

    #[tokio::test]
    async fn fallback_entries_are_skipped() {
        let scraper = Scraper::new(GuardPolicy::default());
        let results = vec![SearchResult::unavailable_fallback()];
        let scraped = scraper.scrape_top(&results, 5).await;
        assert!(scraped.is_empty());
    }

    #[tokio::test]
    async fn limit_caps_at_max_sources() {
        let scraper = Scraper::new(GuardPolicy::default());
        let results: Vec<SearchResult> = (0..6)
            .map(|i| result(&format!("https://10.0.0.{i}/page")))
            .collect();
        let scraped = scraper.scrape_top(&results, 10).await;
        assert_eq!(scraped.len(), MAX_SCRAPED_SOURCES);
    }
}
