//! Page scraping for the research pipeline.
//!
//! Candidate URLs pass through an SSRF guard before any request is made, get
//! fetched with a strict timeout and size cap, and have their main text pulled
//! out of the HTML. Pages that cannot be scraped degrade to their search
//! snippet instead of failing the generation.

mod extract;
mod fetch;
mod guard;
mod scraper;

pub use extract::{extract_text, Extracted, MAX_EXTRACT_CHARS};
pub use fetch::{FetchError, PageFetcher, FETCH_TIMEOUT, MAX_PAGE_BYTES};
pub use guard::{check_url_target, validate_url, GuardError, GuardPolicy, MAX_URL_CHARS};
pub use scraper::Scraper;
