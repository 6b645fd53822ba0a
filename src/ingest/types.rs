// src/ingest/types.rs
use anyhow::Result;

/// Child text of one feed `<item>`, as extracted; nothing resolved yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub pub_date: Option<String>,
}

#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Raw markup for `url`. An empty body means "no data this time".
    async fn fetch(&self, url: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}
