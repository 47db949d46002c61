//! Candidate source reader.
//!
//! Directory pages listing free proxies are scraped with two loose regular
//! expressions: one for IPv4 literals and one for numeric table cells. The
//! n-th address is paired with the n-th port. Page structure is not modelled,
//! so the output is noisy; the validator decides what is real.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, Scheme};
use crate::{PoolError, Result};

static IP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").expect("valid IPv4 pattern")
});

static PORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<td[^>]*>\s*(\d+)\s*</td>").expect("valid port pattern"));

/// Placeholder for the page number in a paginated source URL.
const PAGE_PLACEHOLDER: &str = "{}";

/// A configured directory source, optionally paginated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTemplate {
    template: String,
}

impl SourceTemplate {
    /// Parses a source URL, rejecting anything that is not an http(s) URL.
    pub fn parse(template: &str) -> Result<Self> {
        let probe = template.replace(PAGE_PLACEHOLDER, "1");
        let url = url::Url::parse(&probe)
            .map_err(|e| PoolError::Config(format!("source '{}': {}", template, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PoolError::Config(format!(
                "source '{}' must be http(s)",
                template
            )));
        }
        Ok(Self {
            template: template.to_string(),
        })
    }

    /// Returns the raw template.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Whether the template contains a page placeholder.
    pub fn is_paginated(&self) -> bool {
        self.template.contains(PAGE_PLACEHOLDER)
    }

    /// Concrete URLs to fetch: pages `1..=pages` when paginated.
    pub fn expand(&self, pages: u32) -> Vec<String> {
        if self.is_paginated() {
            (1..=pages.max(1))
                .map(|page| self.template.replace(PAGE_PLACEHOLDER, &page.to_string()))
                .collect()
        } else {
            vec![self.template.clone()]
        }
    }
}

/// Extracts candidate endpoints from a directory page body.
///
/// Every address/port pair is offered as both an HTTP and an HTTPS proxy.
/// Pairs whose address is not a valid IPv4 literal or whose port is not a
/// non-zero `u16` are dropped.
pub fn extract_candidates(body: &str) -> Vec<Endpoint> {
    let ips: Vec<&str> = IP_REGEX
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let ports: Vec<&str> = PORT_REGEX
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let mut candidates = Vec::with_capacity(ips.len().min(ports.len()) * 2);
    for (ip, port) in ips.iter().zip(ports.iter()) {
        if ip.parse::<Ipv4Addr>().is_err() {
            continue;
        }
        let port = match port.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => continue,
        };
        candidates.push(Endpoint::with_scheme(*ip, port, Scheme::Http));
        candidates.push(Endpoint::with_scheme(*ip, port, Scheme::Https));
    }
    candidates
}

/// Something that turns a directory URL into candidate endpoints.
///
/// Implementations swallow their own failures: a broken source yields an
/// empty list and never aborts a refill.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Fetches candidates from one concrete URL.
    async fn fetch_candidates(&self, url: &str) -> Vec<Endpoint>;
}

/// Scrapes directory pages over plain HTTP.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// Creates a source reader with the given request timeout and User-Agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Creates a source reader with a custom reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_body(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PoolError::SourceFetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PoolError::SourceFetch {
                url: url.to_string(),
                reason: format!("status {}", status),
            });
        }

        response.text().await.map_err(|e| PoolError::SourceFetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl CandidateSource for HttpSource {
    async fn fetch_candidates(&self, url: &str) -> Vec<Endpoint> {
        match self.fetch_body(url).await {
            Ok(body) => {
                let candidates = extract_candidates(&body);
                debug!(url, count = candidates.len(), "Extracted candidates");
                candidates
            }
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        }
    }
}

/// A source that serves fixed candidate lists keyed by URL.
#[derive(Default)]
pub struct StaticSource {
    pages: HashMap<String, Vec<Endpoint>>,
    calls: AtomicUsize,
}

impl StaticSource {
    /// Creates an empty static source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `candidates` for `url`.
    pub fn with_page(mut self, url: impl Into<String>, candidates: Vec<Endpoint>) -> Self {
        self.pages.insert(url.into(), candidates);
        self
    }

    /// Number of fetches performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    async fn fetch_candidates(&self, url: &str) -> Vec<Endpoint> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages.get(url).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
<table>
  <tr><th>IP</th><th>PORT</th><th>TYPE</th></tr>
  <tr><td data-title="IP">117.69.232.10</td><td data-title="PORT">8089</td><td>HTTP</td></tr>
  <tr><td data-title="IP">183.164.243.2</td><td data-title="PORT"> 3128 </td><td>HTTPS</td></tr>
</table>"#;

    #[test]
    fn test_extract_candidates_pairs_positionally() {
        let candidates = extract_candidates(TABLE);
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0], Endpoint::new("117.69.232.10", 8089));
        assert_eq!(
            candidates[1],
            Endpoint::with_scheme("117.69.232.10", 8089, Scheme::Https)
        );
        assert_eq!(candidates[2], Endpoint::new("183.164.243.2", 3128));
    }

    #[test]
    fn test_extract_candidates_uneven_counts() {
        let body = "<td>1.1.1.1</td><td>80</td> 2.2.2.2 3.3.3.3";
        let candidates = extract_candidates(body);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].host(), "1.1.1.1");
    }

    #[test]
    fn test_extract_candidates_skips_invalid() {
        let body = "999.1.1.1 <td>80</td> 2.2.2.2 <td>70000</td> 3.3.3.3 <td>0</td>";
        assert!(extract_candidates(body).is_empty());
    }

    #[test]
    fn test_extract_candidates_garbage() {
        assert!(extract_candidates("").is_empty());
        assert!(extract_candidates("<html>captcha required</html>").is_empty());
    }

    #[test]
    fn test_source_template_plain() {
        let t = SourceTemplate::parse("https://www.kuaidaili.com/free/inha/").unwrap();
        assert!(!t.is_paginated());
        assert_eq!(t.expand(3), vec!["https://www.kuaidaili.com/free/inha/"]);
    }

    #[test]
    fn test_source_template_paginated() {
        let t = SourceTemplate::parse("http://www.89ip.cn/index_{}.html").unwrap();
        assert!(t.is_paginated());
        assert_eq!(
            t.expand(3),
            vec![
                "http://www.89ip.cn/index_1.html",
                "http://www.89ip.cn/index_2.html",
                "http://www.89ip.cn/index_3.html",
            ]
        );
    }

    #[test]
    fn test_source_template_rejects_non_http() {
        assert!(SourceTemplate::parse("ftp://example.com/list").is_err());
        assert!(SourceTemplate::parse("list.html").is_err());
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticSource::new().with_page("http://a", vec![Endpoint::new("1.1.1.1", 80)]);
        assert_eq!(source.fetch_candidates("http://a").await.len(), 1);
        assert!(source.fetch_candidates("http://b").await.is_empty());
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_http_source_new() {
        assert!(HttpSource::new(Duration::from_secs(10), "test-agent").is_ok());
    }
}
