//! HTTP-level tests for the source reader, validator and pooled fetcher,
//! using wiremock servers as directory pages and as forward proxies.

use std::sync::Arc;
use std::time::Duration;

use a3s_proxy_pool::{
    CandidateSource, Endpoint, FetchPolicy, HttpSource, HttpValidator, JitterPolicy, PageFetcher,
    PoolConfig, PoolError, ProxiedFetcher, ProxyPool, Validator,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIRECTORY_PAGE: &str = r#"<html><body>
<table class="table">
  <thead><tr><th>IP</th><th>PORT</th><th>匿名度</th></tr></thead>
  <tbody>
    <tr><td data-title="IP">121.230.8.45</td><td data-title="PORT">3256</td><td>高匿名</td></tr>
    <tr><td data-title="IP">36.137.70.178</td><td data-title="PORT">7777</td><td>高匿名</td></tr>
    <tr><td data-title="IP">60.205.132.71</td><td data-title="PORT">80</td><td>透明</td></tr>
  </tbody>
</table>
</body></html>"#;

fn source() -> HttpSource {
    HttpSource::new(Duration::from_secs(5), "test-agent").unwrap()
}

fn endpoint_of(server: &MockServer) -> Endpoint {
    server.uri().parse().unwrap()
}

/// A pool with no maintenance task; endpoints are inserted by hand.
fn manual_pool() -> Arc<ProxyPool> {
    let config = PoolConfig {
        sources: vec![],
        ..Default::default()
    };
    Arc::new(ProxyPool::new(config).unwrap())
}

fn quick_policy() -> FetchPolicy {
    FetchPolicy {
        max_attempts: 2,
        checkout_timeout: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
        backoff: JitterPolicy::none(),
        direct_fallback: false,
    }
}

#[tokio::test]
async fn test_source_extracts_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/free/inha/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DIRECTORY_PAGE))
        .mount(&server)
        .await;

    let url = format!("{}/free/inha/", server.uri());
    let candidates = source().fetch_candidates(&url).await;

    assert_eq!(candidates.len(), 6);
    assert_eq!(candidates[0].url(), "http://121.230.8.45:3256");
    assert_eq!(candidates[1].url(), "https://121.230.8.45:3256");
    assert_eq!(candidates[4].url(), "http://60.205.132.71:80");
}

#[tokio::test]
async fn test_source_error_status_yields_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(503).set_body_string(DIRECTORY_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/blocked", server.uri());
    assert!(source().fetch_candidates(&url).await.is_empty());
}

#[tokio::test]
async fn test_source_unreachable_yields_nothing() {
    let candidates = source().fetch_candidates("http://127.0.0.1:9/free").await;
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn test_validator_live_proxy() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/probe"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&proxy)
        .await;

    let validator = HttpValidator::new("http://probe.test/probe", Duration::from_secs(5));
    assert!(validator.is_live(&endpoint_of(&proxy)).await);
}

#[tokio::test]
async fn test_validator_non_200_is_dead() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&proxy)
        .await;

    let validator = HttpValidator::new("http://probe.test/probe", Duration::from_secs(5));
    assert!(!validator.is_live(&endpoint_of(&proxy)).await);
}

#[tokio::test]
async fn test_validator_slow_proxy_is_dead() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&proxy)
        .await;

    let validator = HttpValidator::new("http://probe.test/probe", Duration::from_millis(200));
    assert!(!validator.is_live(&endpoint_of(&proxy)).await);
}

#[tokio::test]
async fn test_proxied_fetch_success_requeues_endpoint() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("chapter one"))
        .mount(&proxy)
        .await;

    let pool = manual_pool();
    let endpoint = endpoint_of(&proxy);
    pool.insert(endpoint.clone()).await;

    let fetcher = ProxiedFetcher::new(Arc::clone(&pool), quick_policy()).unwrap();
    let body = fetcher.fetch("http://novel.test/book/1").await.unwrap();

    assert_eq!(body, "chapter one");
    assert_eq!(pool.size(), 1);
    assert!(pool.store().is_known(&endpoint).await);
}

#[tokio::test]
async fn test_proxied_fetch_failure_evicts_endpoint() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&proxy)
        .await;

    let pool = manual_pool();
    let endpoint = endpoint_of(&proxy);
    pool.insert(endpoint.clone()).await;

    let fetcher = ProxiedFetcher::new(Arc::clone(&pool), quick_policy()).unwrap();
    let result = fetcher.fetch("http://novel.test/book/1").await;

    assert!(matches!(result, Err(PoolError::PoolExhausted(2))));
    assert!(!pool.store().is_known(&endpoint).await);
    assert_eq!(pool.size(), 0);
}

#[tokio::test]
async fn test_proxied_fetch_falls_back_to_direct() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weibo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("direct body"))
        .expect(1)
        .mount(&origin)
        .await;

    let policy = FetchPolicy {
        direct_fallback: true,
        ..quick_policy()
    };
    let fetcher = ProxiedFetcher::new(manual_pool(), policy).unwrap();
    let body = fetcher.fetch(&format!("{}/weibo", origin.uri())).await.unwrap();
    assert_eq!(body, "direct body");
}
