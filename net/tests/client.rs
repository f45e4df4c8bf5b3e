//! Integration tests for the HTTP client: caching, retries, batch modes.

use pagemill_config::Config;
use pagemill_net::HttpClient;
use pagemill_types::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(cache_dir: &std::path::Path) -> Config {
    Config {
        requests_per_second: 1000.0,
        burst_size: 1000,
        timeout: 5,
        max_retries: 2,
        cache_dir: cache_dir.to_path_buf(),
        cache_ttl: 60,
        user_agent: "pagemill-test/0.1".to_string(),
        ..Default::default()
    }
}

fn no_cache_config(cache_dir: &std::path::Path) -> Config {
    Config {
        cache_enabled: false,
        ..test_config(cache_dir)
    }
}

#[tokio::test]
async fn test_cache_hit_issues_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>cached</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&test_config(dir.path())).unwrap();
    let url = format!("{}/page", server.uri());

    let first = client.get(&url, true).await.unwrap();
    let second = client.get(&url, true).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, "<html>cached</html>");
    // The mock's expect(1) is verified when the server drops.
}

#[tokio::test]
async fn test_use_cache_false_bypasses_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("body"))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&test_config(dir.path())).unwrap();
    let url = format!("{}/page", server.uri());

    client.get(&url, false).await.unwrap();
    client.get(&url, false).await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&no_cache_config(dir.path())).unwrap();
    let url = format!("{}/flaky", server.uri());

    let body = client.get(&url, false).await.unwrap();
    assert_eq!(body, "recovered");
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&no_cache_config(dir.path())).unwrap();
    let url = format!("{}/missing", server.uri());

    let err = client.get(&url, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HttpError);
    assert_eq!(err.context_value("status"), Some("404"));
}

#[tokio::test]
async fn test_retry_budget_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // initial attempt + max_retries (2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&no_cache_config(dir.path())).unwrap();
    let url = format!("{}/down", server.uri());

    let err = client.get(&url, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MaxRetriesExceeded);
    assert_eq!(err.context_value("attempts"), Some("3"));
}

#[tokio::test]
async fn test_head_returns_headers() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Type", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&no_cache_config(dir.path())).unwrap();
    let headers = client.head(&format!("{}/page", server.uri())).await.unwrap();
    assert_eq!(
        headers.get("content-type").unwrap(),
        "text/html; charset=utf-8"
    );
}

#[tokio::test]
async fn test_response_over_size_budget_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/huge"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        max_file_size: 1024,
        ..no_cache_config(dir.path())
    };
    let client = HttpClient::new(&config).unwrap();

    let err = client
        .get(&format!("{}/huge", server.uri()), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryLimitExceeded);
}

#[tokio::test]
async fn test_get_many_records_failures_and_continues() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/good"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&no_cache_config(dir.path())).unwrap();
    let urls = vec![
        format!("{}/good", server.uri()),
        format!("{}/bad", server.uri()),
        format!("{}/good", server.uri()),
    ];

    let results = client.get_many(&urls).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].1.as_deref().unwrap(), "ok");
    assert!(results[1].1.is_err());
    assert_eq!(results[2].1.as_deref().unwrap(), "ok");
}

#[tokio::test]
async fn test_get_many_parallel_preserves_input_order() {
    let server = MockServer::start().await;
    for i in 0..6 {
        Mock::given(method("GET"))
            .and(path(format!("/p{i}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("body{i}")))
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&no_cache_config(dir.path())).unwrap();
    let urls: Vec<String> = (0..6).map(|i| format!("{}/p{i}", server.uri())).collect();

    let results = client.get_many_parallel(&urls, Some(2), None).await;
    assert_eq!(results.len(), 6);
    for (i, (url, body)) in results.iter().enumerate() {
        assert_eq!(url, &urls[i]);
        assert_eq!(body.as_deref().unwrap(), format!("body{i}"));
    }
}

#[tokio::test]
async fn test_get_many_parallel_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = HttpClient::new(&no_cache_config(dir.path())).unwrap();
    let urls: Vec<String> = (0..4).map(|i| format!("{}/x{i}", server.uri())).collect();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_cb = Arc::clone(&calls);
    let progress: pagemill_net::ProgressFn = Arc::new(move |done, total| {
        assert!(done <= total);
        assert_eq!(total, 4);
        calls_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    client.get_many_parallel(&urls, None, Some(progress)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}
