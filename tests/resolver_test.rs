//! Integration tests for snapshot resolution against a mock archive.

use std::sync::Arc;
use std::time::Duration;

use url::Url;
use wayback_site_restorer::config::Config;
use wayback_site_restorer::error::ArchiveError;
use wayback_site_restorer::wayback::{FetchMode, SnapshotResolver, WaybackClient};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resolver_for(server: &MockServer) -> SnapshotResolver {
    let config = Config {
        archive_base_url: server.uri(),
        ..Config::for_testing()
    };
    let client = Arc::new(WaybackClient::new(&config).expect("Failed to create client"));
    SnapshotResolver::new(client, config.max_redirects)
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[tokio::test]
async fn test_direct_capture() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/web/20010101000000im_/http://s.org/a.gif"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"GIF89a".to_vec(), "image/gif"))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = resolver_for(&server)
        .resolve(&url("http://s.org/a.gif"), "20010101000000", FetchMode::Image)
        .await
        .unwrap();

    assert_eq!(snapshot.bytes, b"GIF89a");
    assert_eq!(snapshot.timestamp, "20010101000000");
}

#[tokio::test]
async fn test_redirect_chain_mapped_back_into_archive() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/web/20010101000000id_/http://s.org/old.html"))
        .respond_with(ResponseTemplate::new(302).insert_header(
            "Location",
            format!("{base}/web/20010102000000/http://s.org/moved.html").as_str(),
        ))
        .mount(&server)
        .await;
    // Points at the live web; must be fetched from the archive instead.
    Mock::given(method("GET"))
        .and(path("/web/20010102000000/http://s.org/moved.html"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "http://s.org/final.html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/web/20010101000000id_/http://s.org/final.html"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"<p>final</p>".to_vec(), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = resolver_for(&server)
        .resolve(&url("http://s.org/old.html"), "20010101000000", FetchMode::Identity)
        .await
        .unwrap();

    assert_eq!(snapshot.bytes, b"<p>final</p>");
    assert!(snapshot.address.ends_with("/web/20010101000000id_/http://s.org/final.html"));
}

#[tokio::test]
async fn test_redirect_bound_exceeded() {
    let server = MockServer::start().await;

    // A loop between two captures never settles.
    Mock::given(method("GET"))
        .and(path("/web/20010101000000id_/http://s.org/a.html"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "http://s.org/b.html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/web/20010101000000id_/http://s.org/b.html"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "http://s.org/a.html"),
        )
        .mount(&server)
        .await;

    let err = resolver_for(&server)
        .resolve(&url("http://s.org/a.html"), "20010101000000", FetchMode::Identity)
        .await
        .unwrap_err();

    match err {
        ArchiveError::SnapshotUnavailable { reason, .. } => {
            assert!(reason.contains("redirects"), "unexpected reason: {reason}");
        }
        other => panic!("expected SnapshotUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_falls_back_to_closest_capture() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/web/20010101000000im_/http://s.org/a.gif"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .and(query_param("url", "http://s.org/a.gif"))
        .and(query_param("closest", "20010101000000"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"[["urlkey","timestamp","original","mimetype","statuscode","digest","length"],
                ["org,s)/a.gif","20030505101010","http://s.org/a.gif","image/gif","200","ABC","6"]]"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/web/20030505101010im_/http://s.org/a.gif"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"GIF89a".to_vec(), "image/gif"))
        .mount(&server)
        .await;

    let snapshot = resolver_for(&server)
        .resolve(&url("http://s.org/a.gif"), "20010101000000", FetchMode::Image)
        .await
        .unwrap();

    assert_eq!(snapshot.timestamp, "20030505101010");
    assert_eq!(snapshot.bytes, b"GIF89a");
}

#[tokio::test]
async fn test_no_capture_anywhere() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("[]", "application/json"))
        .mount(&server)
        .await;

    let err = resolver_for(&server)
        .resolve(&url("http://s.org/gone.gif"), "20010101000000", FetchMode::Image)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::SnapshotUnavailable { .. }));
}

#[tokio::test]
async fn test_html_served_for_image_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/web/20010101000000im_/http://s.org/a.gif"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html>Wayback Machine</html>", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let err = resolver_for(&server)
        .resolve(&url("http://s.org/a.gif"), "20010101000000", FetchMode::Image)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::SnapshotUnavailable { .. }));
}

#[tokio::test]
async fn test_rate_limit_backoff_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/web/20010101000000id_/http://s.org/s.css"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/web/20010101000000id_/http://s.org/s.css"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("body{}", "text/css"))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = resolver_for(&server)
        .resolve(&url("http://s.org/s.css"), "20010101000000", FetchMode::Identity)
        .await
        .unwrap();

    assert_eq!(snapshot.bytes, b"body{}");
}

#[tokio::test]
async fn test_persistent_rate_limit_surfaces() {
    let server = MockServer::start().await;
    // Initial attempt plus two retries from the test configuration.
    Mock::given(method("GET"))
        .and(path("/web/20010101000000id_/http://s.org/s.css"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let err = resolver_for(&server)
        .resolve(&url("http://s.org/s.css"), "20010101000000", FetchMode::Identity)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::RateLimited { .. }));
}

#[tokio::test]
async fn test_timeouts_retried_then_closest_capture_used() {
    let server = MockServer::start().await;
    // transport_retries = 1: the slow address is tried twice.
    Mock::given(method("GET"))
        .and(path("/web/20010101000000im_/http://s.org/a.gif"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"GIF89a".to_vec(), "image/gif")
                .set_delay(Duration::from_secs(5)),
        )
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .and(query_param("closest", "20010101000000"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"[["urlkey","timestamp","original","mimetype","statuscode","digest","length"],
                ["org,s)/a.gif","20020202000000","http://s.org/a.gif","image/gif","200","ABC","6"]]"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/web/20020202000000im_/http://s.org/a.gif"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"GIF89a".to_vec(), "image/gif"))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        archive_base_url: server.uri(),
        request_timeout: Duration::from_millis(200),
        ..Config::for_testing()
    };
    let client = Arc::new(WaybackClient::new(&config).unwrap());
    let snapshot = SnapshotResolver::new(client, config.max_redirects)
        .resolve(&url("http://s.org/a.gif"), "20010101000000", FetchMode::Image)
        .await
        .unwrap();

    assert_eq!(snapshot.timestamp, "20020202000000");
    assert_eq!(snapshot.bytes, b"GIF89a");
}

#[tokio::test]
async fn test_unreachable_archive_is_unavailable() {
    // Bind then release a port so nothing is listening on it.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = Config {
        archive_base_url: format!("http://127.0.0.1:{port}"),
        ..Config::for_testing()
    };
    let client = Arc::new(WaybackClient::new(&config).unwrap());

    let err = SnapshotResolver::new(client, config.max_redirects)
        .resolve(&url("http://s.org/a.gif"), "20010101000000", FetchMode::Image)
        .await
        .unwrap_err();

    match err {
        ArchiveError::SnapshotUnavailable { reason, .. } => {
            assert!(reason.contains("transport failure"), "{reason}");
        }
        other => panic!("expected SnapshotUnavailable, got {other:?}"),
    }
}
