//! AirPlay control client tests
//!
//! Request shapes for /play and /stop, status handling, and /scrub parsing.

use std::time::Duration;

use airstream::api::{ControlClient, ControlError};
use mockito::{Matcher, Server};

const TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Play Tests
// =============================================================================

#[tokio::test]
async fn test_start_stream_sends_play_body() {
    let mut server = Server::new_async().await;
    let media = "http://192.168.1.111:51234/Stairway%20To%20Heaven.mp3";

    let mock = server
        .mock("POST", "/play")
        .match_header("content-type", "text/plain")
        .match_body(Matcher::Exact(format!(
            "Content-Location: {}\nStart-Position: 0.000000\n\n",
            media
        )))
        .with_status(200)
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    tokio_test::assert_ok!(client.start_stream(media).await);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_start_stream_rejects_non_200() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/play")
        .with_status(500)
        .with_body("Internal Server Error")
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    let err = client.start_stream("http://x/y.mp3").await.unwrap_err();

    mock.assert_async().await;
    match err {
        ControlError::BadStatus { operation, status } => {
            assert_eq!(operation, "play");
            assert_eq!(status, 500);
        }
        other => panic!("Expected BadStatus, got {:?}", other),
    }
}

/// Only 200 counts as success, not any 2xx
#[tokio::test]
async fn test_start_stream_rejects_other_success_codes() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("POST", "/play")
        .with_status(204)
        .create_async()
        .await;

    let client = ControlClient::with_base_url(format!("{}/", server.url()), TIMEOUT);
    let err = client.start_stream("http://x/y.mp3").await.unwrap_err();

    assert_eq!(err.status(), Some(204));
}

#[tokio::test]
async fn test_unreachable_receiver_is_transport_error() {
    let client = ControlClient::with_base_url("http://127.0.0.1:9", Duration::from_millis(500));

    let err = client.start_stream("http://x/y.mp3").await.unwrap_err();

    assert!(matches!(err, ControlError::Transport { operation: "play", .. }));
    assert_eq!(err.status(), None);
}

// =============================================================================
// Stop Tests
// =============================================================================

#[tokio::test]
async fn test_stop_stream_posts_empty_body() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/stop")
        .match_body(Matcher::Exact(String::new()))
        .with_status(200)
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    tokio_test::assert_ok!(client.stop_stream().await);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_stop_stream_rejects_non_200() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("POST", "/stop")
        .with_status(404)
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    let err = client.stop_stream().await.unwrap_err();

    assert!(matches!(
        err,
        ControlError::BadStatus {
            operation: "stop",
            status: 404
        }
    ));
}

// =============================================================================
// Scrub Tests
// =============================================================================

#[tokio::test]
async fn test_query_state_parses_scrub() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/scrub")
        .with_status(200)
        .with_header("content-type", "text/parameters")
        .with_body("duration: 10.0\nposition: 9.5\n")
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    let state = client.query_state().await.unwrap();

    mock.assert_async().await;
    assert_eq!(state.get("duration"), Some("10.0"));
    assert_eq!(state.get("position"), Some("9.5"));
    assert_eq!(state.position(), Some(9.5));
    assert_eq!(state.is_finished(), Some(true));
}

#[tokio::test]
async fn test_query_state_handles_crlf_and_extra_keys() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("GET", "/scrub")
        .with_status(200)
        .with_body("duration: 200.000000\r\nposition: 12.250000\r\nrate: 1\r\n")
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    let state = client.query_state().await.unwrap();

    assert_eq!(state.len(), 3);
    assert_eq!(state.get("rate"), Some("1"));
    assert_eq!(state.duration(), Some(200.0));
    assert_eq!(state.is_finished(), Some(false));
}

/// A receiver that has not started yet reports position 0
#[tokio::test]
async fn test_query_state_zero_position_not_finished() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("GET", "/scrub")
        .with_status(200)
        .with_body("duration: 0.000000\nposition: 0.000000\n")
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    let state = client.query_state().await.unwrap();

    assert_eq!(state.is_finished(), Some(false));
}

#[tokio::test]
async fn test_query_state_rejects_non_200() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("GET", "/scrub")
        .with_status(503)
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    let err = client.query_state().await.unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("scrub"));
}

#[tokio::test]
async fn test_query_state_without_position_is_undecided() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("GET", "/scrub")
        .with_status(200)
        .with_body("duration: 10.0\n")
        .create_async()
        .await;

    let client = ControlClient::with_base_url(server.url(), TIMEOUT);
    let state = client.query_state().await.unwrap();

    assert!(state.position().is_none());
    assert!(state.is_finished().is_none());
}
