//! SodaClient against a local HTTP server: throttle handling, fatal
//! statuses and count parsing over a real socket.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use open_data_downloader::downloader::RateController;
use open_data_downloader::fetcher::{FetcherError, PageFetch, PageQuery, SodaClient};
use open_data_downloader::session::{Session, SessionConfig};

/// Serve the scripted `(status, body)` responses, one connection each.
async fn serve(responses: Vec<(u16, String)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }

            let reason = match status {
                200 => "OK",
                403 => "Forbidden",
                429 => "Too Many Requests",
                _ => "Unknown",
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });

    base_url
}

fn client_for(base_url: &str, rate: Arc<RateController>) -> SodaClient {
    let session = Session::connect(SessionConfig::new(base_url)).unwrap();
    SodaClient::new(session, rate)
}

#[tokio::test]
async fn throttle_waits_and_retries_the_same_page() {
    let base_url = serve(vec![
        (429, r#"{"message":"slow down"}"#.to_string()),
        (200, r#"[{"id":"1","value":"a"}]"#.to_string()),
    ])
    .await;

    let rate = Arc::new(RateController::with_limits(8, 2));
    let client = client_for(&base_url, rate.clone());

    let rows = client
        .fetch_page("m9d7-ebf2", 0, 50, &PageQuery::default())
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id").map(String::as_str), Some("1"));
    // One throttle halves the pool once; the success that follows does not
    // restore it.
    assert_eq!(rate.worker_count(), 4);
}

#[tokio::test]
async fn forbidden_status_is_fatal_without_retry() {
    let base_url = serve(vec![(403, r#"{"message":"denied"}"#.to_string())]).await;

    let rate = Arc::new(RateController::with_limits(8, 2));
    let client = client_for(&base_url, rate.clone());

    let err = client
        .fetch_page("m9d7-ebf2", 0, 50, &PageQuery::default())
        .await
        .unwrap_err();

    match err {
        FetcherError::HttpError { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("denied"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // A fatal status is not a throttle; the pool keeps its size.
    assert_eq!(rate.worker_count(), 8);
}

#[tokio::test]
async fn count_is_read_from_the_aggregate_column() {
    let base_url = serve(vec![(200, r#"[{"count_1":"120000"}]"#.to_string())]).await;

    let rate = Arc::new(RateController::with_limits(8, 2));
    let client = client_for(&base_url, rate);

    let total = client
        .count_rows("m9d7-ebf2", &PageQuery::default())
        .await
        .unwrap();
    assert_eq!(total, 120_000);
}
