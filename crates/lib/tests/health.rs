//! Integration test: start the health endpoint on a free port, GET /, assert the JSON.
//! Does not require Mattermost or kubectl.

use kgate::gateway::{serve_health, HealthState};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

#[tokio::test]
async fn health_responds_and_stops_on_shutdown() {
    let port = free_port();
    let state = HealthState {
        bot_name: "kgate-test".to_string(),
        in_flight: Arc::new(AtomicUsize::new(2)),
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(async move { serve_health("127.0.0.1", port, state, shutdown_rx).await });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    let mut body = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                body = Some(resp.json::<serde_json::Value>().await.expect("parse JSON"));
                break;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let Some(json) = body else {
        server.abort();
        panic!("GET {} did not return health JSON within 5s; last error: {:?}", url, last_err);
    };
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("bot").and_then(|v| v.as_str()), Some("kgate-test"));
    assert_eq!(json.get("inFlight").and_then(|v| v.as_u64()), Some(2));

    drop(client);
    shutdown_tx.send(true).expect("server still listening");
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stops after shutdown")
        .expect("server task not panicked");
    assert!(result.is_ok());
}
