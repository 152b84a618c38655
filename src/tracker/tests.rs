use super::*;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn registration(name: &str, port: u16, blocks: &[BlockId]) -> Registration {
    Registration::new(
        PeerId::from(name),
        addr(port),
        &blocks.iter().copied().collect(),
    )
}

#[test]
fn test_registration_wire_names() {
    let json = serde_json::to_value(registration("peer_001", 8001, &[1, 2])).unwrap();
    assert_eq!(json["peer_id"], "peer_001");
    assert_eq!(json["ip"], "127.0.0.1");
    assert_eq!(json["porta"], 8001);
    assert_eq!(json["blocks"], serde_json::json!([1, 2]));
}

#[test]
fn test_parse_register_response() {
    let body = r#"{
        "message": "Peer registrado com sucesso!",
        "peers": [
            {"peer_id": "peer_001", "ip": "127.0.0.1", "porta": 8001, "blocks": [0, 3]},
            {"peer_id": "peer_002", "ip": "10.0.0.2", "porta": 8002}
        ],
        "blocos_iniciais": [0, 3]
    }"#;
    let response: RegisterResponse = serde_json::from_str(body).unwrap();
    assert_eq!(response.initial_blocks, vec![0, 3]);
    assert_eq!(response.peers.len(), 2);
    assert_eq!(response.peers[0].addr(), addr(8001));
    assert!(response.peers[1].blocks.is_empty());
}

#[test]
fn test_parse_peer_list_without_peers() {
    let response: PeerListResponse = serde_json::from_str("{}").unwrap();
    assert!(response.peers.is_empty());
}

#[test]
fn test_http_tracker_rejects_bad_url() {
    assert!(matches!(
        HttpTracker::new("udp://tracker:5000"),
        Err(TrackerError::InvalidUrl(_))
    ));
    let tracker = HttpTracker::new("http://127.0.0.1:5000/").unwrap();
    assert_eq!(tracker.url(), "http://127.0.0.1:5000");
}

/// Serves one canned HTTP response and hands back the raw request.
async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + content_length {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        let _ = tx.send(String::from_utf8_lossy(&request).to_string());
    });

    (url, rx)
}

#[tokio::test]
async fn test_http_register() {
    let (url, request) = serve_once(
        "200 OK",
        r#"{"message":"ok","peers":[{"peer_id":"peer_009","ip":"127.0.0.1","porta":9009,"blocks":[4]}],"blocos_iniciais":[1,2]}"#,
    )
    .await;

    let tracker = HttpTracker::new(&url).unwrap();
    let response = tracker
        .register(&registration("peer_001", 8001, &[]))
        .await
        .unwrap();
    assert_eq!(response.initial_blocks, vec![1, 2]);
    assert_eq!(response.peers[0].peer_id, PeerId::from("peer_009"));

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /registrar_peer "));
    assert!(request.contains(r#""porta":8001"#));
}

#[tokio::test]
async fn test_http_refresh_reports_inventory() {
    let (url, request) = serve_once("200 OK", r#"{"peers":[]}"#).await;

    let tracker = HttpTracker::new(&url).unwrap();
    let response = tracker
        .refresh(&PeerId::from("peer_001"), &[0, 5])
        .await
        .unwrap();
    assert!(response.peers.is_empty());

    let request = request.await.unwrap();
    assert!(request.starts_with("GET /listar_peers?peer_id=peer_001 "));
    assert!(request.contains(r#"{"blocks":[0,5]}"#));
}

#[tokio::test]
async fn test_http_deregister_unknown() {
    let (url, _request) = serve_once("404 Not Found", r#"{"message":"not found"}"#).await;

    let tracker = HttpTracker::new(&url).unwrap();
    let err = tracker
        .deregister(&PeerId::from("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::UnknownPeer(_)));
}

#[tokio::test]
async fn test_http_error_status() {
    let (url, _request) = serve_once("500 Internal Server Error", "{}").await;

    let tracker = HttpTracker::new(&url).unwrap();
    let err = tracker
        .register(&registration("peer_001", 8001, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Status(500)));
}

#[tokio::test]
async fn test_local_register_grants_once() {
    let tracker = LocalTracker::new();
    tracker.grant("peer_001", [0, 1]);

    let first = tracker
        .register(&registration("peer_001", 8001, &[5]))
        .await
        .unwrap();
    assert_eq!(first.initial_blocks, vec![0, 1]);
    assert_eq!(first.peers.len(), 1);
    assert_eq!(first.peers[0].blocks, vec![0, 1, 5]);

    let again = tracker
        .register(&registration("peer_001", 8001, &[0, 1, 5, 6]))
        .await
        .unwrap();
    assert!(again.initial_blocks.is_empty());
    assert_eq!(
        tracker.blocks_of(&PeerId::from("peer_001")),
        Some([0, 1, 5, 6].into_iter().collect())
    );
}

#[tokio::test]
async fn test_local_refresh_excludes_requester() {
    let tracker = LocalTracker::new();
    tracker
        .register(&registration("peer_001", 8001, &[]))
        .await
        .unwrap();
    tracker
        .register(&registration("peer_002", 8002, &[3]))
        .await
        .unwrap();

    let list = tracker
        .refresh(&PeerId::from("peer_001"), &[7])
        .await
        .unwrap();
    assert_eq!(list.peers.len(), 1);
    assert_eq!(list.peers[0].peer_id, PeerId::from("peer_002"));
    assert_eq!(list.peers[0].addr(), addr(8002));
    assert_eq!(
        tracker.blocks_of(&PeerId::from("peer_001")),
        Some(BTreeSet::from([7]))
    );
}

#[tokio::test]
async fn test_local_expires_silent_peers() {
    let tracker = LocalTracker::new().with_peer_timeout(Duration::from_millis(50));
    tracker
        .register(&registration("quiet", 8001, &[]))
        .await
        .unwrap();
    tracker
        .register(&registration("chatty", 8002, &[]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    let list = tracker.refresh(&PeerId::from("chatty"), &[]).await.unwrap();
    assert!(list.peers.is_empty());
    assert_eq!(tracker.peers().len(), 0);
}

#[tokio::test]
async fn test_local_deregister() {
    let tracker = LocalTracker::new();
    tracker
        .register(&registration("peer_001", 8001, &[]))
        .await
        .unwrap();

    tracker.deregister(&PeerId::from("peer_001")).await.unwrap();
    assert!(tracker.peers().is_empty());
    assert!(matches!(
        tracker.deregister(&PeerId::from("peer_001")).await,
        Err(TrackerError::UnknownPeer(_))
    ));
}

#[tokio::test]
async fn test_local_distribution_share() {
    let tracker = LocalTracker::new().with_distribution(20, Some(7));
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        let response = tracker
            .register(&registration(name, 8001 + i as u16, &[]))
            .await
            .unwrap();
        let granted = response.initial_blocks.len();
        assert!((6..=10).contains(&granted), "granted {granted}");
        assert!(response.initial_blocks.iter().all(|&id| id < 20));
    }
}
