//! End-to-end broker tests: real listeners, a scripted agent over TCP,
//! and reqwest on the public side.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};

use burrow_broker::{AgentRegistry, HttpFrontend, RequestTracker, TunnelListener};
use burrow_protocol::{
    decode_envelope, encode_envelope, read_frame, write_frame, Envelope, Headers,
    RequestEnvelope, ResponseEnvelope, DEFAULT_MAX_FRAME_BYTES,
};

const MAX: usize = DEFAULT_MAX_FRAME_BYTES;

struct TestBroker {
    http_url: String,
    tunnel_addr: String,
    registry: Arc<AgentRegistry>,
    tracker: Arc<RequestTracker>,
}

async fn start_broker(request_timeout: Duration) -> TestBroker {
    let registry = Arc::new(AgentRegistry::new(MAX));
    let tracker = Arc::new(RequestTracker::new());

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tunnel_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_url = format!("http://{}", http_listener.local_addr().unwrap());
    let tunnel_addr = tunnel_listener.local_addr().unwrap().to_string();

    let frontend = Arc::new(HttpFrontend::new(
        Arc::clone(&registry),
        Arc::clone(&tracker),
        request_timeout,
    ));
    let tunnel = Arc::new(TunnelListener::new(
        Arc::clone(&registry),
        Arc::clone(&tracker),
        MAX,
    ));
    tokio::spawn(frontend.run(http_listener, None));
    tokio::spawn(tunnel.run(tunnel_listener, None));

    TestBroker {
        http_url,
        tunnel_addr,
        registry,
        tracker,
    }
}

async fn wait_for_agents(broker: &TestBroker, count: usize) {
    for _ in 0..200 {
        if broker.registry.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} registered agents, have {}", broker.registry.len());
}

fn decode_request(payload: &[u8]) -> RequestEnvelope {
    match decode_envelope(payload).unwrap() {
        Envelope::Request(req) => req,
        other => panic!("agent expected a request envelope, got {other:?}"),
    }
}

fn echo_response(req: &RequestEnvelope) -> ResponseEnvelope {
    let mut headers = Headers::new();
    headers.append("content-type", "text/plain");
    ResponseEnvelope {
        agent_id: req.agent_id.clone(),
        request_id: req.request_id.clone(),
        status_code: 200,
        headers,
        body: Bytes::from(format!("echo:{}", req.url)),
    }
}

/// Scripted agent: answer every request with an echo of its URL.
async fn spawn_echo_agent(tunnel_addr: &str) {
    let mut socket = TcpStream::connect(tunnel_addr).await.unwrap();
    tokio::spawn(async move {
        loop {
            let payload = match read_frame(&mut socket, MAX).await {
                Ok(p) => p,
                Err(_) => return,
            };
            let req = decode_request(&payload);
            let frame = encode_envelope(&Envelope::Response(echo_response(&req))).unwrap();
            write_frame(&mut socket, &frame, MAX).await.unwrap();
        }
    });
}

#[tokio::test]
async fn happy_path_roundtrip() {
    let broker = start_broker(Duration::from_secs(5)).await;
    spawn_echo_agent(&broker.tunnel_addr).await;
    wait_for_agents(&broker, 1).await;

    let response = reqwest::Client::new()
        .post(format!("{}/hello?x=1", broker.http_url))
        .body("request body")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert_eq!(response.text().await.unwrap(), "echo:/hello?x=1");
    assert!(broker.tracker.is_empty());
}

#[tokio::test]
async fn no_agents_yields_503() {
    let broker = start_broker(Duration::from_secs(1)).await;

    let response = reqwest::get(format!("{}/x", broker.http_url)).await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "No clients available");
}

#[tokio::test]
async fn agent_disconnect_mid_flight_yields_503() {
    let broker = start_broker(Duration::from_secs(5)).await;

    // Agent that swallows one request and dies without answering.
    let mut socket = TcpStream::connect(&broker.tunnel_addr).await.unwrap();
    tokio::spawn(async move {
        let _ = read_frame(&mut socket, MAX).await.unwrap();
        drop(socket);
    });
    wait_for_agents(&broker, 1).await;

    let response = reqwest::get(format!("{}/slow", broker.http_url)).await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "Client disconnected");

    wait_for_agents(&broker, 0).await;
    assert!(broker.tracker.is_empty());
}

#[tokio::test]
async fn timeout_yields_504_and_late_response_is_dropped() {
    let broker = start_broker(Duration::from_millis(200)).await;

    let mut socket = TcpStream::connect(&broker.tunnel_addr).await.unwrap();
    let (request_tx, request_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let payload = read_frame(&mut socket, MAX).await.unwrap();
        let req = decode_request(&payload);
        // Sit on the request until well past the deadline.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let frame = encode_envelope(&Envelope::Response(echo_response(&req))).unwrap();
        write_frame(&mut socket, &frame, MAX).await.unwrap();
        let _ = request_tx.send(());
        // Keep the socket open so the late write is actually delivered.
        tokio::time::sleep(Duration::from_millis(300)).await;
    });
    wait_for_agents(&broker, 1).await;

    let response = reqwest::get(format!("{}/never", broker.http_url)).await.unwrap();
    assert_eq!(response.status(), 504);
    assert_eq!(response.text().await.unwrap(), "Timeout");
    assert!(broker.tracker.is_empty());

    // The late response must be discarded without disturbing the agent
    // connection or the tracker.
    request_rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.registry.len(), 1);
    assert!(broker.tracker.is_empty());
}

#[tokio::test]
async fn concurrent_requests_do_not_bleed() {
    const IN_FLIGHT: usize = 8;

    let broker = start_broker(Duration::from_secs(5)).await;

    // Agent that buffers every request, then answers in reverse order so
    // correlation cannot hide behind FIFO luck.
    let mut socket = TcpStream::connect(&broker.tunnel_addr).await.unwrap();
    tokio::spawn(async move {
        let mut requests = Vec::with_capacity(IN_FLIGHT);
        for _ in 0..IN_FLIGHT {
            let payload = read_frame(&mut socket, MAX).await.unwrap();
            requests.push(decode_request(&payload));
        }
        for req in requests.iter().rev() {
            let frame = encode_envelope(&Envelope::Response(echo_response(req))).unwrap();
            write_frame(&mut socket, &frame, MAX).await.unwrap();
        }
    });
    wait_for_agents(&broker, 1).await;

    let client = reqwest::Client::new();
    let mut handles = Vec::new();
    for i in 0..IN_FLIGHT {
        let client = client.clone();
        let url = format!("{}/item/{i}", broker.http_url);
        handles.push(tokio::spawn(async move {
            let response = client.get(url).send().await.unwrap();
            (i, response.status().as_u16(), response.text().await.unwrap())
        }));
    }

    for handle in handles {
        let (i, status, body) = handle.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, format!("echo:/item/{i}"));
    }
    assert!(broker.tracker.is_empty());
}
