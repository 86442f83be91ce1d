//! Transport tests against real endpoints and processes

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use supermcp_client::config::ServiceSettings;
use supermcp_client::core::client::{ClientConfig, ClientStatus, TransportKind};
use supermcp_client::core::service::ClientService;
use supermcp_client::transport::sse::SseTransport;
use supermcp_client::transport::traits::Transport;
use supermcp_client::utils::errors::McpError;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn event_stream(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

fn timeouts() -> (Duration, Duration) {
    (Duration::from_secs(5), Duration::from_secs(5))
}

fn remote_settings() -> ServiceSettings {
    ServiceSettings {
        connect_timeout_seconds: 5,
        request_timeout_seconds: 5,
        shutdown_grace_seconds: 2,
        ..ServiceSettings::default()
    }
}

/// Replies of a small MCP server exposing `list_dir`; `None` for notifications
fn mcp_reply(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request["method"].as_str() {
        Some("initialize") => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "remote", "version": "0.1"}
        }),
        Some("tools/list") => json!({
            "tools": [{"name": "list_dir", "inputSchema": {"type": "object"}}]
        }),
        Some("tools/call") => json!({
            "content": [{
                "type": "text",
                "text": format!("listed {}", request["params"]["arguments"]["path"].as_str().unwrap_or("?"))
            }]
        }),
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("unknown method {:?}", other)}
            }))
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

/// Connect, list, call and disconnect one streaming-endpoint client
async fn exercise_remote_client(url: String) {
    let service = ClientService::new(remote_settings());
    service
        .add_client(
            "remote",
            ClientConfig::new("Remote", TransportKind::StreamingEndpoint).param("url", url),
        )
        .await
        .unwrap();

    service.connect_client("remote").await.unwrap();
    assert_eq!(
        service.get_client("remote").unwrap().status,
        ClientStatus::Connected
    );

    let tools = service.get_client_tools("remote").await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "list_dir");

    let result = service
        .call_tool("remote", "list_dir", json!({"path": "/tmp"}))
        .await
        .unwrap();
    assert_eq!(result.content[0]["text"], "listed /tmp");

    service.disconnect_client("remote").await.unwrap();
    assert!(!service.has_session("remote"));
    assert_eq!(
        service.get_client("remote").unwrap().status,
        ClientStatus::Disconnected
    );
}

async fn spawn_websocket_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let request: Value = serde_json::from_str(text.as_str()).unwrap();
            if let Some(reply) = mcp_reply(&request) {
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    });
    format!("ws://{}/mcp", addr)
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let url = spawn_websocket_server().await;
    exercise_remote_client(url).await;
}

/// SSE MCP server on a raw socket. `GET /sse` streams the endpoint event and
/// a server `ping`; each POST is answered on that stream. Client replies are
/// acknowledged only after `ack_delay`.
struct SseServer {
    url: String,
    pong_received: Arc<AtomicBool>,
}

type EventQueue = Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>;

async fn spawn_sse_server(ack_delay: Duration) -> SseServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events_tx, events_rx) = mpsc::unbounded_channel::<String>();
    let events_rx: EventQueue = Arc::new(Mutex::new(Some(events_rx)));
    let pong_received = Arc::new(AtomicBool::new(false));

    let pong = pong_received.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle_sse_connection(
                stream,
                events_tx.clone(),
                events_rx.clone(),
                pong.clone(),
                ack_delay,
            ));
        }
    });

    SseServer {
        url: format!("http://{}/sse", addr),
        pong_received,
    }
}

async fn handle_sse_connection(
    stream: TcpStream,
    events_tx: mpsc::UnboundedSender<String>,
    events_rx: EventQueue,
    pong_received: Arc<AtomicBool>,
    ack_delay: Duration,
) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.unwrap();

    let mut content_length = 0;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).await.unwrap();
        if header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap();
            }
        }
    }

    if request_line.starts_with("GET") {
        let Some(mut events) = events_rx.lock().await.take() else {
            return;
        };
        let stream = reader.get_mut();
        let head = concat!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\n\r\n",
            "event: endpoint\ndata: /messages?session_id=1\n\n",
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":\"srv-ping\",\"method\":\"ping\"}\n\n",
        );
        if stream.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        while let Some(data) = events.recv().await {
            let event = format!("event: message\ndata: {}\n\n", data);
            if stream.write_all(event.as_bytes()).await.is_err() {
                break;
            }
        }
        return;
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await.unwrap();
    let message: Value = serde_json::from_slice(&body).unwrap();

    if message.get("method").is_none() {
        if message["id"] == "srv-ping" {
            pong_received.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(ack_delay).await;
    } else if let Some(reply) = mcp_reply(&message) {
        let _ = events_tx.send(reply.to_string());
    }

    let _ = reader
        .get_mut()
        .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
        .await;
}

async fn became_true(flag: &AtomicBool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !flag.load(Ordering::SeqCst) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    flag.load(Ordering::SeqCst)
}

#[tokio::test]
async fn test_sse_round_trip() {
    let server = spawn_sse_server(Duration::ZERO).await;
    exercise_remote_client(server.url).await;
    assert!(became_true(&server.pong_received).await);
}

#[tokio::test]
async fn test_sse_slow_reply_post_does_not_stall_stream() {
    let server = spawn_sse_server(Duration::from_secs(5)).await;
    let service = ClientService::new(remote_settings());
    service
        .add_client(
            "remote",
            ClientConfig::new("Remote", TransportKind::StreamingEndpoint)
                .param("url", server.url.clone()),
        )
        .await
        .unwrap();

    let started = Instant::now();
    service.connect_client("remote").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(became_true(&server.pong_received).await);

    let result = service
        .call_tool("remote", "list_dir", json!({"path": "/srv"}))
        .await
        .unwrap();
    assert_eq!(result.content[0]["text"], "listed /srv");
}

#[tokio::test]
async fn test_sse_resolves_endpoint_event() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sse"))
        .respond_with(event_stream(
            "event: endpoint\ndata: /messages?session_id=abc\n\n",
        ))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/sse", server.uri())).unwrap();
    let (connect, request) = timeouts();
    let transport = SseTransport::connect(url, &HashMap::new(), connect, request)
        .await
        .unwrap();

    assert_eq!(
        transport.post_url().as_str(),
        format!("{}/messages?session_id=abc", server.uri())
    );
    transport.close().await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_sse_sends_configured_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sse"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(event_stream("event: endpoint\ndata: /messages\n\n"))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/sse", server.uri())).unwrap();
    let mut headers = HashMap::new();
    headers.insert("Authorization".to_string(), "Bearer secret".to_string());
    let (connect, request) = timeouts();

    let transport = SseTransport::connect(url, &headers, connect, request).await;
    assert!(transport.is_ok());
}

#[tokio::test]
async fn test_sse_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/sse", server.uri())).unwrap();
    let (connect, request) = timeouts();
    let err = SseTransport::connect(url, &HashMap::new(), connect, request)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, McpError::TransportError(ref msg) if msg.contains("404")));
}

#[tokio::test]
async fn test_sse_stream_without_endpoint_event() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(event_stream("data: hello\n\n"))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/sse", server.uri())).unwrap();
    let (connect, request) = timeouts();
    let err = SseTransport::connect(url, &HashMap::new(), connect, request)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, McpError::TransportError(_)));
}

#[tokio::test]
async fn test_streaming_client_against_missing_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let service = ClientService::new(ServiceSettings::default());
    service
        .add_client(
            "remote",
            ClientConfig::new("Remote", TransportKind::StreamingEndpoint)
                .param("url", format!("{}/sse", server.uri())),
        )
        .await
        .unwrap();

    let err = service.connect_client("remote").await.unwrap_err();
    assert!(matches!(err, McpError::SpawnFailure(_)));

    let record = service.get_client("remote").unwrap();
    assert_eq!(record.status, ClientStatus::Error);
    assert!(record.last_error.unwrap().contains("404"));
    assert!(!service.has_session("remote"));
}

#[tokio::test]
async fn test_streaming_client_rejects_unknown_scheme() {
    let service = ClientService::new(ServiceSettings::default());
    service
        .add_client(
            "ftp",
            ClientConfig::new("Ftp", TransportKind::StreamingEndpoint)
                .param("url", "ftp://example.com/mcp"),
        )
        .await
        .unwrap();

    let err = service.connect_client("ftp").await.unwrap_err();
    assert!(matches!(err, McpError::InvalidParameter { .. }));
}

/// A stdio MCP server in plain `sh`: pings the client once, then answers
/// initialize, tools/list and one tools/call by their sequential ids.
#[cfg(unix)]
const SCRIPTED_SERVER: &str = r#"
read -r _init
echo '{"jsonrpc":"2.0","id":"srv-1","method":"ping"}'
read -r _pong
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh","version":"0.1"}}}'
read -r _initialized
read -r _list
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}'
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"list_dir","description":"List a directory","inputSchema":{"type":"object"}}]}}'
read -r _call
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"a.txt"}]}}'
cat > /dev/null
"#;

#[cfg(unix)]
#[tokio::test]
async fn test_local_process_end_to_end() {
    let service = ClientService::new(ServiceSettings {
        connect_timeout_seconds: 5,
        request_timeout_seconds: 5,
        shutdown_grace_seconds: 2,
        ..ServiceSettings::default()
    });
    service
        .add_client(
            "sh",
            ClientConfig::new("Scripted", TransportKind::LocalProcess)
                .param("command", "sh")
                .param("args", json!(["-c", SCRIPTED_SERVER])),
        )
        .await
        .unwrap();

    service.connect_client("sh").await.unwrap();
    assert!(service.has_process("sh"));

    let tools = service.get_client_tools("sh").await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "list_dir");
    assert_eq!(tools[0].description.as_deref(), Some("List a directory"));

    let result = service
        .call_tool("sh", "list_dir", json!({"path": "/tmp"}))
        .await
        .unwrap();
    assert_eq!(result.content[0]["text"], "a.txt");

    service.disconnect_client("sh").await.unwrap();
    assert!(!service.has_process("sh"));
    assert!(!service.has_session("sh"));
    assert_eq!(
        service.get_client("sh").unwrap().status,
        ClientStatus::Disconnected
    );
}

#[cfg(unix)]
async fn connect_scripted(service: &ClientService, id: &str, script: &str) -> Result<(), McpError> {
    service
        .add_client(
            id,
            ClientConfig::new("Scripted", TransportKind::LocalProcess)
                .param("command", "sh")
                .param("args", json!(["-c", script])),
        )
        .await
        .unwrap();
    service.connect_client(id).await
}

/// Logs one 70 000 byte stderr line, then keeps logging while it serves.
#[cfg(unix)]
const LONG_STDERR_SERVER: &str = r#"
read -r _init
head -c 70000 /dev/zero | tr '\0' x >&2
echo >&2
sleep 0.2
echo 'log line' >&2
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh","version":"0.1"}}}'
read -r _initialized
read -r _list
echo 'listing' >&2
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"list_dir","inputSchema":{"type":"object"}}]}}'
cat > /dev/null
"#;

#[cfg(unix)]
#[tokio::test]
async fn test_long_stderr_line_does_not_kill_server() {
    let service = ClientService::new(remote_settings());
    connect_scripted(&service, "noisy", LONG_STDERR_SERVER)
        .await
        .unwrap();

    let record = service.get_client("noisy").unwrap();
    assert_eq!(record.status, ClientStatus::Connected);
    assert_eq!(record.tools.len(), 1);
    assert!(service.has_process("noisy"));
    service.disconnect_client("noisy").await.unwrap();
}

/// Writes a stdout line over the 16 MiB message cap before each of two replies.
#[cfg(unix)]
const OVERSIZED_STDOUT_SERVER: &str = r#"
read -r _init
head -c 17000000 /dev/zero | tr '\0' x
echo
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh","version":"0.1"}}}'
read -r _initialized
read -r _list
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"list_dir","inputSchema":{"type":"object"}}]}}'
read -r _call
head -c 17000000 /dev/zero | tr '\0' x
echo
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"a.txt"}]}}'
cat > /dev/null
"#;

#[cfg(unix)]
#[tokio::test]
async fn test_oversized_message_is_skipped() {
    let service = ClientService::new(remote_settings());
    connect_scripted(&service, "big", OVERSIZED_STDOUT_SERVER)
        .await
        .unwrap();
    assert_eq!(
        service.get_client("big").unwrap().status,
        ClientStatus::Connected
    );

    let result = service
        .call_tool("big", "list_dir", json!({"path": "/tmp"}))
        .await
        .unwrap();
    assert_eq!(result.content[0]["text"], "a.txt");
    assert!(service.has_session("big"));
    service.disconnect_client("big").await.unwrap();
}
