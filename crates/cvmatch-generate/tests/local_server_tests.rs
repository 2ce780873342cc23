use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use cvmatch_core::config::GenerationSettings;
use cvmatch_core::{GenerativeModelKind, MatchError};
use cvmatch_generate::{generator_for, AnthropicGenerator, LocalChatGenerator};

/// Reads one HTTP/1.1 request (headers plus `Content-Length` body) and returns its request line.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed early");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") { break pos + 4; }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap()))
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 { break; }
        buf.extend_from_slice(&chunk[..n]);
    }
    head.lines().next().unwrap_or_default().to_string()
}

/// Serves each canned `(content_type, body)` to one connection, in order.
async fn serve(responses: Vec<(&'static str, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    tokio::spawn(async move {
        for (content_type, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let line = read_request(&mut socket).await;
            log.lock().unwrap().push(line);
            let head = format!("HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n");
            socket.write_all(head.as_bytes()).await.unwrap();
            // dribble the body so the client sees split chunks
            for piece in body.as_bytes().chunks(7) {
                socket.write_all(piece).await.unwrap();
                socket.flush().await.unwrap();
            }
            socket.shutdown().await.unwrap();
        }
    });
    (format!("http://{addr}/v1"), seen)
}

fn sse(events: &[&str]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
}

#[tokio::test]
async fn local_model_streams_cumulative_partials() {
    let models = r#"{"object":"list","data":[{"id":"TinyLlama-1.1B-Chat-v1.0"}]}"#.to_string();
    let body = sse(&[
        r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"{"choices":[{"delta":{"content":"**Candidate 1**"}}]}"#,
        r#"{"choices":[{"delta":{"content":" is the best fit."}}]}"#,
        "[DONE]",
    ]);
    let (base, seen) = serve(vec![("application/json", models), ("text/event-stream", body)]).await;

    let client = reqwest::Client::new();
    let g = LocalChatGenerator::new(client, "local_tiny_llama", "tinyllama", base, 64, 0.0);
    cvmatch_core::Generator::load_model(&g).await.unwrap();

    let partials = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = partials.clone();
    let on_partial = move |p: &str| sink.lock().unwrap().push(p.to_string());
    let text = cvmatch_core::Generator::generate(&g, "prompt", &on_partial).await.unwrap();

    assert_eq!(text, "**Candidate 1** is the best fit.");
    let partials = partials.lock().unwrap().clone();
    assert_eq!(partials, vec!["**Candidate 1**".to_string(), "**Candidate 1** is the best fit.".to_string()]);
    for pair in partials.windows(2) { assert!(pair[1].starts_with(&pair[0])); }

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen[0], "GET /v1/models HTTP/1.1");
    assert_eq!(seen[1], "POST /v1/chat/completions HTTP/1.1");
}

#[tokio::test]
async fn local_model_missing_from_listing() {
    let models = r#"{"data":[{"id":"mistral-7b"}]}"#.to_string();
    let (base, _) = serve(vec![("application/json", models)]).await;
    let settings = GenerationSettings { local_base_url: base, ..GenerationSettings::default() };
    let g = generator_for(GenerativeModelKind::LocalLlama2Chat, &settings).unwrap();
    let err = g.load_model().await.unwrap_err();
    assert!(matches!(err, MatchError::ModelNotFound(_)), "{err}");
}

#[tokio::test]
async fn unreachable_local_server_is_model_not_found() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let settings = GenerationSettings { local_base_url: format!("http://{addr}/v1"), ..GenerationSettings::default() };
    let g = generator_for(GenerativeModelKind::LocalTinyLlama, &settings).unwrap();
    assert!(matches!(g.load_model().await, Err(MatchError::ModelNotFound(_))));
}

#[tokio::test]
async fn anthropic_stream_against_mock_endpoint() {
    let body = [
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
        "event: ping\ndata: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" world\"}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ]
    .concat();
    let (base, seen) = serve(vec![("text/event-stream", body)]).await;

    std::env::set_var("CVMATCH_TEST_ANTHROPIC_KEY", "test-key");
    let g = AnthropicGenerator::new(reqwest::Client::new(), "claude_haiku", "claude-3-5-haiku-latest", "CVMATCH_TEST_ANTHROPIC_KEY".into(), 32, 0.0)
        .with_url(format!("{base}/messages"));
    cvmatch_core::Generator::load_model(&g).await.unwrap();
    let count = Arc::new(Mutex::new(0usize));
    let c = count.clone();
    let on_partial = move |_: &str| *c.lock().unwrap() += 1;
    let text = cvmatch_core::Generator::generate(&g, "prompt", &on_partial).await.unwrap();
    assert_eq!(text, "Hello world");
    assert_eq!(*count.lock().unwrap(), 2);
    assert_eq!(seen.lock().unwrap()[0], "POST /v1/messages HTTP/1.1");
}
