//! Tests for the OpenAI-compatible client.

use super::client::{OpenAICompatClient, forward_sse, parse_stream_data};
use crate::provider::api_provider::Provider;
use crate::provider::error::Error;
use crate::provider::types::{ChatRequest, Message, StreamEvent};
use bytes::Bytes;
use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn client(provider: Provider) -> OpenAICompatClient {
    OpenAICompatClient::new(
        provider,
        Some("test-key".into()),
        None,
        Duration::from_secs(5),
    )
    .unwrap()
}

fn request(system: Option<&'static str>) -> ChatRequest {
    ChatRequest {
        model: "gpt-4".to_string(),
        messages: Arc::new(vec![Message::user("Analyze this COBOL")]),
        system: system.map(Cow::Borrowed),
        max_tokens: Some(2048),
        temperature: Some(0.0),
    }
}

#[test]
fn test_system_prompt_goes_first() {
    let api_request = client(Provider::OpenAI).build_request_for_test(&request(Some("You are a COBOL Analyst")), false);

    assert_eq!(api_request.messages.len(), 2);
    assert_eq!(api_request.messages[0].role, "system");
    assert_eq!(api_request.messages[0].content, "You are a COBOL Analyst");
    assert_eq!(api_request.messages[1].role, "user");
    assert_eq!(api_request.temperature, Some(0.0));
}

#[test]
fn test_token_limit_field_follows_provider() {
    let openai = client(Provider::OpenAI).build_request_for_test(&request(None), false);
    assert_eq!(openai.max_completion_tokens, Some(2048));
    assert!(openai.max_tokens.is_none());

    let groq = client(Provider::Groq).build_request_for_test(&request(None), true);
    assert_eq!(groq.max_tokens, Some(2048));
    assert!(groq.stream);
}

#[test]
fn test_local_requires_base_url() {
    let result = OpenAICompatClient::new(Provider::Local, None, None, Duration::from_secs(5));
    assert!(matches!(result, Err(Error::MissingBaseUrl(_))));

    let ok = OpenAICompatClient::new(
        Provider::Local,
        None,
        Some("http://127.0.0.1:8080/v1".into()),
        Duration::from_secs(5),
    );
    assert!(ok.is_ok());
}

#[test]
fn test_parse_stream_text_and_usage() {
    let events = parse_stream_data(
        r#"{"choices":[{"index":0,"delta":{"content":"public "},"finish_reason":null}],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#,
    )
    .unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], StreamEvent::TextDelta(t) if t == "public "));
    assert!(matches!(&events[1], StreamEvent::Usage(u) if u.input_tokens == 3));
}

#[test]
fn test_parse_stream_error_payload() {
    let result = parse_stream_data(r#"{"error":{"message":"context_length_exceeded"}}"#);
    assert!(matches!(result, Err(Error::Api(m)) if m == "context_length_exceeded"));
}

#[test]
fn test_parse_stream_garbage_is_skipped() {
    assert!(parse_stream_data("not json").unwrap().is_empty());
}

/// Answer a single request with a canned response; returns the base URL.
fn serve_once(status: u16, headers: &[(&str, &str)], body: &'static str) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let headers: Vec<tiny_http::Header> = headers
        .iter()
        .map(|(k, v)| tiny_http::Header::from_bytes(*k, *v).unwrap())
        .collect();

    std::thread::spawn(move || {
        if let Ok(mut request) = server.recv() {
            let mut ignored = String::new();
            let _ = request.as_reader().read_to_string(&mut ignored);
            let mut response = tiny_http::Response::from_string(body).with_status_code(status);
            for header in headers {
                response = response.with_header(header);
            }
            let _ = request.respond(response);
        }
    });
    format!("http://127.0.0.1:{port}/v1")
}

fn local_client(base_url: String) -> OpenAICompatClient {
    OpenAICompatClient::new(Provider::Local, None, Some(base_url), Duration::from_secs(5)).unwrap()
}

async fn collect_stream(client: &OpenAICompatClient) -> (Result<(), Error>, Vec<StreamEvent>) {
    let (tx, mut rx) = mpsc::channel(100);
    let result = client.stream(request(None), tx).await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

fn streamed_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta(t) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_http_429_is_rate_limited() {
    let url = serve_once(429, &[("Retry-After", "7")], r#"{"error":{"message":"slow down"}}"#);
    let result = local_client(url).complete(request(None)).await;
    assert!(matches!(result, Err(Error::RateLimited { retry_after: Some(7) })));
}

#[tokio::test]
async fn test_http_400_keeps_status_and_message() {
    let url = serve_once(
        400,
        &[("Content-Type", "application/json")],
        r#"{"error":{"message":"This model's maximum context length is 8192 tokens. However, you requested 15002 tokens.","code":"context_length_exceeded"}}"#,
    );
    match local_client(url).complete(request(None)).await {
        Err(Error::Status { status, message }) => {
            assert_eq!(status, 400);
            assert!(message.starts_with("HTTP 400 Bad Request: This model's maximum"));
            assert!(message.ends_with("(code: context_length_exceeded)"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_http_500_on_stream() {
    let url = serve_once(500, &[], "upstream exploded");
    let (result, events) = collect_stream(&local_client(url)).await;
    assert!(matches!(result, Err(Error::Status { status: 500, .. })));
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_complete_over_http() {
    let url = serve_once(
        200,
        &[("Content-Type", "application/json")],
        r#"{"id":"x","model":"local","choices":[{"index":0,"message":{"role":"assistant","content":"public class Payroll {}"},"finish_reason":"stop"}],"usage":{"prompt_tokens":12,"completion_tokens":5}}"#,
    );
    let completion = local_client(url).complete(request(None)).await.unwrap();
    assert_eq!(completion.message.content, "public class Payroll {}");
    assert_eq!(completion.usage.input_tokens, 12);
}

#[tokio::test]
async fn test_stream_over_http() {
    let url = serve_once(
        200,
        &[("Content-Type", "text/event-stream")],
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"// Gehalt in \"}}]}\n\n\
         data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"€\"}}]}\n\n\
         data: [DONE]\n\n",
    );
    let (result, events) = collect_stream(&local_client(url)).await;
    result.unwrap();
    assert_eq!(streamed_text(&events), "// Gehalt in €");
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn test_forward_sse_reassembles_split_characters() {
    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Summe in € für §4\"}}]}\n\ndata: [DONE]\n\n";
    let bytes = body.as_bytes();
    let euro = bytes.iter().position(|&b| b == 0xE2).unwrap();
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::copy_from_slice(&bytes[..euro + 1])),
        Ok(Bytes::copy_from_slice(&bytes[euro + 1..euro + 2])),
        Ok(Bytes::copy_from_slice(&bytes[euro + 2..])),
    ];

    let (tx, mut rx) = mpsc::channel(100);
    forward_sse(futures::stream::iter(chunks), &tx).await.unwrap();
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(streamed_text(&events), "Summe in € für §4");
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn test_forward_sse_flushes_unterminated_event() {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(
        br#"data: {"choices":[{"index":0,"delta":{"content":"STOP RUN."}}]}"#,
    ))];

    let (tx, mut rx) = mpsc::channel(100);
    forward_sse(futures::stream::iter(chunks), &tx).await.unwrap();
    drop(tx);

    assert!(matches!(rx.recv().await, Some(StreamEvent::TextDelta(t)) if t == "STOP RUN."));
    assert!(matches!(rx.recv().await, Some(StreamEvent::Done)));
}

#[tokio::test]
async fn test_forward_sse_transport_error() {
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        vec![Err(std::io::Error::other("connection reset"))];
    let (tx, _rx) = mpsc::channel(100);
    let result = forward_sse(futures::stream::iter(chunks), &tx).await;
    assert!(matches!(result, Err(Error::Stream(m)) if m == "connection reset"));
}
