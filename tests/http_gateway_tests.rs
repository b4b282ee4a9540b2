
use std::time::Duration;

use quiz_participant::clients::HttpGateway;
use quiz_participant::config::{ClientConfig, RetryConfig};
use quiz_participant::error::{GatewayError, PollError};
use quiz_participant::models::SubmitAck;
use quiz_participant::{Participant, QuizGateway};
use test_utils::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One canned HTTP response.
struct Reply {
    status: u16,
    body: &'static str,
}

impl Reply {
    fn new(status: u16, body: &'static str) -> Self {
        Self { status, body }
    }

    fn to_http(&self) -> String {
        let reason = match self.status {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            404 => "Not Found",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        };
        if self.status == 204 {
            return "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string();
        }
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason,
            self.body.len(),
            self.body
        )
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map(|v| v.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve `replies` on fresh connections, in order. Resolves to the raw requests received.
async fn serve(replies: Vec<Reply>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let mut requests = Vec::new();
        for reply in replies {
            let (mut stream, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut stream).await);
            stream.write_all(reply.to_http().as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
        requests
    });
    (base_url, server)
}

fn gateway(base_url: &str) -> HttpGateway {
    init_tracing();
    let config = ClientConfig::new(base_url)
        .unwrap()
        .with_request_timeout(Duration::from_secs(5))
        .with_retry(RetryConfig { max_retries: 2, backoff: Duration::from_millis(10) });
    HttpGateway::new(&config).unwrap()
}

fn body_json(request: &str) -> serde_json::Value {
    let (_, body) = request.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

#[tokio::test]
async fn test_join_posts_code_and_name() {
    let (base_url, server) = serve(vec![Reply::new(200, r#"{"participant":{"id":7,"name":"Ana"}}"#)]).await;

    let participant = gateway(&base_url).join(&code("ABCD"), "Ana").await.unwrap();
    assert_eq!(participant, Participant { id: 7 });

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("POST /api/sessions/join "));
    assert_eq!(body_json(&requests[0]), serde_json::json!({"code": "ABCD", "name": "Ana"}));
}

#[tokio::test]
async fn test_join_error_status_is_surfaced() {
    let (base_url, server) = serve(vec![Reply::new(404, "Session not found")]).await;

    let err = gateway(&base_url).join(&code("ZZZZ"), "Ana").await.unwrap_err();
    assert_eq!(err, GatewayError::Api { status: 404, message: "Session not found".into() });
    assert_eq!(server.await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_content_means_not_active() {
    let (base_url, server) = serve(vec![Reply::new(204, "")]).await;

    let result = gateway(&base_url).check_active(&code("ABCD")).await;
    assert_eq!(result, Err(PollError::NotActive));

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("POST /api/quizzes/getIfActive "));
    assert_eq!(body_json(&requests[0]), serde_json::json!({"code": "ABCD"}));
}

#[tokio::test]
async fn test_active_payload_is_decoded() {
    let body = r#"{"questions":[{"id":1,"text":"2+2?","options":[
        {"id":10,"text":"4","isCorrect":true},
        {"id":11,"text":"5","isCorrect":false}]}]}"#;
    let (base_url, _server) = serve(vec![Reply::new(200, body)]).await;

    let payload = gateway(&base_url).check_active(&code("ABCD")).await.unwrap();
    assert!(payload.is_active());
    let questions = payload.questions.unwrap();
    assert_eq!(questions[0].id, 1);
    assert_eq!(questions[0].options.len(), 2);
}

#[tokio::test]
async fn test_activation_check_retries_server_errors() {
    let (base_url, server) = serve(vec![
        Reply::new(503, "warming up"),
        Reply::new(500, "still warming up"),
        Reply::new(204, ""),
    ])
    .await;

    let result = gateway(&base_url).check_active(&code("ABCD")).await;
    assert_eq!(result, Err(PollError::NotActive));
    assert_eq!(server.await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_activation_check_gives_up_after_retries() {
    let (base_url, server) = serve(vec![
        Reply::new(500, "down"),
        Reply::new(500, "down"),
        Reply::new(500, "down"),
    ])
    .await;

    let result = gateway(&base_url).check_active(&code("ABCD")).await;
    assert_eq!(
        result,
        Err(PollError::Gateway(GatewayError::Api { status: 500, message: "down".into() }))
    );
    assert_eq!(server.await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_submit_posts_answer_fields() {
    let (base_url, server) = serve(vec![Reply::new(201, "")]).await;

    let ack = gateway(&base_url).submit_answer(7, 1, 10).await.unwrap();
    assert_eq!(ack, SubmitAck(serde_json::Value::Null));

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("POST /api/results "));
    assert_eq!(
        body_json(&requests[0]),
        serde_json::json!({"participantId": 7, "questionId": 1, "selectedOptionId": 10})
    );
}

#[tokio::test]
async fn test_submit_is_not_retried() {
    let (base_url, server) = serve(vec![Reply::new(500, "nope")]).await;

    let err = gateway(&base_url).submit_answer(7, 1, 10).await.unwrap_err();
    assert!(matches!(err, GatewayError::Api { status: 500, .. }));
    assert_eq!(server.await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api", listener.local_addr().unwrap());
    let _server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let config = ClientConfig::new(&base_url)
        .unwrap()
        .with_request_timeout(Duration::from_millis(200));
    let err = HttpGateway::new(&config).unwrap().submit_answer(7, 1, 10).await.unwrap_err();
    assert_eq!(err, GatewayError::Timeout);
}

#[tokio::test]
async fn test_unreachable_server_is_an_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api", listener.local_addr().unwrap());
    drop(listener);

    let config = ClientConfig::new(&base_url).unwrap().with_retry(RetryConfig::none());
    let err = HttpGateway::new(&config).unwrap().check_active(&code("ABCD")).await.unwrap_err();
    assert!(matches!(err, PollError::Gateway(GatewayError::Http(_))));
}
