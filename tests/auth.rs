use std::sync::Arc;

use labclient::auth;
use labclient::notify::QueueNotifier;
use labclient::store::{KvStore, MemoryStore, keys};
use labclient::transport::Requester;
use labclient::transport::http::LocalTransport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Helper: read one full request, headers plus a Content-Length body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data).into_owned();
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

/// Helper: serve canned JSON responses in order, one per connection, and
/// return the raw requests.
async fn serve(responses: Vec<(&'static str, &'static str)>) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for (status_line, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);

            let response = format!(
                "HTTP/1.1 {status_line}\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        }
        requests
    });
    (port, handle)
}

fn requester(port: u16, store: Arc<MemoryStore>) -> Requester {
    let transport = Arc::new(LocalTransport::new(
        reqwest::Client::new(),
        format!("http://127.0.0.1:{port}"),
    ));
    Requester::new(transport, store, Arc::new(QueueNotifier::new()))
}

#[tokio::test]
async fn login_stores_token_for_later_requests() {
    let (port, server) = serve(vec![
        (
            "200 OK",
            r#"{"token":"jwt-1","user":{"user_id":7,"openid":"o-abc","role":"student","created_at":"2025-09-01T08:00:00"}}"#,
        ),
        (
            "200 OK",
            r#"{"user_id":7,"openid":"o-abc","role":"student","created_at":"2025-09-01T08:00:00"}"#,
        ),
    ])
    .await;

    let store = Arc::new(MemoryStore::new());
    let requester = requester(port, store.clone());

    let login = auth::login(&requester, "wx-code").await.unwrap();
    assert_eq!(login.token, "jwt-1");
    assert_eq!(login.user.user_id, 7);
    assert_eq!(login.user.role.as_deref(), Some("student"));
    assert_eq!(store.get(keys::TOKEN).as_deref(), Some("jwt-1"));

    let me = auth::me(&requester).await.unwrap();
    assert_eq!(me.openid.as_deref(), Some("o-abc"));

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("POST /api/auth/wechat HTTP/1.1"));
    assert!(requests[0].contains(r#""code":"wx-code""#));
    assert!(requests[1].to_lowercase().contains("authorization: bearer jwt-1"));
}

#[tokio::test]
async fn failed_login_keeps_previous_token() {
    let (port, server) = serve(vec![("400 Bad Request", r#"{"detail":"invalid code"}"#)]).await;

    let store = Arc::new(MemoryStore::with_entries([(keys::TOKEN, "old")]));
    let requester = requester(port, store.clone());

    let err = auth::login(&requester, "bad").await.unwrap_err();
    assert_eq!(err.user_message(), "invalid code");
    assert_eq!(store.get(keys::TOKEN).as_deref(), Some("old"));
    server.await.unwrap();
}

#[tokio::test]
async fn logout_removes_token() {
    let store = Arc::new(MemoryStore::with_entries([(keys::TOKEN, "jwt-1")]));
    let requester = requester(1, store.clone());

    auth::logout(&requester).unwrap();
    assert_eq!(store.get(keys::TOKEN), None);
}

#[tokio::test]
async fn ping_returns_body() {
    let (port, server) = serve(vec![("200 OK", r#"{"message":"pong"}"#)]).await;
    let reply = auth::ping(&requester(port, Arc::new(MemoryStore::new())))
        .await
        .unwrap();
    assert_eq!(reply["message"], "pong");
    server.await.unwrap();
}
