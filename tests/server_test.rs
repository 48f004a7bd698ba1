// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 在随机端口上启动服务器，经由真实套接字验证端到端行为。

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use webchain::{Chain, Handle, HttpRequestMethod, Request, ServerHandle};

async fn echo_server() -> ServerHandle {
    let mut chain = Chain::new();
    chain
        .parse_query()
        .unwrap()
        .content_app(|request: Request| async move {
            let mut keys: Vec<_> = request.query().keys().cloned().collect();
            keys.sort();
            Ok::<_, webchain::Exception>(format!(
                "{} {}{} {}",
                request.method(),
                request.script_name(),
                request.path_info(),
                keys.join(",")
            ))
        })
        .unwrap();
    chain.listen(0, "127.0.0.1").await.unwrap()
}

async fn send_raw(handle: &ServerHandle, request: &str) -> String {
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buffer = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buffer))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&buffer).to_string()
}

#[tokio::test]
async fn test_get_over_socket() {
    let handle = echo_server().await;
    let response = send_raw(&handle, "GET /a/b?x=1&y=2 HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.ends_with("GET /a/b x,y"));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_head_strips_body() {
    let handle = echo_server().await;
    let response = send_raw(&handle, "HEAD /abc HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 10\r\n"));
    assert!(response.ends_with("\r\n\r\n"));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_post_body_is_read_fully() {
    let mut chain = Chain::new();
    chain
        .content_request()
        .unwrap()
        .content_app(|request: Request| async move { Ok::<_, webchain::Exception>(request.body().clone()) })
        .unwrap();
    let handle = chain.listen(0, "127.0.0.1").await.unwrap();

    let payload = "x".repeat(20000);
    let request = format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}",
        payload.len(),
        payload
    );
    let response = send_raw(&handle, &request).await;
    assert!(response.ends_with(&payload));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_client_round_trip() {
    let handle = echo_server().await;
    let client = Chain::new().client();

    let request = Request::new(HttpRequestMethod::Get, "/hello?q=1")
        .with_header("Host", &handle.local_addr().to_string());
    let response = client.handle(request).await.unwrap();

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.content_type(), Some("text/plain"));
    assert_eq!(response.body().unwrap().as_ref(), b"GET /hello q");
    handle.shutdown().await;
}

#[tokio::test]
async fn test_proxy_tree_forwards_remaining_path() {
    let upstream = echo_server().await;

    let mut front = Chain::new();
    front
        .route("/mirror", |mirror| {
            mirror.proxy_tree(&format!("http://{}/base", upstream.local_addr()))?;
            Ok(())
        })
        .unwrap();
    let front = front.listen(0, "127.0.0.1").await.unwrap();

    let response = send_raw(&front, "GET /mirror/docs/1?page=2 HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("GET /base/docs/1 page"));

    let response = send_raw(&front, "GET /elsewhere HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404"));

    front.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let handle = echo_server().await;
    let addr = handle.local_addr();
    assert_eq!(handle.active_connections(), 0);
    handle.shutdown().await;

    // 监听器随任务一同释放，新连接应当被拒绝
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(TcpStream::connect(addr).await.is_err());
}
