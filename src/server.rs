// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 监听服务器
//!
//! 把装配好的处理器挂到 TCP 监听器上。每个连接处理一个请求：
//! 读取报文、交给处理器、写回响应后关闭。

use std::net::SocketAddr;
use std::num::IntErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};

use crate::{
    exception::Exception,
    handler::Handler,
    param::{reason_phrase, HttpRequestMethod},
    request::{find_subsequence, Request},
    response::Response,
};

/// 请求报文（标头 + 正文）的大小上限
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// 尚未开始监听的服务器
pub struct Server {
    handler: Handler,
}

/// 正在运行的服务器
pub struct ServerHandle {
    local_addr: SocketAddr,
    active_connection: Arc<Mutex<u32>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Server {
    pub fn new(handler: Handler) -> Self {
        Self { handler }
    }

    /// 绑定地址并在后台任务中开始接收连接
    pub async fn listen(&self, port: u16, host: &str) -> Result<ServerHandle, Exception> {
        let listener = match TcpListener::bind((host, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("无法绑定端口：{}，错误：{}", port, e);
                return Err(Exception::Io(e.to_string()));
            }
        };
        let local_addr = listener.local_addr()?;
        info!("服务端将在{}上监听Socket连接", local_addr);

        let active_connection = Arc::new(Mutex::new(0u32));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            Arc::clone(&active_connection),
            shutdown_rx,
        ));

        Ok(ServerHandle {
            local_addr,
            active_connection,
            shutdown,
            task,
        })
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 当前正在处理的连接数
    pub fn active_connections(&self) -> u32 {
        *lock_counter(&self.active_connection)
    }

    /// 停止接收新连接并等待监听任务退出
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("监听任务异常退出: {}", e);
        }
        info!("服务器已停止");
    }
}

fn lock_counter(counter: &Mutex<u32>) -> std::sync::MutexGuard<'_, u32> {
    match counter.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 连接计数守卫，任务结束（包括 panic 展开）时归还计数
struct ConnectionGuard(Arc<Mutex<u32>>);

impl ConnectionGuard {
    fn new(counter: Arc<Mutex<u32>>) -> Self {
        *lock_counter(&counter) += 1;
        Self(counter)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut count = lock_counter(&self.0);
        *count = count.saturating_sub(1);
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Handler,
    active_connection: Arc<Mutex<u32>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut id: u128 = 0;
    loop {
        let (mut stream, addr) = tokio::select! {
            _ = shutdown.changed() => {
                info!("主循环接收到停机指令，正在退出...");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("接收连接失败: {}", e);
                    continue;
                }
            },
        };
        debug!("[ID{}]TCP连接已建立：{}", id, addr);

        let handler = Arc::clone(&handler);
        let active_connection = Arc::clone(&active_connection);
        tokio::spawn(async move {
            let _guard = ConnectionGuard::new(active_connection);
            handle_connection(&mut stream, id, handler).await;
        });
        id += 1;
    }
}

/// 读取一个完整的请求报文：标头结束后再按 `Content-Length` 读取正文
async fn read_request(stream: &mut TcpStream, id: u128) -> Result<Option<Vec<u8>>, Exception> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut expected: Option<usize> = None;
    loop {
        if let Some(total) = expected {
            if buffer.len() >= total {
                return Ok(Some(buffer));
            }
        } else if let Some(pos) = find_subsequence(&buffer, b"\r\n\r\n") {
            let total = content_length(&buffer[..pos])?
                .checked_add(pos + 4)
                .filter(|total| *total <= MAX_REQUEST_SIZE);
            match total {
                Some(total) => {
                    expected = Some(total);
                    continue;
                }
                None => {
                    warn!("[ID{}]声明的正文长度超过上限{}字节", id, MAX_REQUEST_SIZE);
                    return Err(Exception::PayloadTooLarge);
                }
            }
        }
        if buffer.len() > MAX_REQUEST_SIZE {
            warn!("[ID{}]请求报文超过上限{}字节", id, MAX_REQUEST_SIZE);
            return Err(Exception::PayloadTooLarge);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            // 客户端提前关闭连接
            return Ok(if buffer.is_empty() { None } else { Some(buffer) });
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// 标头中声明的正文长度，缺省为 0；数值超出 `usize` 时视为过大
fn content_length(head: &[u8]) -> Result<usize, Exception> {
    let head = String::from_utf8_lossy(head);
    let value = match head
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
    {
        Some((_, value)) => value.trim(),
        None => return Ok(0),
    };
    value.parse::<usize>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow => Exception::PayloadTooLarge,
        _ => Exception::MalformedRequest,
    })
}

/// 不经过处理器，直接写出只带状态行的最简响应
async fn write_bare(stream: &mut TcpStream, code: u16) {
    let phrase = reason_phrase(code).unwrap_or("");
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        code,
        phrase,
        phrase.len(),
        phrase
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

/// # 连接处理器
///
/// 解析请求、交给处理器并写回响应。处理器返回异常时写出最简单的 500 响应。
async fn handle_connection(stream: &mut TcpStream, id: u128, handler: Handler) {
    let buffer = match read_request(stream, id).await {
        Ok(Some(buffer)) => buffer,
        Ok(None) => return,
        Err(Exception::PayloadTooLarge) => {
            write_bare(stream, 413).await;
            return;
        }
        Err(Exception::MalformedRequest) => {
            write_bare(stream, 400).await;
            return;
        }
        Err(e) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
    };
    debug!("[ID{}]HTTP请求接收完毕", id);

    let start_time = Instant::now();
    let request = match Request::try_from(&buffer, id) {
        Ok(request) => request,
        Err(e) => {
            error!("[ID{}]解析HTTP请求失败: {:?}", id, e);
            write_bare(stream, 400).await;
            return;
        }
    };
    debug!("[ID{}]成功解析HTTP请求", id);

    let is_head = request.method() == HttpRequestMethod::Head;
    let mut response: Response = match handler.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            error!("[ID{}]处理请求时发生未捕获的异常: {}", id, e);
            let response = "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
            let _ = stream.write_all(response.as_bytes()).await;
            return;
        }
    };
    if is_head {
        response.strip_body();
    }
    response.set_header("Connection", "close");

    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );
    let response_bytes = response.as_bytes();
    debug!("[ID{}]发送全量响应，长度: {}", id, response_bytes.len());
    if let Err(e) = stream.write_all(&response_bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}
