// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 出站请求
//!
//! 链以出站 HTTP 处理器为终端装配时就成了一个客户端：请求沿链向下，
//! 最后按 `Host` 头连接上游、写出报文并读回响应。
//! 每个请求使用一个独立连接（`Connection: close`）。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, warn};
use serde_derive::Deserialize;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use url::Url;

use crate::{
    chain::Chain,
    exception::Exception,
    handler::{handler_fn, Handle, Handler, HandlerResult, Middleware},
    param::HttpRequestMethod,
    registry::{decode_options, Registry},
    request::Request,
    response::Response,
};

/// 上游响应报文的大小上限
pub const MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// 等待上游响应读完的时限
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// 出站 HTTP 终端
pub fn http_request() -> Handler {
    handler_fn(perform)
}

async fn perform(mut request: Request) -> HandlerResult {
    let id = request.id();
    let host = request
        .host()
        .ok_or_else(|| Exception::InvalidUrl("missing Host header".to_string()))?
        .to_string();
    let address = if host.contains(':') {
        host
    } else {
        format!("{}:80", host)
    };
    request.set_header("Connection", "close");

    debug!("[ID{}]连接上游：{}", id, address);
    let mut stream = TcpStream::connect(&address).await.map_err(|e| {
        error!("[ID{}]无法连接上游{}: {}", id, address, e);
        Exception::ConnectionFailed(e.to_string())
    })?;
    stream
        .write_all(&request.as_bytes())
        .await
        .map_err(|e| Exception::ConnectionFailed(e.to_string()))?;

    let buffer = read_response(&mut stream, MAX_RESPONSE_SIZE, UPSTREAM_TIMEOUT, id).await?;
    debug!("[ID{}]上游响应接收完毕，长度: {}", id, buffer.len());
    Response::try_from(&buffer, id)
}

/// 读到连接关闭为止，超过 `limit` 字节或超时都视为失败
async fn read_response<R>(
    reader: R,
    limit: usize,
    timeout: Duration,
    id: u128,
) -> Result<Vec<u8>, Exception>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut limited = reader.take(limit as u64 + 1);
    let read = limited.read_to_end(&mut buffer);
    match tokio::time::timeout(timeout, read).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(Exception::ConnectionFailed(e.to_string())),
        Err(_) => {
            warn!("[ID{}]等待上游响应超时", id);
            return Err(Exception::ConnectionFailed("upstream timed out".to_string()));
        }
    }
    if buffer.len() > limit {
        error!("[ID{}]上游响应超过上限{}字节", id, limit);
        return Err(Exception::MalformedResponse);
    }
    Ok(buffer)
}

/// 把请求改写为指向 `target` 的出站请求
pub fn retarget(request: &mut Request, target: &Url) -> Result<(), Exception> {
    let host = target
        .host_str()
        .ok_or_else(|| Exception::InvalidUrl(target.to_string()))?;
    let authority = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let mut path = target.path().to_string();
    if let Some(query) = target.query() {
        path.push('?');
        path.push_str(query);
    }
    request.set_header("Host", &authority);
    request.set_target(&path);
    Ok(())
}

/// 由请求当前的 `Host` 与目标还原出绝对地址
fn current_url(request: &Request) -> Result<Url, Exception> {
    let host = request.host().unwrap_or("localhost");
    let raw = format!("http://{}{}", host, request.path());
    Url::parse(&raw).map_err(|e| Exception::InvalidUrl(format!("{}: {}", raw, e)))
}

fn parse_url(raw: &str) -> Result<Url, Exception> {
    let url = Url::parse(raw).map_err(|e| Exception::InvalidUrl(format!("{}: {}", raw, e)))?;
    if url.scheme() != "http" {
        return Err(Exception::InvalidUrl(format!("unsupported scheme: {}", url.scheme())));
    }
    Ok(url)
}

/// 把请求转发到固定地址
pub fn proxy(target: Url) -> Handler {
    let target = Arc::new(target);
    handler_fn(move |mut request: Request| {
        let target = Arc::clone(&target);
        async move {
            retarget(&mut request, &target)?;
            debug!("[ID{}]代理到{}", request.id(), target);
            perform(request).await
        }
    })
}

/// 把请求的剩余路径与查询字符串拼接到 `base` 之后再转发
pub fn proxy_tree(base: Url) -> Handler {
    let base = Arc::new(base);
    handler_fn(move |mut request: Request| {
        let base = Arc::clone(&base);
        async move {
            let mut target = (*base).clone();
            let joined = format!(
                "{}{}",
                base.path().trim_end_matches('/'),
                request.path_info()
            );
            target.set_path(&joined);
            target.set_query(request.query_string());
            retarget(&mut request, &target)?;
            debug!("[ID{}]代理到{}", request.id(), target);
            perform(request).await
        }
    })
}

/// 跟随重定向，直到得到非重定向响应或超过次数上限
pub struct RedirectTrap;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedirectTrapOptions {
    pub max_redirects: usize,
}

impl Default for RedirectTrapOptions {
    fn default() -> Self {
        Self { max_redirects: 20 }
    }
}

impl Middleware for RedirectTrap {
    type Options = RedirectTrapOptions;

    fn wrap(&self, next: Handler, options: &RedirectTrapOptions) -> Handler {
        let max_redirects = options.max_redirects;
        handler_fn(move |request: Request| {
            let next = Arc::clone(&next);
            async move {
                let mut request = request;
                let mut followed = 0;
                loop {
                    let response = next.handle(request.clone()).await?;
                    if !response.is_redirect() {
                        return Ok(response);
                    }
                    let location = match response.header("Location") {
                        Some(location) => location.to_string(),
                        None => return Ok(response),
                    };
                    if followed >= max_redirects {
                        warn!("[ID{}]重定向次数超过上限{}", request.id(), max_redirects);
                        return Err(Exception::TooManyRedirects);
                    }
                    followed += 1;

                    let target = current_url(&request)?
                        .join(&location)
                        .map_err(|e| Exception::InvalidUrl(format!("{}: {}", location, e)))?;
                    debug!("[ID{}]跟随重定向到{}", request.id(), target);
                    retarget(&mut request, &target)?;
                    if response.status_code() == 303 {
                        request.set_method(HttpRequestMethod::Get);
                        request.set_body(bytes::Bytes::new());
                    }
                }
            }
        })
    }
}

/// 按主机保存上游下发的 Cookie，并在之后发往同一主机的请求中带回
pub struct CookieJar;

type Jar = Arc<Mutex<HashMap<String, Vec<(String, String)>>>>;

fn lock_jar(jar: &Jar) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(String, String)>>> {
    match jar.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 解析一条 `Set-Cookie`，返回名称、值以及是否要求立即删除
fn parse_set_cookie(raw: &str) -> Option<(String, String, bool)> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let expired = parts.any(|attr| {
        attr.split_once('=')
            .map(|(k, v)| {
                k.trim().eq_ignore_ascii_case("max-age")
                    && v.trim().parse::<i64>().map(|age| age <= 0).unwrap_or(false)
            })
            .unwrap_or(false)
    });
    Some((name.to_string(), value.trim().to_string(), expired))
}

fn store_cookies(cookies: &mut Vec<(String, String)>, response: &Response) {
    let received = response
        .headers()
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
        .filter_map(|(_, v)| parse_set_cookie(v));
    for (name, value, expired) in received {
        cookies.retain(|(n, _)| *n != name);
        if !expired {
            cookies.push((name, value));
        }
    }
}

impl Middleware for CookieJar {
    type Options = ();

    fn wrap(&self, next: Handler, _options: &()) -> Handler {
        let jar: Jar = Arc::new(Mutex::new(HashMap::new()));
        handler_fn(move |mut request: Request| {
            let next = Arc::clone(&next);
            let jar = Arc::clone(&jar);
            async move {
                let host = request.host().unwrap_or("").to_lowercase();
                let stored = lock_jar(&jar)
                    .get(&host)
                    .filter(|cookies| !cookies.is_empty())
                    .map(|cookies| {
                        cookies
                            .iter()
                            .map(|(n, v)| format!("{}={}", n, v))
                            .collect::<Vec<_>>()
                            .join("; ")
                    });
                if let Some(stored) = stored {
                    let cookie = match request.header("Cookie") {
                        Some(existing) => format!("{}; {}", existing, stored),
                        None => stored,
                    };
                    debug!("[ID{}]为{}附带Cookie", request.id(), host);
                    request.set_header("Cookie", &cookie);
                }

                let response = next.handle(request).await?;
                store_cookies(lock_jar(&jar).entry(host).or_default(), &response);
                Ok(response)
            }
        })
    }
}

impl Chain {
    /// 以出站 HTTP 处理器为终端装配
    pub fn client(&self) -> Handler {
        self.assemble(http_request())
    }

    pub fn redirect_trap(&mut self, max_redirects: usize) -> Result<&mut Self, Exception> {
        self.apply(RedirectTrap, RedirectTrapOptions { max_redirects })
    }

    /// 在链上维护一个按主机区分的 Cookie 存储
    pub fn cookie_jar(&mut self) -> Result<&mut Self, Exception> {
        self.apply(CookieJar, ())
    }

    /// 转发到固定地址
    pub fn proxy(&mut self, url: &str) -> Result<&mut Self, Exception> {
        let target = parse_url(url)?;
        self.terminate(move |_next| proxy(target.clone()))
    }

    /// 把剩余路径转发到 `url` 之下
    pub fn proxy_tree(&mut self, url: &str) -> Result<&mut Self, Exception> {
        let base = parse_url(url)?;
        self.terminate(move |_next| proxy_tree(base.clone()))
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct UrlOptions {
    url: String,
}

pub(crate) fn register_builtins(registry: &mut Registry) {
    registry.add(RedirectTrap, "redirect_trap");
    registry.add(CookieJar, "cookie_jar");
    registry.define(
        "proxy",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let options: UrlOptions = decode_options(args)?;
            chain.proxy(&options.url)?;
            Ok(())
        }),
    );
    registry.define(
        "proxy_tree",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let options: UrlOptions = decode_options(args)?;
            chain.proxy_tree(&options.url)?;
            Ok(())
        }),
    );
}
