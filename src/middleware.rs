// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 内置中间件
//!
//! 每个中间件都是一个实现了 `Middleware` 的单元结构体，配有一个可反序列化的选项结构体。
//! 它们既可以通过 `Chain` 上的同名方法以强类型方式安装，
//! 也以同名具名操作的形式收录在内置注册表中。

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    cache::{FileCache, SharedCache},
    chain::Chain,
    exception::Exception,
    handler::{handler_fn, Handle, Handler, HandlerFuture, HandlerResult, Middleware},
    registry::{decode_options, Registry},
    request::Request,
    response::{compress, decide_encoding, should_skip_compression, Response},
    responder::{self, serve_file},
    util::{format_file_size, HtmlBuilder},
};

/// 下游返回后再处理响应，处理函数拿到进入时的请求快照
fn post_process<F, Fut>(next: Handler, post: F) -> Handler
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let post = Arc::new(post);
    handler_fn(move |request: Request| {
        let snapshot = request.clone();
        let fut = next.handle(request);
        let post = Arc::clone(&post);
        async move { post(snapshot, fut.await?).await }
    })
}

// --- time ---

pub struct Time;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeOptions {
    pub header: String,
}

impl Default for TimeOptions {
    fn default() -> Self {
        Self {
            header: "X-Response-Time".to_string(),
        }
    }
}

impl Middleware for Time {
    type Options = TimeOptions;

    fn name(&self) -> Option<&str> {
        Some("Time")
    }

    fn wrap(&self, next: Handler, options: &TimeOptions) -> Handler {
        let header = options.header.clone();
        handler_fn(move |request: Request| {
            let start = Instant::now();
            let fut = next.handle(request);
            let header = header.clone();
            async move {
                let mut response = fut.await?;
                response.set_header(&header, &format!("{}ms", start.elapsed().as_millis()));
                Ok(response)
            }
        })
    }
}

// --- error ---

/// 把下游的异常转化为 500 响应
pub struct ErrorTrap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorOptions {
    /// 为真时把异常信息写入响应体
    pub debug: bool,
}

impl Middleware for ErrorTrap {
    type Options = ErrorOptions;

    fn name(&self) -> Option<&str> {
        Some("Error")
    }

    fn wrap(&self, next: Handler, options: &ErrorOptions) -> Handler {
        let debug = options.debug;
        handler_fn(move |request: Request| {
            let snapshot = request.clone();
            let fut = next.handle(request);
            async move {
                match fut.await {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        error!("[ID{}]处理请求时发生未知异常: {}", snapshot.id(), e);
                        let mut response = Response::from_status_code(500, &snapshot);
                        if debug {
                            response.set_content(Bytes::from(e.to_string()), "text/plain;charset=utf-8");
                        }
                        Ok(response)
                    }
                }
            }
        })
    }
}

// --- log ---

pub struct Log;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// 是否在访问日志中附带处理用时
    pub stamp: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { stamp: true }
    }
}

impl Middleware for Log {
    type Options = LogOptions;

    fn name(&self) -> Option<&str> {
        Some("Log")
    }

    fn wrap(&self, next: Handler, options: &LogOptions) -> Handler {
        let stamp = options.stamp;
        handler_fn(move |request: Request| {
            let start = Instant::now();
            let snapshot = request.clone();
            let fut = next.handle(request);
            async move {
                let result = fut.await;
                let elapsed = if stamp {
                    format!("{}ms", start.elapsed().as_millis())
                } else {
                    String::new()
                };
                match &result {
                    Ok(response) => info!(
                        "[ID{}] {}, {}, {}, {}, {}, {}, {}",
                        snapshot.id(),
                        snapshot.version(),
                        snapshot.path(),
                        snapshot.method(),
                        response.status_code(),
                        response.information(),
                        snapshot.user_agent(),
                        elapsed,
                    ),
                    Err(e) => error!(
                        "[ID{}] {}, {}, {}, {}, {}",
                        snapshot.id(),
                        snapshot.version(),
                        snapshot.path(),
                        snapshot.method(),
                        e,
                        elapsed,
                    ),
                }
                result
            }
        })
    }
}

// --- headers ---

pub struct Headers;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeadersOptions {
    pub headers: BTreeMap<String, String>,
}

impl Middleware for Headers {
    type Options = HeadersOptions;

    fn name(&self) -> Option<&str> {
        Some("Headers")
    }

    fn wrap(&self, next: Handler, options: &HeadersOptions) -> Handler {
        let headers = Arc::new(options.headers.clone());
        post_process(next, move |_request, mut response| {
            for (name, value) in headers.iter() {
                response.set_header(name, value);
            }
            async move { Ok(response) }
        })
    }
}

// --- date ---

/// 为没有 `Date` 的响应补上当前时间
pub struct Date;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateOptions {}

impl Middleware for Date {
    type Options = DateOptions;

    fn name(&self) -> Option<&str> {
        Some("Date")
    }

    fn wrap(&self, next: Handler, _options: &DateOptions) -> Handler {
        post_process(next, |_request, mut response| {
            if response.date().is_none() {
                let now: DateTime<Utc> = Utc::now();
                response.set_date(now);
            }
            async move { Ok(response) }
        })
    }
}

// --- permanent ---

/// 为成功的响应加上长期缓存策略
pub struct Permanent;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermanentOptions {
    pub max_age: u64,
}

impl Default for PermanentOptions {
    fn default() -> Self {
        Self { max_age: 31536000 }
    }
}

impl Middleware for Permanent {
    type Options = PermanentOptions;

    fn name(&self) -> Option<&str> {
        Some("Permanent")
    }

    fn wrap(&self, next: Handler, options: &PermanentOptions) -> Handler {
        let value = format!("public, max-age={}", options.max_age);
        post_process(next, move |_request, mut response| {
            if (200..300).contains(&response.status_code()) {
                response.set_header("Cache-Control", &value);
            }
            async move { Ok(response) }
        })
    }
}

// --- normalize ---

/// 把路径中的 `//`、`.`、`..` 规范化，不一致时重定向到规范路径
pub struct Normalize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizeOptions {}

/// 规范化路径；`..` 不会越过根
pub(crate) fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut normalized = format!("/{}", segments.join("/"));
    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    if trailing && normalized != "/" {
        normalized.push('/');
    }
    normalized
}

impl Middleware for Normalize {
    type Options = NormalizeOptions;

    fn name(&self) -> Option<&str> {
        Some("Normalize")
    }

    fn wrap(&self, next: Handler, _options: &NormalizeOptions) -> Handler {
        handler_fn(move |request: Request| -> HandlerFuture {
            let path_info = request.path_info();
            let normalized = normalize_path(path_info);
            if path_info.is_empty() || normalized == path_info {
                return next.handle(request);
            }
            let mut location = format!("{}{}", request.script_name(), normalized);
            if let Some(query) = request.query_string() {
                location.push('?');
                location.push_str(query);
            }
            debug!("[ID{}]路径{}被规范化为{}", request.id(), request.path(), location);
            let response = Response::redirect(&location, 301, &request);
            Box::pin(async move { Ok(response) })
        })
    }
}

// --- parse_query ---

pub struct ParseQuery;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParseQueryOptions {}

/// 解析 `application/x-www-form-urlencoded` 风格的查询字符串，同名参数后者覆盖前者
pub fn parse_query_string(query: &str) -> std::collections::HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(component: &str) -> String {
    let spaced = component.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

impl Middleware for ParseQuery {
    type Options = ParseQueryOptions;

    fn wrap(&self, next: Handler, _options: &ParseQueryOptions) -> Handler {
        handler_fn(move |mut request: Request| {
            if let Some(query) = request.query_string() {
                let query = parse_query_string(query);
                request.set_query(query);
            }
            next.handle(request)
        })
    }
}

// --- directory_index ---

/// 目录请求改由目录下的索引文件响应
pub struct DirectoryIndex;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryIndexOptions {
    pub index: String,
}

impl Default for DirectoryIndexOptions {
    fn default() -> Self {
        Self {
            index: "index.html".to_string(),
        }
    }
}

impl Middleware for DirectoryIndex {
    type Options = DirectoryIndexOptions;

    fn wrap(&self, next: Handler, options: &DirectoryIndexOptions) -> Handler {
        let index = Arc::new(options.index.clone());
        let cache: SharedCache = FileCache::from_capacity(8).shared();
        post_process(next, move |request, mut response| {
            let index = Arc::clone(&index);
            let cache = Arc::clone(&cache);
            async move {
                let dir = match response.take_directory() {
                    Some(dir) => dir,
                    None => return Ok(response),
                };
                let index_path = dir.join(index.as_str());
                match serve_file(&index_path, None, &request, &cache).await {
                    Err(Exception::FileNotFound) => {
                        debug!("[ID{}]目录{}下没有{}", request.id(), dir.display(), index);
                        Ok(Response::directory(&dir, &request))
                    }
                    result => result,
                }
            }
        })
    }
}

// --- list_directories ---

/// 目录请求改为返回文件列表（HTML，或在客户端接受时返回 JSON）
pub struct ListDirectories;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListDirectoriesOptions {
    /// 客户端接受 `application/json` 时是否返回 JSON 列表
    pub json: bool,
}

impl Default for ListDirectoriesOptions {
    fn default() -> Self {
        Self { json: true }
    }
}

async fn read_entries(dir: &Path) -> Result<Vec<PathBuf>, Exception> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    Ok(paths)
}

/// 目录列表的 JSON 形式
pub(crate) fn listing_json(paths: &[PathBuf]) -> Value {
    let entries: Vec<Value> = paths
        .iter()
        .map(|p| {
            let meta = std::fs::metadata(p).ok();
            let is_dir = p.is_dir();
            let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
            let modified = meta
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            let size_str = format_file_size(size);
            json!({
                "name": p.file_name().and_then(|n| n.to_str()).unwrap_or(""),
                "type": if is_dir { "dir" } else { "file" },
                "size": if is_dir { "-" } else { &size_str },
                "raw_size": size,
                "date": modified
            })
        })
        .collect();
    Value::Array(entries)
}

impl Middleware for ListDirectories {
    type Options = ListDirectoriesOptions;

    fn wrap(&self, next: Handler, options: &ListDirectoriesOptions) -> Handler {
        let allow_json = options.json;
        post_process(next, move |request, mut response| async move {
            let dir = match response.take_directory() {
                Some(dir) => dir,
                None => return Ok(response),
            };
            let mut paths = read_entries(&dir).await?;
            let wants_json = allow_json
                && request
                    .accept()
                    .map_or(false, |a| a.contains("application/json"));
            debug!("[ID{}]生成目录列表：{}，JSON={}", request.id(), dir.display(), wants_json);
            let mut listing = Response::new();
            if wants_json {
                let body = serde_json::to_vec(&listing_json(&paths))?;
                listing.set_content(Bytes::from(body), "application/json");
            } else {
                let title = format!("{}{}", request.script_name(), request.path_info());
                let html = HtmlBuilder::from_dir(&title, &mut paths).build();
                listing.set_content(Bytes::from(html), "text/html;charset=utf-8");
            }
            Ok(listing)
        })
    }
}

// --- handle_html_fragment_responses ---

/// 把片段响应包装成完整的 HTML 文档
pub struct HtmlFragments;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HtmlFragmentOptions {
    pub title: String,
}

impl Middleware for HtmlFragments {
    type Options = HtmlFragmentOptions;

    fn wrap(&self, next: Handler, options: &HtmlFragmentOptions) -> Handler {
        let title = Arc::new(options.title.clone());
        post_process(next, move |_request, mut response| {
            if let Some(fragment) = response.take_fragment() {
                let html = HtmlBuilder::from_fragment(&title, &fragment).build();
                response.set_content(Bytes::from(html), "text/html;charset=utf-8");
            }
            async move { Ok(response) }
        })
    }
}

// --- json / handle_json_responses ---

/// 把响应中尚未序列化的 JSON 负载写成响应体
pub struct Json;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JsonOptions {
    /// 缩进空格数，缺省时输出紧凑格式
    pub indent: Option<usize>,
}

pub(crate) fn encode_json(data: &Value, indent: Option<usize>) -> Result<Vec<u8>, Exception> {
    match indent {
        None => Ok(serde_json::to_vec(data)?),
        Some(width) => {
            let spaces = vec![b' '; width];
            let formatter = serde_json::ser::PrettyFormatter::with_indent(&spaces);
            let mut out = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            serde::Serialize::serialize(data, &mut serializer)?;
            Ok(out)
        }
    }
}

impl Middleware for Json {
    type Options = JsonOptions;

    fn wrap(&self, next: Handler, options: &JsonOptions) -> Handler {
        let indent = options.indent;
        post_process(next, move |_request, mut response| {
            let encoded = match response.take_data() {
                Some(data) => encode_json(&data, indent).map(Some),
                None => Ok(None),
            };
            async move {
                if let Some(body) = encoded? {
                    response.set_content(Bytes::from(body), "application/json");
                }
                Ok(response)
            }
        })
    }
}

// --- json_request / content_request ---

/// 把请求体解析为 JSON，解析失败时返回 400
pub struct JsonRequest;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRequestOptions {}

impl Middleware for JsonRequest {
    type Options = JsonRequestOptions;

    fn wrap(&self, next: Handler, _options: &JsonRequestOptions) -> Handler {
        handler_fn(move |mut request: Request| -> HandlerFuture {
            if !request.body().is_empty() {
                match serde_json::from_slice::<Value>(request.body()) {
                    Ok(data) => request.set_data(data),
                    Err(e) => {
                        warn!("[ID{}]请求体不是合法的JSON: {}", request.id(), e);
                        let response = Response::from_status_code(400, &request);
                        return Box::pin(async move { Ok(response) });
                    }
                }
            }
            next.handle(request)
        })
    }
}

/// 要求请求体是合法的 UTF-8 文本，否则返回 400
pub struct ContentRequest;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentRequestOptions {}

impl Middleware for ContentRequest {
    type Options = ContentRequestOptions;

    fn wrap(&self, next: Handler, _options: &ContentRequestOptions) -> Handler {
        handler_fn(move |request: Request| -> HandlerFuture {
            if std::str::from_utf8(request.body()).is_err() {
                warn!("[ID{}]请求体不是合法的UTF-8文本", request.id());
                let response = Response::from_status_code(400, &request);
                return Box::pin(async move { Ok(response) });
            }
            next.handle(request)
        })
    }
}

// --- compress ---

/// 按 `Accept-Encoding` 压缩响应体
pub struct Compress;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressOptions {
    /// 小于该字节数的响应体不压缩
    pub min_size: usize,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self { min_size: 256 }
    }
}

impl Middleware for Compress {
    type Options = CompressOptions;

    fn name(&self) -> Option<&str> {
        Some("Compress")
    }

    fn wrap(&self, next: Handler, options: &CompressOptions) -> Handler {
        let min_size = options.min_size;
        post_process(next, move |request, mut response| async move {
            if response.content_encoding().is_some() || response.status_code() == 206 {
                return Ok(response);
            }
            let body = match response.body() {
                Some(body) if body.len() >= min_size => body.clone(),
                _ => return Ok(response),
            };
            let content_type = response.content_type().unwrap_or("");
            if should_skip_compression(content_type) {
                debug!("[ID{}]跳过已压缩的类型：{}", request.id(), content_type);
                return Ok(response);
            }
            let encoding = match decide_encoding(request.accept_encoding()) {
                Some(encoding) => encoding,
                None => return Ok(response),
            };
            match compress(body.to_vec(), Some(encoding)) {
                Ok(compressed) => {
                    response
                        .replace_body(Bytes::from(compressed))
                        .set_content_encoding(Some(encoding))
                        .set_header("Vary", "Accept-Encoding");
                }
                Err(e) => warn!("[ID{}]压缩失败，发送原始内容: {}", request.id(), e),
            }
            Ok(response)
        })
    }
}

// --- cors ---

pub struct Cors;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsOptions {
    pub origin: String,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            origin: "*".to_string(),
            methods: Vec::new(),
            headers: Vec::new(),
        }
    }
}

impl From<&CorsOptions> for HeadersOptions {
    fn from(options: &CorsOptions) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Access-Control-Allow-Origin".to_string(), options.origin.clone());
        if !options.methods.is_empty() {
            headers.insert("Access-Control-Allow-Methods".to_string(), options.methods.join(", "));
        }
        if !options.headers.is_empty() {
            headers.insert("Access-Control-Allow-Headers".to_string(), options.headers.join(", "));
        }
        HeadersOptions { headers }
    }
}

impl Middleware for Cors {
    type Options = CorsOptions;

    fn wrap(&self, next: Handler, options: &CorsOptions) -> Handler {
        Headers.wrap(next, &HeadersOptions::from(options))
    }
}

// --- favicon ---

/// 拦截 `/favicon.ico`，其余请求放行
pub struct Favicon;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FaviconOptions {
    /// 图标文件，缺省时返回 404
    pub path: Option<PathBuf>,
}

impl Middleware for Favicon {
    type Options = FaviconOptions;

    fn wrap(&self, next: Handler, options: &FaviconOptions) -> Handler {
        let icon = match &options.path {
            Some(path) => responder::file(
                path.clone(),
                Some("image/x-icon".to_string()),
                FileCache::from_capacity(1).shared(),
            ),
            None => responder::not_found(),
        };
        handler_fn(move |request: Request| {
            if request.path_info() == "/favicon.ico" {
                icon.handle(request)
            } else {
                next.handle(request)
            }
        })
    }
}

// --- tap / trap ---

struct Tap<F>(Arc<F>);

impl<F> Middleware for Tap<F>
where
    F: Fn(&mut Request) + Send + Sync + 'static,
{
    type Options = ();

    fn wrap(&self, next: Handler, _options: &()) -> Handler {
        let tap = Arc::clone(&self.0);
        handler_fn(move |mut request: Request| {
            tap(&mut request);
            next.handle(request)
        })
    }
}

struct Trap<F>(Arc<F>);

impl<F> Middleware for Trap<F>
where
    F: Fn(&mut Response) + Send + Sync + 'static,
{
    type Options = ();

    fn wrap(&self, next: Handler, _options: &()) -> Handler {
        let trap = Arc::clone(&self.0);
        post_process(next, move |_request, mut response| {
            trap(&mut response);
            async move { Ok(response) }
        })
    }
}

// --- common ---

/// `common` 组合：time、favicon、error、log、parse_query、normalize
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommonOptions {
    pub favicon: FaviconOptions,
    pub error: ErrorOptions,
    pub log: LogOptions,
}

// --- 链方法 ---

impl Chain {
    pub fn time(&mut self) -> Result<&mut Self, Exception> {
        self.apply(Time, TimeOptions::default())
    }

    pub fn error(&mut self, debug: bool) -> Result<&mut Self, Exception> {
        self.apply(ErrorTrap, ErrorOptions { debug })
    }

    pub fn log(&mut self) -> Result<&mut Self, Exception> {
        self.apply(Log, LogOptions::default())
    }

    pub fn headers(&mut self, headers: &[(&str, &str)]) -> Result<&mut Self, Exception> {
        let headers = headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        self.apply(Headers, HeadersOptions { headers })
    }

    pub fn date(&mut self) -> Result<&mut Self, Exception> {
        self.apply(Date, DateOptions {})
    }

    pub fn permanent(&mut self) -> Result<&mut Self, Exception> {
        self.apply(Permanent, PermanentOptions::default())
    }

    pub fn normalize(&mut self) -> Result<&mut Self, Exception> {
        self.apply(Normalize, NormalizeOptions {})
    }

    pub fn parse_query(&mut self) -> Result<&mut Self, Exception> {
        self.apply(ParseQuery, ParseQueryOptions {})
    }

    pub fn directory_index(&mut self, index: &str) -> Result<&mut Self, Exception> {
        self.apply(
            DirectoryIndex,
            DirectoryIndexOptions {
                index: index.to_string(),
            },
        )
    }

    pub fn list_directories(&mut self) -> Result<&mut Self, Exception> {
        self.apply(ListDirectories, ListDirectoriesOptions::default())
    }

    pub fn handle_html_fragment_responses(&mut self, title: &str) -> Result<&mut Self, Exception> {
        self.apply(
            HtmlFragments,
            HtmlFragmentOptions {
                title: title.to_string(),
            },
        )
    }

    pub fn handle_json_responses(&mut self) -> Result<&mut Self, Exception> {
        self.apply(Json, JsonOptions::default())
    }

    /// 以指定缩进序列化 JSON 负载
    pub fn json(&mut self, indent: Option<usize>) -> Result<&mut Self, Exception> {
        self.apply(Json, JsonOptions { indent })
    }

    pub fn json_request(&mut self) -> Result<&mut Self, Exception> {
        self.apply(JsonRequest, JsonRequestOptions {})
    }

    pub fn content_request(&mut self) -> Result<&mut Self, Exception> {
        self.apply(ContentRequest, ContentRequestOptions {})
    }

    pub fn compress(&mut self) -> Result<&mut Self, Exception> {
        self.apply(Compress, CompressOptions::default())
    }

    pub fn cors(&mut self, options: CorsOptions) -> Result<&mut Self, Exception> {
        self.apply(Cors, options)
    }

    pub fn favicon(&mut self, path: Option<PathBuf>) -> Result<&mut Self, Exception> {
        self.apply(Favicon, FaviconOptions { path })
    }

    /// 在请求进入下游之前观察或修改它
    pub fn tap<F>(&mut self, tap: F) -> Result<&mut Self, Exception>
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        self.apply(Tap(Arc::new(tap)), ())
    }

    /// 在响应返回之前观察或修改它
    pub fn trap<F>(&mut self, trap: F) -> Result<&mut Self, Exception>
    where
        F: Fn(&mut Response) + Send + Sync + 'static,
    {
        self.apply(Trap(Arc::new(trap)), ())
    }

    /// 常用组合
    pub fn common(&mut self, options: CommonOptions) -> Result<&mut Self, Exception> {
        self.apply(Time, TimeOptions::default())?
            .apply(Favicon, options.favicon)?
            .apply(ErrorTrap, options.error)?
            .apply(Log, options.log)?
            .apply(ParseQuery, ParseQueryOptions {})?
            .apply(Normalize, NormalizeOptions {})
    }
}

/// 构建内置注册表
pub(crate) fn register_builtins(registry: &mut Registry) {
    registry.add(Time, "time");
    registry.add(ErrorTrap, "error");
    registry.add(Log, "log");
    registry.add(Headers, "headers");
    registry.add(Date, "date");
    registry.add(Permanent, "permanent");
    registry.add(Normalize, "normalize");
    registry.add(ParseQuery, "parse_query");
    registry.add(DirectoryIndex, "directory_index");
    registry.add(ListDirectories, "list_directories");
    registry.add(HtmlFragments, "handle_html_fragment_responses");
    registry.add(Json, "json");
    registry.add(Json, "handle_json_responses");
    registry.add(JsonRequest, "json_request");
    registry.add(ContentRequest, "content_request");
    registry.add(Compress, "compress");
    registry.add(Cors, "cors");
    registry.add(Favicon, "favicon");
    registry.define(
        "common",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let options: CommonOptions = decode_options(args)?;
            chain.common(options)?;
            Ok(())
        }),
    );

    crate::branch::register_builtins(registry);
    crate::route::register_builtins(registry);
    crate::responder::register_builtins(registry);
    crate::client::register_builtins(registry);
}
