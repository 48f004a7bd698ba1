// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 终端响应器
//!
//! 这些处理器不调用下游，直接产生响应。对应的链方法都是终结形式：调用后链被冻结。

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use serde_derive::Deserialize;
use serde_json::Value;

use crate::{
    cache::{lock_cache, FileCache, SharedCache},
    chain::Chain,
    exception::Exception,
    handler::{handler_fn, Handle, Handler, HandlerResult},
    param::mime_for_extension,
    registry::{decode_options, Registry},
    request::Request,
    response::Response,
};

/// `file_tree` 的选项
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileTreeOptions {
    /// 文件缓存容量（条目数）
    pub cache_size: usize,
    /// 是否提供以 `.` 开头的文件
    pub hidden: bool,
    /// 访问目录但缺少结尾斜杠时是否重定向
    pub redirect_directories: bool,
}

impl Default for FileTreeOptions {
    fn default() -> Self {
        Self {
            cache_size: 5,
            hidden: false,
            redirect_directories: true,
        }
    }
}

/// 固定状态码响应器，页面由 `Response::from_status_code` 生成
pub fn status(code: u16) -> Handler {
    handler_fn(move |request: Request| async move { Ok(Response::from_status_code(code, &request)) })
}

pub fn not_found() -> Handler {
    status(404)
}

pub fn bad_request() -> Handler {
    status(400)
}

pub fn method_not_allowed() -> Handler {
    status(405)
}

pub fn not_acceptable() -> Handler {
    status(406)
}

/// 固定内容响应器
pub fn content(body: Bytes, content_type: &str, code: u16) -> Handler {
    let content_type = content_type.to_string();
    handler_fn(move |_| {
        let response = Response::content(body.clone(), &content_type, code);
        async move { Ok(response) }
    })
}

/// 固定地址重定向
pub fn redirect(location: &str, code: u16) -> Handler {
    let location = location.to_string();
    handler_fn(move |request: Request| {
        let response = Response::redirect(&location, code, &request);
        async move { Ok(response) }
    })
}

/// 保留剩余路径的重定向：`base` + `path_info` + 查询字符串
pub fn redirect_tree(base: &str, code: u16) -> Handler {
    let base = base.trim_end_matches('/').to_string();
    handler_fn(move |request: Request| {
        let mut location = format!("{}{}", base, request.path_info());
        if let Some(query) = request.query_string() {
            location.push('?');
            location.push_str(query);
        }
        debug!("[ID{}]重定向到{}", request.id(), location);
        let response = Response::redirect(&location, code, &request);
        async move { Ok(response) }
    })
}

/// 单个文件响应器，文件不存在时返回 404
pub fn file(path: PathBuf, content_type: Option<String>, cache: SharedCache) -> Handler {
    let path = Arc::new(path);
    handler_fn(move |request: Request| {
        let path = Arc::clone(&path);
        let content_type = content_type.clone();
        let cache = Arc::clone(&cache);
        async move {
            match serve_file(&path, content_type.as_deref(), &request, &cache).await {
                Err(Exception::FileNotFound) => {
                    warn!("[ID{}]文件{}不存在，返回404", request.id(), path.display());
                    Ok(Response::from_status_code(404, &request))
                }
                result => result,
            }
        }
    })
}

/// 目录树响应器：把 `path_info` 映射到 `root` 下的文件。
///
/// 找不到文件时交给 `not_found`；命中目录时返回目录标记响应，
/// 由 `directory_index` / `list_directories` 接管。
pub fn file_tree(root: PathBuf, options: &FileTreeOptions, not_found: Handler) -> Handler {
    let root = Arc::new(root);
    let options = Arc::new(options.clone());
    let cache = FileCache::from_capacity(options.cache_size).shared();
    handler_fn(move |request: Request| {
        let root = Arc::clone(&root);
        let options = Arc::clone(&options);
        let cache = Arc::clone(&cache);
        let not_found = Arc::clone(&not_found);
        async move {
            let target = match resolve_under(&root, request.path_info(), options.hidden) {
                Ok(target) => target,
                Err(Exception::InvalidPath) => {
                    warn!("[ID{}]请求的路径：{} 包含非法字符，返回400", request.id(), request.path());
                    return Ok(Response::from_status_code(400, &request));
                }
                Err(_) => return not_found.handle(request).await,
            };
            let metadata = match tokio::fs::metadata(&target).await {
                Ok(metadata) => metadata,
                Err(_) => return not_found.handle(request).await,
            };
            if metadata.is_dir() {
                if options.redirect_directories && !request.path_info().ends_with('/') {
                    let mut location = format!("{}{}/", request.script_name(), request.path_info());
                    if let Some(query) = request.query_string() {
                        location.push('?');
                        location.push_str(query);
                    }
                    return Ok(Response::redirect(&location, 301, &request));
                }
                return Ok(Response::directory(&target, &request));
            }
            match serve_file(&target, None, &request, &cache).await {
                Err(Exception::FileNotFound) => not_found.handle(request).await,
                result => result,
            }
        }
    })
}

/// 把请求路径安全地映射到根目录下，拒绝 `..` 与反斜杠
pub(crate) fn resolve_under(root: &Path, path_info: &str, hidden: bool) -> Result<PathBuf, Exception> {
    let decoded = urlencoding::decode(path_info).map_err(|_| Exception::InvalidPath)?;
    let mut target = root.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(Exception::InvalidPath),
            s if s.contains('\\') || s.contains('\0') => return Err(Exception::InvalidPath),
            s if !hidden && s.starts_with('.') => return Err(Exception::FileNotFound),
            s => target.push(s),
        }
    }
    Ok(target)
}

/// 读取文件（优先命中缓存）并构造响应，支持单段 Range 请求
pub(crate) async fn serve_file(
    path: &Path,
    content_type: Option<&str>,
    request: &Request,
    cache: &SharedCache,
) -> HandlerResult {
    let id = request.id();
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(Exception::FileNotFound);
    }
    let modified = metadata.modified()?;

    let cached = lock_cache(cache).find(path, modified);
    let bytes = match cached {
        Some(bytes) => {
            debug!("[ID{}]缓存命中：{}", id, path.display());
            bytes
        }
        None => {
            debug!("[ID{}]缓存未命中，读取文件：{}", id, path.display());
            let bytes = Bytes::from(tokio::fs::read(path).await?);
            lock_cache(cache).push(path, bytes.clone(), modified);
            bytes
        }
    };

    let content_type = match content_type {
        Some(t) => t.to_string(),
        None => {
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            mime_for_extension(extension).to_string()
        }
    };

    let total = bytes.len() as u64;
    let mut response = match request.range() {
        None => Response::content(bytes, &content_type, 200),
        Some((start, end)) => {
            let last = end.unwrap_or(u64::MAX).min(total.saturating_sub(1));
            if total == 0 || start > last {
                warn!("[ID{}]无法满足的Range请求：{}-{:?}，文件大小{}", id, start, end, total);
                let mut response = Response::from_status_code(416, request);
                response.set_header("Content-Range", &format!("bytes */{}", total));
                return Ok(response);
            }
            debug!("[ID{}]Range请求：{}-{}/{}", id, start, last, total);
            let mut response =
                Response::content(bytes.slice(start as usize..=last as usize), &content_type, 206);
            response.set_header("Content-Range", &format!("bytes {}-{}/{}", start, last, total));
            response
        }
    };
    response.set_header("Accept-Ranges", "bytes");
    Ok(response)
}

// --- 链方法 ---

impl Chain {
    /// 以现成的处理器终结
    pub fn app(&mut self, handler: Handler) -> Result<&mut Self, Exception> {
        self.terminate(move |_next| Arc::clone(&handler))
    }

    /// 以异步函数的返回内容作为 `text/plain` 响应体
    pub fn content_app<F, Fut, B>(&mut self, app: F) -> Result<&mut Self, Exception>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B, Exception>> + Send + 'static,
        B: Into<Bytes>,
    {
        let app = Arc::new(app);
        self.terminate(move |_next| {
            let app = Arc::clone(&app);
            handler_fn(move |request| {
                let body = app(request);
                async move { Ok(Response::content(body.await?, "text/plain", 200)) }
            })
        })
    }

    /// 固定内容，状态码 200
    pub fn content(&mut self, body: impl Into<Bytes>, content_type: &str) -> Result<&mut Self, Exception> {
        self.content_with_status(body, content_type, 200)
    }

    /// `content` 的别名
    pub fn ok(&mut self, body: impl Into<Bytes>, content_type: &str) -> Result<&mut Self, Exception> {
        self.content(body, content_type)
    }

    pub fn content_with_status(
        &mut self,
        body: impl Into<Bytes>,
        content_type: &str,
        code: u16,
    ) -> Result<&mut Self, Exception> {
        let body = body.into();
        let content_type = content_type.to_string();
        self.terminate(move |_next| content(body.clone(), &content_type, code))
    }

    pub fn not_found(&mut self) -> Result<&mut Self, Exception> {
        self.terminate(|_next| not_found())
    }

    pub fn bad_request(&mut self) -> Result<&mut Self, Exception> {
        self.terminate(|_next| bad_request())
    }

    pub fn method_not_allowed(&mut self) -> Result<&mut Self, Exception> {
        self.terminate(|_next| method_not_allowed())
    }

    pub fn not_acceptable(&mut self) -> Result<&mut Self, Exception> {
        self.terminate(|_next| not_acceptable())
    }

    /// 提供单个文件，`content_type` 缺省时按扩展名推断
    pub fn file(&mut self, path: impl AsRef<Path>, content_type: Option<&str>) -> Result<&mut Self, Exception> {
        let path = path.as_ref().to_path_buf();
        let content_type = content_type.map(str::to_string);
        self.terminate(move |_next| {
            file(path.clone(), content_type.clone(), FileCache::from_capacity(1).shared())
        })
    }

    /// 提供目录树，找不到的文件交给下游处理
    pub fn file_tree(&mut self, root: impl AsRef<Path>, options: FileTreeOptions) -> Result<&mut Self, Exception> {
        let root = root.as_ref().to_path_buf();
        self.terminate(move |next| file_tree(root.clone(), &options, next))
    }

    /// 301 永久重定向
    pub fn redirect_permanent(&mut self, location: &str) -> Result<&mut Self, Exception> {
        let location = location.to_string();
        self.terminate(move |_next| redirect(&location, 301))
    }

    /// 307 临时重定向
    pub fn redirect_temporary(&mut self, location: &str) -> Result<&mut Self, Exception> {
        let location = location.to_string();
        self.terminate(move |_next| redirect(&location, 307))
    }

    /// 把整棵子路径重定向到 `base` 下
    pub fn redirect_tree(&mut self, base: &str) -> Result<&mut Self, Exception> {
        let base = base.to_string();
        self.terminate(move |_next| redirect_tree(&base, 301))
    }
}

// --- 具名操作 ---

#[derive(Deserialize)]
#[serde(default)]
struct ContentOptions {
    body: String,
    content_type: String,
    status: u16,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            body: String::new(),
            content_type: "text/plain".to_string(),
            status: 200,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FileOptions {
    path: PathBuf,
    content_type: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FileTreeArgs {
    root: PathBuf,
    #[serde(flatten)]
    options: FileTreeOptions,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LocationOptions {
    location: String,
}

pub(crate) fn register_builtins(registry: &mut Registry) {
    registry.define(
        "content",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let options: ContentOptions = decode_options(args)?;
            chain.content_with_status(options.body, &options.content_type, options.status)?;
            Ok(())
        }),
    );
    registry.define(
        "file",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let options: FileOptions = decode_options(args)?;
            chain.file(&options.path, options.content_type.as_deref())?;
            Ok(())
        }),
    );
    registry.define(
        "file_tree",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let args: FileTreeArgs = decode_options(args)?;
            chain.file_tree(&args.root, args.options)?;
            Ok(())
        }),
    );
    registry.define(
        "redirect_permanent",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let options: LocationOptions = decode_options(args)?;
            chain.redirect_permanent(&options.location)?;
            Ok(())
        }),
    );
    registry.define(
        "redirect_temporary",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let options: LocationOptions = decode_options(args)?;
            chain.redirect_temporary(&options.location)?;
            Ok(())
        }),
    );
    registry.define(
        "redirect_tree",
        Arc::new(|chain: &mut Chain, args: &Value| {
            let options: LocationOptions = decode_options(args)?;
            chain.redirect_tree(&options.location)?;
            Ok(())
        }),
    );
    registry.define(
        "not_found",
        Arc::new(|chain: &mut Chain, _args: &Value| {
            chain.not_found()?;
            Ok(())
        }),
    );
}
