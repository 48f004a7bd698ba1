// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了中间件链在构建期与请求处理期可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **构建期错误**：向已终结的链追加环节、调用未注册的具名操作、选项无法解析。
//!   这些都是编程错误，调用方应当直接以 `?` 向上传播，不做重试。
//! - **处理期错误**：协议解析错误、文件系统错误以及出站请求错误。
//!   链本身从不捕获它们，只有显式安装的 `error` 中间件会把它们转化为 500 响应。
//! - **用户友好**：通过实现 `std::fmt::Display`，确保错误信息可以被安全地记录到日志或返回给客户端。

use std::fmt;

/// 链构建与请求处理过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 在已经终结（terminate）的链上继续追加中间件。
    ChainTerminated,
    /// 通过名称调用了注册表中不存在的操作。
    UnknownOperation(String),
    /// 具名操作的调用参数无法反序列化为该中间件的选项结构体。
    InvalidOptions(String),
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了服务器暂不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求行或标头格式不完整。
    MalformedRequest,
    /// 报文超过大小上限，或 `Content-Length` 大到无法表示。对应 `413 Content Too Large`。
    PayloadTooLarge,
    /// 在指定的资源根目录下未找到所请求的文件。在 Web 语义中对应 `404 Not Found`。
    FileNotFound,
    /// 请求的路径格式非法或包含越权尝试（如目录遍历攻击）。对应 `400 Bad Request`。
    InvalidPath,
    /// 底层 I/O 失败。
    Io(String),
    /// 出站请求的目标地址无法解析。
    InvalidUrl(String),
    /// 无法与上游建立连接或读写失败。
    ConnectionFailed(String),
    /// 上游返回的字节流不是合法的 HTTP 响应。
    MalformedResponse,
    /// 重定向次数超过上限。
    TooManyRedirects,
    /// JSON 负载无法序列化。
    Serialization(String),
    /// 配置文件无法读取或解析。
    Config(String),
}

use Exception::*;

impl fmt::Display for Exception {
    /// 根据错误类型写入人类可读的描述文本。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainTerminated => write!(f, "Cannot add links to a terminated chain"),
            UnknownOperation(name) => write!(f, "No chain operation named `{}`", name),
            InvalidOptions(msg) => write!(f, "Invalid middleware options: {}", msg),
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            MalformedRequest => write!(f, "Malformed HTTP request"),
            PayloadTooLarge => write!(f, "Payload too large (413)"),
            FileNotFound => write!(f, "File not found (404)"),
            InvalidPath => write!(f, "Invalid path (400)"),
            Io(msg) => write!(f, "I/O error: {}", msg),
            InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            MalformedResponse => write!(f, "Malformed HTTP response"),
            TooManyRedirects => write!(f, "Too many redirects"),
            Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for Exception {}

impl From<serde_json::Error> for Exception {
    fn from(e: serde_json::Error) -> Self {
        Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Exception {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => FileNotFound,
            _ => Io(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_message() {
        assert_eq!(
            ChainTerminated.to_string(),
            "Cannot add links to a terminated chain"
        );
    }

    #[test]
    fn test_io_not_found_maps_to_file_not_found() {
        let e = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(Exception::from(e), FileNotFound);
    }
}
