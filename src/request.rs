// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求模块
//!
//! 该模块负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体，
//! 同时也是中间件之间传递的请求描述符。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、版本）。
//! 2. 标头（Headers）的保存与大小写不敏感查询。
//! 3. 范围请求（Range Requests）与 `Accept-Encoding` 的预解析。
//! 4. 路由状态：`script_name` 记录已被路由消费的前缀，`path_info` 记录剩余路径。
//! 5. 出站序列化：客户端链把 `Request` 写回字节流。

use std::collections::HashMap;

use bytes::Bytes;
use log::error;
use serde_json::Value;

use crate::{exception::Exception, param::*};

/// 表示一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// 全局请求 ID，用于在多线程环境下追踪日志
    id: u128,
    /// HTTP 请求方法
    method: HttpRequestMethod,
    /// 原始请求目标（包含查询字符串）
    path: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 标头列表，名称统一为小写
    headers: Vec<(String, String)>,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// 范围请求参数：(起始字节, 结束字节)
    range: Option<(u64, Option<u64>)>,
    /// 已被路由消费的路径前缀
    script_name: String,
    /// 尚未被路由消费的路径
    path_info: String,
    /// 由 `parse_query` 中间件填充的查询参数
    query: HashMap<String, String>,
    /// 请求体
    body: Bytes,
    /// 由 `json_request` 中间件填充的 JSON 负载
    data: Option<Value>,
}

impl Request {
    /// 以编程方式构造请求，主要供客户端链与测试使用。
    pub fn new(method: HttpRequestMethod, path: &str) -> Self {
        Self {
            id: 0,
            method,
            path: path.to_string(),
            version: HttpVersion::V1_1,
            headers: Vec::new(),
            accept_encoding: Vec::new(),
            range: None,
            script_name: String::new(),
            path_info: strip_query(path).to_string(),
            query: HashMap::new(),
            body: Bytes::new(),
            data: None,
        }
    }

    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 以空行切分标头区与请求体，标头区必须是合法的 UTF-8。
    /// 2. 解析请求行：提取方法、路径和协议版本。
    /// 3. 迭代解析标头，并预解析 `Range` 与 `Accept-Encoding`。
    /// 4. 按 `Content-Length` 截取请求体。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, body) = match find_subsequence(buffer, b"\r\n\r\n") {
            Some(pos) => (&buffer[..pos], &buffer[pos + 4..]),
            None => (buffer, &buffer[buffer.len()..]),
        };

        // 1. 将标头区转换为字符串，失败则判定为非法的 HTTP 请求
        let request_string = match std::str::from_utf8(head) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);
        let first_line = request_lines.next().unwrap_or("");

        // 2. 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let first_line_parts: Vec<&str> = first_line.split(' ').collect();
        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, first_line);
            return Err(Exception::UnSupportedRequestMethod);
        }

        let method = match first_line_parts[0].parse::<HttpRequestMethod>() {
            Ok(m) => m,
            Err(e) => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, first_line_parts[0]);
                return Err(e);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 路径中可能包含空格，虽然不规范但通过 join 尝试恢复
        let path = if first_line_parts.len() == 3 {
            first_line_parts[1].to_string()
        } else {
            first_line_parts[1..first_line_parts.len() - 1].join(" ")
        };

        // 3. 迭代各行解析 Headers
        let mut request = Self::new(method, &path);
        request.id = id;
        request.version = version;
        for line in request_lines {
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => request.push_header(name, value.trim()),
                None => {
                    error!("[ID{}]无法解析的标头行：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            }
        }

        // 4. 请求体
        let body = match request.header("content-length") {
            Some(len) => match len.parse::<usize>() {
                Ok(len) => &body[..len.min(body.len())],
                Err(_) => {
                    error!("[ID{}]非法的Content-Length：{}", id, len);
                    return Err(Exception::MalformedRequest);
                }
            },
            None => body,
        };
        request.body = Bytes::copy_from_slice(body);

        Ok(request)
    }

    /// 追加一个标头，同时维护预解析字段
    fn push_header(&mut self, name: &str, value: &str) {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            // 格式示例: Range: bytes=0-1023
            "range" => self.range = parse_range(value),
            "accept-encoding" => {
                self.accept_encoding = value
                    .split(',')
                    .filter_map(|token| token.split(';').next())
                    .filter_map(HttpEncoding::from_token)
                    .collect();
            }
            _ => {}
        }
        self.headers.push((name, value.to_string()));
    }

    /// 设置标头，已存在的同名标头会被替换
    pub fn set_header(&mut self, name: &str, value: &str) {
        let lower = name.to_lowercase();
        self.headers.retain(|(n, _)| *n != lower);
        self.push_header(name, value);
    }

    /// 构造器风格的 `set_header`
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// 构造器风格地设置请求体
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// 序列化为 HTTP/1.1 请求报文，供客户端链写入套接字
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1{}", self.method, self.path, CRLF);
        for (name, value) in &self.headers {
            if name == "content-length" {
                continue;
            }
            head.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        if !self.body.is_empty() {
            head.push_str(&format!("content-length: {}{}", self.body.len(), CRLF));
        }
        head.push_str(CRLF);
        [head.as_bytes(), &self.body].concat()
    }
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取请求 ID
    pub fn id(&self) -> u128 {
        self.id
    }

    /// 获取 HTTP 协议版本
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取原始请求目标（含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 大小写不敏感地查询标头
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// 全部标头
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 获取用户代理字符串
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &Vec<HttpEncoding> {
        &self.accept_encoding
    }

    /// 获取客户端接受的文件 MIME 类型
    pub fn accept(&self) -> Option<&str> {
        self.header("accept")
    }

    /// 获取 `Host` 标头
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// 获取 Range 请求的分片范围
    pub fn range(&self) -> Option<(u64, Option<u64>)> {
        self.range
    }

    /// 原始目标中的查询字符串部分
    pub fn query_string(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, q)| q)
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

// --- 中间件使用的修改器 ---

impl Request {
    pub fn set_id(&mut self, id: u128) {
        self.id = id;
    }

    pub fn set_path_info(&mut self, path_info: &str) {
        self.path_info = path_info.to_string();
    }

    pub fn set_script_name(&mut self, script_name: &str) {
        self.script_name = script_name.to_string();
    }

    pub fn set_query(&mut self, query: HashMap<String, String>) {
        self.query = query;
    }

    pub fn set_data(&mut self, data: Value) {
        self.data = Some(data);
    }

    /// 改写请求目标，路由状态随之重置
    pub fn set_target(&mut self, path: &str) {
        self.path = path.to_string();
        self.script_name.clear();
        self.path_info = strip_query(path).to_string();
    }

    pub fn set_method(&mut self, method: HttpRequestMethod) {
        self.method = method;
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn remove_header(&mut self, name: &str) {
        let lower = name.to_lowercase();
        self.headers.retain(|(n, _)| *n != lower);
    }

    /// 把 `path_info` 开头的 `prefix` 移入 `script_name`
    pub fn consume_prefix(&mut self, prefix: &str) {
        if let Some(rest) = self.path_info.strip_prefix(prefix) {
            self.script_name.push_str(prefix);
            self.path_info = rest.to_string();
        }
    }
}

fn strip_query(path: &str) -> &str {
    match path.split_once('?') {
        Some((p, _)) => p,
        None => path,
    }
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let bytes_part = value.trim().strip_prefix("bytes=")?;
    let (start, end) = bytes_part.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse::<u64>().ok()?),
    };
    Some((start, end))
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
