// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use crate::{
    exception::Exception,
    param::*,
    request::{find_subsequence, Request},
    util::HtmlBuilder,
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error, warn};
use serde_json::Value;

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    str,
};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: Option<DateTime<Utc>>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    headers: Vec<(String, String)>,
    content: Option<Bytes>,
    // 尚未序列化的 JSON 负载，由 json 中间件写入 content
    data: Option<Value>,
    // 尚未包装成完整文档的 HTML 片段
    fragment: Option<String>,
    // file_tree 命中目录时留下的标记，交给 directory_index / list_directories 处理
    directory: Option<PathBuf>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: None,
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            headers: Vec::new(),
            content: None,
            data: None,
            fragment: None,
            directory: None,
        }
    }

    /// 固定内容响应
    pub fn content(body: impl Into<Bytes>, content_type: &str, code: u16) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.set_content(body.into(), content_type);
        response
    }

    /// 带状态页面的错误响应，页面由 `HtmlBuilder` 生成
    pub fn from_status_code(code: u16, request: &Request) -> Self {
        debug!("[ID{}]生成状态页面：{}", request.id(), code);
        let mut response = Self::new();
        response.set_code(code);
        if code == 204 || code == 304 || request.method() == HttpRequestMethod::Head {
            return response;
        }
        let content = match code {
            404 => HtmlBuilder::from_status_code(404, Some(
                r"<h2>噢！</h2><p>你指定的网页无法找到。</p>"
            )),
            405 => HtmlBuilder::from_status_code(405, Some(
                r"<h2>噢！</h2><p>该资源不支持你使用的请求方法。</p>"
            )),
            406 => HtmlBuilder::from_status_code(406, Some(
                r"<h2>噢！</h2><p>服务器无法提供你可以接受的表示形式。</p>"
            )),
            500 => HtmlBuilder::from_status_code(500, Some(
                r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>"
            )),
            _ => HtmlBuilder::from_status_code(code, None),
        }
        .build();
        response.set_content(Bytes::from(content), "text/html;charset=utf-8");
        response
    }

    /// 重定向响应，`Location` 指向 `location`
    pub fn redirect(location: &str, code: u16, request: &Request) -> Self {
        let mut response = Self::from_status_code(code, request);
        response.set_header("Location", location);
        response
    }

    /// JSON 负载尚未序列化的响应
    pub fn json(data: Value) -> Self {
        let mut response = Self::new();
        response.data = Some(data);
        response
    }

    /// HTML 片段尚未包装的响应
    pub fn fragment(html: &str) -> Self {
        let mut response = Self::new();
        response.fragment = Some(html.to_string());
        response
    }

    /// 目录标记响应。未被目录中间件接管时表现为 404。
    pub fn directory(path: &Path, request: &Request) -> Self {
        let mut response = Self::from_status_code(404, request);
        response.directory = Some(path.to_path_buf());
        response
    }

    /// 解析上游返回的 HTTP 响应报文
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let split = match find_subsequence(buffer, b"\r\n\r\n") {
            Some(pos) => pos,
            None => {
                error!("[ID{}]上游响应缺少标头结束标记", id);
                return Err(Exception::MalformedResponse);
            }
        };
        let head = str::from_utf8(&buffer[..split]).map_err(|_| Exception::MalformedResponse)?;
        let rest = &buffer[split + 4..];

        let mut lines = head.split(CRLF);
        let status_line = lines.next().unwrap_or("");
        let mut parts = status_line.splitn(3, ' ');
        let version = match parts.next() {
            Some("HTTP/1.1") => HttpVersion::V1_1,
            Some("HTTP/1.0") => HttpVersion::V1_0,
            _ => return Err(Exception::MalformedResponse),
        };
        let code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or(Exception::MalformedResponse)?;

        let mut response = Self::new();
        response.version = version;
        response.set_code(code);
        if let Some(information) = parts.next() {
            response.information = information.to_string();
        }

        let mut content_length = None;
        let mut chunked = false;
        for line in lines {
            let (name, value) = line.split_once(':').ok_or(Exception::MalformedResponse)?;
            let value = value.trim();
            match name.trim().to_lowercase().as_str() {
                "content-type" => response.content_type = Some(value.to_string()),
                "content-length" => {
                    content_length =
                        Some(value.parse::<usize>().map_err(|_| Exception::MalformedResponse)?)
                }
                "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
                "date" => {
                    response.date = DateTime::parse_from_rfc2822(value)
                        .ok()
                        .map(|d| d.with_timezone(&Utc))
                }
                "server" => response.server_name = value.to_string(),
                "connection" => {}
                _ => response.headers.push((name.trim().to_string(), value.to_string())),
            }
        }

        let body = if chunked {
            decode_chunked(rest)?
        } else {
            match content_length {
                Some(len) if len <= rest.len() => rest[..len].to_vec(),
                Some(len) => {
                    error!("[ID{}]上游响应体不完整：期望{}字节，实际{}字节", id, len, rest.len());
                    return Err(Exception::MalformedResponse);
                }
                None => rest.to_vec(),
            }
        };
        response.content_length = body.len() as u64;
        if !body.is_empty() {
            response.content = Some(Bytes::from(body));
        }
        Ok(response)
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match reason_phrase(code) {
            Some(phrase) => phrase.to_string(),
            None => {
                warn!("未知的状态码：{}", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn set_content(&mut self, content: Bytes, content_type: &str) -> &mut Self {
        self.content_length = content.len() as u64;
        self.content = Some(content);
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// 替换正文字节但不改变内容类型，供压缩等后处理使用
    pub fn replace_body(&mut self, content: Bytes) -> &mut Self {
        self.content_length = content.len() as u64;
        self.content = Some(content);
        self
    }

    pub fn set_content_encoding(&mut self, encoding: Option<HttpEncoding>) -> &mut Self {
        self.content_encoding = encoding;
        self
    }

    /// HEAD 响应：丢弃正文但保留 Content-Length
    pub fn strip_body(&mut self) -> &mut Self {
        self.content = None;
        self
    }

    pub fn set_date(&mut self, date: DateTime<Utc>) -> &mut Self {
        self.date = Some(date);
        self
    }

    /// 设置标头，已存在的同名标头（大小写不敏感）会被替换
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 追加标头，保留已有的同名项（例如多个 `Set-Cookie`）
    pub fn append_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn set_data(&mut self, data: Value) -> &mut Self {
        self.data = Some(data);
        self
    }

    pub fn take_data(&mut self) -> Option<Value> {
        self.data.take()
    }

    pub fn take_fragment(&mut self) -> Option<String> {
        self.fragment.take()
    }

    pub fn take_directory(&mut self) -> Option<PathBuf> {
        self.directory.take()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let status_code: &str = &self.status_code.to_string();
        let information: &str = &self.information;
        let content_length: &str = &self.content_length.to_string();
        let server: &str = &self.server_name;

        let header = [
            version,
            " ",
            status_code,
            " ",
            information,
            CRLF,
            match &self.content_type {
                Some(t) => ["Content-Type: ", t, CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            match self.content_encoding {
                Some(e) => ["Content-Encoding: ", &e.to_string(), CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            "Content-Length: ",
            content_length,
            CRLF,
            match &self.date {
                Some(d) => ["Date: ", &format_date(d), CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            "Server: ",
            server,
            CRLF,
            self.headers
                .iter()
                .map(|(n, v)| [n.as_str(), ": ", v.as_str(), CRLF].concat())
                .collect::<String>()
                .as_str(),
            CRLF,
        ]
        .concat();
        [
            header.as_bytes(),
            match &self.content {
                Some(c) => &c[..],
                None => &[],
            },
        ]
        .concat()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn get_content_length(&self) -> u64 {
        self.content_length
    }

    pub fn date(&self) -> Option<&DateTime<Utc>> {
        self.date.as_ref()
    }

    /// 大小写不敏感地查询附加标头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status_code, 301 | 302 | 303 | 307 | 308)
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, Exception> {
    let mut body = Vec::new();
    loop {
        let line_end = find_subsequence(data, b"\r\n").ok_or(Exception::MalformedResponse)?;
        let size_line = str::from_utf8(&data[..line_end]).map_err(|_| Exception::MalformedResponse)?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size =
            usize::from_str_radix(size_str, 16).map_err(|_| Exception::MalformedResponse)?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        let end = size.checked_add(2).ok_or(Exception::MalformedResponse)?;
        if data.len() < end {
            return Err(Exception::MalformedResponse);
        }
        body.extend_from_slice(&data[..size]);
        data = &data[end..];
    }
}

pub(crate) fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        let compressed_size = compressed.len();
        let ratio = if original_size > 0 {
            ((original_size as i64 - compressed_size as i64) as f64 / original_size as f64) * 100.0
        } else {
            0.0
        };
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes, 压缩率: {:.1}%",
            mode, original_size, compressed_size, ratio
        );
    }

    result
}

pub(crate) fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/jpg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/bmp",
        "image/x-icon",
        "video/",
        "audio/",
        "application/zip",
        "application/x-rar",
        "application/x-7z-compressed",
        "application/gzip",
        "application/x-gzip",
        "font/woff",
        "font/woff2",
        "application/vnd.ms-fontobject",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

pub(crate) fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn get(path: &str) -> Request {
        Request::new(HttpRequestMethod::Get, path)
    }

    #[test]
    fn test_format_date() {
        let formatted = format_date(&Utc::now());
        assert!(formatted.contains("+0000") || formatted.contains("GMT"));
    }

    #[test]
    fn test_compress_none() {
        let data = b"Hello, World!".to_vec();
        let result = compress(data.clone(), None).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_compress_gzip() {
        let data = b"Hello, World! This is a test string for compression.".to_vec();
        let result = compress(data.clone(), Some(HttpEncoding::Gzip)).unwrap();

        assert_ne!(result, data);
        assert_eq!(&result[0..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_compress_large_data() {
        let data = vec![b'A'; 10000];
        let result_gzip = compress(data.clone(), Some(HttpEncoding::Gzip)).unwrap();
        let result_deflate = compress(data.clone(), Some(HttpEncoding::Deflate)).unwrap();
        let result_br = compress(data.clone(), Some(HttpEncoding::Br)).unwrap();

        assert!(result_gzip.len() < data.len());
        assert!(result_deflate.len() < data.len());
        assert!(result_br.len() < data.len());
    }

    #[test]
    fn test_decide_encoding() {
        assert_eq!(
            decide_encoding(&[HttpEncoding::Br, HttpEncoding::Gzip]),
            Some(HttpEncoding::Gzip)
        );
        assert_eq!(
            decide_encoding(&[HttpEncoding::Deflate]),
            Some(HttpEncoding::Deflate)
        );
        assert_eq!(decide_encoding(&[]), None);
    }

    #[test]
    fn test_skip_compression() {
        assert!(should_skip_compression("image/png"));
        assert!(should_skip_compression("video/mp4"));
        assert!(!should_skip_compression("text/html;charset=utf-8"));
    }

    #[test]
    fn test_response_new() {
        let response = Response::new();

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.information(), "OK");
        assert!(response.body().is_none());
    }

    #[test]
    fn test_response_as_bytes_basic() {
        let bytes = Response::new().as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);

        assert!(response_str.starts_with("HTTP/1.1 200 OK"));
        assert!(response_str.contains("Content-Length: 0"));
        assert!(response_str.contains("Server: webchain"));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_response_as_bytes_with_content() {
        let response = Response::content("Hello", "text/plain", 200);
        let bytes = response.as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);

        assert!(response_str.contains("Content-Type: text/plain"));
        assert!(response_str.contains("Content-Length: 5"));
        assert!(response_str.ends_with("Hello"));
    }

    #[test]
    fn test_response_status_code_various() {
        for (code, expected_info) in [
            (200, "OK"),
            (201, "Created"),
            (204, "No Content"),
            (301, "Moved Permanently"),
            (400, "Bad Request"),
            (404, "Not Found"),
            (500, "Internal Server Error"),
        ] {
            let mut response = Response::new();
            response.set_code(code);
            assert_eq!(response.status_code(), code);
            assert_eq!(response.information(), expected_info);
        }
    }

    #[test]
    fn test_unknown_status_code_does_not_panic() {
        let mut response = Response::new();
        response.set_code(799);
        assert_eq!(response.information(), "Unknown");
    }

    #[test]
    fn test_response_with_gzip_encoding() {
        let mut response = Response::content("test", "text/plain", 200);
        response.set_content_encoding(Some(HttpEncoding::Gzip));
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();

        assert!(response_str.contains("Content-Encoding: gzip"));
    }

    #[test]
    fn test_set_header_replaces() {
        let mut response = Response::new();
        response.set_header("X-Test", "a");
        response.set_header("x-test", "b");
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.header("X-TEST"), Some("b"));
    }

    #[test]
    fn test_status_page() {
        let response = Response::from_status_code(404, &get("/missing"));
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.content_type(), Some("text/html;charset=utf-8"));
        let body = String::from_utf8_lossy(response.body().unwrap()).to_string();
        assert!(body.contains("<!DOCTYPE html>"));
        assert!(body.contains("404"));
    }

    #[test]
    fn test_status_page_head_has_no_body() {
        let request = Request::new(HttpRequestMethod::Head, "/missing");
        let response = Response::from_status_code(404, &request);
        assert!(response.body().is_none());
    }

    #[test]
    fn test_redirect_location() {
        let response = Response::redirect("/new", 301, &get("/old"));
        assert_eq!(response.status_code(), 301);
        assert_eq!(response.header("location"), Some("/new"));
        assert!(response.is_redirect());
    }

    #[test]
    fn test_strip_body_keeps_length() {
        let mut response = Response::content("Hello", "text/plain", 200);
        response.strip_body();
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();
        assert!(response_str.contains("Content-Length: 5"));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_response_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nX-Up: 1\r\n\r\nHello";
        let response = Response::try_from(raw, 0).unwrap();

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.body().unwrap().as_ref(), b"Hello");
        assert_eq!(response.header("x-up"), Some("1"));
    }

    #[test]
    fn test_parse_response_chunked() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n";
        let response = Response::try_from(raw, 0).unwrap();

        assert_eq!(response.body().unwrap().as_ref(), b"Hello World");
    }

    #[test]
    fn test_parse_response_chunk_size_overflow() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nHello\r\n0\r\n\r\n";
        assert_eq!(
            Response::try_from(raw, 0).unwrap_err(),
            Exception::MalformedResponse
        );
    }

    #[test]
    fn test_parse_response_truncated() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nshort";
        assert_eq!(
            Response::try_from(raw, 0).unwrap_err(),
            Exception::MalformedResponse
        );
    }
}
