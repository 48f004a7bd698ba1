// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求判别与内容协商
//!
//! 每个 `Discriminator` 从请求中取出一个键（方法、首选媒体类型、语言……），
//! 在分派表中选出对应的处理器；选不出时交给回退处理器。

use std::cmp::Ordering;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::{
    handler::{handler_fn, Handle, Handler},
    request::Request,
    responder,
};

/// 判别键 -> 处理器，按声明顺序保存。
///
/// 协商时多个键同样可接受（例如 `Accept: */*`），先声明的胜出。
/// 重复插入同一个键时替换处理器，位置不变。
#[derive(Clone, Default)]
pub struct KeyTable {
    entries: Vec<(String, Handler)>,
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, handler: Handler) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((key, handler)),
        }
    }

    pub fn get(&self, key: &str) -> Option<(&String, &Handler)> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(k, handler)| (k, handler))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Handler)> {
        self.entries.iter().map(|(k, handler)| (k, handler))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Handler)> for KeyTable {
    fn from_iter<I: IntoIterator<Item = (String, Handler)>>(iter: I) -> Self {
        let mut table = KeyTable::new();
        for (key, handler) in iter {
            table.insert(key, handler);
        }
        table
    }
}

/// 分派表，装配后在各个请求之间共享
pub type DispatchTable = Arc<KeyTable>;

lazy_static! {
    static ref QUALITY_PARAM: Regex = Regex::new(r"^\s*[qQ]\s*=\s*([01](?:\.[0-9]{0,3})?)\s*$").unwrap();
}

/// 请求判别方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discriminator {
    /// 请求方法
    Method,
    /// `Accept` 协商出的媒体类型
    ContentType,
    /// `Accept-Language` 协商出的语言
    Language,
    /// `Accept-Charset` 协商出的字符集
    Charset,
    /// `Accept-Encoding` 协商出的编码
    Encoding,
    /// `Host` 头
    Host,
    /// 剩余路径的第一段，命中后被消耗
    Segment,
}

impl Discriminator {
    /// 统一分派表键的写法
    pub fn normalize_key(self, key: &str) -> String {
        let key = key.trim();
        match self {
            Discriminator::Method => key.to_ascii_uppercase(),
            Discriminator::Segment => key.trim_matches('/').to_string(),
            _ => key.to_ascii_lowercase(),
        }
    }

    /// 没有任何键匹配时的拒绝响应器
    pub fn refusal(self) -> Handler {
        match self {
            Discriminator::Method => responder::method_not_allowed(),
            Discriminator::ContentType
            | Discriminator::Language
            | Discriminator::Charset
            | Discriminator::Encoding => responder::not_acceptable(),
            Discriminator::Host | Discriminator::Segment => responder::not_found(),
        }
    }

    /// 构造按本判别方式分派的处理器
    pub fn dispatch(self, table: DispatchTable, fallback: Handler) -> Handler {
        handler_fn(move |mut request: Request| {
            let selected = self.select(&table, &request).map(|(key, handler)| {
                debug!("[ID{}]{:?}分派命中：{}", request.id(), self, key);
                if self == Discriminator::Segment {
                    let prefix = format!("/{}", key);
                    request.consume_prefix(&prefix);
                }
                Arc::clone(handler)
            });
            match selected {
                Some(handler) => handler.handle(request),
                None => fallback.handle(request),
            }
        })
    }

    /// 在分派表中选出与请求匹配的条目
    pub fn select<'a>(
        self,
        table: &'a KeyTable,
        request: &Request,
    ) -> Option<(&'a String, &'a Handler)> {
        match self {
            Discriminator::Method => table.get(request.method().to_string().as_str()),
            Discriminator::ContentType => {
                let header = request.accept().unwrap_or("*/*");
                negotiate(table, header, media_range_matches)
            }
            Discriminator::Language => {
                let header = request.header("accept-language").unwrap_or("*");
                negotiate(table, header, language_matches)
            }
            Discriminator::Charset => {
                let header = request.header("accept-charset").unwrap_or("*");
                negotiate(table, header, token_matches)
            }
            Discriminator::Encoding => {
                let header = request.header("accept-encoding").unwrap_or("*");
                negotiate(table, header, token_matches)
            }
            Discriminator::Host => {
                let host = request.host()?.to_ascii_lowercase();
                table
                    .get(host.as_str())
                    .or_else(|| table.get(strip_port(&host)))
                    .or_else(|| table.get("*"))
            }
            Discriminator::Segment => table.get(first_segment(request.path_info())),
        }
    }
}

/// `Accept` 系列头部中的一项偏好
#[derive(Debug, Clone, PartialEq)]
pub struct Preference {
    pub value: String,
    pub quality: f32,
}

/// 解析 `Accept` 系列头部，按质量值降序排列，同质量保持原有顺序
pub fn parse_preferences(header: &str) -> Vec<Preference> {
    let mut preferences: Vec<Preference> = header
        .split(',')
        .filter_map(|item| {
            let mut params = item.split(';');
            let value = params.next()?.trim().to_ascii_lowercase();
            if value.is_empty() {
                return None;
            }
            let quality = params
                .find_map(|param| QUALITY_PARAM.captures(param))
                .and_then(|caps| caps.get(1)?.as_str().parse::<f32>().ok())
                .unwrap_or(1.0);
            Some(Preference { value, quality })
        })
        .collect();
    // sort_by 是稳定排序
    preferences.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal));
    preferences
}

fn negotiate<'a>(
    table: &'a KeyTable,
    header: &str,
    matches: fn(&str, &str) -> bool,
) -> Option<(&'a String, &'a Handler)> {
    parse_preferences(header)
        .into_iter()
        .filter(|preference| preference.quality > 0.0)
        .find_map(|preference| {
            table
                .iter()
                .find(|(key, _)| matches(&preference.value, key))
        })
}

/// 媒体范围匹配：`*/*`、`text/*` 或完全一致
fn media_range_matches(range: &str, key: &str) -> bool {
    if range == "*/*" || range == "*" || range == key {
        return true;
    }
    match (range.split_once('/'), key.split_once('/')) {
        (Some((range_type, "*")), Some((key_type, _))) => range_type == key_type,
        _ => false,
    }
}

/// 语言匹配：完全一致，或一方是另一方的前缀子标签（`en` 与 `en-us`）
fn language_matches(range: &str, key: &str) -> bool {
    range == "*"
        || range == key
        || key.starts_with(&format!("{}-", range))
        || range.starts_with(&format!("{}-", key))
}

fn token_matches(range: &str, key: &str) -> bool {
    range == "*" || range == key
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// 剩余路径的第一段（不含斜杠）
pub fn first_segment(path_info: &str) -> &str {
    let trimmed = path_info.strip_prefix('/').unwrap_or(path_info);
    trimmed.split('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::HttpRequestMethod;
    use crate::response::Response;

    fn labelled(label: &'static str) -> Handler {
        handler_fn(move |_| async move { Ok(Response::content(label, "text/plain", 200)) })
    }

    fn table(keys: &[&'static str]) -> KeyTable {
        keys.iter()
            .map(|key| (key.to_string(), labelled(key)))
            .collect()
    }

    fn request() -> Request {
        Request::new(HttpRequestMethod::Get, "/")
    }

    #[test]
    fn test_parse_preferences_orders_by_quality() {
        let preferences = parse_preferences("text/html;q=0.5, application/json, */*;q=0.1");
        let values: Vec<&str> = preferences.iter().map(|p| p.value.as_str()).collect();
        assert_eq!(values, vec!["application/json", "text/html", "*/*"]);
        assert_eq!(preferences[1].quality, 0.5);
    }

    #[test]
    fn test_parse_preferences_ignores_bad_quality() {
        let preferences = parse_preferences("gzip;q=abc, br");
        assert_eq!(preferences.len(), 2);
        assert!(preferences.iter().all(|p| p.quality == 1.0));
    }

    #[test]
    fn test_content_type_negotiation() {
        let table = table(&["application/json", "text/html"]);
        let request = request().with_header("Accept", "text/*;q=0.9, application/json;q=0.2");
        let (key, _) = Discriminator::ContentType.select(&table, &request).unwrap();
        assert_eq!(key, "text/html");
    }

    #[test]
    fn test_content_type_missing_accept_takes_first() {
        let table = table(&["text/html", "application/json"]);
        let (key, _) = Discriminator::ContentType.select(&table, &request()).unwrap();
        assert_eq!(key, "text/html");

        let table = self::table(&["application/json", "text/html"]);
        let (key, _) = Discriminator::ContentType.select(&table, &request()).unwrap();
        assert_eq!(key, "application/json");
    }

    #[test]
    fn test_wildcard_ties_follow_declaration_order() {
        let table = table(&["fr", "en", "de"]);
        let request = request().with_header("Accept-Language", "*");
        let (key, _) = Discriminator::Language.select(&table, &request).unwrap();
        assert_eq!(key, "fr");

        let table = self::table(&["utf-8", "iso-8859-1"]);
        let (key, _) = Discriminator::Charset.select(&table, &self::request()).unwrap();
        assert_eq!(key, "utf-8");
    }

    #[test]
    fn test_key_table_replaces_in_place() {
        let mut table = table(&["a", "b"]);
        let replacement = labelled("c");
        table.insert("a".to_string(), Arc::clone(&replacement));
        let keys: Vec<&str> = table.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(Arc::ptr_eq(table.get("a").unwrap().1, &replacement));
    }

    #[test]
    fn test_content_type_refused() {
        let table = table(&["application/json"]);
        let request = request().with_header("Accept", "image/png, text/html;q=0");
        assert!(Discriminator::ContentType.select(&table, &request).is_none());
    }

    #[test]
    fn test_language_prefix() {
        let table = table(&["en", "fr"]);
        let request = request().with_header("Accept-Language", "fr-CA, en;q=0.8");
        let (key, _) = Discriminator::Language.select(&table, &request).unwrap();
        assert_eq!(key, "fr");
    }

    #[test]
    fn test_host_with_port() {
        let table = table(&["example.com"]);
        let request = request().with_header("Host", "Example.com:8080");
        let (key, _) = Discriminator::Host.select(&table, &request).unwrap();
        assert_eq!(key, "example.com");
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(Discriminator::Method.normalize_key("get"), "GET");
        assert_eq!(Discriminator::ContentType.normalize_key("Text/HTML"), "text/html");
        assert_eq!(Discriminator::Segment.normalize_key("/users/"), "users");
    }

    #[test]
    fn test_first_segment() {
        assert_eq!(first_segment("/users/7"), "users");
        assert_eq!(first_segment("/"), "");
        assert_eq!(first_segment(""), "");
    }

    #[tokio::test]
    async fn test_segment_dispatch_consumes_prefix() {
        let inner = handler_fn(|request: Request| async move {
            Ok(Response::content(
                format!("{}|{}", request.script_name(), request.path_info()),
                "text/plain",
                200,
            ))
        });
        let mut table = KeyTable::new();
        table.insert("users".to_string(), inner);
        let handler = Discriminator::Segment.dispatch(Arc::new(table), responder::not_found());

        let response = handler
            .handle(Request::new(HttpRequestMethod::Get, "/users/7"))
            .await
            .unwrap();
        assert_eq!(response.body().unwrap().as_ref(), b"/users|/7");

        let response = handler
            .handle(Request::new(HttpRequestMethod::Get, "/posts"))
            .await
            .unwrap();
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn test_refusal_codes() {
        let req = request();
        for (discriminator, code) in [
            (Discriminator::Method, 405),
            (Discriminator::Encoding, 406),
            (Discriminator::Host, 404),
        ] {
            let response = discriminator.refusal().handle(req.clone()).await.unwrap();
            assert_eq!(response.status_code(), code);
        }
    }
}
