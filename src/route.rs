// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路径路由
//!
//! 路由在请求的 `path_info` 上工作：命中的前缀被移入 `script_name`，
//! 子链只看到剩余路径。

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::{
    chain::Chain,
    exception::Exception,
    handler::{handler_fn, Handle, Handler},
    negotiate::{Discriminator, KeyTable},
    registry::Registry,
    request::Request,
    responder,
};

/// 规范化路由前缀：以 `/` 开头，不以 `/` 结尾；根前缀为空串
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// 前缀必须落在路径段边界上：`/api` 匹配 `/api` 与 `/api/x`，不匹配 `/apix`
pub(crate) fn matches_prefix(path_info: &str, prefix: &str) -> bool {
    match path_info.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// 前缀路由处理器
pub fn route(prefix: String, inner: Handler, next: Handler) -> Handler {
    handler_fn(move |mut request: Request| {
        if matches_prefix(request.path_info(), &prefix) {
            debug!("[ID{}]路由前缀命中：{}", request.id(), prefix);
            request.consume_prefix(&prefix);
            inner.handle(request)
        } else {
            next.handle(request)
        }
    })
}

/// 剩余路径为空或 `/` 时交给下游，否则交给 `not_found`
pub fn cap(next: Handler, not_found: Handler) -> Handler {
    handler_fn(move |request: Request| {
        if matches!(request.path_info(), "" | "/") {
            next.handle(request)
        } else {
            not_found.handle(request)
        }
    })
}

impl Chain {
    /// 在前缀下挂载一条子链。子链没有终结时以 404 结束。
    pub fn route<F>(&mut self, prefix: &str, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Chain) -> Result<(), Exception>,
    {
        if self.is_terminated() {
            return Err(Exception::ChainTerminated);
        }
        let mut sub = self.registry().create();
        setup(&mut sub)?;
        let prefix = normalize_prefix(prefix);
        self.link(move |next| route(prefix.clone(), sub.finish(), next))
    }

    /// 按第一段路径分派到现成的处理器，未命中时交给下游
    pub fn branch(&mut self, paths: Vec<(&str, Handler)>) -> Result<&mut Self, Exception> {
        let table: KeyTable = paths
            .into_iter()
            .map(|(segment, handler)| (Discriminator::Segment.normalize_key(segment), handler))
            .collect();
        let table = Arc::new(table);
        self.link(move |next| Discriminator::Segment.dispatch(Arc::clone(&table), next))
    }

    /// 只放行已经没有剩余路径的请求
    pub fn cap(&mut self) -> Result<&mut Self, Exception> {
        self.link(|next| cap(next, responder::not_found()))
    }

    /// 指定剩余路径非空时的处理器
    pub fn cap_with(&mut self, not_found: Handler) -> Result<&mut Self, Exception> {
        self.link(move |next| cap(next, Arc::clone(&not_found)))
    }
}

pub(crate) fn register_builtins(registry: &mut Registry) {
    registry.define(
        "cap",
        Arc::new(|chain: &mut Chain, _args: &Value| {
            chain.cap()?;
            Ok(())
        }),
    );
}
