// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 快捷入口
//!
//! 与 `Chain` 上每个操作同名的自由函数：新建一条基于内置注册表的链并立即调用该操作。
//!
//! ```
//! use webchain::shortcut;
//!
//! let mut chain = shortcut::method(&["GET"]).unwrap();
//! chain.content("hello", "text/plain").unwrap();
//! let _handler = chain.finish();
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde_json::Value;

use crate::{
    branch::Branches,
    chain::Chain,
    exception::Exception,
    handler::Handler,
    middleware::{CommonOptions, CorsOptions},
    request::Request,
    responder::FileTreeOptions,
    response::Response,
};

/// 新建一条空链
pub fn create() -> Chain {
    Chain::new()
}

/// 新建一条链，并在 `prefix` 下挂载 `setup` 声明的子链
pub fn create_routed<F>(prefix: &str, setup: F) -> Result<Chain, Exception>
where
    F: FnOnce(&mut Chain) -> Result<(), Exception>,
{
    let mut chain = Chain::new();
    chain.route(prefix, setup)?;
    Ok(chain)
}

macro_rules! shortcuts {
    ($( $(#[$meta:meta])* $name:ident ( $( $arg:ident : $ty:ty ),* ); )*) => {
        $(
            $(#[$meta])*
            pub fn $name($( $arg: $ty ),*) -> Result<Chain, Exception> {
                let mut chain = Chain::new();
                chain.$name($( $arg ),*)?;
                Ok(chain)
            }
        )*
    };
}

shortcuts! {
    link(factory: impl Fn(Handler) -> Handler + Send + Sync + 'static);
    terminate(factory: impl Fn(Handler) -> Handler + Send + Sync + 'static);
    invoke(name: &str, args: Value);

    time();
    error(debug: bool);
    log();
    headers(headers: &[(&str, &str)]);
    date();
    permanent();
    normalize();
    parse_query();
    directory_index(index: &str);
    list_directories();
    handle_html_fragment_responses(title: &str);
    handle_json_responses();
    json(indent: Option<usize>);
    json_request();
    content_request();
    compress();
    cors(options: CorsOptions);
    favicon(path: Option<PathBuf>);
    tap(tap: impl Fn(&mut Request) + Send + Sync + 'static);
    trap(trap: impl Fn(&mut Response) + Send + Sync + 'static);
    common(options: CommonOptions);
    redirect_trap(max_redirects: usize);

    method(methods: &[&str]);
    content_type(types: &[&str]);
    language(languages: &[&str]);
    charset(charsets: &[&str]);
    encoding(encodings: &[&str]);
    host(hosts: &[&str]);
    methods(setup: impl FnOnce(&mut Branches) -> Result<(), Exception>);
    content_types(setup: impl FnOnce(&mut Branches) -> Result<(), Exception>);
    languages(setup: impl FnOnce(&mut Branches) -> Result<(), Exception>);
    charsets(setup: impl FnOnce(&mut Branches) -> Result<(), Exception>);
    encodings(setup: impl FnOnce(&mut Branches) -> Result<(), Exception>);
    hosts(setup: impl FnOnce(&mut Branches) -> Result<(), Exception>);
    segments(setup: impl FnOnce(&mut Branches) -> Result<(), Exception>);

    route(prefix: &str, setup: impl FnOnce(&mut Chain) -> Result<(), Exception>);
    branch(paths: Vec<(&str, Handler)>);
    cap();
    cap_with(not_found: Handler);

    app(handler: Handler);
    content(body: impl Into<Bytes>, content_type: &str);
    ok(body: impl Into<Bytes>, content_type: &str);
    content_with_status(body: impl Into<Bytes>, content_type: &str, code: u16);
    not_found();
    bad_request();
    method_not_allowed();
    not_acceptable();
    file(path: impl AsRef<Path>, content_type: Option<&str>);
    file_tree(root: impl AsRef<Path>, options: FileTreeOptions);
    redirect_permanent(location: &str);
    redirect_temporary(location: &str);
    redirect_tree(base: &str);
    proxy(url: &str);
    proxy_tree(url: &str);
}

/// 以异步函数的返回内容作为响应体
pub fn content_app<F, Fut, B>(app: F) -> Result<Chain, Exception>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<B, Exception>> + Send + 'static,
    B: Into<Bytes>,
{
    let mut chain = Chain::new();
    chain.content_app(app)?;
    Ok(chain)
}
