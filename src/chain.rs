// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 中间件链
//!
//! `Chain` 持有一个“管线装配器”（`end`）：给定终端处理器，返回层层包装后的处理器。
//! 所有高层操作（路由、分支、内容协商、终端响应器……）都只由两个原语构成：
//!
//! - `link`：追加一层中间件。先追加的位于外层，最先看到请求、最后看到响应，
//!   即 `link(f1).link(f2)` 装配出 `f1(f2(终端))`。
//! - `terminate`：与 `link` 相同，但随后冻结该链，之后的任何追加都返回
//!   `Exception::ChainTerminated`，且不改变已装配的结果。
//!
//! 装配器可以被多次调用（`finish`、`server`、`client`、外层路由各调用一次），
//! 因此中间件工厂在构造阶段必须没有副作用。

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::{
    exception::Exception,
    handler::{Handler, Middleware},
    registry::Registry,
    responder,
    server::{Server, ServerHandle},
};

/// 管线装配器：终端处理器 -> 完整处理器
pub type Assembler = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// 中间件链构建器
#[derive(Clone)]
pub struct Chain {
    end: Assembler,
    terminated: bool,
    registry: Registry,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// 基于内置注册表创建一个空链
    pub fn new() -> Self {
        Self::with_registry(Registry::base())
    }

    /// 基于指定注册表创建一个空链，扩展出的具名操作随注册表传播
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            end: Arc::new(|next| next),
            terminated: false,
            registry,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    // --- 组合原语 ---

    /// 追加一层中间件
    pub fn link<F>(&mut self, factory: F) -> Result<&mut Self, Exception>
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        if self.terminated {
            debug!("拒绝向已终结的链追加环节");
            return Err(Exception::ChainTerminated);
        }
        let end = Arc::clone(&self.end);
        self.end = Arc::new(move |next| end(factory(next)));
        Ok(self)
    }

    /// 追加一层带强类型选项的中间件
    pub fn link_with<F, O>(&mut self, factory: F, options: O) -> Result<&mut Self, Exception>
    where
        F: Fn(Handler, &O) -> Handler + Send + Sync + 'static,
        O: Send + Sync + 'static,
    {
        self.link(move |next| factory(next, &options))
    }

    /// 以指定选项安装一个 `Middleware`
    pub fn apply<M: Middleware>(
        &mut self,
        middleware: M,
        options: M::Options,
    ) -> Result<&mut Self, Exception> {
        self.link_with(move |next, options| middleware.wrap(next, options), options)
    }

    /// 追加最后一层并冻结该链
    pub fn terminate<F>(&mut self, factory: F) -> Result<&mut Self, Exception>
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        self.link(factory)?;
        self.terminated = true;
        Ok(self)
    }

    // --- 具名操作 ---

    /// 把中间件注册为本链的具名操作，返回实际使用的名称。
    ///
    /// 只影响本链（以及之后从本链声明的分支）持有的注册表副本。
    pub fn add<M: Middleware>(&mut self, middleware: M, name: &str) -> String {
        self.registry.add(middleware, name)
    }

    /// 按名称调用操作，`args` 会被反序列化为该操作的选项
    pub fn invoke(&mut self, name: &str, args: Value) -> Result<&mut Self, Exception> {
        let operation = self
            .registry
            .lookup(name)
            .ok_or_else(|| Exception::UnknownOperation(name.to_string()))?;
        operation(self, &args)?;
        Ok(self)
    }

    // --- 装配与终结形式 ---

    /// 以给定终端装配整条链
    pub fn assemble(&self, terminal: Handler) -> Handler {
        (self.end)(terminal)
    }

    /// 不提供下游终端地装配，未被处理的请求落到 404
    pub fn finish(&self) -> Handler {
        self.assemble(responder::not_found())
    }

    /// 装配为监听服务器
    pub fn server(&self) -> Server {
        Server::new(self.finish())
    }

    /// 装配并开始监听
    pub async fn listen(&self, port: u16, host: &str) -> Result<ServerHandle, Exception> {
        self.server().listen(port, host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, Handle};
    use crate::param::HttpRequestMethod;
    use crate::request::Request;
    use crate::response::Response;
    use proptest::prelude::*;
    use std::sync::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    /// 记录请求与响应经过顺序的中间件
    fn recorder(trace: Trace, label: String) -> impl Fn(Handler) -> Handler + Send + Sync {
        move |next: Handler| {
            let trace = Arc::clone(&trace);
            let label = label.clone();
            handler_fn(move |request| {
                trace.lock().unwrap().push(format!("{} in", label));
                let fut = next.handle(request);
                let trace = Arc::clone(&trace);
                let label = label.clone();
                async move {
                    let response = fut.await;
                    trace.lock().unwrap().push(format!("{} out", label));
                    response
                }
            })
        }
    }

    fn terminal(trace: Trace) -> Handler {
        handler_fn(move |_| {
            trace.lock().unwrap().push("terminal".to_string());
            async { Ok(Response::content("done", "text/plain", 200)) }
        })
    }

    fn get(path: &str) -> Request {
        Request::new(HttpRequestMethod::Get, path)
    }

    #[tokio::test]
    async fn test_first_link_is_outermost() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let mut chain = Chain::new();
        for label in ["f1", "f2", "f3"] {
            chain
                .link(recorder(Arc::clone(&trace), label.to_string()))
                .unwrap();
        }

        let handler = chain.assemble(terminal(Arc::clone(&trace)));
        handler.handle(get("/")).await.unwrap();

        assert_eq!(
            *trace.lock().unwrap(),
            vec!["f1 in", "f2 in", "f3 in", "terminal", "f3 out", "f2 out", "f1 out"]
        );
    }

    #[tokio::test]
    async fn test_link_does_not_invoke_handlers() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let mut chain = Chain::new();
        chain.link(recorder(Arc::clone(&trace), "f".to_string())).unwrap();
        let _handler = chain.assemble(terminal(Arc::clone(&trace)));
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_freezes_chain() {
        let mut chain = Chain::new();
        chain.content("hello", "text/plain").unwrap();
        assert!(chain.is_terminated());

        let err = chain
            .link(|_next| handler_fn(|_| async { Ok(Response::content("x", "text/plain", 500)) }))
            .err();
        assert_eq!(err, Some(Exception::ChainTerminated));
        let err = chain.terminate(|next| next).err();
        assert_eq!(err, Some(Exception::ChainTerminated));

        let response = chain.finish().handle(get("/")).await.unwrap();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body().unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_empty_chain_finishes_with_not_found() {
        let response = Chain::new().finish().handle(get("/")).await.unwrap();
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn test_link_with_passes_options() {
        struct Banner {
            text: String,
        }
        let mut chain = Chain::new();
        chain
            .link_with(
                |_next, options: &Banner| {
                    let text = options.text.clone();
                    handler_fn(move |_| {
                        let text = text.clone();
                        async move { Ok(Response::content(text, "text/plain", 200)) }
                    })
                },
                Banner {
                    text: "banner".to_string(),
                },
            )
            .unwrap();
        let response = chain.finish().handle(get("/")).await.unwrap();
        assert_eq!(response.body().unwrap().as_ref(), b"banner");
    }

    #[tokio::test]
    async fn test_assembler_can_run_twice() {
        let mut chain = Chain::new();
        chain.content("again", "text/plain").unwrap();
        let first = chain.finish();
        let second = chain.finish();
        for handler in [first, second] {
            let response = handler.handle(get("/")).await.unwrap();
            assert_eq!(response.body().unwrap().as_ref(), b"again");
        }
    }

    #[test]
    fn test_invoke_unknown_operation() {
        let mut chain = Chain::new();
        let err = chain.invoke("no_such_thing", Value::Null).err();
        assert_eq!(
            err,
            Some(Exception::UnknownOperation("no_such_thing".to_string()))
        );
    }

    proptest! {
        #[test]
        fn prop_layers_observe_request_in_link_order(n in 1usize..8) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let trace: Trace = Arc::new(Mutex::new(Vec::new()));
            let mut chain = Chain::new();
            for i in 0..n {
                chain.link(recorder(Arc::clone(&trace), i.to_string())).unwrap();
            }
            let handler = chain.assemble(terminal(Arc::clone(&trace)));
            runtime.block_on(handler.handle(get("/"))).unwrap();

            let seen: Vec<String> = trace
                .lock()
                .unwrap()
                .iter()
                .filter(|entry| entry.ends_with(" in"))
                .cloned()
                .collect();
            let expected: Vec<String> = (0..n).map(|i| format!("{} in", i)).collect();
            prop_assert_eq!(seen, expected);
        }
    }
}
