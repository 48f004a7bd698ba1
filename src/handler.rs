// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 处理器抽象
//!
//! 链上的每一个环节都是一个 `Handler`：接收一个 `Request`，异步地产生一个 `Response`。
//! 中间件就是“给定下游处理器，返回新处理器”的工厂函数。
//!
//! - `Handle`：处理器特征，返回装箱的 `'static` future，便于在 tokio 任务之间移动。
//! - `Handler`：`Arc<dyn Handle>`，可廉价克隆并在多个分支之间共享。
//! - `Middleware`：带有强类型选项结构体的中间件工厂，可以注册为具名操作。

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::{exception::Exception, request::Request, response::Response};

/// 处理器的返回值
pub type HandlerResult = Result<Response, Exception>;

/// 处理器返回的异步结果
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// 接收请求并产生响应的处理单元
pub trait Handle: Send + Sync {
    fn handle(&self, request: Request) -> HandlerFuture;
}

/// 可共享的处理器
pub type Handler = Arc<dyn Handle>;

struct FnHandler<F>(F);

impl<F, Fut> Handle for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, request: Request) -> HandlerFuture {
        Box::pin((self.0)(request))
    }
}

/// 把异步闭包包装为 `Handler`
///
/// ```
/// use webchain::handler::handler_fn;
/// use webchain::{Request, Response};
///
/// let hello = handler_fn(|_request: Request| async { Ok(Response::content("hi", "text/plain", 200)) });
/// # let _ = hello;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// 强类型中间件工厂
///
/// 选项结构体需要实现 `Deserialize`，这样同一个中间件既可以通过 `Chain::apply`
/// 以强类型方式安装，也可以注册为具名操作，用 JSON 参数调用。
pub trait Middleware: Send + Sync + 'static {
    type Options: DeserializeOwned + Send + Sync + 'static;

    /// 中间件自身声明的名称，注册时优先于调用方给出的备用名称
    fn name(&self) -> Option<&str> {
        None
    }

    fn wrap(&self, next: Handler, options: &Self::Options) -> Handler;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::HttpRequestMethod;
    use mockall::mock;

    mock! {
        pub Upstream {}
        impl Handle for Upstream {
            fn handle(&self, request: Request) -> HandlerFuture;
        }
    }

    #[tokio::test]
    async fn test_handler_fn_produces_response() {
        let handler = handler_fn(|request: Request| async move {
            Ok(Response::content(request.path().to_string(), "text/plain", 200))
        });
        let response = handler
            .handle(Request::new(HttpRequestMethod::Get, "/echo"))
            .await
            .unwrap();
        assert_eq!(response.body().unwrap().as_ref(), b"/echo");
    }

    #[tokio::test]
    async fn test_mock_handler_as_trait_object() {
        let mut upstream = MockUpstream::new();
        upstream
            .expect_handle()
            .times(1)
            .returning(|_| Box::pin(async { Ok(Response::content("mocked", "text/plain", 201)) }));
        let handler: Handler = Arc::new(upstream);

        let response = handler
            .handle(Request::new(HttpRequestMethod::Get, "/"))
            .await
            .unwrap();
        assert_eq!(response.status_code(), 201);
    }
}
