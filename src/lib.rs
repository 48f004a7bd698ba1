// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # webchain
//!
//! 用流式 API 组合 HTTP 中间件：
//!
//! ```
//! use webchain::{Chain, Exception};
//!
//! fn build() -> Result<Chain, Exception> {
//!     let mut chain = Chain::new();
//!     chain
//!         .time()?
//!         .error(false)?
//!         .route("/api", |api| {
//!             api.methods(|branches| {
//!                 branches.branch(&["GET", "HEAD"]).content("pong", "text/plain")?;
//!                 Ok(())
//!             })?;
//!             Ok(())
//!         })?
//!         .content("home", "text/plain")?;
//!     Ok(chain)
//! }
//! # build().unwrap();
//! ```

pub mod branch;
pub mod cache;
pub mod chain;
pub mod client;
pub mod config;
pub mod exception;
pub mod handler;
pub mod middleware;
pub mod negotiate;
pub mod param;
pub mod registry;
pub mod request;
pub mod responder;
pub mod response;
pub mod route;
pub mod server;
pub mod shortcut;
pub mod util;

pub use branch::Branches;
pub use cache::FileCache;
pub use chain::Chain;
pub use exception::Exception;
pub use handler::{handler_fn, Handle, Handler, HandlerResult, Middleware};
pub use negotiate::Discriminator;
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use registry::{Installable, Operation, Registry};
pub use request::Request;
pub use response::Response;
pub use server::{Server, ServerHandle};
pub use util::HtmlBuilder;
