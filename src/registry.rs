// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 具名操作注册表
//!
//! 注册表把名称映射到“链操作”：以 JSON 参数调用、反序列化为选项后在链上追加环节的函数。
//!
//! - 内置注册表（`Registry::base`）在首次使用时构建，收录全部内置中间件。
//! - `extend` 派生一个新注册表，新名称只在派生出的注册表（及其创建的链）上可见，
//!   原注册表保持不变。
//! - 链上的 `add` 采用写时复制，只修改该链自己持有的副本。

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{chain::Chain, exception::Exception, handler::Middleware, middleware};

/// 具名操作：在链上追加环节
pub type Operation = Arc<dyn Fn(&mut Chain, &Value) -> Result<(), Exception> + Send + Sync>;

#[derive(Clone, Default)]
struct Table {
    operations: HashMap<String, Operation>,
    parent: Option<Registry>,
}

/// 操作注册表，克隆开销很小
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Table>,
}

lazy_static! {
    static ref BASE: Registry = {
        let mut registry = Registry::empty();
        middleware::register_builtins(&mut registry);
        debug!("内置注册表构建完成，共{}个操作", registry.inner.operations.len());
        registry
    };
}

impl Registry {
    /// 收录全部内置操作的注册表
    pub fn base() -> Registry {
        BASE.clone()
    }

    pub fn empty() -> Registry {
        Registry::default()
    }

    /// 查找操作，自身没有时沿父注册表向上查找
    pub fn lookup(&self, name: &str) -> Option<Operation> {
        match self.inner.operations.get(name) {
            Some(operation) => Some(Arc::clone(operation)),
            None => self.inner.parent.as_ref()?.lookup(name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// 直接定义一个操作，同名操作被覆盖
    pub fn define(&mut self, name: &str, operation: Operation) {
        Arc::make_mut(&mut self.inner)
            .operations
            .insert(name.to_string(), operation);
    }

    /// 把中间件注册为具名操作，返回实际使用的名称
    pub fn add<M: Middleware>(&mut self, middleware: M, fallback: &str) -> String {
        let name = operation_name(middleware.name(), fallback);
        self.define(&name, operation_for(middleware));
        name
    }

    /// 派生出包含额外操作的新注册表
    pub fn extend<I>(&self, operations: I) -> Registry
    where
        I: IntoIterator<Item = (String, Operation)>,
    {
        Registry {
            inner: Arc::new(Table {
                operations: operations.into_iter().collect(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// 批量安装中间件，返回派生出的新注册表
    pub fn install<I>(&self, items: I) -> Registry
    where
        I: IntoIterator<Item = Installable>,
    {
        let operations: Vec<(String, Operation)> = items
            .into_iter()
            .flat_map(|item| item.operations)
            .collect();
        debug!("安装{}个具名操作", operations.len());
        self.extend(operations)
    }

    /// 创建使用本注册表的新链
    pub fn create(&self) -> Chain {
        Chain::with_registry(self.clone())
    }
}

/// 可安装项：一个自带名称的中间件，或一组“名称 -> 中间件”的映射
pub struct Installable {
    operations: Vec<(String, Operation)>,
}

impl Installable {
    /// 单个中间件，名称取其声明的名称，缺省时取类型名
    pub fn named<M: Middleware>(middleware: M) -> Self {
        let name = operation_name(middleware.name(), short_type_name::<M>());
        Self {
            operations: vec![(name, operation_for(middleware))],
        }
    }

    /// 空映射，配合 `with` 使用
    pub fn map() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// 以指定名称加入映射，名称同样遵循首字母小写规则
    pub fn with<M: Middleware>(mut self, name: &str, middleware: M) -> Self {
        let name = operation_name(None, name);
        self.operations.push((name, operation_for(middleware)));
        self
    }
}

/// 声明名称优先，否则使用备用名称；首字母一律小写
pub(crate) fn operation_name(declared: Option<&str>, fallback: &str) -> String {
    let name = match declared {
        Some(name) if !name.is_empty() => name,
        _ => fallback,
    };
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn short_type_name<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// 把强类型中间件擦除为具名操作
pub(crate) fn operation_for<M: Middleware>(middleware: M) -> Operation {
    let middleware = Arc::new(middleware);
    Arc::new(move |chain: &mut Chain, args: &Value| {
        let options = decode_options::<M::Options>(args)?;
        chain.apply(Arc::clone(&middleware), options)?;
        Ok(())
    })
}

/// 反序列化操作参数，`null` 视为空对象
pub(crate) fn decode_options<O: DeserializeOwned>(args: &Value) -> Result<O, Exception> {
    match serde_json::from_value::<O>(args.clone()) {
        Ok(options) => Ok(options),
        Err(e) if args.is_null() => serde_json::from_value(Value::Object(Map::new()))
            .map_err(|_| Exception::InvalidOptions(e.to_string())),
        Err(e) => Err(Exception::InvalidOptions(e.to_string())),
    }
}

impl<M: Middleware> Middleware for Arc<M> {
    type Options = M::Options;

    fn name(&self) -> Option<&str> {
        self.as_ref().name()
    }

    fn wrap(&self, next: crate::handler::Handler, options: &Self::Options) -> crate::handler::Handler {
        self.as_ref().wrap(next, options)
    }
}
