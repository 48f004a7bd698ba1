// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 多路分支与约束
//!
//! - `multiplex`：按判别方式声明多条分支，每条分支是一条独立的子链。
//!   子链在第一次装配时才最终完成，之后重复装配复用同一张分派表。
//!   没有匹配分支的请求交给外层链的下游。
//! - `constrain`：只允许列出的键通过，全部指向同一个下游；
//!   其余请求得到判别方式对应的拒绝响应（405 / 406 / 404）。

use std::mem;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde_derive::Deserialize;
use serde_json::Value;

use crate::{
    chain::Chain,
    exception::Exception,
    handler::Handler,
    negotiate::{DispatchTable, Discriminator, KeyTable},
    registry::{decode_options, Registry},
};

/// 正在声明中的分支集合
pub struct Branches {
    discriminator: Discriminator,
    registry: Registry,
    chains: Vec<Chain>,
    /// 键 -> 分支序号，按首次声明的顺序排列
    keys: Vec<(String, usize)>,
}

impl Branches {
    pub(crate) fn new(discriminator: Discriminator, registry: Registry) -> Self {
        Self {
            discriminator,
            registry,
            chains: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// 为一组键声明一条分支，返回该分支的子链。
    ///
    /// 同一个键被多次声明时，以最后一次为准。
    pub fn branch(&mut self, keys: &[&str]) -> &mut Chain {
        let index = self.chains.len();
        self.chains.push(self.registry.create());
        for key in keys {
            let key = self.discriminator.normalize_key(key);
            match self.keys.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => {
                    debug!("分支键{}被重新声明，覆盖第{}条分支", key, entry.1);
                    entry.1 = index;
                }
                None => self.keys.push((key, index)),
            }
        }
        &mut self.chains[index]
    }

    /// 当前声明的全部键
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// 完成每条分支（以 404 为终端），构造分派表
    fn finalize(self) -> DispatchTable {
        let handlers: Vec<Handler> = self.chains.iter().map(Chain::finish).collect();
        let table = self
            .keys
            .into_iter()
            .map(|(key, index)| (key, Arc::clone(&handlers[index])))
            .collect();
        Arc::new(table)
    }
}

enum BranchState {
    Declared(Branches),
    Finalized(DispatchTable),
    Empty,
}

/// 取得分派表，只在第一次调用时完成分支
fn resolve(state: &Mutex<BranchState>) -> DispatchTable {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("分支状态锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    };
    let table = match mem::replace(&mut *guard, BranchState::Empty) {
        BranchState::Declared(branches) => {
            debug!("完成{}条分支", branches.len());
            branches.finalize()
        }
        BranchState::Finalized(table) => table,
        BranchState::Empty => Arc::new(KeyTable::new()),
    };
    *guard = BranchState::Finalized(Arc::clone(&table));
    table
}

/// 约束表：每个键都指向同一个下游
pub(crate) fn constrain_table(keys: &[String], next: &Handler) -> KeyTable {
    keys.iter()
        .map(|key| (key.clone(), Arc::clone(next)))
        .collect()
}

impl Chain {
    /// 按判别方式声明多路分支
    pub fn multiplex<F>(&mut self, discriminator: Discriminator, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Branches) -> Result<(), Exception>,
    {
        if self.is_terminated() {
            return Err(Exception::ChainTerminated);
        }
        let mut branches = Branches::new(discriminator, self.registry().clone());
        setup(&mut branches)?;
        debug!("{:?}多路分支声明了{}条分支", discriminator, branches.len());
        let state = Mutex::new(BranchState::Declared(branches));
        self.link(move |next| discriminator.dispatch(resolve(&state), next))
    }

    /// 只放行列出的键
    pub fn constrain(&mut self, discriminator: Discriminator, keys: &[&str]) -> Result<&mut Self, Exception> {
        let keys: Vec<String> = keys
            .iter()
            .map(|key| discriminator.normalize_key(key))
            .collect();
        self.link(move |next| {
            discriminator.dispatch(Arc::new(constrain_table(&keys, &next)), discriminator.refusal())
        })
    }

    // --- 约束的具名形式 ---

    pub fn method(&mut self, methods: &[&str]) -> Result<&mut Self, Exception> {
        self.constrain(Discriminator::Method, methods)
    }

    pub fn content_type(&mut self, types: &[&str]) -> Result<&mut Self, Exception> {
        self.constrain(Discriminator::ContentType, types)
    }

    pub fn language(&mut self, languages: &[&str]) -> Result<&mut Self, Exception> {
        self.constrain(Discriminator::Language, languages)
    }

    pub fn charset(&mut self, charsets: &[&str]) -> Result<&mut Self, Exception> {
        self.constrain(Discriminator::Charset, charsets)
    }

    pub fn encoding(&mut self, encodings: &[&str]) -> Result<&mut Self, Exception> {
        self.constrain(Discriminator::Encoding, encodings)
    }

    pub fn host(&mut self, hosts: &[&str]) -> Result<&mut Self, Exception> {
        self.constrain(Discriminator::Host, hosts)
    }

    // --- 多路分支的具名形式 ---

    pub fn methods<F>(&mut self, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Branches) -> Result<(), Exception>,
    {
        self.multiplex(Discriminator::Method, setup)
    }

    pub fn content_types<F>(&mut self, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Branches) -> Result<(), Exception>,
    {
        self.multiplex(Discriminator::ContentType, setup)
    }

    pub fn languages<F>(&mut self, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Branches) -> Result<(), Exception>,
    {
        self.multiplex(Discriminator::Language, setup)
    }

    pub fn charsets<F>(&mut self, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Branches) -> Result<(), Exception>,
    {
        self.multiplex(Discriminator::Charset, setup)
    }

    pub fn encodings<F>(&mut self, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Branches) -> Result<(), Exception>,
    {
        self.multiplex(Discriminator::Encoding, setup)
    }

    pub fn hosts<F>(&mut self, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Branches) -> Result<(), Exception>,
    {
        self.multiplex(Discriminator::Host, setup)
    }

    /// 按剩余路径的第一段分支，命中的段被消耗
    pub fn segments<F>(&mut self, setup: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut Branches) -> Result<(), Exception>,
    {
        self.multiplex(Discriminator::Segment, setup)
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct KeysOptions {
    keys: Vec<String>,
}

/// 约束的具名操作：`{"keys": [...]}`
pub(crate) fn register_builtins(registry: &mut Registry) {
    let forms = [
        ("method", Discriminator::Method),
        ("content_type", Discriminator::ContentType),
        ("language", Discriminator::Language),
        ("charset", Discriminator::Charset),
        ("encoding", Discriminator::Encoding),
        ("host", Discriminator::Host),
    ];
    for (name, discriminator) in forms {
        registry.define(
            name,
            Arc::new(move |chain: &mut Chain, args: &Value| {
                let options: KeysOptions = decode_options(args)?;
                let keys: Vec<&str> = options.keys.iter().map(String::as_str).collect();
                chain.constrain(discriminator, &keys)?;
                Ok(())
            }),
        );
    }
}
