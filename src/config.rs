// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::fs;
use std::path::PathBuf;

use log::{error, warn};
use serde_derive::{Deserialize, Serialize};

use crate::exception::Exception;

/// 演示服务器的运行参数，从 TOML 文件读取
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    www_root: String,
    port: u16,
    worker_threads: usize,
    cache_size: usize,
    local: bool,
    /// 为真时 500 响应携带异常信息
    debug: bool,
    favicon: Option<PathBuf>,
    cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            www_root: ".".to_string(),
            port: 7878,
            worker_threads: 0,
            cache_size: 5,
            local: true,
            debug: false,
            favicon: None,
            cors_origin: None,
        }
    }

    /// 读取配置文件。文件无法读取时返回错误；内容无法解析时使用默认配置。
    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let str_val = fs::read_to_string(filename)
            .map_err(|e| Exception::Config(format!("no such file {} exception:{}", filename, e)))?;
        Ok(Self::from_toml_str(&str_val))
    }

    pub fn from_toml_str(str_val: &str) -> Self {
        let mut raw_config: Config = match toml::from_str(str_val) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置: {}", e);
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用缓存，因此该值将被改为5。");
            raw_config.cache_size = 5;
        }
        raw_config
    }
}

impl Config {
    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn favicon(&self) -> Option<&PathBuf> {
        self.favicon.as_ref()
    }

    pub fn cors_origin(&self) -> Option<&str> {
        self.cors_origin.as_deref()
    }

    /// 监听地址：本地模式只监听回环地址
    pub fn host(&self) -> &'static str {
        if self.local {
            "127.0.0.1"
        } else {
            "0.0.0.0"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str("port = 9000\ndebug = true\n");
        assert_eq!(config.port(), 9000);
        assert!(config.debug());
        assert_eq!(config.www_root(), ".");
        assert!(config.worker_threads() > 0);
        assert_eq!(config.host(), "127.0.0.1");
    }

    #[test]
    fn test_invalid_toml_falls_back() {
        let config = Config::from_toml_str("port = \"not a number\"");
        assert_eq!(config.port(), 7878);
    }

    #[test]
    fn test_zero_cache_size() {
        let config = Config::from_toml_str("cache_size = 0");
        assert_eq!(config.cache_size(), 5);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "www_root = \"static\"\ncors_origin = \"*\"").unwrap();
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.www_root(), "static");
        assert_eq!(config.cors_origin(), Some("*"));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_toml("/no/such/config.toml"),
            Err(Exception::Config(_))
        ));
    }
}
