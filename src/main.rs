// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 演示服务器
//!
//! 用 `webchain` 组装一个静态文件站点：
//! - 通用中间件（计时、图标、错误处理、访问日志、查询解析、路径规范化）
//! - 可选的 CORS 头与响应压缩
//! - `/api` 下按方法分支的 JSON 接口
//! - 其余路径交给目录树（索引文件与目录列表）
//! - 后台管理控制台（CLI 指令交互）

use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info};
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
};

use webchain::{
    config::Config,
    middleware::{CommonOptions, CorsOptions, ErrorOptions, FaviconOptions},
    responder::FileTreeOptions,
    shortcut, Chain, Exception, Request, Response,
};

fn main() -> ExitCode {
    // 1. 初始化日志系统
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统: {}", e);
        return ExitCode::FAILURE;
    }

    // 2. 环境配置加载
    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => config,
        Err(e) => {
            error!("{}，使用默认配置", e);
            Config::from_toml_str("")
        }
    };
    info!("配置文件已载入");
    info!("www root: {}", config.www_root());

    // 3. 异步运行时：按配置分配工作线程数
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建异步运行时: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("服务器异常退出: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// 组装站点的中间件链
fn build_site(config: &Config) -> Result<Chain, Exception> {
    let mut chain = shortcut::common(CommonOptions {
        favicon: FaviconOptions {
            path: config.favicon().cloned(),
        },
        error: ErrorOptions {
            debug: config.debug(),
        },
        ..CommonOptions::default()
    })?;
    if let Some(origin) = config.cors_origin() {
        chain.cors(CorsOptions {
            origin: origin.to_string(),
            ..CorsOptions::default()
        })?;
    }
    chain
        .compress()?
        .date()?
        .route("/api", |api| {
            api.json(None)?.methods(|branches| {
                branches.branch(&["GET", "HEAD"]).app(webchain::handler_fn(|request: Request| async move {
                    Ok(Response::json(json!({
                        "path": request.path_info(),
                        "query": request.query(),
                    })))
                }))?;
                branches
                    .branch(&["POST"])
                    .json_request()?
                    .app(webchain::handler_fn(|request: Request| async move {
                        Ok(Response::json(json!({ "echo": request.data() })))
                    }))?;
                Ok(())
            })?;
            api.method_not_allowed()?;
            Ok(())
        })?
        .list_directories()?
        .directory_index("index.html")?
        .file_tree(
            PathBuf::from(config.www_root()),
            FileTreeOptions {
                cache_size: config.cache_size(),
                ..FileTreeOptions::default()
            },
        )?;
    Ok(chain)
}

async fn serve(config: Config) -> Result<(), Exception> {
    let chain = build_site(&config)?;
    let handle = chain.listen(config.port(), config.host()).await?;
    info!("端口{}绑定完成", handle.local_addr().port());

    // 交互式管理控制台
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => {
                // 没有可交互的终端时等待 Ctrl-C
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("无法监听停机信号: {}", e);
                }
                break;
            }
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器即将关闭...");
                break;
            }
            "help" => {
                println!("== Webchain Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("===================");
            }
            "status" => {
                println!("== Webchain 状态 ==");
                println!("监听地址: {}", handle.local_addr());
                println!("当前活跃连接数: {}", handle.active_connections());
                println!("===================");
            }
            cmd => {
                println!("无效的命令：{}", cmd);
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
