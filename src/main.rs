// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 演示服务器
//!
//! 基于 Tokio 多线程运行时，把 TCP 连接上的 HTTP 请求交给 `Application` 处理。
//! - 配置来源：`config/defaults.toml`、`app/config/`、`.env`
//! - 响应按客户端的 Accept-Encoding 压缩

mod demo;

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

use log::{debug, error, info, warn};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    runtime::Builder,
};
use webframe::{Application, Config, ConfigSources, Request, Response};

use crate::demo::{ApiController, PagesController};

fn main() {
    // 1. 加载配置：默认配置 < 应用配置片段 < .env
    let sources = ConfigSources::new("config/defaults.toml")
        .with_app_dir("app/config")
        .with_env_file(".env");
    let config = match Config::load(sources) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("配置加载失败: {}", e);
            process::exit(1);
        }
    };

    let port: u16 = config.get_or("server.port", 7878);
    let local = config.get_bool("server.local", true);
    let worker_threads = match config.get_or("server.worker_threads", 0usize) {
        0 => num_cpus::get(),
        n => n,
    };

    // 2. 构建应用上下文：日志在这一步安装
    let app = match Application::builder(config)
        .controller::<PagesController>()
        .controller::<ApiController>()
        .routes(demo::routes)
        .build()
    {
        Ok(app) => app,
        Err(e) => {
            eprintln!("应用初始化失败: {}", e);
            process::exit(1);
        }
    };
    app.install_traps();
    let app = Arc::new(app);

    // 3. 按配置的工作线程数创建运行时
    let runtime = match Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建运行时: {}", e);
            process::exit(1);
        }
    };
    info!("工作线程数: {}", worker_threads);

    runtime.block_on(serve(app, port, local));
}

async fn serve(app: Arc<Application>, port: u16, local: bool) {
    let address = match local {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let socket = SocketAddrV4::new(address, port);
    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return;
        }
    };
    info!("服务端在{}上监听Socket连接", socket);

    let active_connection = Arc::new(AtomicU32::new(0));
    let mut id: u128 = 0;

    loop {
        let (mut stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("接受连接失败: {}", e);
                    continue;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!(
                    "收到停机信号，正在退出，活跃连接 {} 个",
                    active_connection.load(Ordering::SeqCst)
                );
                break;
            }
        };
        debug!("[ID{}]TCP连接已建立: {}", id, addr);

        let app = Arc::clone(&app);
        let active_connection = Arc::clone(&active_connection);
        tokio::spawn(async move {
            active_connection.fetch_add(1, Ordering::SeqCst);
            handle_connection(&mut stream, id, app).await;
            active_connection.fetch_sub(1, Ordering::SeqCst);
        });
        id += 1;
    }
}

async fn handle_connection(stream: &mut TcpStream, id: u128, app: Arc<Application>) {
    let mut buffer = vec![0; 4096];

    if let Err(e) = stream.readable().await {
        error!("[ID{}]等待TCPStream可读时遇到错误: {}", id, e);
        return;
    }
    let n = match stream.try_read(&mut buffer) {
        Ok(0) => return,
        Ok(n) => n,
        Err(e) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
    };
    let start_time = Instant::now();

    let request = match Request::try_from(&buffer[..n], id) {
        Ok(request) => request,
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败: {}", id, e);
            let response = Response::from_status_code(e.status_code(), None);
            let _ = stream.write_all(&response.as_bytes()).await;
            return;
        }
    };
    debug!("[ID{}]成功解析HTTP请求", id);

    // 控制器与模板渲染都是同步代码，放到阻塞线程池中执行
    let handled = {
        let app = Arc::clone(&app);
        let request = request.clone();
        tokio::task::spawn_blocking(move || app.handle(&request)).await
    };
    let mut response = match handled {
        Ok(response) => response,
        Err(e) => {
            error!("[ID{}]请求处理任务异常退出: {}", id, e);
            Response::from_status_code(500, None)
        }
    };
    response.compress(request.accept_encoding());

    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );
    info!(
        "[ID{}] {}, {}, {}, {}, {}, {}",
        id,
        request.version(),
        request.path(),
        request.method(),
        response.status_code(),
        response.information(),
        request.user_agent(),
    );

    if let Err(e) = stream.write_all(&response.as_bytes()).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}
