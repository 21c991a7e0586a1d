// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

#[cfg(test)]
mod security_tests {
    //! # 安全回归测试
    //!
    //! - 静态资源的路径遍历
    //! - 畸形请求报文
    //! - 生产模式下的信息泄露
    //!
    //! 带 `#[ignore]` 的用例需要先启动演示服务器（127.0.0.1:7878）。

    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use webframe::cache::NullEngine;
    use webframe::{Application, Config, Exception, HttpRequestMethod, Request};

    fn app(webroot: &std::path::Path, debug: bool) -> Application {
        let source = format!(
            "debug = {}\nlogs = {{}}\n[App]\nwebroot = \"{}\"\n",
            debug,
            webroot.display()
        );
        Application::builder(Config::from_table(source.parse().unwrap()).unwrap())
            .init_logger(false)
            .cache(Arc::new(NullEngine))
            .build()
            .unwrap()
    }

    /// ## 路径遍历
    /// webroot 之外的文件即使存在也不能被读到
    #[test]
    fn test_path_traversal_outside_webroot() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("public")).unwrap();
        fs::write(dir.path().join("public/ok.txt"), "ok").unwrap();
        fs::write(dir.path().join("passwd"), "root:x:0:0").unwrap();
        let app = app(&dir.path().join("public"), false);

        let attacks = [
            "/../passwd",
            "/../../passwd",
            "/./../passwd",
            "//../passwd",
            "/ok.txt/../../passwd",
        ];
        for attack in attacks {
            let response = app.handle(&Request::new(HttpRequestMethod::Get, attack));
            assert_eq!(response.status_code(), 404, "{}", attack);
            assert!(
                !String::from_utf8_lossy(response.content()).contains("root:x"),
                "{}",
                attack
            );
        }

        let response = app.handle(&Request::new(HttpRequestMethod::Get, "/ok.txt"));
        assert_eq!(response.content().as_ref(), b"ok");
    }

    /// ## 符号链接
    /// 指向 webroot 之外的链接按真实路径判断
    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("public")).unwrap();
        fs::write(dir.path().join("secret"), "hidden").unwrap();
        std::os::unix::fs::symlink(dir.path().join("secret"), dir.path().join("public/link")).unwrap();
        let app = app(&dir.path().join("public"), false);

        let response = app.handle(&Request::new(HttpRequestMethod::Get, "/link"));
        assert_eq!(response.status_code(), 404);
    }

    /// ## 协议健壮性
    #[test]
    fn test_malformed_request_lines() {
        assert!(matches!(
            Request::try_from(b"GARBAGE\r\n\r\n", 0),
            Err(Exception::UnSupportedRequestMethod)
        ));
        assert!(matches!(
            Request::try_from(b"BREW /pot HTTP/1.1\r\n\r\n", 0),
            Err(Exception::UnSupportedRequestMethod)
        ));
        assert!(matches!(
            Request::try_from(b"GET / HTTP/2.0\r\n\r\n", 0),
            Err(Exception::UnsupportedHttpVersion)
        ));
        assert!(matches!(
            Request::try_from(&[0x47, 0x45, 0x54, 0x20, 0xff, 0xfe], 0),
            Err(Exception::RequestIsNotUtf8)
        ));
    }

    /// ## 信息泄露
    /// 生产模式的错误页不包含异常信息
    #[test]
    fn test_production_error_page_is_generic() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), false);
        let response = app.handle(&Request::new(HttpRequestMethod::Get, "/internal/debug"));
        let html = String::from_utf8_lossy(response.content()).to_string();
        assert_eq!(response.status_code(), 404);
        assert!(!html.contains("/internal/debug"));
    }

    async fn send_request(request: &[u8]) -> Result<String, String> {
        let mut stream = TcpStream::connect("127.0.0.1:7878")
            .await
            .map_err(|e| e.to_string())?;
        stream.write_all(request).await.map_err(|e| e.to_string())?;

        let mut buffer = vec![0; 8192];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buffer))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;
        Ok(String::from_utf8_lossy(&buffer[..n]).to_string())
    }

    fn extract_status_code(response: &str) -> u16 {
        response
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_path_traversal() {
        for attack in [
            "GET /../Cargo.toml HTTP/1.1\r\nHost: localhost\r\n\r\n",
            "GET /css/../../Cargo.toml HTTP/1.1\r\nHost: localhost\r\n\r\n",
        ] {
            let response = send_request(attack.as_bytes()).await.unwrap();
            assert_eq!(extract_status_code(&response), 404);
            assert!(!response.contains("[package]"));
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_malformed_request() {
        let response = send_request(b"NOT-HTTP\r\n\r\n").await.unwrap();
        assert_eq!(extract_status_code(&response), 400);
    }
}
