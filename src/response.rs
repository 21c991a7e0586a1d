// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应模块
//!
//! `Response` 由控制器、路由器（静态文件）或异常捕获层构建，
//! 最终由服务端循环序列化为 HTTP/1.1 报文写回客户端。
//! 响应可被序列化后放入缓存，因此 body 使用 `Bytes` 并实现了 serde。

use crate::{
    exception::Exception,
    param::*,
    util::{format_http_date, HtmlBuilder},
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::{Duration, Utc};
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};
use serde_derive::{Deserialize, Serialize};

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    status_code: u16,
    information: String,
    headers: Vec<(String, String)>,
    content: Bytes,
    #[serde(skip)]
    content_encoding: Option<HttpEncoding>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status_code: 200,
            information: "OK".to_string(),
            headers: vec![],
            content: Bytes::new(),
            content_encoding: None,
        }
    }

    /// 没有正文的空响应（HEAD 请求）
    pub fn empty() -> Self {
        Self::new()
    }

    pub fn html(body: impl Into<String>) -> Self {
        let mut response = Self::new();
        response.set_header("Content-Type", "text/html;charset=utf-8");
        response.content = Bytes::from(body.into());
        response
    }

    pub fn json<T: serde::Serialize>(data: &T, status: u16) -> Result<Self, Exception> {
        let mut response = Self::new();
        response.content = Bytes::from(serde_json::to_vec(data)?);
        response.set_header("Content-Type", "application/json");
        response.set_code(status);
        Ok(response)
    }

    pub fn redirect(url: &str, status: u16) -> Self {
        let mut response = Self::new();
        response.set_header("Location", url);
        response.set_code(status);
        response
    }

    /// 读取整个文件作为响应体，未指定 MIME 时按后缀推断
    pub fn file(path: &Path, mime: Option<&str>) -> Result<Self, Exception> {
        let content = fs::read(path)?;
        let mime = match mime {
            Some(m) => m,
            None => mime_for(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default(),
            ),
        };
        let mut response = Self::new();
        response.set_header("Content-Type", mime);
        response.content = Bytes::from(content);
        Ok(response)
    }

    /// webroot 下的静态资源：附带 1 天的缓存头
    pub fn static_file(path: &Path) -> Result<Self, Exception> {
        let mut response = Self::file(path, None)?;
        let expires = Utc::now() + Duration::seconds(STATIC_MAX_AGE);
        response.set_header(
            "Cache-Control",
            &format!("public, max-age={}", STATIC_MAX_AGE),
        );
        response.set_header("Expires", &format_http_date(&expires));
        Ok(response)
    }

    /// 兜底状态页，不依赖模板引擎
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let mut response = Self::html(HtmlBuilder::from_status_code(code, note).build());
        response.set_code(code);
        response
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = STATUS_CODES
            .get(&code)
            .copied()
            .unwrap_or("Unknown")
            .to_string();
        self
    }

    /// 设置响应头，同名（不区分大小写）头会被替换
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
        self
    }

    pub fn set_content(&mut self, content: impl Into<Bytes>) -> &mut Self {
        self.content = content.into();
        self
    }

    /// 按客户端支持的编码压缩正文，已压缩格式（图片、字体）跳过
    pub fn compress(&mut self, accept_encoding: &[HttpEncoding]) {
        if self.content.is_empty() || self.content_encoding.is_some() {
            return;
        }
        let mime = self.header("Content-Type").unwrap_or(DEFAULT_MIME);
        if should_skip_compression(mime) {
            debug!("跳过压缩: {}", mime);
            return;
        }
        let encoding = decide_encoding(accept_encoding);
        if encoding.is_none() {
            return;
        }
        match compress(self.content.to_vec(), encoding) {
            Ok(c) => {
                self.content = Bytes::from(c);
                self.content_encoding = encoding;
            }
            Err(e) => {
                error!("压缩响应失败: {}，返回未压缩内容", e);
            }
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut header = format!(
            "HTTP/{} {} {}{}",
            HttpVersion::V1_1,
            self.status_code,
            self.information,
            CRLF
        );
        for (name, value) in &self.headers {
            header.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", self.content.len(), CRLF));
        header.push_str(&format!("Date: {}{}", format_http_date(&Utc::now()), CRLF));
        header.push_str(&format!("Server: {}{}", SERVER_NAME, CRLF));
        header.push_str(CRLF);
        [header.as_bytes(), &self.content].concat()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }

    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "font/",
        "application/octet-stream",
        "application/vnd.ms-fontobject",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Br) {
        Some(HttpEncoding::Br)
    } else if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else {
        None
    }
}
