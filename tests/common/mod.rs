//! 集成测试共用的脚本化传输、凭证与图片构造工具。

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use fitting_room::fitting::{
    CredentialSource, EncodedImage, Transport, TransportError, TransportFailure, TransportRequest,
    TransportResponse,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, Rgba};
use tokio::sync::Notify;

pub type Reply = Result<TransportResponse, TransportError>;

/// 按顺序返回预设响应的传输实现，并记录每次调用。
///
/// `gated` 版本在返回前等待 `release()`，用于构造“请求在途”的场景。
pub struct ScriptedTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
    replies: Mutex<VecDeque<Reply>>,
    gate: Option<Notify>,
    entered: Notify,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
            gate: None,
            entered: Notify::new(),
        }
    }

    pub fn gated(replies: Vec<Reply>) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::new(replies)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// 放行一个被闸门拦住的请求。
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// 等待下一次请求到达传输层。
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(request);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new(TransportFailure::Io, "script exhausted")))
    }
}

/// 可在测试中途切换的凭证。
#[derive(Clone, Default)]
pub struct SwitchableCredential(Arc<Mutex<Option<String>>>);

impl SwitchableCredential {
    pub fn set(&self, key: Option<&str>) {
        *self.0.lock().expect("credential lock") = key.map(str::to_string);
    }
}

impl CredentialSource for SwitchableCredential {
    fn credential(&self) -> Option<String> {
        self.0
            .lock()
            .expect("credential lock")
            .clone()
            .filter(|key| !key.trim().is_empty())
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x % 255) as u8, (y % 255) as u8, ((x + y) % 255) as u8, 255])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("encode png");
    cursor.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgb([120u8, 80, 40]));
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, ImageFormat::Jpeg)
        .expect("encode jpeg");
    cursor.into_inner()
}

pub fn png(width: u32, height: u32) -> EncodedImage {
    EncodedImage::from_bytes(png_bytes(width, height)).expect("png loads")
}

pub fn jpeg(width: u32, height: u32) -> EncodedImage {
    EncodedImage::from_bytes(jpeg_bytes(width, height)).expect("jpeg loads")
}

fn json_reply(status: u16, body: String) -> Reply {
    Ok(TransportResponse {
        status,
        retry_after_secs: None,
        body: Bytes::from(body),
    })
}

/// 成功响应：先一段文字，再一张 JPEG。
pub fn image_reply(width: u32, height: u32) -> Reply {
    let data = general_purpose::STANDARD.encode(jpeg_bytes(width, height));
    json_reply(
        200,
        format!(
            r#"{{"candidates":[{{"content":{{"role":"model","parts":[{{"text":"here"}},{{"inlineData":{{"mimeType":"image/jpeg","data":"{}"}}}}]}},"finishReason":"STOP"}}]}}"#,
            data
        ),
    )
}

pub fn safety_reply() -> Reply {
    json_reply(200, r#"{"candidates":[{"finishReason":"SAFETY"}]}"#.to_string())
}

pub fn quota_reply() -> Reply {
    json_reply(
        429,
        r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#
            .to_string(),
    )
}

pub fn text_only_reply() -> Reply {
    json_reply(
        200,
        r#"{"candidates":[{"content":{"parts":[{"text":"no image today"}]},"finishReason":"STOP"}]}"#
            .to_string(),
    )
}

/// 解出请求体里第 `index` 个内联图片的字节。
pub fn inline_image(request: &TransportRequest, index: usize) -> Vec<u8> {
    let json: serde_json::Value = serde_json::from_slice(&request.body).expect("request json");
    let data = json["contents"][0]["parts"][index]["inlineData"]["data"]
        .as_str()
        .expect("inline data present");
    general_purpose::STANDARD.decode(data).expect("valid base64")
}
