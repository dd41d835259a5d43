// 网络摄像头：轮询 HTTP JPEG 快照
use super::{decode_blocking, FrameSource, Pacer};
use crate::{Result, VideoError};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;
use vigil_core::Frame;

pub struct NetworkSource {
    url: Url,
    credentials: Option<(String, String)>,
    client: reqwest::Client,
    sequence: u64,
    pacer: Pacer,
}

impl NetworkSource {
    pub fn new(url: &str, poll_interval: Duration) -> Result<Self> {
        let mut url = Url::parse(url)
            .map_err(|e| VideoError::Source(format!("Invalid URL: {}", e)))?;

        // URL 中的账号密码改为 Basic 认证，避免出现在日志里
        let credentials = if !url.username().is_empty() {
            let creds = (
                url.username().to_string(),
                url.password().unwrap_or("").to_string(),
            );
            let _ = url.set_username("");
            let _ = url.set_password(None);
            Some(creds)
        } else {
            None
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| VideoError::Source(format!("HTTP client: {}", e)))?;

        Ok(Self {
            url,
            credentials,
            client,
            sequence: 0,
            pacer: Pacer::new(poll_interval),
        })
    }
}

#[async_trait]
impl FrameSource for NetworkSource {
    fn describe(&self) -> String {
        format!("network {}", self.url)
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        self.pacer.wait().await;

        let mut request = self.client.get(self.url.clone());
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VideoError::Source(format!("snapshot request failed: {}", e)))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| VideoError::Source(format!("snapshot body: {}", e)))?;

        let frame = decode_blocking(self.sequence, body).await?;
        self.sequence += 1;
        Ok(frame)
    }
}
