// 本地设备源：回放磁盘上的图片
use super::{decode_blocking, FrameSource, Pacer};
use crate::{Result, VideoError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use vigil_core::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// 单个图片文件或图片目录，按文件名顺序逐帧读取
pub struct DeviceSource {
    path: PathBuf,
    looping: bool,
    fps: u32,
    files: Vec<PathBuf>,
    position: usize,
    sequence: u64,
    pacer: Pacer,
}

impl DeviceSource {
    pub fn new(path: PathBuf, looping: bool, fps: u32) -> Self {
        Self {
            path,
            looping,
            fps,
            files: Vec::new(),
            position: 0,
            sequence: 0,
            pacer: Pacer::from_fps(fps),
        }
    }

    async fn scan(&self) -> Result<Vec<PathBuf>> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| VideoError::Source(format!("{}: {}", self.path.display(), e)))?;

        if meta.is_file() {
            return Ok(vec![self.path.clone()]);
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| VideoError::Source(format!("{}: {}", self.path.display(), e)))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl FrameSource for DeviceSource {
    fn describe(&self) -> String {
        format!("device {} @{}fps", self.path.display(), self.fps)
    }

    async fn open(&mut self) -> Result<()> {
        let files = self.scan().await?;
        if files.is_empty() {
            return Err(VideoError::Source(format!(
                "no images found at {}",
                self.path.display()
            )));
        }
        tracing::debug!(path = %self.path.display(), count = files.len(), "Device source opened");
        // 重新打开时文件列表未变则保留读取位置
        if self.files != files {
            self.files = files;
            self.position = 0;
        }
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        if self.files.is_empty() {
            return Err(VideoError::Source("device not opened".to_string()));
        }
        if self.position >= self.files.len() {
            if !self.looping {
                return Err(VideoError::Source("end of device stream".to_string()));
            }
            self.position = 0;
        }

        self.pacer.wait().await;
        let file = &self.files[self.position];
        let data = tokio::fs::read(file)
            .await
            .map_err(|e| VideoError::Source(format!("{}: {}", file.display(), e)))?;
        self.position += 1;

        let frame = decode_blocking(self.sequence, Bytes::from(data)).await?;
        self.sequence += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, name: &str, shade: u8) {
        let img = RgbImage::from_pixel(16, 12, Rgb([shade, shade, shade]));
        img.save(dir.path().join(name)).unwrap();
    }

    #[tokio::test]
    async fn test_reads_directory_in_order_and_loops() {
        let dir = TempDir::new().unwrap();
        write_png(&dir, "b.png", 200);
        write_png(&dir, "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = DeviceSource::new(dir.path().to_path_buf(), true, 60);
        source.open().await.unwrap();

        let f1 = source.read_frame().await.unwrap();
        let f2 = source.read_frame().await.unwrap();
        let f3 = source.read_frame().await.unwrap();

        assert_eq!(f1.image.get_pixel(0, 0).0[0], 10);
        assert_eq!(f2.image.get_pixel(0, 0).0[0], 200);
        assert_eq!(f3.image.get_pixel(0, 0).0[0], 10);
        assert_eq!(f3.sequence, 2);
    }

    #[tokio::test]
    async fn test_end_of_stream_without_loop() {
        let dir = TempDir::new().unwrap();
        write_png(&dir, "only.png", 90);

        let mut source = DeviceSource::new(dir.path().join("only.png"), false, 60);
        source.open().await.unwrap();

        assert!(source.read_frame().await.is_ok());
        assert!(matches!(
            source.read_frame().await,
            Err(VideoError::Source(_))
        ));

        // 重新打开不会从头回放
        source.open().await.unwrap();
        assert!(source.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_open_empty_or_missing() {
        let dir = TempDir::new().unwrap();
        let mut empty = DeviceSource::new(dir.path().to_path_buf(), true, 60);
        assert!(empty.open().await.is_err());

        let mut missing = DeviceSource::new(dir.path().join("nope"), true, 60);
        assert!(missing.open().await.is_err());
    }
}
