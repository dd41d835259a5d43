// 录像写入
use crate::{Result, VideoError};
use chrono::{DateTime, Utc};
use image::imageops::{self, FilterType};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use vigil_core::frame::encode_jpeg;
use vigil_core::{Frame, RecordingSettings, Resolution};

/// 单个录像文件的写入端
///
/// 在阻塞线程中调用，出错时由状态机中止当前会话。
pub trait VideoSink: Send {
    fn path(&self) -> &Path;

    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// 刷盘关闭，返回文件字节数
    fn finish(self: Box<Self>) -> Result<u64>;
}

pub trait SinkFactory: Send + Sync {
    fn open(
        &self,
        camera_id: &str,
        started_at: DateTime<Utc>,
        settings: &RecordingSettings,
    ) -> Result<Box<dyn VideoSink>>;
}

/// MJPEG 文件：JPEG 帧首尾相接
pub struct MjpegFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    quality: u8,
    resolution: Option<Resolution>,
    bytes_written: u64,
}

impl MjpegFileSink {
    pub fn create(path: PathBuf, settings: &RecordingSettings) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VideoError::Storage(format!("{}: {}", parent.display(), e)))?;
        }
        let file = File::create(&path)
            .map_err(|e| VideoError::Storage(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            quality: settings.jpeg_quality(),
            resolution: settings.resolution,
            bytes_written: 0,
        })
    }
}

impl VideoSink for MjpegFileSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let jpeg = match self.resolution {
            Some(res) if res.width != frame.width() || res.height != frame.height() => {
                let resized =
                    imageops::resize(&frame.image, res.width, res.height, FilterType::Triangle);
                encode_jpeg(&resized, self.quality)?
            }
            _ => frame.encode_jpeg(self.quality)?,
        };

        self.writer
            .write_all(&jpeg)
            .map_err(|e| VideoError::Storage(format!("{}: {}", self.path.display(), e)))?;
        self.bytes_written += jpeg.len() as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64> {
        let path = self.path.clone();
        let bytes = self.bytes_written;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| VideoError::Storage(format!("{}: {}", path.display(), e.error())))?;
        file.sync_all()
            .map_err(|e| VideoError::Storage(format!("{}: {}", path.display(), e)))?;
        Ok(bytes)
    }
}

/// 按 `<base>/<camera>/<YYYYMMDD>/motion_<HHMMSS>_<ms>.mjpeg` 布局创建文件
#[derive(Debug, Clone)]
pub struct MjpegSinkFactory {
    base_dir: PathBuf,
}

impl MjpegSinkFactory {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn recording_path(&self, camera_id: &str, started_at: DateTime<Utc>) -> PathBuf {
        self.base_dir
            .join(camera_id)
            .join(started_at.format("%Y%m%d").to_string())
            .join(format!(
                "motion_{}_{:03}.mjpeg",
                started_at.format("%H%M%S"),
                started_at.timestamp_subsec_millis()
            ))
    }
}

impl SinkFactory for MjpegSinkFactory {
    fn open(
        &self,
        camera_id: &str,
        started_at: DateTime<Utc>,
        settings: &RecordingSettings,
    ) -> Result<Box<dyn VideoSink>> {
        let path = self.recording_path(camera_id, started_at);
        tracing::debug!(camera_id = %camera_id, path = %path.display(), "Opening recording file");
        Ok(Box::new(MjpegFileSink::create(path, settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_recording_path_layout() {
        let factory = MjpegSinkFactory::new("/data/rec");
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            factory.recording_path("porch", ts),
            PathBuf::from("/data/rec/porch/20240309/motion_140507_000.mjpeg")
        );
    }

    #[test]
    fn test_write_and_finish() {
        let dir = TempDir::new().unwrap();
        let factory = MjpegSinkFactory::new(dir.path());
        let settings = RecordingSettings {
            resolution: Some(Resolution::new(32, 24)),
            ..Default::default()
        };

        let mut sink = factory.open("cam1", Utc::now(), &settings).unwrap();
        let path = sink.path().to_path_buf();
        for i in 0..3 {
            sink.write_frame(&Frame::blank(i, Utc::now(), 64, 48)).unwrap();
        }
        let bytes = sink.finish().unwrap();

        assert!(bytes > 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), bytes);

        // 第一帧按配置分辨率缩放
        let data = std::fs::read(&path).unwrap();
        let first = image::load_from_memory(&data).unwrap();
        assert_eq!((first.width(), first.height()), (32, 24));
    }
}
