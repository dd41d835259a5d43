//! 摄像头配置
//!
//! `CameraConfig` 是强类型、带版本号的配置；运行时修改通过
//! `CameraConfigPatch` 完成：先整体校验，校验通过后才生成新版本。

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 单个摄像头的完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub source: SourceDescriptor,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub detection: DetectionSettings,
    #[serde(default)]
    pub adjustments: ImageAdjustments,
    #[serde(default)]
    pub recording: RecordingSettings,
    #[serde(default)]
    pub annotation: AnnotationSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    /// 每次成功应用 patch 后递增
    #[serde(default)]
    pub version: u64,
}

/// 帧来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// 合成画面，开发和测试使用
    Mock {
        #[serde(default = "default_mock_width")]
        width: u32,
        #[serde(default = "default_mock_height")]
        height: u32,
        #[serde(default)]
        pattern: MockPattern,
        #[serde(default = "default_source_fps")]
        fps: u32,
    },
    /// 本地设备：单个图片文件或图片目录（按文件名顺序回放）
    Device {
        path: PathBuf,
        #[serde(default = "default_true")]
        looping: bool,
        #[serde(default = "default_source_fps")]
        fps: u32,
    },
    /// 网络摄像头的 HTTP JPEG 快照地址
    Network {
        url: String,
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockPattern {
    /// 静止画面
    Static,
    /// 绕圈移动的圆
    #[default]
    Orbit,
    /// 水平往返的方块
    Block,
}

/// 运动检测参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub enabled: bool,
    /// 1-10，越大越灵敏
    pub sensitivity: u8,
    pub noise_reduction: NoiseReduction,
    /// 背景模型方差阈值 1-100，修改后背景模型重建
    pub variance_threshold: u32,
    pub zones: Option<ZoneMask>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 5,
            noise_reduction: NoiseReduction::Medium,
            variance_threshold: 50,
            zones: None,
        }
    }
}

impl DetectionSettings {
    /// 灵敏度对应的最小连通区域面积（像素）
    pub fn min_area(&self) -> u32 {
        min_area_for_sensitivity(self.sensitivity)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("sensitivity", self.sensitivity, 1, 10, "1..=10")?;
        check_range("variance_threshold", self.variance_threshold, 1, 100, "1..=100")?;
        if let Some(zones) = &self.zones {
            zones.validate()?;
        }
        Ok(())
    }
}

pub fn min_area_for_sensitivity(sensitivity: u8) -> u32 {
    match sensitivity {
        0 | 1 => 5000,
        2 => 3000,
        3 => 1500,
        4 => 800,
        5 => 500,
        6 => 300,
        7 => 200,
        8 => 150,
        9 => 120,
        _ => 100,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReduction {
    Low,
    #[default]
    Medium,
    High,
}

impl NoiseReduction {
    /// 模糊核尺寸
    pub fn blur_kernel(self) -> u32 {
        match self {
            NoiseReduction::Low => 3,
            NoiseReduction::Medium => 5,
            NoiseReduction::High => 7,
        }
    }

    /// 形态学开运算迭代次数
    pub fn morphology_iterations(self) -> u32 {
        match self {
            NoiseReduction::Low => 1,
            NoiseReduction::Medium => 2,
            NoiseReduction::High => 3,
        }
    }
}

/// 检测区域网格
///
/// JSON 形如 `{"width":8,"height":6,"zones":[[1,0,...],...]}`，
/// 1 表示该格参与检测。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMask {
    pub width: usize,
    pub height: usize,
    pub zones: Vec<Vec<u8>>,
}

impl ZoneMask {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mask: ZoneMask = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidZoneMask(e.to_string()))?;
        mask.validate()?;
        Ok(mask)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidZoneMask(format!(
                "grid must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.zones.len() != self.height {
            return Err(ConfigError::InvalidZoneMask(format!(
                "expected {} rows, got {}",
                self.height,
                self.zones.len()
            )));
        }
        for (row, cells) in self.zones.iter().enumerate() {
            if cells.len() != self.width {
                return Err(ConfigError::InvalidZoneMask(format!(
                    "row {} has {} cells, expected {}",
                    row,
                    cells.len(),
                    self.width
                )));
            }
            if let Some(v) = cells.iter().find(|v| **v > 1) {
                return Err(ConfigError::InvalidZoneMask(format!(
                    "row {} contains {}, cells must be 0 or 1",
                    row, v
                )));
            }
        }
        Ok(())
    }

    pub fn is_cell_enabled(&self, col: usize, row: usize) -> bool {
        self.zones
            .get(row)
            .and_then(|r| r.get(col))
            .map(|v| *v == 1)
            .unwrap_or(false)
    }

    /// 像素 (x, y) 是否落在启用的格子里
    pub fn covers(&self, x: u32, y: u32, frame_width: u32, frame_height: u32) -> bool {
        if frame_width == 0 || frame_height == 0 {
            return false;
        }
        let col = (x as usize * self.width) / frame_width as usize;
        let row = (y as usize * self.height) / frame_height as usize;
        self.is_cell_enabled(col.min(self.width - 1), row.min(self.height - 1))
    }
}

/// 画质调整参数，按降噪、亮度、对比度、饱和度、锐化的顺序应用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageAdjustments {
    /// -100..=100
    pub brightness: i32,
    /// 0.5..=3.0
    pub contrast: f32,
    /// 0.0..=2.0
    pub saturation: f32,
    pub sharpness: Sharpness,
    /// 0..=100
    pub denoise: u8,
}

impl Default for ImageAdjustments {
    fn default() -> Self {
        Self {
            brightness: 0,
            contrast: 1.0,
            saturation: 1.0,
            sharpness: Sharpness::None,
            denoise: 0,
        }
    }
}

impl ImageAdjustments {
    pub fn is_identity(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("brightness", self.brightness, -100, 100, "-100..=100")?;
        check_range("contrast", self.contrast, 0.5, 3.0, "0.5..=3.0")?;
        check_range("saturation", self.saturation, 0.0, 2.0, "0.0..=2.0")?;
        check_range("denoise", self.denoise, 0, 100, "0..=100")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sharpness {
    #[default]
    None,
    Low,
    Medium,
    High,
}

/// 录像参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub enabled: bool,
    /// 无运动持续多久后结束录像，1..=60 秒
    pub cooldown_secs: u64,
    /// 1..=30
    pub target_fps: u32,
    /// 为空时保持源分辨率
    pub resolution: Option<Resolution>,
    /// 500..=10000
    pub bitrate_kbps: u32,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_secs: 5,
            target_fps: 15,
            resolution: None,
            bitrate_kbps: 2000,
        }
    }
}

impl RecordingSettings {
    /// 码率线性映射到 JPEG 质量：500 -> 50，10000 -> 100
    pub fn jpeg_quality(&self) -> u8 {
        let bitrate = self.bitrate_kbps.clamp(500, 10000);
        (50 + (bitrate - 500) * 50 / 9500) as u8
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("cooldown_secs", self.cooldown_secs, 1, 60, "1..=60")?;
        check_range("target_fps", self.target_fps, 1, 30, "1..=30")?;
        check_range("bitrate_kbps", self.bitrate_kbps, 500, 10000, "500..=10000")?;
        if let Some(res) = &self.resolution {
            res.validate()?;
        }
        Ok(())
    }
}

/// 分辨率，字符串形式 "WxH"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.width > 7680 || self.height > 4320 {
            return Err(ConfigError::InvalidResolution(self.to_string()));
        }
        Ok(())
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| ConfigError::InvalidResolution(s.to_string()))?;
        let width = w
            .parse()
            .map_err(|_| ConfigError::InvalidResolution(s.to_string()))?;
        let height = h
            .parse()
            .map_err(|_| ConfigError::InvalidResolution(s.to_string()))?;
        let res = Resolution { width, height };
        res.validate()?;
        Ok(res)
    }
}

impl TryFrom<String> for Resolution {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 外部识别器调用节奏
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationSettings {
    pub enabled: bool,
    pub every_n_frames: u32,
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            every_n_frames: 10,
        }
    }
}

/// 采集循环的超时与重试参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub read_timeout_ms: u64,
    pub max_consecutive_failures: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5_000,
            max_consecutive_failures: 10,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl CaptureSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::out_of_range("read_timeout_ms", 0, ">= 1"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::out_of_range("max_consecutive_failures", 0, ">= 1"));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::out_of_range(
                "backoff_max_ms",
                self.backoff_max_ms,
                ">= backoff_initial_ms > 0",
            ));
        }
        Ok(())
    }
}

impl CameraConfig {
    pub fn new(id: impl Into<String>, source: SourceDescriptor) -> Self {
        Self {
            id: id.into(),
            name: None,
            source,
            enabled: true,
            detection: DetectionSettings::default(),
            adjustments: ImageAdjustments::default(),
            recording: RecordingSettings::default(),
            annotation: AnnotationSettings::default(),
            capture: CaptureSettings::default(),
            version: 0,
        }
    }

    /// 默认 640x480 合成源
    pub fn mock(id: impl Into<String>) -> Self {
        Self::new(
            id,
            SourceDescriptor::Mock {
                width: default_mock_width(),
                height: default_mock_height(),
                pattern: MockPattern::default(),
                fps: default_source_fps(),
            },
        )
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = self.id.trim();
        if id.is_empty() || id.len() > 100 || id != self.id {
            return Err(ConfigError::InvalidId(self.id.clone()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ConfigError::InvalidId(self.id.clone()));
        }

        match &self.source {
            SourceDescriptor::Mock {
                width, height, fps, ..
            } => {
                if *width < 16 || *height < 16 {
                    return Err(ConfigError::InvalidSource(format!(
                        "mock frame too small: {}x{}",
                        width, height
                    )));
                }
                check_range("source.fps", *fps, 1, 60, "1..=60")?;
            }
            SourceDescriptor::Device { path, fps, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidSource("empty device path".to_string()));
                }
                check_range("source.fps", *fps, 1, 60, "1..=60")?;
            }
            SourceDescriptor::Network {
                url,
                poll_interval_ms,
            } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidSource(format!(
                        "unsupported url scheme: {}",
                        url
                    )));
                }
                if *poll_interval_ms == 0 {
                    return Err(ConfigError::out_of_range("source.poll_interval_ms", 0, ">= 1"));
                }
            }
        }

        self.detection.validate()?;
        self.adjustments.validate()?;
        self.recording.validate()?;
        if self.annotation.every_n_frames == 0 {
            return Err(ConfigError::out_of_range("annotation.every_n_frames", 0, ">= 1"));
        }
        self.capture.validate()?;
        Ok(())
    }

    /// 应用 patch，返回新版本的配置
    ///
    /// 校验失败时原配置不受影响。
    pub fn apply_patch(&self, patch: &CameraConfigPatch) -> Result<CameraConfig, ConfigError> {
        if patch.zones.is_some() && patch.clear_zones {
            return Err(ConfigError::InvalidZoneMask(
                "zones and clear_zones are mutually exclusive".to_string(),
            ));
        }

        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = Some(name.clone());
        }
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }

        let d = &mut next.detection;
        if let Some(v) = patch.detection_enabled {
            d.enabled = v;
        }
        if let Some(v) = patch.sensitivity {
            d.sensitivity = v;
        }
        if let Some(v) = patch.noise_reduction {
            d.noise_reduction = v;
        }
        if let Some(v) = patch.variance_threshold {
            d.variance_threshold = v;
        }
        if let Some(zones) = &patch.zones {
            d.zones = Some(zones.clone());
        }
        if patch.clear_zones {
            d.zones = None;
        }

        let a = &mut next.adjustments;
        if let Some(v) = patch.brightness {
            a.brightness = v;
        }
        if let Some(v) = patch.contrast {
            a.contrast = v;
        }
        if let Some(v) = patch.saturation {
            a.saturation = v;
        }
        if let Some(v) = patch.sharpness {
            a.sharpness = v;
        }
        if let Some(v) = patch.denoise {
            a.denoise = v;
        }

        let r = &mut next.recording;
        if let Some(v) = patch.recording_enabled {
            r.enabled = v;
        }
        if let Some(v) = patch.cooldown_secs {
            r.cooldown_secs = v;
        }
        if let Some(v) = patch.target_fps {
            r.target_fps = v;
        }
        if let Some(v) = patch.resolution {
            r.resolution = Some(v);
        }
        if let Some(v) = patch.bitrate_kbps {
            r.bitrate_kbps = v;
        }

        if let Some(v) = patch.annotation_enabled {
            next.annotation.enabled = v;
        }
        if let Some(v) = patch.annotate_every_n_frames {
            next.annotation.every_n_frames = v;
        }

        next.validate()?;
        next.version = self.version + 1;
        Ok(next)
    }
}

/// 运行时配置修改，字段为空表示不修改
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfigPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,

    pub detection_enabled: Option<bool>,
    pub sensitivity: Option<u8>,
    pub noise_reduction: Option<NoiseReduction>,
    pub variance_threshold: Option<u32>,
    pub zones: Option<ZoneMask>,
    pub clear_zones: bool,

    pub brightness: Option<i32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub sharpness: Option<Sharpness>,
    pub denoise: Option<u8>,

    pub recording_enabled: Option<bool>,
    pub cooldown_secs: Option<u64>,
    pub target_fps: Option<u32>,
    pub resolution: Option<Resolution>,
    pub bitrate_kbps: Option<u32>,

    pub annotation_enabled: Option<bool>,
    pub annotate_every_n_frames: Option<u32>,
}

impl CameraConfigPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn check_range<T: PartialOrd + fmt::Display>(
    field: &'static str,
    value: T,
    min: T,
    max: T,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::out_of_range(field, value, expected));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_mock_width() -> u32 {
    640
}

fn default_mock_height() -> u32 {
    480
}

fn default_source_fps() -> u32 {
    15
}

fn default_poll_interval_ms() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitivity_mapping_is_monotonic() {
        let areas: Vec<u32> = (1..=10).map(min_area_for_sensitivity).collect();
        assert_eq!(
            areas,
            vec![5000, 3000, 1500, 800, 500, 300, 200, 150, 120, 100]
        );
        assert!(areas.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_noise_reduction_mapping() {
        assert_eq!(NoiseReduction::Low.blur_kernel(), 3);
        assert_eq!(NoiseReduction::Medium.blur_kernel(), 5);
        assert_eq!(NoiseReduction::High.blur_kernel(), 7);
        assert_eq!(NoiseReduction::High.morphology_iterations(), 3);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = CameraConfig::mock("front-door");
        assert!(config.validate().is_ok());
        assert_eq!(config.display_name(), "front-door");
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["", " cam", "cam/1", "a b"] {
            let config = CameraConfig::mock(id);
            assert!(matches!(config.validate(), Err(ConfigError::InvalidId(_))), "{id:?}");
        }
    }

    #[test]
    fn test_zone_mask_from_json() {
        let mask = ZoneMask::from_json(
            r#"{"width":4,"height":2,"zones":[[1,1,0,0],[0,0,0,0]]}"#,
        )
        .unwrap();
        assert!(mask.is_cell_enabled(0, 0));
        assert!(!mask.is_cell_enabled(2, 0));
        assert!(!mask.is_cell_enabled(9, 9));

        // 160x80 的画面，每格 40x40
        assert!(mask.covers(10, 10, 160, 80));
        assert!(mask.covers(79, 39, 160, 80));
        assert!(!mask.covers(80, 10, 160, 80));
        assert!(!mask.covers(10, 40, 160, 80));
    }

    #[test]
    fn test_zone_mask_malformed() {
        let wrong_rows = r#"{"width":2,"height":2,"zones":[[1,1]]}"#;
        let wrong_cols = r#"{"width":2,"height":1,"zones":[[1,1,1]]}"#;
        let wrong_value = r#"{"width":2,"height":1,"zones":[[1,2]]}"#;
        let not_json = "zones please";

        for input in [wrong_rows, wrong_cols, wrong_value, not_json] {
            assert!(matches!(
                ZoneMask::from_json(input),
                Err(ConfigError::InvalidZoneMask(_))
            ));
        }
    }

    #[test]
    fn test_resolution_parse() {
        let res: Resolution = "1280x720".parse().unwrap();
        assert_eq!(res, Resolution::new(1280, 720));
        assert_eq!(res.to_string(), "1280x720");
        assert!("1280".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());

        let json = serde_json::to_string(&res).unwrap();
        assert_eq!(json, "\"1280x720\"");
    }

    #[test]
    fn test_jpeg_quality_from_bitrate() {
        let mut rec = RecordingSettings::default();
        rec.bitrate_kbps = 500;
        assert_eq!(rec.jpeg_quality(), 50);
        rec.bitrate_kbps = 10000;
        assert_eq!(rec.jpeg_quality(), 100);
        rec.bitrate_kbps = 5250;
        assert_eq!(rec.jpeg_quality(), 75);
    }

    #[test]
    fn test_apply_patch_bumps_version() {
        let config = CameraConfig::mock("cam1");
        let patch = CameraConfigPatch {
            sensitivity: Some(8),
            brightness: Some(20),
            cooldown_secs: Some(10),
            ..Default::default()
        };

        let next = config.apply_patch(&patch).unwrap();
        assert_eq!(next.version, 1);
        assert_eq!(next.detection.sensitivity, 8);
        assert_eq!(next.adjustments.brightness, 20);
        assert_eq!(next.recording.cooldown_secs, 10);

        let again = next.apply_patch(&CameraConfigPatch::default()).unwrap();
        assert_eq!(again.version, 2);
    }

    #[test]
    fn test_apply_patch_is_atomic() {
        let config = CameraConfig::mock("cam1");
        // 第一个字段合法，第二个越界：整体拒绝
        let patch = CameraConfigPatch {
            sensitivity: Some(3),
            contrast: Some(9.0),
            ..Default::default()
        };

        let err = config.apply_patch(&patch).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "contrast", .. }));
        assert_eq!(config.detection.sensitivity, 5);
        assert_eq!(config.version, 0);
    }

    #[test]
    fn test_patch_zone_conflict() {
        let config = CameraConfig::mock("cam1");
        let patch = CameraConfigPatch {
            zones: Some(ZoneMask {
                width: 1,
                height: 1,
                zones: vec![vec![1]],
            }),
            clear_zones: true,
            ..Default::default()
        };
        assert!(config.apply_patch(&patch).is_err());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "id": "garage",
            "source": {"kind": "network", "url": "http://10.0.0.5/snapshot.jpg"},
            "detection": {"sensitivity": 7},
            "recording": {"resolution": "640x480"}
        }"#;
        let config: CameraConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.detection.sensitivity, 7);
        assert_eq!(config.detection.variance_threshold, 50);
        assert_eq!(config.recording.resolution, Some(Resolution::new(640, 480)));
        assert!(matches!(
            config.source,
            SourceDescriptor::Network { poll_interval_ms: 200, .. }
        ));
        assert!(config.validate().is_ok());
    }
}
