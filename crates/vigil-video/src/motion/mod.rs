// 运动检测
pub mod background;
pub mod regions;

pub use background::{BackgroundModel, HISTORY};

use crate::adjust::kernel_sigma;
use image::{imageops, Luma, Rgb, RgbImage};
use vigil_core::{DetectionSettings, MotionRegion};

const REGION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// 单帧检测结果
#[derive(Debug, Clone)]
pub struct MotionAnalysis {
    /// 画了运动框的帧
    pub annotated: RgbImage,
    pub detected: bool,
    pub regions: Vec<MotionRegion>,
}

/// 每个摄像头独占一个检测器，背景模型不共享
pub struct MotionDetector {
    settings: DetectionSettings,
    model: BackgroundModel,
    // (宽, 高, 每像素是否在启用区域内)
    zone_cache: Option<(u32, u32, Vec<bool>)>,
}

impl MotionDetector {
    pub fn new(settings: DetectionSettings) -> Self {
        Self {
            model: BackgroundModel::new(HISTORY, settings.variance_threshold),
            settings,
            zone_cache: None,
        }
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    pub fn model(&self) -> &BackgroundModel {
        &self.model
    }

    /// 热更新参数，只有方差阈值变化才重建背景模型
    pub fn update_settings(&mut self, settings: &DetectionSettings) {
        if settings.variance_threshold != self.settings.variance_threshold {
            tracing::debug!(
                old = self.settings.variance_threshold,
                new = settings.variance_threshold,
                "Variance threshold changed, resetting background model"
            );
            self.model = BackgroundModel::new(HISTORY, settings.variance_threshold);
        }
        if settings.zones != self.settings.zones {
            self.zone_cache = None;
        }
        self.settings = settings.clone();
    }

    pub fn detect(&mut self, image: &RgbImage) -> MotionAnalysis {
        let mut annotated = image.clone();
        if !self.settings.enabled {
            return MotionAnalysis {
                annotated,
                detected: false,
                regions: Vec::new(),
            };
        }

        let (width, height) = image.dimensions();
        self.refresh_zone_cache(width, height);
        let zone = self.zone_cache.as_ref().map(|(_, _, cells)| cells);

        let mut gray = imageops::grayscale(image);
        // 区域外像素先置为常量，模糊后不会渗入区域内
        if let Some(zone) = zone {
            for (pixel, enabled) in gray.pixels_mut().zip(zone.iter()) {
                if !enabled {
                    *pixel = Luma([0]);
                }
            }
        }

        let noise = self.settings.noise_reduction;
        let blurred = imageops::blur(&gray, kernel_sigma(noise.blur_kernel()));

        let Some(mut foreground) = self.model.apply(&blurred) else {
            return MotionAnalysis {
                annotated,
                detected: false,
                regions: Vec::new(),
            };
        };

        if let Some(zone) = zone {
            for (pixel, enabled) in foreground.pixels_mut().zip(zone.iter()) {
                if !enabled {
                    *pixel = Luma([0]);
                }
            }
        }

        let iterations = noise.morphology_iterations();
        let cleaned = regions::dilate(&regions::erode(&foreground, iterations), iterations);
        let regions = regions::extract_regions(&cleaned, self.settings.min_area());

        for region in &regions {
            regions::draw_rect(&mut annotated, region, REGION_COLOR, 2);
        }

        MotionAnalysis {
            annotated,
            detected: !regions.is_empty(),
            regions,
        }
    }

    fn refresh_zone_cache(&mut self, width: u32, height: u32) {
        let Some(mask) = &self.settings.zones else {
            self.zone_cache = None;
            return;
        };
        if matches!(&self.zone_cache, Some((w, h, _)) if *w == width && *h == height) {
            return;
        }
        let mut cells = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                cells.push(mask.covers(x, y, width, height));
            }
        }
        self.zone_cache = Some((width, height, cells));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use vigil_core::ZoneMask;

    const W: u32 = 320;
    const H: u32 = 240;

    fn blank() -> RgbImage {
        RgbImage::from_pixel(W, H, Rgb([20, 20, 20]))
    }

    fn with_block(x: u32, y: u32, side: u32) -> RgbImage {
        let mut img = blank();
        for py in y..(y + side).min(H) {
            for px in x..(x + side).min(W) {
                img.put_pixel(px, py, Rgb([250, 250, 250]));
            }
        }
        img
    }

    fn settings(sensitivity: u8) -> DetectionSettings {
        DetectionSettings {
            sensitivity,
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_frames_never_detect() {
        let mut detector = MotionDetector::new(settings(5));
        for _ in 0..30 {
            let analysis = detector.detect(&blank());
            assert!(!analysis.detected);
            assert!(analysis.regions.is_empty());
        }
    }

    #[test]
    fn test_moving_block_detected_as_single_region() {
        let mut detector = MotionDetector::new(settings(5));
        for _ in 0..30 {
            detector.detect(&blank());
        }

        for i in 0..5 {
            let analysis = detector.detect(&with_block(100 + i * 5, 90, 50));
            assert!(analysis.detected, "frame {}", i);
            assert_eq!(analysis.regions.len(), 1, "frame {}", i);
            let area = analysis.regions[0].area;
            // 模糊会让边缘外扩一两个像素
            assert!((2000..=3400).contains(&area), "area {}", area);
            assert_ne!(analysis.annotated, with_block(100 + i * 5, 90, 50));
        }
    }

    #[test]
    fn test_first_frame_only_seeds() {
        let mut detector = MotionDetector::new(settings(10));
        let analysis = detector.detect(&with_block(10, 10, 80));
        assert!(!analysis.detected);
    }

    #[test]
    fn test_small_change_below_sensitivity() {
        let mut detector = MotionDetector::new(settings(1));
        for _ in 0..10 {
            detector.detect(&blank());
        }
        // 30x30 远小于灵敏度 1 的 5000 像素阈值
        let analysis = detector.detect(&with_block(50, 50, 30));
        assert!(!analysis.detected);
    }

    #[test]
    fn test_changes_outside_zone_never_detected() {
        // 只启用左半边
        let zones = ZoneMask {
            width: 2,
            height: 1,
            zones: vec![vec![1, 0]],
        };
        let mut detector = MotionDetector::new(DetectionSettings {
            sensitivity: 10,
            zones: Some(zones),
            ..Default::default()
        });

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        detector.detect(&blank());
        for _ in 0..60 {
            let side = rng.gen_range(10..70);
            let x = rng.gen_range(W / 2..W - side);
            let y = rng.gen_range(0..H - side);
            let analysis = detector.detect(&with_block(x, y, side));
            assert!(!analysis.detected, "block at ({}, {}) side {}", x, y, side);
        }

        // 同样的变化落在区域内则能检测到
        let analysis = detector.detect(&with_block(20, 20, 60));
        assert!(analysis.detected);
    }

    #[test]
    fn test_hot_reload_keeps_model() {
        let mut detector = MotionDetector::new(settings(5));
        for _ in 0..5 {
            detector.detect(&blank());
        }
        let seen = detector.model().frames_seen();

        detector.update_settings(&DetectionSettings {
            sensitivity: 9,
            ..Default::default()
        });
        assert_eq!(detector.model().frames_seen(), seen);
        assert_eq!(detector.settings().sensitivity, 9);
        assert!(detector.detect(&with_block(100, 100, 50)).detected);
    }

    #[test]
    fn test_variance_threshold_change_resets_model() {
        let mut detector = MotionDetector::new(settings(5));
        for _ in 0..5 {
            detector.detect(&blank());
        }

        detector.update_settings(&DetectionSettings {
            variance_threshold: 30,
            ..Default::default()
        });
        assert!(!detector.model().is_seeded());
        // 重建后的第一帧只用于建模
        assert!(!detector.detect(&with_block(100, 100, 50)).detected);
    }

    #[test]
    fn test_disabled_detection() {
        let mut detector = MotionDetector::new(DetectionSettings {
            enabled: false,
            ..Default::default()
        });
        detector.detect(&blank());
        assert!(!detector.detect(&with_block(100, 100, 80)).detected);
    }
}
