use image::{GrayImage, Luma};

/// 背景模型历史帧数
pub const HISTORY: u32 = 500;

const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;

/// 单高斯背景模型：每个像素维护均值和方差
///
/// 偏离均值的平方超过 `var_threshold * 方差` 的像素判为前景。
/// 学习率为 `1 / min(已见帧数, history)`，前期收敛快。
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    var: Vec<f32>,
    frames: u32,
    history: u32,
    var_threshold: f32,
}

impl BackgroundModel {
    pub fn new(history: u32, var_threshold: u32) -> Self {
        Self {
            width: 0,
            height: 0,
            mean: Vec::new(),
            var: Vec::new(),
            frames: 0,
            history: history.max(1),
            var_threshold: var_threshold as f32,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.frames > 0
    }

    pub fn frames_seen(&self) -> u32 {
        self.frames
    }

    /// 输入一帧灰度图，返回前景掩码
    ///
    /// 第一帧（或尺寸变化后的第一帧）只用于建模，返回 `None`。
    pub fn apply(&mut self, gray: &GrayImage) -> Option<GrayImage> {
        if self.frames == 0 || gray.width() != self.width || gray.height() != self.height {
            self.seed(gray);
            return None;
        }

        let alpha = 1.0 / (self.frames + 1).min(self.history) as f32;
        let mut mask = GrayImage::new(self.width, self.height);
        for (i, (pixel, out)) in gray.pixels().zip(mask.pixels_mut()).enumerate() {
            let d = pixel.0[0] as f32 - self.mean[i];
            let d2 = d * d;
            if d2 > self.var_threshold * self.var[i] {
                *out = Luma([255]);
            }
            self.mean[i] += alpha * d;
            self.var[i] = (self.var[i] + alpha * (d2 - self.var[i])).clamp(VAR_MIN, VAR_MAX);
        }
        self.frames = self.frames.saturating_add(1);
        Some(mask)
    }

    fn seed(&mut self, gray: &GrayImage) {
        self.width = gray.width();
        self.height = gray.height();
        self.mean = gray.pixels().map(|p| p.0[0] as f32).collect();
        self.var = vec![VAR_INIT; self.mean.len()];
        self.frames = 1;
    }
}
