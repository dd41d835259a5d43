// 画质调整
use image::{imageops, RgbImage};
use vigil_core::{ImageAdjustments, Sharpness};

const SHARPEN_LOW: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
const SHARPEN_MEDIUM: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];
const SHARPEN_HIGH: [f32; 9] = [-1.0, -2.0, -1.0, -2.0, 13.0, -2.0, -1.0, -2.0, -1.0];

/// 按固定顺序应用画质调整：降噪、亮度、对比度、饱和度、锐化
#[derive(Debug, Clone, Default)]
pub struct ImageAdjuster {
    settings: ImageAdjustments,
}

impl ImageAdjuster {
    pub fn new(settings: ImageAdjustments) -> Self {
        Self { settings }
    }

    pub fn update(&mut self, settings: &ImageAdjustments) {
        self.settings = settings.clone();
    }

    pub fn settings(&self) -> &ImageAdjustments {
        &self.settings
    }

    pub fn apply(&self, image: RgbImage) -> RgbImage {
        if self.settings.is_identity() {
            return image;
        }

        let mut image = image;
        if self.settings.denoise > 0 {
            let sigma = kernel_sigma(denoise_kernel(self.settings.denoise));
            image = imageops::blur(&image, sigma);
        }

        let brightness = self.settings.brightness;
        let contrast = self.settings.contrast;
        if brightness != 0 || contrast != 1.0 {
            for pixel in image.pixels_mut() {
                for c in pixel.0.iter_mut() {
                    let v = (*c as i32 + brightness).clamp(0, 255) as f32;
                    *c = (v * contrast).round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        if self.settings.saturation != 1.0 {
            let factor = self.settings.saturation;
            for pixel in image.pixels_mut() {
                pixel.0 = scale_saturation(pixel.0, factor);
            }
        }

        let kernel = match self.settings.sharpness {
            Sharpness::None => None,
            Sharpness::Low => Some(&SHARPEN_LOW),
            Sharpness::Medium => Some(&SHARPEN_MEDIUM),
            Sharpness::High => Some(&SHARPEN_HIGH),
        };
        if let Some(kernel) = kernel {
            image = imageops::filter3x3(&image, kernel);
        }

        image
    }
}

/// 降噪强度 0..=100 映射到奇数核尺寸 3..=21
pub fn denoise_kernel(strength: u8) -> u32 {
    let k = (strength.min(100) as u32 * 9 / 100) * 2 + 3;
    k.min(21)
}

/// 由核尺寸推算高斯 sigma
pub fn kernel_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// 在 HSV 空间缩放饱和度，保持色相和明度
fn scale_saturation(rgb: [u8; 3], factor: f32) -> [u8; 3] {
    let max = *rgb.iter().max().unwrap_or(&0) as f32;
    let min = *rgb.iter().min().unwrap_or(&0) as f32;
    if max == 0.0 || max == min {
        return rgb;
    }
    let s = (max - min) / max;
    let scaled = (s * factor).clamp(0.0, 1.0);
    let ratio = scaled / s;
    let mut out = [0u8; 3];
    for (o, c) in out.iter_mut().zip(rgb.iter()) {
        let v = max - (max - *c as f32) * ratio;
        *o = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}
