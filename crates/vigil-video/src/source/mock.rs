// 合成画面源
use super::{FrameSource, Pacer};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use image::{Rgb, RgbImage};
use vigil_core::{Frame, MockPattern};

const BLOCK_SIZE: u32 = 50;
const BLOCK_STEP: u32 = 5;

/// 生成带渐变背景的合成帧，可选移动的圆或方块
pub struct MockSource {
    width: u32,
    height: u32,
    pattern: MockPattern,
    fps: u32,
    sequence: u64,
    background: RgbImage,
    pacer: Pacer,
}

impl MockSource {
    pub fn new(width: u32, height: u32, pattern: MockPattern, fps: u32) -> Self {
        Self {
            width,
            height,
            pattern,
            fps,
            sequence: 0,
            background: gradient(width, height),
            pacer: Pacer::from_fps(fps),
        }
    }

    fn render(&self) -> RgbImage {
        let mut image = self.background.clone();
        let t = self.sequence as f32;
        match self.pattern {
            MockPattern::Static => {}
            MockPattern::Orbit => {
                let cx = self.width as f32 / 2.0 + (t * 0.1).cos() * self.width as f32 / 4.0;
                let cy = self.height as f32 / 2.0 + (t * 0.1).sin() * self.height as f32 / 4.0;
                let radius = (self.height as f32 / 10.0).max(4.0);
                fill_circle(&mut image, cx, cy, radius, Rgb([0, 255, 0]));
            }
            MockPattern::Block => {
                let span = self.width.saturating_sub(BLOCK_SIZE).max(1);
                let travel = (self.sequence as u32).wrapping_mul(BLOCK_STEP) % (span * 2);
                // 往返运动
                let x = if travel < span { travel } else { span * 2 - travel };
                let y = self.height.saturating_sub(BLOCK_SIZE) / 2;
                fill_rect(&mut image, x, y, BLOCK_SIZE, BLOCK_SIZE, Rgb([255, 255, 255]));
            }
        }
        image
    }
}

#[async_trait]
impl FrameSource for MockSource {
    fn describe(&self) -> String {
        format!(
            "mock {}x{} {:?} @{}fps",
            self.width, self.height, self.pattern, self.fps
        )
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        self.pacer.wait().await;
        let frame = Frame::new(self.sequence, Utc::now(), self.render());
        self.sequence += 1;
        Ok(frame)
    }
}

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |_, y| {
        let v = 40 + (y * 40 / height.max(1)) as u8;
        Rgb([v, v, v])
    })
}

pub(crate) fn fill_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(image.width());
    let y_end = (y + h).min(image.height());
    for py in y..y_end {
        for px in x..x_end {
            image.put_pixel(px, py, color);
        }
    }
}

pub(crate) fn fill_circle(image: &mut RgbImage, cx: f32, cy: f32, radius: f32, color: Rgb<u8>) {
    let x0 = (cx - radius).floor().max(0.0) as u32;
    let y0 = (cy - radius).floor().max(0.0) as u32;
    let x1 = ((cx + radius).ceil() as u32).min(image.width().saturating_sub(1));
    let y1 = ((cy + radius).ceil() as u32).min(image.height().saturating_sub(1));
    let r2 = radius * radius;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            if dx * dx + dy * dy <= r2 {
                image.put_pixel(x, y, color);
            }
        }
    }
}
