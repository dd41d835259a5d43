use crate::error::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, GrayImage, RgbImage};

/// 一帧 RGB 图像
#[derive(Debug, Clone)]
pub struct Frame {
    /// 源内单调递增的序号
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(sequence: u64, captured_at: DateTime<Utc>, image: RgbImage) -> Self {
        Self {
            sequence,
            captured_at,
            image,
        }
    }

    /// 纯黑帧
    pub fn blank(sequence: u64, captured_at: DateTime<Utc>, width: u32, height: u32) -> Self {
        Self::new(sequence, captured_at, RgbImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// 编码为 JPEG
    pub fn encode_jpeg(&self, quality: u8) -> Result<Bytes> {
        encode_jpeg(&self.image, quality)
    }

    /// 从 JPEG/PNG 字节解码
    pub fn decode(sequence: u64, captured_at: DateTime<Utc>, data: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(data)?.to_rgb8();
        Ok(Self::new(sequence, captured_at, image))
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes> {
    let mut buf = Vec::with_capacity((image.width() * image.height()) as usize / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_jpeg_encode_decode() {
        let mut frame = Frame::blank(7, Utc::now(), 64, 48);
        frame.image.put_pixel(10, 10, Rgb([255, 255, 255]));

        let jpeg = frame.encode_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = Frame::decode(7, frame.captured_at, &jpeg).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(Frame::decode(0, Utc::now(), b"not an image").is_err());
    }
}
