// 掩码形态学处理与连通域提取
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::collections::VecDeque;
use vigil_core::MotionRegion;

/// 3x3 腐蚀，越界邻居不参与
pub fn erode(mask: &GrayImage, iterations: u32) -> GrayImage {
    morph(mask, iterations, true)
}

/// 3x3 膨胀
pub fn dilate(mask: &GrayImage, iterations: u32) -> GrayImage {
    morph(mask, iterations, false)
}

fn morph(mask: &GrayImage, iterations: u32, erode: bool) -> GrayImage {
    let (w, h) = mask.dimensions();
    let mut current = mask.clone();
    for _ in 0..iterations {
        let src = current.clone();
        for y in 0..h {
            for x in 0..w {
                let mut hit = erode;
                'window: for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        let on = src.get_pixel(nx, ny).0[0] > 0;
                        if erode && !on {
                            hit = false;
                            break 'window;
                        }
                        if !erode && on {
                            hit = true;
                            break 'window;
                        }
                    }
                }
                current.put_pixel(x, y, Luma([if hit { 255 } else { 0 }]));
            }
        }
    }
    current
}

/// 8 邻域连通域，面积不小于 `min_area` 的区域按面积降序返回
pub fn extract_regions(mask: &GrayImage, min_area: u32) -> Vec<MotionRegion> {
    let (w, h) = mask.dimensions();
    let mut visited = vec![false; (w * h) as usize];
    let mut regions = Vec::new();
    let mut queue = VecDeque::new();

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if visited[idx] || mask.get_pixel(x, y).0[0] == 0 {
                continue;
            }

            visited[idx] = true;
            queue.push_back((x, y));
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
            let mut area = 0u32;

            while let Some((cx, cy)) = queue.pop_front() {
                area += 1;
                min_x = min_x.min(cx);
                min_y = min_y.min(cy);
                max_x = max_x.max(cx);
                max_y = max_y.max(cy);

                for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                        let nidx = (ny * w + nx) as usize;
                        if !visited[nidx] && mask.get_pixel(nx, ny).0[0] > 0 {
                            visited[nidx] = true;
                            queue.push_back((nx, ny));
                        }
                    }
                }
            }

            if area >= min_area {
                regions.push(MotionRegion {
                    x: min_x,
                    y: min_y,
                    w: max_x - min_x + 1,
                    h: max_y - min_y + 1,
                    area,
                });
            }
        }
    }

    regions.sort_by(|a, b| b.area.cmp(&a.area));
    regions
}

/// 画空心矩形
pub fn draw_rect(image: &mut RgbImage, region: &MotionRegion, color: Rgb<u8>, thickness: u32) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let x1 = (region.x + region.w).saturating_sub(1).min(w - 1);
    let y1 = (region.y + region.h).saturating_sub(1).min(h - 1);
    for t in 0..thickness {
        let top = (region.y + t).min(y1);
        let bottom = y1.saturating_sub(t);
        let left = (region.x + t).min(x1);
        let right = x1.saturating_sub(t);
        for x in region.x.min(x1)..=x1 {
            image.put_pixel(x, top, color);
            image.put_pixel(x, bottom, color);
        }
        for y in region.y.min(y1)..=y1 {
            image.put_pixel(left, y, color);
            image.put_pixel(right, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with_square(size: u32, x: u32, y: u32, side: u32) -> GrayImage {
        let mut mask = GrayImage::new(size, size);
        for py in y..y + side {
            for px in x..x + side {
                mask.put_pixel(px, py, Luma([255]));
            }
        }
        mask
    }

    #[test]
    fn test_open_removes_speckle_keeps_square() {
        let mut mask = mask_with_square(40, 10, 10, 12);
        mask.put_pixel(2, 2, Luma([255]));

        let opened = dilate(&erode(&mask, 2), 2);
        assert_eq!(opened.get_pixel(2, 2).0[0], 0);

        let regions = extract_regions(&opened, 1);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 144);
        assert_eq!((regions[0].x, regions[0].y, regions[0].w, regions[0].h), (10, 10, 12, 12));
    }

    #[test]
    fn test_regions_filtered_and_sorted() {
        let mut mask = mask_with_square(60, 2, 2, 5);
        for py in 20..40 {
            for px in 20..40 {
                mask.put_pixel(px, py, Luma([255]));
            }
        }

        let all = extract_regions(&mask, 1);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].area, 400);
        assert_eq!(all[1].area, 25);

        let big = extract_regions(&mask, 100);
        assert_eq!(big.len(), 1);
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(1, 1, Luma([255]));
        mask.put_pixel(2, 2, Luma([255]));
        assert_eq!(extract_regions(&mask, 1).len(), 1);
    }

    #[test]
    fn test_draw_rect_outline() {
        let mut img = RgbImage::new(20, 20);
        let region = MotionRegion { x: 5, y: 5, w: 10, h: 10, area: 100 };
        draw_rect(&mut img, &region, Rgb([0, 255, 0]), 2);

        assert_eq!(img.get_pixel(5, 5).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(14, 14).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(6, 10).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(10, 10).0, [0, 0, 0]);
    }
}
