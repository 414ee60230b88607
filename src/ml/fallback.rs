//! Grad-CAMが使えないときの代替ヒートマップ
//!
//! 画像中心から放射状に減衰する面を描き、元画像に重ねます。
//! 入力に依存しない固定パターンなので、診断根拠としての意味はありません。

use image::RgbImage;

use crate::ml::ml_model::IMAGE_SIZE;
use crate::ml::overlay::{intensity_to_u8, render_overlay};
use crate::model::config::ExplanationSettings;
use crate::types::RawImage;

/// 代替ヒートマップ生成器
#[derive(Debug, Clone)]
pub struct FallbackHeatmap {
    size: u32,
    radius: f32,
    alpha: f32,
}

impl Default for FallbackHeatmap {
    fn default() -> Self {
        Self::new(&ExplanationSettings::default())
    }
}

impl FallbackHeatmap {
    pub fn new(settings: &ExplanationSettings) -> Self {
        Self {
            size: IMAGE_SIZE as u32,
            radius: settings.fallback_radius,
            alpha: settings.fallback_alpha,
        }
    }

    /// 中心 (256, 256) で 1、半径の位置で 0 になる強度面
    fn radial_surface(&self) -> Vec<f32> {
        let center = (self.size / 2) as f32;
        let size = self.size as usize;
        (0..size * size)
            .map(|i| {
                let (row, col) = ((i / size) as f32, (i % size) as f32);
                let dist = ((row - center).powi(2) + (col - center).powi(2)).sqrt();
                if dist < self.radius {
                    1.0 - dist / self.radius
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// 代替ヒートマップを生成（失敗しない）
    ///
    /// 画像がない・読めない場合は黒地に重ねます。
    pub fn synthesize(&self, image: Option<&RawImage>) -> RgbImage {
        log::info!("代替ヒートマップを生成します");
        let intensity = intensity_to_u8(&self.radial_surface(), self.size);
        render_overlay(image, &intensity, self.alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::overlay::jet_bgr;
    use ndarray::Array3;

    #[test]
    fn test_shape_and_determinism() {
        let raw = RawImage::from_color(Array3::from_shape_fn((100, 100, 3), |(y, x, c)| {
            ((x * 2 + y + c * 40) % 256) as u8
        }));
        let fallback = FallbackHeatmap::default();

        let first = fallback.synthesize(Some(&raw));
        let second = fallback.synthesize(Some(&raw));
        assert_eq!(first.dimensions(), (512, 512));
        assert_eq!(first, second);
    }

    #[test]
    fn test_without_image_uses_black_base() {
        let heatmap = FallbackHeatmap::default().synthesize(None);
        assert_eq!(heatmap.dimensions(), (512, 512));

        // 中心は強度255（jetの赤）を 0.4 で重ねた色
        let [b, g, r] = jet_bgr(255);
        let expected = [r, g, b].map(|v| (v as f32 * 0.4).round() as u8);
        assert_eq!(heatmap.get_pixel(256, 256).0, expected);

        // 半径の外は強度0（jetの青）
        let [b, g, r] = jet_bgr(0);
        let expected = [r, g, b].map(|v| (v as f32 * 0.4).round() as u8);
        assert_eq!(heatmap.get_pixel(10, 10).0, expected);
    }

    #[test]
    fn test_radial_surface_peak_and_edge() {
        let surface = FallbackHeatmap::default().radial_surface();
        assert_eq!(surface[256 * 512 + 256], 1.0);
        assert_eq!(surface[256 * 512 + 356], 0.0);
        assert!((surface[256 * 512 + 306] - 0.5).abs() < 1e-6);
    }
}
