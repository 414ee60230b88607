//! ヒートマップの色付けと重ね合わせ
//!
//! 内部処理はBGR順で行い、表示層へ返す直前に必ずRGB順へ戻します。
//! チャネル順の取り違えは見た目では気付きにくいため、BGRは専用の型で保持します。

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::error::PreprocessError;
use crate::ml::ml_model::IMAGE_SIZE;
use crate::types::{PixelBuffer, RawImage};

/// BGR順で画素を保持する画像
#[derive(Debug, Clone, PartialEq)]
pub struct BgrImage(RgbImage);

impl BgrImage {
    pub fn black(size: u32) -> Self {
        Self(RgbImage::new(size, size))
    }

    /// RGB順の画像からBGR順へ変換
    pub fn from_rgb(rgb: &RgbImage) -> Self {
        Self(swap_red_blue(rgb))
    }

    /// グレースケールを3チャネルへ複製
    pub fn from_gray(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        Self(RgbImage::from_fn(width, height, |x, y| {
            let v = gray.get_pixel(x, y).0[0];
            Rgb([v, v, v])
        }))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    /// BGR順の画素値 `[b, g, r]`
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.0.get_pixel(x, y).0
    }

    /// `base * (1 - alpha) + self * alpha` で重ね合わせる
    pub fn blend_onto(&self, base: &BgrImage, alpha: f32) -> BgrImage {
        let alpha = alpha.clamp(0.0, 1.0);
        let (width, height) = base.dimensions();
        BgrImage(RgbImage::from_fn(width, height, |x, y| {
            let b = base.0.get_pixel(x, y).0;
            let h = self.0.get_pixel(x, y).0;
            let mix = |p: u8, q: u8| -> u8 {
                (p as f32 * (1.0 - alpha) + q as f32 * alpha)
                    .round()
                    .clamp(0.0, 255.0) as u8
            };
            Rgb([mix(b[0], h[0]), mix(b[1], h[1]), mix(b[2], h[2])])
        }))
    }

    /// 表示用にRGB順へ戻す
    pub fn into_rgb(self) -> RgbImage {
        swap_red_blue(&self.0)
    }
}

fn swap_red_blue(img: &RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let [a, b, c] = img.get_pixel(x, y).0;
        Rgb([c, b, a])
    })
}

/// jetカラーマップ（青→シアン→黄→赤）。戻り値はBGR順
pub fn jet_bgr(value: u8) -> [u8; 3] {
    let x = value as f32 / 255.0;
    let channel = |offset: f32| -> u8 {
        let v = (1.5 - (4.0 * x - offset).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    [channel(1.0), channel(2.0), channel(3.0)]
}

/// 8bitの強度マップにjetカラーマップを適用
pub fn apply_jet(intensity: &GrayImage) -> BgrImage {
    let (width, height) = intensity.dimensions();
    BgrImage(RgbImage::from_fn(width, height, |x, y| {
        Rgb(jet_bgr(intensity.get_pixel(x, y).0[0]))
    }))
}

/// [0, 1] の強度を8bitへ（小数部は切り捨て）
pub fn intensity_to_u8(values: &[f32], size: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, y| {
        let v = values[(y * size + x) as usize];
        image::Luma([(v.clamp(0.0, 1.0) * 255.0) as u8])
    })
}

/// 重ね合わせ用に元画像を 512×512・BGR順へ整える
///
/// カラー入力はRGB順として扱います。
pub fn prepare_base_image(raw: &RawImage) -> Result<BgrImage, PreprocessError> {
    let size = IMAGE_SIZE as u32;
    match raw.to_buffer()? {
        PixelBuffer::Gray(gray) => {
            let resized = imageops::resize(&gray, size, size, FilterType::Triangle);
            Ok(BgrImage::from_gray(&resized))
        }
        PixelBuffer::Color(rgb) => {
            let resized = imageops::resize(&rgb, size, size, FilterType::Triangle);
            Ok(BgrImage::from_rgb(&resized))
        }
    }
}

/// 強度マップを色付けして元画像に重ね、RGB順で返す
pub fn render_overlay(raw: Option<&RawImage>, intensity: &GrayImage, alpha: f32) -> RgbImage {
    let base = match raw.map(prepare_base_image) {
        Some(Ok(base)) => base,
        Some(Err(e)) => {
            log::warn!("元画像の準備に失敗しました: {}", e);
            BgrImage::black(intensity.width())
        }
        None => BgrImage::black(intensity.width()),
    };
    apply_jet(intensity).blend_onto(&base, alpha).into_rgb()
}

// 5×7 ドットのブロック文字（エラーバナー用）
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: usize = 7;

fn glyph(c: char) -> [u8; GLYPH_HEIGHT] {
    match c {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        _ => [0; GLYPH_HEIGHT],
    }
}

fn draw_block_text(img: &mut RgbImage, text: &str, y: i32, scale: u32, color: Rgb<u8>) {
    let advance = (GLYPH_WIDTH + 1) * scale;
    let text_width = advance * text.chars().count() as u32;
    let mut x = (img.width().saturating_sub(text_width) / 2) as i32;

    for c in text.chars() {
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) != 0 {
                    let rect = Rect::at(x + (col * scale) as i32, y + (row as u32 * scale) as i32)
                        .of_size(scale, scale);
                    draw_filled_rect_mut(img, rect, color);
                }
            }
        }
        x += advance as i32;
    }
}

/// 処理失敗時に表示する画像（黒地に赤文字）
pub fn error_banner() -> RgbImage {
    let size = IMAGE_SIZE as u32;
    let mut img = RgbImage::new(size, size);
    let red = Rgb([255, 0, 0]);
    draw_block_text(&mut img, "ERROR", 180, 8, red);
    draw_block_text(&mut img, "EN PROCESAMIENTO", 270, 4, red);
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_jet_endpoints() {
        // 0 は暗い青、255 は暗い赤（BGR順）
        assert_eq!(jet_bgr(0), [128, 0, 0]);
        assert_eq!(jet_bgr(255), [0, 0, 128]);
        let mid = jet_bgr(128);
        assert!(mid[1] > 250, "中央は緑成分が最大: {:?}", mid);
    }

    #[test]
    fn test_bgr_round_trip_swaps_channels() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        let bgr = BgrImage::from_rgb(&rgb);
        assert_eq!(bgr.get_pixel(0, 0), [30, 20, 10]);
        assert_eq!(bgr.into_rgb().get_pixel(1, 1).0, [10, 20, 30]);
    }

    #[test]
    fn test_blend_weights() {
        let base = BgrImage::from_rgb(&RgbImage::from_pixel(1, 1, Rgb([100, 100, 100])));
        let heat = BgrImage::from_rgb(&RgbImage::from_pixel(1, 1, Rgb([200, 0, 50])));
        let out = heat.blend_onto(&base, 0.5);
        assert_eq!(out.into_rgb().get_pixel(0, 0).0, [150, 50, 75]);
    }

    #[test]
    fn test_render_overlay_returns_rgb_order() {
        // 元画像を赤一色にし、強度0（jetの青）を重ねる
        let mut pixels = Array3::<u8>::zeros((8, 8, 3));
        pixels.slice_mut(ndarray::s![.., .., 0]).fill(255);
        let raw = RawImage::from_color(pixels);
        let intensity = GrayImage::new(512, 512);

        let out = render_overlay(Some(&raw), &intensity, 0.5);
        let [r, _, b] = out.get_pixel(100, 100).0;
        assert_eq!(r, 128); // 赤 255 * 0.5
        assert_eq!(b, 64); // jet青 128 * 0.5
    }

    #[test]
    fn test_error_banner_has_red_text() {
        let banner = error_banner();
        assert_eq!(banner.dimensions(), (512, 512));
        assert!(banner.pixels().any(|p| p.0 == [255, 0, 0]));
        assert_eq!(banner.get_pixel(0, 0).0, [0, 0, 0]);
    }
}
