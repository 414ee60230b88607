//! CLAHE（コントラスト制限付き適応ヒストグラム平坦化）
//!
//! 画像をタイルに分割してタイルごとにヒストグラムを平坦化し、
//! 隣接タイルの変換表を双線形補間して境界の段差を抑えます。

use image::{GrayImage, Luma};

const HIST_BINS: usize = 256;

/// CLAHEの設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clahe {
    /// コントラスト制限（ヒストグラム平均の何倍で頭打ちにするか）
    clip_limit: f32,
    /// タイル分割数（縦横とも）
    grid: u32,
}

impl Default for Clahe {
    fn default() -> Self {
        Self::new(2.0, 4)
    }
}

impl Clahe {
    pub fn new(clip_limit: f32, grid: u32) -> Self {
        Self {
            clip_limit,
            grid: grid.max(1),
        }
    }

    /// グレースケール画像にCLAHEを適用
    pub fn apply(&self, img: &GrayImage) -> GrayImage {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return img.clone();
        }

        let tiles_x = self.grid.min(width);
        let tiles_y = self.grid.min(height);

        let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
        for ty in 0..tiles_y {
            let (y0, y1) = tile_bounds(ty, tiles_y, height);
            for tx in 0..tiles_x {
                let (x0, x1) = tile_bounds(tx, tiles_x, width);
                luts.push(self.tile_lut(img, x0..x1, y0..y1));
            }
        }

        let tile_w = width as f32 / tiles_x as f32;
        let tile_h = height as f32 / tiles_y as f32;
        let lut_at = |tx: u32, ty: u32, v: usize| luts[(ty * tiles_x + tx) as usize][v] as f32;

        GrayImage::from_fn(width, height, |x, y| {
            let (tx1, tx2, xa) = neighbours(x as f32 / tile_w - 0.5, tiles_x);
            let (ty1, ty2, ya) = neighbours(y as f32 / tile_h - 0.5, tiles_y);
            let v = img.get_pixel(x, y).0[0] as usize;

            let top = lut_at(tx1, ty1, v) * (1.0 - xa) + lut_at(tx2, ty1, v) * xa;
            let bottom = lut_at(tx1, ty2, v) * (1.0 - xa) + lut_at(tx2, ty2, v) * xa;
            let out = top * (1.0 - ya) + bottom * ya;
            Luma([out.round().clamp(0.0, 255.0) as u8])
        })
    }

    /// 1タイル分の変換表（クリップ済みヒストグラムの累積分布）
    fn tile_lut(
        &self,
        img: &GrayImage,
        xs: std::ops::Range<u32>,
        ys: std::ops::Range<u32>,
    ) -> [u8; HIST_BINS] {
        let mut hist = [0u32; HIST_BINS];
        for y in ys.clone() {
            for x in xs.clone() {
                hist[img.get_pixel(x, y).0[0] as usize] += 1;
            }
        }

        let area = xs.len() as u32 * ys.len() as u32;
        let clip = ((self.clip_limit * area as f32 / HIST_BINS as f32) as u32).max(1);

        // 上限を超えた分を全ビンへ均等に再配分し、端数は等間隔に1ずつ配る
        let mut excess = 0u32;
        for h in hist.iter_mut() {
            if *h > clip {
                excess += *h - clip;
                *h = clip;
            }
        }
        let batch = excess / HIST_BINS as u32;
        let mut residual = excess % HIST_BINS as u32;
        for h in hist.iter_mut() {
            *h += batch;
        }
        if residual > 0 {
            let step = (HIST_BINS as u32 / residual).max(1) as usize;
            for h in hist.iter_mut().step_by(step) {
                if residual == 0 {
                    break;
                }
                *h += 1;
                residual -= 1;
            }
        }

        let scale = 255.0 / area as f32;
        let mut lut = [0u8; HIST_BINS];
        let mut sum = 0u32;
        for (entry, h) in lut.iter_mut().zip(hist.iter()) {
            sum += h;
            *entry = (sum as f32 * scale).round().min(255.0) as u8;
        }
        lut
    }
}

fn tile_bounds(index: u32, tiles: u32, extent: u32) -> (u32, u32) {
    (index * extent / tiles, (index + 1) * extent / tiles)
}

/// 補間に使う2つのタイル番号と重み
fn neighbours(pos: f32, tiles: u32) -> (u32, u32, f32) {
    let lower = pos.floor();
    let weight = pos - lower;
    let last = tiles as i64 - 1;
    let t1 = (lower as i64).clamp(0, last) as u32;
    let t2 = (lower as i64 + 1).clamp(0, last) as u32;
    (t1, t2, weight)
}
