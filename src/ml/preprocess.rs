//! 分類器入力の前処理
//!
//! 生画像を 512×512 へリサイズし、輝度化とCLAHEを経て [0, 1] の
//! テンソル (1, 512, 512, 1) にします。

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array4;

use crate::error::PreprocessError;
use crate::ml::clahe::Clahe;
use crate::ml::ml_model::IMAGE_SIZE;
use crate::model::config::PreprocessSettings;
use crate::types::{PixelBuffer, RawImage};

/// カラー画像のチャネル順
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    /// 画像デコーダの既定順（青, 緑, 赤）
    Bgr,
    Rgb,
}

impl ChannelOrder {
    fn weights(self) -> [f32; 3] {
        match self {
            ChannelOrder::Bgr => [0.114, 0.587, 0.299],
            ChannelOrder::Rgb => [0.299, 0.587, 0.114],
        }
    }
}

/// 3チャネル画像を輝度へ変換
pub fn luminance(img: &RgbImage, order: ChannelOrder) -> GrayImage {
    let [w0, w1, w2] = order.weights();
    let (width, height) = img.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let [c0, c1, c2] = img.get_pixel(x, y).0;
        let v = c0 as f32 * w0 + c1 as f32 * w1 + c2 as f32 * w2;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// 前処理済みテンソル (1, height, width, 1)、値域 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    data: Array4<f32>,
}

impl PreprocessedTensor {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// 既定サイズ (1, 512, 512, 1) かどうか
    pub fn is_model_input(&self) -> bool {
        self.shape() == [1, IMAGE_SIZE, IMAGE_SIZE, 1]
    }

    /// burnのテンソル [1, 1, height, width] へ変換
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        let shape = self.data.shape();
        let (height, width) = (shape[1], shape[2]);
        let values: Vec<f32> = self.data.iter().copied().collect();
        Tensor::from_data(TensorData::new(values, [1, 1, height, width]), device)
    }
}

/// 画像前処理器
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    target_size: u32,
    clahe: Clahe,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(&PreprocessSettings::default())
    }
}

impl ImagePreprocessor {
    pub fn new(settings: &PreprocessSettings) -> Self {
        Self {
            target_size: settings.target_size,
            clahe: Clahe::new(settings.clahe_clip_limit, settings.clahe_tile_grid),
        }
    }

    /// 生画像を分類器の入力テンソルへ変換
    ///
    /// # 処理手順
    /// 1. 512×512へ双線形リサイズ（縦横比は保持しない）
    /// 2. 3チャネルなら青・緑・赤の順として輝度化
    /// 3. CLAHE（clip 2.0, 4×4タイル）
    /// 4. [0, 1] へスケーリングし (1, 512, 512, 1) に整形
    ///
    /// 生画像に対して1回だけ適用すること（冪等ではない）。
    pub fn preprocess(&self, image: Option<&RawImage>) -> Result<PreprocessedTensor, PreprocessError> {
        let raw = RawImage::validate(image).map_err(|e| {
            log::error!("前処理の入力が不正です: {}", e);
            e
        })?;

        let size = self.target_size;
        let gray = match raw.to_buffer()? {
            PixelBuffer::Gray(gray) => imageops::resize(&gray, size, size, FilterType::Triangle),
            PixelBuffer::Color(color) => {
                let resized = imageops::resize(&color, size, size, FilterType::Triangle);
                luminance(&resized, ChannelOrder::Bgr)
            }
        };

        let equalized = self.clahe.apply(&gray);

        let side = size as usize;
        let values: Vec<f32> = equalized.into_raw().into_iter().map(|v| v as f32 / 255.0).collect();
        let data = Array4::from_shape_vec((1, side, side, 1), values)
            .map_err(|e| PreprocessError::Buffer(e.to_string()))?;

        log::debug!("前処理完了: {:?} -> {:?}", raw.shape(), data.shape());
        Ok(PreprocessedTensor { data })
    }
}
