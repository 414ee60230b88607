//! パイプラインの入出力データ型

use std::path::Path;

use anyhow::Context;
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::{Array2, Array3, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::PreprocessError;

/// 外部のローダーから受け取る生画像
///
/// 2次元（グレースケール, H×W）または3次元（カラー, H×W×3）の8bit画素配列。
/// カラーのチャネル順はデコーダ次第（BGR/RGB）で、各処理が自分で変換します。
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pixels: ArrayD<u8>,
}

/// `image` クレートのバッファに詰め直した生画像
///
/// `Color` のチャネル順は元配列のまま（解釈は呼び出し側が決める）。
#[derive(Debug, Clone)]
pub enum PixelBuffer {
    Gray(GrayImage),
    Color(RgbImage),
}

impl RawImage {
    pub fn new(pixels: ArrayD<u8>) -> Self {
        Self { pixels }
    }

    pub fn from_gray(pixels: Array2<u8>) -> Self {
        Self::new(pixels.into_dyn())
    }

    pub fn from_color(pixels: Array3<u8>) -> Self {
        Self::new(pixels.into_dyn())
    }

    /// デコード済み画像から H×W×3 の配列を作成（BGR順）
    ///
    /// 分類の前処理はカラー入力をBGR順として輝度化するため、ここで並べ替えます。
    pub fn from_dynamic(img: &DynamicImage) -> anyhow::Result<Self> {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let bgr: Vec<u8> = rgb.pixels().flat_map(|p| [p[2], p[1], p[0]]).collect();
        let pixels = ArrayD::from_shape_vec(IxDyn(&[height as usize, width as usize, 3]), bgr)
            .context(format!("画素配列を作成できませんでした: {}x{}", width, height))?;
        Ok(Self::new(pixels))
    }

    /// JPEG/PNGファイルを読み込む
    ///
    /// 画素値は `max(v, 0) / max * 255` で [0, 255] に引き伸ばします。
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .with_context(|| format!("画像を読み込めませんでした: {}", path.display()))?;
        let mut raw = Self::from_dynamic(&img)?;

        let max = raw.pixels.iter().copied().max().unwrap_or(0);
        if max > 0 && max < u8::MAX {
            let scale = 255.0 / max as f32;
            raw.pixels
                .mapv_inplace(|v| (v as f32 * scale).round().min(255.0) as u8);
        }

        log::info!(
            "画像を読み込みました: {} - サイズ: {:?}",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            raw.shape()
        );
        Ok(raw)
    }

    pub fn pixels(&self) -> &ArrayD<u8> {
        &self.pixels
    }

    pub fn shape(&self) -> &[usize] {
        self.pixels.shape()
    }

    pub fn ndim(&self) -> usize {
        self.pixels.ndim()
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// 入力画像の検証（存在する・2次元以上・空でない）
    pub fn validate(image: Option<&RawImage>) -> Result<&RawImage, PreprocessError> {
        let image = image.ok_or(PreprocessError::MissingInput)?;
        if image.ndim() < 2 {
            return Err(PreprocessError::TooFewDimensions(image.ndim()));
        }
        if image.is_empty() {
            return Err(PreprocessError::EmptyInput(image.shape().to_vec()));
        }
        Ok(image)
    }

    /// `image` クレートのバッファへ変換
    pub fn to_buffer(&self) -> Result<PixelBuffer, PreprocessError> {
        let shape = self.shape();
        let (height, width) = match shape {
            [h, w] | [h, w, _] => (*h as u32, *w as u32),
            _ if shape.len() < 2 => return Err(PreprocessError::TooFewDimensions(shape.len())),
            _ => {
                return Err(PreprocessError::Buffer(format!(
                    "{}次元の画像には対応していません",
                    shape.len()
                )))
            }
        };
        // iter() は論理順（行優先）で走査するため、メモリレイアウトに依存しない
        let data: Vec<u8> = self.pixels.iter().copied().collect();

        match shape.get(2).copied() {
            None | Some(1) => GrayImage::from_raw(width, height, data)
                .map(PixelBuffer::Gray)
                .ok_or_else(|| PreprocessError::Buffer(format!("{:?}", shape))),
            Some(3) => RgbImage::from_raw(width, height, data)
                .map(PixelBuffer::Color)
                .ok_or_else(|| PreprocessError::Buffer(format!("{:?}", shape))),
            Some(channels) => Err(PreprocessError::UnsupportedChannels(channels)),
        }
    }
}

/// 分類結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    /// クラスインデックス (0: bacteriana, 1: normal, 2: viral)
    pub class_index: usize,
    /// 確信度 [0, 100]
    pub confidence: f32,
}

/// 診断ラベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLabel {
    Bacteriana,
    Normal,
    Viral,
    Desconocida,
    Error,
}

impl DiagnosticLabel {
    /// クラスインデックスからラベルへ変換（範囲外は "desconocida"）
    pub fn from_class_index(index: usize) -> Self {
        match index {
            0 => DiagnosticLabel::Bacteriana,
            1 => DiagnosticLabel::Normal,
            2 => DiagnosticLabel::Viral,
            _ => {
                log::warn!("想定外のクラスインデックス: {}", index);
                DiagnosticLabel::Desconocida
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLabel::Bacteriana => "bacteriana",
            DiagnosticLabel::Normal => "normal",
            DiagnosticLabel::Viral => "viral",
            DiagnosticLabel::Desconocida => "desconocida",
            DiagnosticLabel::Error => "error",
        }
    }
}

impl std::fmt::Display for DiagnosticLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 確信度の段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Alta,
    Media,
    Baja,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 80.0 {
            ConfidenceLevel::Alta
        } else if confidence >= 60.0 {
            ConfidenceLevel::Media
        } else {
            ConfidenceLevel::Baja
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLevel::Alta => write!(f, "Alta"),
            ConfidenceLevel::Media => write!(f, "Media"),
            ConfidenceLevel::Baja => write!(f, "Baja"),
        }
    }
}

/// 表示層へ返す唯一の値
#[derive(Debug, Clone)]
pub struct DiagnosticOutcome {
    pub label: DiagnosticLabel,
    /// 確信度 [0, 100]
    pub confidence: f32,
    /// 512×512 のRGBヒートマップ
    pub heatmap: RgbImage,
}

impl DiagnosticOutcome {
    /// 失敗時の一律な結果（"error", 0.0, エラーバナー）
    pub fn error() -> Self {
        Self {
            label: DiagnosticLabel::Error,
            confidence: 0.0,
            heatmap: crate::ml::overlay::error_banner(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.label == DiagnosticLabel::Error
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_confidence(self.confidence)
    }
}
