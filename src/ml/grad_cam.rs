//! Grad-CAMによる判断根拠の可視化
//!
//! 指定した畳み込みレイヤの活性化に、出力スコアの勾配の空間平均で重みを付けて
//! 足し合わせ、どの領域が予測に寄与したかを示すヒートマップを作ります。
//! 生成に失敗した場合は [`FallbackHeatmap`] に切り替えます。

use burn::tensor::{backend::AutodiffBackend, Tensor, TensorData};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, RgbImage};
use ndarray::{Array2, Array3, ArrayView3, Axis};

use crate::error::{ExplainError, ModelError};
use crate::ml::fallback::FallbackHeatmap;
use crate::ml::ml_model::{ClassifierModel, IMAGE_SIZE};
use crate::ml::overlay::{intensity_to_u8, render_overlay};
use crate::ml::preprocess::{luminance, ChannelOrder};
use crate::model::config::ExplanationSettings;
use crate::model::provider::resolve_explanation_layer;
use crate::types::{PixelBuffer, RawImage};

/// 正規化済みの活性化マップ（レイヤの解像度、値域 [0, 1]）
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationMap {
    values: Array2<f32>,
}

impl ActivationMap {
    /// 活性化と勾配（いずれも channels × height × width）から計算
    pub fn from_activation_and_gradient(
        activation: ArrayView3<f32>,
        gradient: ArrayView3<f32>,
    ) -> Result<Self, ExplainError> {
        if activation.shape() != gradient.shape() || activation.is_empty() {
            return Err(ExplainError::InvalidShape(activation.shape().to_vec()));
        }

        // チャネルごとの重み = 勾配の空間平均
        let (channels, height, width) = activation.dim();
        let mut cam = Array2::<f32>::zeros((height, width));
        for c in 0..channels {
            let weight = gradient.index_axis(Axis(0), c).mean().unwrap_or(0.0);
            cam.scaled_add(weight, &activation.index_axis(Axis(0), c));
        }

        cam.mapv_inplace(|v| v.max(0.0));
        let max = cam.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            cam.mapv_inplace(|v| v / max);
        } else {
            log::warn!("活性化マップがすべて0です。一様な値で代用します");
            cam.fill(0.5);
        }

        Ok(Self { values: cam })
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn dims(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// 双線形補間で size×size に拡大
    pub fn resize(&self, size: u32) -> Vec<f32> {
        let (height, width) = self.values.dim();
        let buffer: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_fn(
            width as u32,
            height as u32,
            |x, y| Luma([self.values[[y as usize, x as usize]]]),
        );
        imageops::resize(&buffer, size, size, FilterType::Triangle).into_raw()
    }
}

/// Grad-CAM生成器
#[derive(Debug, Clone)]
pub struct GradCam {
    size: u32,
    alpha: f32,
    fallback: FallbackHeatmap,
}

impl Default for GradCam {
    fn default() -> Self {
        Self::new(&ExplanationSettings::default())
    }
}

impl GradCam {
    pub fn new(settings: &ExplanationSettings) -> Self {
        Self {
            size: IMAGE_SIZE as u32,
            alpha: settings.gradcam_alpha,
            fallback: FallbackHeatmap::new(settings),
        }
    }

    /// ヒートマップを生成して元画像に重ねる（RGB, 512×512）
    ///
    /// Grad-CAMを計算できない場合は代替ヒートマップを返すため、失敗しません。
    pub fn explain<B, M>(&self, model: &M, image: Option<&RawImage>, layer_name: &str) -> RgbImage
    where
        B: AutodiffBackend,
        M: ClassifierModel<B> + ?Sized,
    {
        match self.try_explain::<B, M>(model, image, layer_name) {
            Ok(map) => {
                log::info!("Grad-CAMを生成しました (レイヤ解像度: {:?})", map.dims());
                let intensity = intensity_to_u8(&map.resize(self.size), self.size);
                render_overlay(image, &intensity, self.alpha)
            }
            Err(e) => {
                log::warn!("Grad-CAMを生成できません: {}。代替ヒートマップを使用します", e);
                self.fallback.synthesize(image)
            }
        }
    }

    /// 活性化マップを計算
    pub fn try_explain<B, M>(
        &self,
        model: &M,
        image: Option<&RawImage>,
        layer_name: &str,
    ) -> Result<ActivationMap, ExplainError>
    where
        B: AutodiffBackend,
        M: ClassifierModel<B> + ?Sized,
    {
        let raw = image.ok_or(ExplainError::MissingInput)?;
        let input = self.explanation_input(raw)?;

        let layer = resolve_explanation_layer::<B, M>(model, layer_name)
            .ok_or_else(|| ExplainError::LayerNotFound(layer_name.to_string()))?;
        log::debug!("Grad-CAMレイヤ: {} (#{})", layer.name, layer.index);

        let side = self.size as usize;
        let device = model.device();
        let tensor = Tensor::<B, 4>::from_data(TensorData::new(input, [1, 1, side, side]), &device);

        let forward = model.forward_with_activation(tensor, &layer)?;
        // 全クラスのスコアの合計を微分対象とする
        let grads = forward.scores.sum().backward();
        let gradient = forward
            .activation
            .grad(&grads)
            .ok_or(ExplainError::GradientUnavailable)?;
        let activation = forward.activation.inner();

        let [_, channels, height, width] = activation.dims();
        let activation = to_array3(activation, (channels, height, width))?;
        let gradient = to_array3(gradient, (channels, height, width))?;

        ActivationMap::from_activation_and_gradient(activation.view(), gradient.view())
    }

    /// Grad-CAM用の入力（赤・緑・青の順として輝度化し 512×512, [0, 1]）
    fn explanation_input(&self, raw: &RawImage) -> Result<Vec<f32>, ExplainError> {
        RawImage::validate(Some(raw))?;
        let gray = match raw.to_buffer()? {
            PixelBuffer::Gray(gray) => gray,
            PixelBuffer::Color(color) => luminance(&color, ChannelOrder::Rgb),
        };
        let resized = imageops::resize(&gray, self.size, self.size, FilterType::Triangle);
        Ok(resized.into_raw().into_iter().map(|v| v as f32 / 255.0).collect())
    }
}

/// バッチ先頭の [channels, height, width] を取り出す
fn to_array3<B: burn::tensor::backend::Backend>(
    tensor: Tensor<B, 4>,
    shape: (usize, usize, usize),
) -> Result<Array3<f32>, ExplainError> {
    let (channels, height, width) = shape;
    let mut values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ModelError::Tensor(format!("{:?}", e)))?;
    values.truncate(channels * height * width);
    Array3::from_shape_vec(shape, values)
        .map_err(|_| ExplainError::InvalidShape(vec![channels, height, width]))
}
