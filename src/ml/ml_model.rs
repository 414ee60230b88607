//! 機械学習モデルの共通定義
//!
//! 胸部X線画像を3クラス（bacteriana / normal / viral）に分類するCNNと、
//! Grad-CAMがレイヤを名前で辿るためのインターフェースを提供します。

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;

use crate::error::ModelError;

/// 標準のバックエンド（CPU + 自動微分）
pub type DefaultBackend = Autodiff<NdArray<f32>>;

/// クラス数
pub const NUM_CLASSES: usize = 3;

/// 入力画像サイズ（正方形）
pub const IMAGE_SIZE: usize = 512;

/// クラス名の定義（インデックス順）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = ["bacteriana", "normal", "viral"];

/// Grad-CAMで使用する畳み込みレイヤ名
pub const EXPLANATION_LAYER: &str = "conv10_thisone";

/// 順伝播の各段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Conv1,
    Conv2,
    ConvExplain,
    Relu,
    Pool,
    GlobalPool,
    Dense1,
    Dense2,
}

/// レイヤ名と段の対応（入力側から順に）
const ARCHITECTURE: [(&str, Stage); 12] = [
    ("conv1", Stage::Conv1),
    ("activation_1", Stage::Relu),
    ("max_pooling2d_1", Stage::Pool),
    ("conv2", Stage::Conv2),
    ("activation_2", Stage::Relu),
    ("max_pooling2d_2", Stage::Pool),
    (EXPLANATION_LAYER, Stage::ConvExplain),
    ("activation_3", Stage::Relu),
    ("global_average_pooling2d", Stage::GlobalPool),
    ("dense_1", Stage::Dense1),
    ("activation_4", Stage::Relu),
    ("dense_2", Stage::Dense2),
];

/// 空間出力 [batch, channels, height, width] を持つ段の数
const SPATIAL_STAGES: usize = 8;

/// モデル内部のレイヤへの参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerHandle {
    /// 入力側からの位置
    pub index: usize,
    pub name: String,
    /// 出力が空間マップ（4次元テンソル）かどうか
    pub spatial: bool,
}

/// 指定レイヤの活性化と最終出力
pub struct LayerForward<B: Backend> {
    /// クラススコア [batch, classes]（softmax前）
    pub scores: Tensor<B, 2>,
    /// 指定レイヤの出力 [batch, channels, height, width]
    pub activation: Tensor<B, 4>,
}

/// 分類器として必要な機能
///
/// 推論と、レイヤ名によるモデル内部の参照をフレームワークから切り離して提供します。
pub trait ClassifierModel<B: AutodiffBackend> {
    /// モデルのデバイス
    fn device(&self) -> B::Device;

    /// 推論モード（勾配追跡なし）でクラス確率 [batch, classes] を返す
    ///
    /// 入力は [batch, 1, height, width]
    fn predict_proba(
        &self,
        input: Tensor<B::InnerBackend, 4>,
    ) -> Result<Tensor<B::InnerBackend, 2>, ModelError>;

    /// 入力側から順に並んだレイヤ一覧
    fn layers(&self) -> Vec<LayerHandle>;

    /// 名前が完全一致するレイヤ
    fn named_layer(&self, name: &str) -> Option<LayerHandle> {
        self.layers().into_iter().find(|layer| layer.name == name)
    }

    /// 順伝播し、softmax前のクラススコアと指定レイヤの活性化を同時に返す
    ///
    /// `activation` は勾配を要求するテンソルで、`scores` はそこから計算されます。
    /// `scores` は必ずsoftmax前のロジットを返すこと。Grad-CAMは全クラスの合計を
    /// 微分するため、確率を返すと合計が常に1になり勾配が0になります
    /// （活性化マップは一様な0.5になる）。
    fn forward_with_activation(
        &self,
        input: Tensor<B, 4>,
        layer: &LayerHandle,
    ) -> Result<LayerForward<B>, ModelError>;
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    #[config(default = 3)]
    pub num_classes: usize,
    /// 1層目の出力チャネル数
    #[config(default = 8)]
    pub conv1_channels: usize,
    /// 2層目の出力チャネル数
    #[config(default = 16)]
    pub conv2_channels: usize,
    /// 説明用畳み込み層の出力チャネル数
    #[config(default = 16)]
    pub explain_channels: usize,
    /// 全結合中間層のユニット数
    #[config(default = 16)]
    pub hidden_units: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> PneumoniaClassifier<B> {
        // サイズ計算（512入力の場合）:
        // conv1 (3x3, no padding): 512 -> 510, pool: 255
        // conv2 (3x3, no padding): 255 -> 253, pool: 126
        // conv10_thisone (3x3, no padding): 126 -> 124
        log::debug!(
            "[Model] チャネル: 1 -> {} -> {} -> {}, FC: {} -> {} -> {}",
            self.conv1_channels,
            self.conv2_channels,
            self.explain_channels,
            self.explain_channels,
            self.hidden_units,
            self.num_classes
        );

        PneumoniaClassifier {
            conv1: Conv2dConfig::new([1, self.conv1_channels], [3, 3]).init(device),
            conv2: Conv2dConfig::new([self.conv1_channels, self.conv2_channels], [3, 3])
                .init(device),
            conv_explain: Conv2dConfig::new([self.conv2_channels, self.explain_channels], [3, 3])
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dense1: LinearConfig::new(self.explain_channels, self.hidden_units).init(device),
            dense2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 肺炎サブタイプ分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool 2x2} x 2層
/// - Conv 3x3 (`conv10_thisone`) + ReLU
/// - Global Average Pooling
/// - FC: channels -> hidden + ReLU
/// - FC: hidden -> num_classes
/// - Softmax (推論時)
#[derive(Module, Debug)]
pub struct PneumoniaClassifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv_explain: Conv2d<B>,
    pool: MaxPool2d,
    global_pool: AdaptiveAvgPool2d,
    dense1: Linear<B>,
    dense2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> PneumoniaClassifier<B> {
    fn apply_spatial(&self, stage: Stage, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match stage {
            Stage::Conv1 => self.conv1.forward(x),
            Stage::Conv2 => self.conv2.forward(x),
            Stage::ConvExplain => self.conv_explain.forward(x),
            Stage::Relu => self.activation.forward(x),
            Stage::Pool => self.pool.forward(x),
            Stage::GlobalPool | Stage::Dense1 | Stage::Dense2 => x,
        }
    }

    fn forward_head(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dense1.forward(x);
        let x = self.activation.forward(x);
        self.dense2.forward(x)
    }

    /// 入力から `last` 番目の段まで（空間段のみ）
    pub fn forward_until(&self, images: Tensor<B, 4>, last: usize) -> Tensor<B, 4> {
        ARCHITECTURE[..=last.min(SPATIAL_STAGES - 1)]
            .iter()
            .fold(images, |x, (_, stage)| self.apply_spatial(*stage, x))
    }

    /// `first` 番目の段から出力まで
    pub fn forward_from(&self, x: Tensor<B, 4>, first: usize) -> Tensor<B, 2> {
        let x = ARCHITECTURE[first.min(SPATIAL_STAGES)..SPATIAL_STAGES]
            .iter()
            .fold(x, |x, (_, stage)| self.apply_spatial(*stage, x));
        self.forward_head(x)
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 1, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_from(images, 0)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID, クラス確率)
    pub fn predict(&self, images: Tensor<B, 4>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let probabilities = softmax(self.forward(images), 1);
        let predictions = probabilities.clone().argmax(1);
        (predictions, probabilities)
    }
}

impl<B: AutodiffBackend> ClassifierModel<B> for PneumoniaClassifier<B> {
    fn device(&self) -> B::Device {
        self.conv1.weight.val().device()
    }

    fn predict_proba(
        &self,
        input: Tensor<B::InnerBackend, 4>,
    ) -> Result<Tensor<B::InnerBackend, 2>, ModelError> {
        let (_, probabilities) = self.valid().predict(input);
        Ok(probabilities)
    }

    fn layers(&self) -> Vec<LayerHandle> {
        ARCHITECTURE
            .iter()
            .enumerate()
            .map(|(index, (name, _))| LayerHandle {
                index,
                name: name.to_string(),
                spatial: index < SPATIAL_STAGES,
            })
            .collect()
    }

    fn forward_with_activation(
        &self,
        input: Tensor<B, 4>,
        layer: &LayerHandle,
    ) -> Result<LayerForward<B>, ModelError> {
        if !layer.spatial || layer.index >= SPATIAL_STAGES {
            return Err(ModelError::NotSpatial(layer.name.clone()));
        }

        // 指定レイヤの出力を葉ノードとして切り出し、そこから先だけを勾配追跡する
        let activation = self.forward_until(input, layer.index).detach().require_grad();
        let scores = self.forward_from(activation.clone(), layer.index + 1);

        Ok(LayerForward { scores, activation })
    }
}
