//! モデルメタデータの定義
//!
//! tar.gz形式でモデルの重みと一緒に保存され、読み込み時にモデル構造の復元に使われます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::ml_model::{ModelConfig, CLASS_NAMES, EXPLANATION_LAYER, IMAGE_SIZE};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（インデックス順）
    /// 例: ["bacteriana", "normal", "viral"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形、通常512）
    pub input_size: u32,

    /// 各畳み込み層の出力チャネル数 [conv1, conv2, conv10_thisone]
    pub conv_channels: [usize; 3],

    /// 全結合中間層のユニット数
    pub hidden_units: usize,

    /// Grad-CAMに使用するレイヤ名
    #[serde(default = "default_explanation_layer")]
    pub explanation_layer: String,

    /// 作成時刻（ISO8601形式）
    pub created_at: String,
}

fn default_explanation_layer() -> String {
    EXPLANATION_LAYER.to_string()
}

impl ModelMetadata {
    /// モデル設定からメタデータを作成
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            class_labels: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            input_size: IMAGE_SIZE as u32,
            conv_channels: [
                config.conv1_channels,
                config.conv2_channels,
                config.explain_channels,
            ],
            hidden_units: config.hidden_units,
            explanation_layer: EXPLANATION_LAYER.to_string(),
            created_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// モデル構造を復元するための設定
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new()
            .with_num_classes(self.class_labels.len())
            .with_conv1_channels(self.conv_channels[0])
            .with_conv2_channels(self.conv_channels[1])
            .with_explain_channels(self.conv_channels[2])
            .with_hidden_units(self.hidden_units)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
