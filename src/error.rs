//! パイプライン各段のエラー型
//!
//! 各コンポーネントは自分の失敗を `Result` で返し、
//! 最終的に [`crate::ml::Diagnoser`] がすべてをエラー結果に畳み込みます。

use thiserror::Error;

/// 前処理エラー
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("入力画像がありません")]
    MissingInput,

    #[error("画像は2次元以上が必要です (次元数: {0})")]
    TooFewDimensions(usize),

    #[error("入力画像が空です: {0:?}")]
    EmptyInput(Vec<usize>),

    #[error("未対応のチャネル数です: {0}")]
    UnsupportedChannels(usize),

    #[error("画像バッファの構築に失敗しました: {0}")]
    Buffer(String),
}

/// モデルの読み込み・推論エラー
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("モデルファイルが見つかりません: {0}")]
    NotFound(String),

    #[error("モデルの保存形式エラー: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("モデル重みの読み込みエラー: {0}")]
    Record(String),

    #[error("テンソル変換エラー: {0}")]
    Tensor(String),

    #[error("レイヤ '{0}' は空間出力を持たないため説明に使用できません")]
    NotSpatial(String),

    #[error("推論エラー: {0}")]
    Inference(String),
}

/// Grad-CAM生成の失敗（フォールバックのトリガー）
#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("入力画像がありません")]
    MissingInput,

    #[error("説明用の前処理に失敗しました: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("説明対象のレイヤが見つかりません: {0}")]
    LayerNotFound(String),

    #[error("順伝播に失敗しました: {0}")]
    Forward(#[from] ModelError),

    #[error("勾配を取得できませんでした")]
    GradientUnavailable,

    #[error("活性化マップの形状が不正です: {0:?}")]
    InvalidShape(Vec<usize>),
}

/// 診断パイプライン全体のエラー
#[derive(Debug, Error)]
pub enum DiagnosisError {
    #[error("入力が不正です: {0}")]
    InvalidInput(PreprocessError),

    #[error("前処理に失敗しました: {0}")]
    Preprocessing(PreprocessError),

    #[error("モデルを利用できません: {0}")]
    ModelUnavailable(#[from] ModelError),

    #[error("パイプライン内部でパニックが発生しました: {0}")]
    Panic(String),
}
