//! 胸部X線画像による肺炎サブタイプ推定と、Grad-CAMによる判断根拠の可視化
//!
//! 処理の流れ:
//! 1. [`ml::ImagePreprocessor`] で 512×512 の輝度テンソルへ正規化
//! 2. [`model::ModelProvider`] が供給する分類器で推論
//! 3. [`ml::GradCam`] でヒートマップを生成（失敗時は [`ml::FallbackHeatmap`]）
//! 4. [`ml::Diagnoser`] が結果を [`types::DiagnosticOutcome`] にまとめる

pub mod error;
pub mod history;
pub mod ml;
pub mod model;
pub mod types;

pub use error::{DiagnosisError, ExplainError, ModelError, PreprocessError};
pub use ml::Diagnoser;
pub use types::{ConfidenceLevel, DiagnosticLabel, DiagnosticOutcome, PredictionResult, RawImage};
