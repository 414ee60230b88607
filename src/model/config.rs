//! アプリケーション設定管理モジュール
//!
//! モデルの探索パス、前処理・可視化のパラメータ、履歴の保存先をJSON形式で保存・読み込みします。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ml::ml_model::{EXPLANATION_LAYER, IMAGE_SIZE};

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルファイルの候補パス（先頭から順に探索）
    pub candidate_paths: Vec<String>,
    /// Grad-CAMに使用するレイヤ名
    pub explanation_layer: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            candidate_paths: vec![
                "models/pneumonia_classifier.tar.gz".to_string(),
                "../models/pneumonia_classifier.tar.gz".to_string(),
                "../../models/pneumonia_classifier.tar.gz".to_string(),
            ],
            explanation_layer: EXPLANATION_LAYER.to_string(),
        }
    }
}

/// 前処理設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessSettings {
    /// 出力画像サイズ（正方形）
    pub target_size: u32,
    /// CLAHEのコントラスト制限
    pub clahe_clip_limit: f32,
    /// CLAHEのタイル分割数（縦横とも）
    pub clahe_tile_grid: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            target_size: IMAGE_SIZE as u32,
            clahe_clip_limit: 2.0,
            clahe_tile_grid: 4,
        }
    }
}

/// ヒートマップ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationSettings {
    /// Grad-CAMの重ね合わせ係数
    pub gradcam_alpha: f32,
    /// 代替ヒートマップの重ね合わせ係数
    pub fallback_alpha: f32,
    /// 代替ヒートマップの半径（ピクセル）
    pub fallback_radius: f32,
}

impl Default for ExplanationSettings {
    fn default() -> Self {
        Self {
            gradcam_alpha: 0.5,
            fallback_alpha: 0.4,
            fallback_radius: 100.0,
        }
    }
}

/// 診断履歴設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// 履歴CSVのパス
    pub csv_path: String,
    /// ヒートマップ画像の出力先
    pub heatmap_dir: String,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            csv_path: "historial.csv".to_string(),
            heatmap_dir: "heatmaps".to_string(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// 前処理設定
    #[serde(default)]
    pub preprocessing: PreprocessSettings,
    /// ヒートマップ設定
    #[serde(default)]
    pub explanation: ExplanationSettings,
    /// 履歴設定
    #[serde(default)]
    pub history: HistorySettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを開けません: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("設定ファイルの形式が不正です: {}", path.display()))?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    log::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {:#}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            log::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("設定ファイルを書き込めません: {}", path.display()))?;
        Ok(())
    }

    /// デフォルトパスに設定を保存する
    pub fn save_default(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        self.save(&path)?;
        log::info!("設定ファイルを保存しました: {}", path.display());
        Ok(())
    }

    /// モデルの候補パスを先頭に追加
    pub fn prepend_model_path<P: AsRef<Path>>(&mut self, path: P) {
        self.model
            .candidate_paths
            .insert(0, path.as_ref().to_string_lossy().to_string());
    }

    /// 設定情報をログに出力
    pub fn log_summary(&self) {
        log::info!("=== アプリケーション設定 ===");
        log::info!("モデル候補: {}", self.model.candidate_paths.join(", "));
        log::info!("説明レイヤ: {}", self.model.explanation_layer);
        log::info!(
            "前処理: {}x{}, CLAHE clip={} grid={}",
            self.preprocessing.target_size,
            self.preprocessing.target_size,
            self.preprocessing.clahe_clip_limit,
            self.preprocessing.clahe_tile_grid
        );
        log::info!(
            "ヒートマップ: alpha={} / 代替 alpha={} 半径={}",
            self.explanation.gradcam_alpha,
            self.explanation.fallback_alpha,
            self.explanation.fallback_radius
        );
        log::info!("履歴: {}", self.history.csv_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("neumonia_config_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.model.explanation_layer, "conv10_thisone");
        assert_eq!(config.model.candidate_paths.len(), 3);
        assert_eq!(config.preprocessing.target_size, 512);
        assert_eq!(config.preprocessing.clahe_clip_limit, 2.0);
        assert_eq!(config.preprocessing.clahe_tile_grid, 4);
        assert_eq!(config.explanation.gradcam_alpha, 0.5);
        assert_eq!(config.explanation.fallback_alpha, 0.4);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.model.candidate_paths, deserialized.model.candidate_paths);
        assert_eq!(config.history.csv_path, deserialized.history.csv_path);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "history": { "csv_path": "otro.csv", "heatmap_dir": "out" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.history.csv_path, "otro.csv");
        assert_eq!(config.preprocessing.target_size, 512);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("save.json");
        let mut config = AppConfig::default();
        config.prepend_model_path("custom/model.tar.gz");
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.model.candidate_paths[0], "custom/model.tar.gz");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_or_default_with_broken_file() {
        let path = temp_path("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_or_default_from(&path);
        assert_eq!(config.model.explanation_layer, "conv10_thisone");
        let _ = fs::remove_file(&path);
    }
}
