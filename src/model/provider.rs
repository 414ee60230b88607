//! 分類モデルの供給
//!
//! 候補パスを順に探索して最初に見つかったモデルを読み込み、
//! 見つからない・読めない場合は同じ構造のプレースホルダーを生成します。
//! 解決は提供者の生存期間中に一度だけ行われます。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::AutodiffBackend, Tensor, TensorData},
};
use rand::{Rng, SeedableRng};

use crate::error::ModelError;
use crate::ml::ml_model::{
    ClassifierModel, LayerHandle, ModelConfig, PneumoniaClassifier, IMAGE_SIZE, NUM_CLASSES,
};
use crate::model::config::ModelSettings;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::{load_model_with_metadata, log_metadata_info, save_model_with_metadata};

/// 分類モデルの提供者
pub struct ModelProvider<B: AutodiffBackend> {
    candidate_paths: Vec<PathBuf>,
    preferred_layer: String,
    device: B::Device,
    model: OnceLock<PneumoniaClassifier<B>>,
}

impl<B: AutodiffBackend> ModelProvider<B> {
    pub fn new(settings: &ModelSettings, device: B::Device) -> Self {
        Self {
            candidate_paths: settings.candidate_paths.iter().map(PathBuf::from).collect(),
            preferred_layer: settings.explanation_layer.clone(),
            device,
            model: OnceLock::new(),
        }
    }

    /// 読み込み済みのモデルで初期化
    pub fn with_model(settings: &ModelSettings, device: B::Device, model: PneumoniaClassifier<B>) -> Self {
        let provider = Self::new(settings, device);
        let _ = provider.model.set(model);
        provider
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn preferred_layer(&self) -> &str {
        &self.preferred_layer
    }

    /// モデルを取得（初回のみ探索・読み込みを行う）
    pub fn get_model(&self) -> Result<&PneumoniaClassifier<B>, ModelError> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }
        let model = self.resolve()?;
        Ok(self.model.get_or_init(|| model))
    }

    fn resolve(&self) -> Result<PneumoniaClassifier<B>, ModelError> {
        match self.candidate_paths.iter().find(|path| path.exists()) {
            Some(path) => match self.load_from_path(path) {
                Ok(model) => {
                    self.validate_loaded_model(&model);
                    return Ok(model);
                }
                Err(e) => {
                    log::error!("モデルの読み込みに失敗しました ({}): {}", path.display(), e);
                }
            },
            None => {
                log::warn!(
                    "モデルファイルが見つかりません: {}",
                    self.candidate_paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        Ok(self.placeholder())
    }

    /// 学習済みの重みを持たない同一構造のモデル
    fn placeholder(&self) -> PneumoniaClassifier<B> {
        log::warn!("プレースホルダーモデルを使用します（予測結果に臨床的な意味はありません）");
        ModelConfig::new().init::<B>(&self.device)
    }

    /// 指定したモデルファイルを読み込む
    pub fn load_from_path<P: AsRef<Path>>(&self, path: P) -> Result<PneumoniaClassifier<B>, ModelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::NotFound(path.display().to_string()));
        }

        let (metadata, model_binary) = load_model_with_metadata(path)?;
        log_metadata_info(&metadata);

        let model = metadata.model_config().init::<B>(&self.device);
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &self.device)
            .map_err(|e| ModelError::Record(format!("{:?}", e)))?;

        log::info!("モデルを読み込みました: {}", path.display());
        Ok(model.load_record(record))
    }

    /// 読み込んだモデルの構造を確認する（問題があっても読み込みは止めない）
    pub fn validate_loaded_model(&self, model: &PneumoniaClassifier<B>) {
        if model.named_layer(&self.preferred_layer).is_none() {
            let candidates: Vec<String> = model
                .layers()
                .into_iter()
                .filter(|layer| is_conv_like(&layer.name))
                .map(|layer| layer.name)
                .collect();
            log::warn!(
                "レイヤ '{}' がありません。候補: {}",
                self.preferred_layer,
                candidates.join(", ")
            );
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let values: Vec<f32> = (0..IMAGE_SIZE * IMAGE_SIZE).map(|_| rng.gen::<f32>()).collect();
        let probe = Tensor::<B::InnerBackend, 4>::from_data(
            TensorData::new(values, [1, 1, IMAGE_SIZE, IMAGE_SIZE]),
            &self.device,
        );

        match model.predict_proba(probe) {
            Ok(output) => {
                let [_, classes] = output.dims();
                if classes != NUM_CLASSES {
                    log::warn!("モデルの出力クラス数が想定と異なります: {} (想定: {})", classes, NUM_CLASSES);
                } else {
                    log::debug!("モデル出力の確認OK: {:?}", output.dims());
                }
            }
            Err(e) => log::warn!("モデルの動作確認に失敗しました: {}", e),
        }
    }

    /// モデルをメタデータと共にtar.gz形式で保存
    pub fn save_classifier<P: AsRef<Path>>(
        model: &PneumoniaClassifier<B>,
        config: &ModelConfig,
        path: P,
    ) -> Result<PathBuf, ModelError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let model_binary = recorder
            .record(model.clone().into_record(), ())
            .map_err(|e| ModelError::Record(format!("{:?}", e)))?;

        let metadata = ModelMetadata::from_config(config);
        let written = save_model_with_metadata(path.as_ref(), &metadata, &model_binary)?;
        log::info!("モデルを保存しました: {}", written.display());
        Ok(written)
    }
}

fn is_conv_like(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("conv") || lower.contains("activation")
}

/// Grad-CAMに使用するレイヤを決定
///
/// 名前が完全一致するレイヤを優先し、なければ出力側から入力側へ向かって
/// 名前に `conv` か `activation` を含み空間出力を持つ最初のレイヤを返します。
pub fn resolve_explanation_layer<B, M>(model: &M, preferred: &str) -> Option<LayerHandle>
where
    B: AutodiffBackend,
    M: ClassifierModel<B> + ?Sized,
{
    if let Some(layer) = model.named_layer(preferred) {
        return Some(layer);
    }

    let alternative = model
        .layers()
        .into_iter()
        .rev()
        .find(|layer| layer.spatial && is_conv_like(&layer.name));

    match &alternative {
        Some(layer) => log::warn!("レイヤ '{}' がないため '{}' を使用します", preferred, layer.name),
        None => log::error!("説明に使用できる畳み込みレイヤが見つかりません"),
    }
    alternative
}
