//! 診断パイプライン
//!
//! 入力検証 → 前処理 → 推論 → Grad-CAM の順に実行し、ラベル・確信度・ヒートマップを
//! 1つの結果にまとめます。途中の失敗はすべてここでエラー結果に畳み込まれ、
//! 呼び出し側に `Err` やパニックが漏れることはありません。

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use burn::tensor::backend::AutodiffBackend;

use crate::error::DiagnosisError;
use crate::ml::grad_cam::GradCam;
use crate::ml::inference::infer;
use crate::ml::ml_model::ClassifierModel;
use crate::ml::preprocess::{ImagePreprocessor, PreprocessedTensor};
use crate::model::config::AppConfig;
use crate::model::provider::ModelProvider;
use crate::types::{DiagnosticLabel, DiagnosticOutcome, RawImage};

/// 診断器
pub struct Diagnoser<B: AutodiffBackend> {
    provider: ModelProvider<B>,
    preprocessor: ImagePreprocessor,
    gradcam: GradCam,
    layer_name: String,
}

impl<B: AutodiffBackend> Diagnoser<B> {
    /// 設定からモデル提供者を含めて初期化（モデルは初回の診断時に解決）
    pub fn new(config: &AppConfig, device: B::Device) -> Self {
        Self::with_provider(ModelProvider::new(&config.model, device), config)
    }

    pub fn with_provider(provider: ModelProvider<B>, config: &AppConfig) -> Self {
        Self {
            provider,
            preprocessor: ImagePreprocessor::new(&config.preprocessing),
            gradcam: GradCam::new(&config.explanation),
            layer_name: config.model.explanation_layer.clone(),
        }
    }

    pub fn provider(&self) -> &ModelProvider<B> {
        &self.provider
    }

    /// 画像を診断する
    pub fn diagnose(&self, image: Option<&RawImage>) -> DiagnosticOutcome {
        self.guarded(|| {
            let (raw, tensor) = self.prepare(image)?;
            let model = self.provider.get_model()?;
            Ok(self.predict_and_explain(model, raw, &tensor))
        })
    }

    /// 指定したモデルで画像を診断する
    pub fn diagnose_with<M>(&self, model: &M, image: Option<&RawImage>) -> DiagnosticOutcome
    where
        M: ClassifierModel<B> + ?Sized,
    {
        self.guarded(|| {
            let (raw, tensor) = self.prepare(image)?;
            Ok(self.predict_and_explain(model, raw, &tensor))
        })
    }

    fn guarded<F>(&self, run: F) -> DiagnosticOutcome
    where
        F: FnOnce() -> Result<DiagnosticOutcome, DiagnosisError>,
    {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(run))
            .unwrap_or_else(|payload| Err(DiagnosisError::Panic(panic_message(&*payload))));

        match result {
            Ok(outcome) => {
                log::info!(
                    "診断完了: {} ({:.2}%, 確信度: {}) - {:.2}秒",
                    outcome.label,
                    outcome.confidence,
                    outcome.confidence_level(),
                    start.elapsed().as_secs_f64()
                );
                outcome
            }
            Err(e) => {
                log::error!("診断に失敗しました: {}", e);
                DiagnosticOutcome::error()
            }
        }
    }

    fn prepare<'a>(
        &self,
        image: Option<&'a RawImage>,
    ) -> Result<(&'a RawImage, PreprocessedTensor), DiagnosisError> {
        let raw = RawImage::validate(image).map_err(DiagnosisError::InvalidInput)?;
        log::info!("診断を開始します - 画像サイズ: {:?}", raw.shape());

        let tensor = self
            .preprocessor
            .preprocess(Some(raw))
            .map_err(DiagnosisError::Preprocessing)?;
        Ok((raw, tensor))
    }

    fn predict_and_explain<M>(&self, model: &M, raw: &RawImage, tensor: &PreprocessedTensor) -> DiagnosticOutcome
    where
        M: ClassifierModel<B> + ?Sized,
    {
        let prediction = infer::<B, M>(model, tensor);
        let label = DiagnosticLabel::from_class_index(prediction.class_index);
        log::info!("予測: {} ({:.2}%)", label, prediction.confidence);

        // ヒートマップは前処理前の元画像から作る
        let heatmap = self.gradcam.explain::<B, M>(model, Some(raw), &self.layer_name);

        DiagnosticOutcome {
            label,
            confidence: prediction.confidence,
            heatmap,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::fallback::FallbackHeatmap;
    use crate::ml::ml_model::DefaultBackend;
    use crate::ml::mock::{FixedOutputModel, PanickingModel};
    use crate::ml::overlay::error_banner;
    use ndarray::{Array3, ArrayD, IxDyn};
    use rand::{Rng, SeedableRng};

    fn diagnoser() -> Diagnoser<DefaultBackend> {
        let mut config = AppConfig::default();
        config.model.candidate_paths = vec![std::env::temp_dir()
            .join("neumonia_absent_model.tar.gz")
            .to_string_lossy()
            .to_string()];
        Diagnoser::new(&config, Default::default())
    }

    fn random_image() -> RawImage {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        RawImage::from_color(Array3::from_shape_fn((100, 100, 3), |_| rng.gen::<u8>()))
    }

    #[test]
    fn test_diagnose_none() {
        let outcome = diagnoser().diagnose(None);
        assert!(outcome.is_error());
        assert_eq!(outcome.label.as_str(), "error");
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.heatmap.dimensions(), (512, 512));
        assert_eq!(outcome.heatmap, error_banner());
    }

    #[test]
    fn test_diagnose_empty_image() {
        let empty = RawImage::new(ArrayD::zeros(IxDyn(&[0, 0, 3])));
        let outcome = diagnoser().diagnose(Some(&empty));
        assert!(outcome.is_error());
        assert_eq!(outcome.heatmap.dimensions(), (512, 512));
    }

    #[test]
    fn test_diagnose_random_image_end_to_end() {
        let outcome = diagnoser().diagnose(Some(&random_image()));

        assert!(["bacteriana", "normal", "viral"].contains(&outcome.label.as_str()));
        assert!((0.0..=100.0).contains(&outcome.confidence));
        assert_eq!(outcome.heatmap.dimensions(), (512, 512));
    }

    #[test]
    fn test_diagnose_with_fixed_model() {
        let model = FixedOutputModel::new(vec![0.1, 0.2, 0.7]);
        let image = random_image();
        let outcome = diagnoser().diagnose_with(&model, Some(&image));

        assert_eq!(outcome.label, DiagnosticLabel::Viral);
        assert!((outcome.confidence - 70.0).abs() < 1e-3);
        // レイヤを持たないモデルなので代替ヒートマップになる
        assert_eq!(outcome.heatmap, FallbackHeatmap::default().synthesize(Some(&image)));
    }

    #[test]
    fn test_unknown_class_index() {
        let model = FixedOutputModel::new(vec![0.1, 0.1, 0.1, 0.7]);
        let outcome = diagnoser().diagnose_with(&model, Some(&random_image()));
        assert_eq!(outcome.label, DiagnosticLabel::Desconocida);
    }

    #[test]
    fn test_nan_probabilities_become_normal() {
        let model = FixedOutputModel::new(vec![f32::NAN; 3]);
        let outcome = diagnoser().diagnose_with(&model, Some(&random_image()));
        assert_eq!(outcome.label, DiagnosticLabel::Normal);
        assert_eq!(outcome.confidence, 50.0);
    }

    #[test]
    fn test_panic_is_collapsed_into_error() {
        let outcome = diagnoser().diagnose_with(&PanickingModel, Some(&random_image()));
        assert!(outcome.is_error());
        assert_eq!(outcome.heatmap, error_banner());
    }

    #[test]
    fn test_model_is_resolved_once() {
        let diagnoser = diagnoser();
        let image = random_image();
        diagnoser.diagnose(Some(&image));
        let first = diagnoser.provider().get_model().unwrap() as *const _;
        diagnoser.diagnose(Some(&image));
        let second = diagnoser.provider().get_model().unwrap() as *const _;
        assert_eq!(first, second);
    }
}
