//! モデル推論機能
//!
//! 前処理済みテンソルを分類器に通し、最も確率の高いクラスと確信度を返します。

use burn::tensor::backend::AutodiffBackend;

use crate::ml::ml_model::ClassifierModel;
use crate::ml::preprocess::PreprocessedTensor;
use crate::types::PredictionResult;

/// 異常値のときに採用するクラス（normal）
const SAFE_CLASS_INDEX: usize = 1;
/// 異常値のときに採用する確信度
const SAFE_CONFIDENCE: f32 = 50.0;

const SAFE_PREDICTION: PredictionResult = PredictionResult {
    class_index: SAFE_CLASS_INDEX,
    confidence: SAFE_CONFIDENCE,
};

/// 推論を実行（勾配追跡なし）
///
/// 推論自体が失敗した場合や確信度が [0, 100] に収まらない場合は
/// normal / 50.0 を返します。
pub fn infer<B, M>(model: &M, tensor: &PreprocessedTensor) -> PredictionResult
where
    B: AutodiffBackend,
    M: ClassifierModel<B> + ?Sized,
{
    let device = model.device();
    let input = tensor.to_tensor::<B::InnerBackend>(&device);

    let probabilities = match model.predict_proba(input) {
        Ok(output) => output.into_data().convert::<f32>().to_vec::<f32>(),
        Err(e) => {
            log::error!("推論に失敗しました: {}", e);
            return SAFE_PREDICTION;
        }
    };

    match probabilities {
        Ok(values) => {
            log::debug!("クラス確率: {:?}", values);
            select_class(&values)
        }
        Err(e) => {
            log::error!("推論結果の取得エラー: {:?}", e);
            SAFE_PREDICTION
        }
    }
}

/// 確率ベクトルから最大クラスを選ぶ（同値なら先頭）
pub fn select_class(probabilities: &[f32]) -> PredictionResult {
    let best = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, q)) if p <= q || p.is_nan() => best,
            _ => Some((i, p)),
        });

    let Some((class_index, max_probability)) = best else {
        log::warn!("確率ベクトルが空です。既定値を使用します");
        return SAFE_PREDICTION;
    };

    let confidence = max_probability * 100.0;
    let has_nan = probabilities.iter().any(|p| p.is_nan());
    if has_nan || !(0.0..=100.0).contains(&confidence) {
        log::warn!(
            "確信度が異常です ({}, NaN含む: {})。normal / {} に置き換えます",
            confidence,
            has_nan,
            SAFE_CONFIDENCE
        );
        return SAFE_PREDICTION;
    }

    PredictionResult {
        class_index,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::mock::{FailingModel, FixedOutputModel};
    use crate::ml::ml_model::DefaultBackend;
    use crate::ml::preprocess::ImagePreprocessor;
    use crate::types::RawImage;
    use ndarray::Array2;

    fn sample_tensor() -> PreprocessedTensor {
        let raw = RawImage::from_gray(Array2::from_elem((16, 16), 90));
        ImagePreprocessor::default().preprocess(Some(&raw)).unwrap()
    }

    #[test]
    fn test_select_class_argmax() {
        let result = select_class(&[0.1, 0.2, 0.7]);
        assert_eq!(result.class_index, 2);
        assert!((result.confidence - 70.0).abs() < 1e-4);
    }

    #[test]
    fn test_select_class_first_of_ties() {
        let result = select_class(&[0.4, 0.4, 0.2]);
        assert_eq!(result.class_index, 0);
    }

    #[test]
    fn test_select_class_nan_is_clamped() {
        let result = select_class(&[f32::NAN, 0.3, 0.2]);
        assert_eq!(result.class_index, 1);
        assert_eq!(result.confidence, 50.0);
    }

    #[test]
    fn test_select_class_out_of_range_is_clamped() {
        let result = select_class(&[0.1, 1.5, 0.2]);
        assert_eq!(result, SAFE_PREDICTION);

        let result = select_class(&[-0.5, -0.2, -0.9]);
        assert_eq!(result, SAFE_PREDICTION);
    }

    #[test]
    fn test_infer_with_model() {
        let model = FixedOutputModel::new(vec![0.85, 0.10, 0.05]);
        let result = infer::<DefaultBackend, _>(&model, &sample_tensor());
        assert_eq!(result.class_index, 0);
        assert!((result.confidence - 85.0).abs() < 1e-3);
    }

    #[test]
    fn test_infer_nan_probabilities() {
        let model = FixedOutputModel::new(vec![f32::NAN, f32::NAN, f32::NAN]);
        let result = infer::<DefaultBackend, _>(&model, &sample_tensor());
        assert_eq!(result.class_index, 1);
        assert_eq!(result.confidence, 50.0);
    }

    #[test]
    fn test_infer_recovers_from_model_failure() {
        let result = infer::<DefaultBackend, _>(&FailingModel, &sample_tensor());
        assert_eq!(result, SAFE_PREDICTION);
    }
}
