//! テスト用の分類器

use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::error::ModelError;
use crate::ml::ml_model::{
    ClassifierModel, DefaultBackend, LayerForward, LayerHandle, ModelConfig, PneumoniaClassifier,
};

type Inner = <DefaultBackend as burn::tensor::backend::AutodiffBackend>::InnerBackend;
type Device = <DefaultBackend as Backend>::Device;

/// 固定の確率を返すだけの分類器（レイヤなし）
pub struct FixedOutputModel {
    probabilities: Vec<f32>,
}

impl FixedOutputModel {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self { probabilities }
    }
}

impl ClassifierModel<DefaultBackend> for FixedOutputModel {
    fn device(&self) -> Device {
        Default::default()
    }

    fn predict_proba(&self, _input: Tensor<Inner, 4>) -> Result<Tensor<Inner, 2>, ModelError> {
        let n = self.probabilities.len();
        Ok(Tensor::from_data(
            TensorData::new(self.probabilities.clone(), [1, n]),
            &Default::default(),
        ))
    }

    fn layers(&self) -> Vec<LayerHandle> {
        Vec::new()
    }

    fn forward_with_activation(
        &self,
        _input: Tensor<DefaultBackend, 4>,
        layer: &LayerHandle,
    ) -> Result<LayerForward<DefaultBackend>, ModelError> {
        Err(ModelError::NotSpatial(layer.name.clone()))
    }
}

/// 推論に必ず失敗する分類器
pub struct FailingModel;

impl ClassifierModel<DefaultBackend> for FailingModel {
    fn device(&self) -> Device {
        Default::default()
    }

    fn predict_proba(&self, _input: Tensor<Inner, 4>) -> Result<Tensor<Inner, 2>, ModelError> {
        Err(ModelError::Inference("forced failure".to_string()))
    }

    fn layers(&self) -> Vec<LayerHandle> {
        Vec::new()
    }

    fn forward_with_activation(
        &self,
        _input: Tensor<DefaultBackend, 4>,
        _layer: &LayerHandle,
    ) -> Result<LayerForward<DefaultBackend>, ModelError> {
        Err(ModelError::Inference("forced failure".to_string()))
    }
}

/// 本物のCNNをレイヤ名だけ差し替えて公開する分類器
pub struct RenamedLayersModel {
    inner: PneumoniaClassifier<DefaultBackend>,
    names: Vec<&'static str>,
}

impl RenamedLayersModel {
    /// 説明用レイヤが `block_conv` という名前のモデル
    pub fn block_conv() -> Self {
        Self {
            inner: ModelConfig::new().init(&Default::default()),
            names: vec![
                "input_conv",
                "relu_1",
                "pool_1",
                "mid_conv",
                "relu_2",
                "pool_2",
                "block_conv",
                "relu_3",
                "gap",
                "fc_1",
                "relu_4",
                "fc_2",
            ],
        }
    }
}

impl ClassifierModel<DefaultBackend> for RenamedLayersModel {
    fn device(&self) -> Device {
        self.inner.device()
    }

    fn predict_proba(&self, input: Tensor<Inner, 4>) -> Result<Tensor<Inner, 2>, ModelError> {
        self.inner.predict_proba(input)
    }

    fn layers(&self) -> Vec<LayerHandle> {
        self.inner
            .layers()
            .into_iter()
            .zip(self.names.iter())
            .map(|(layer, name)| LayerHandle {
                name: name.to_string(),
                ..layer
            })
            .collect()
    }

    fn forward_with_activation(
        &self,
        input: Tensor<DefaultBackend, 4>,
        layer: &LayerHandle,
    ) -> Result<LayerForward<DefaultBackend>, ModelError> {
        self.inner.forward_with_activation(input, layer)
    }
}

/// 活性化がスコアの計算グラフに含まれない分類器（勾配が得られない）
pub struct DetachedActivationModel {
    inner: PneumoniaClassifier<DefaultBackend>,
}

impl DetachedActivationModel {
    pub fn new() -> Self {
        Self {
            inner: ModelConfig::new().init(&Default::default()),
        }
    }
}

impl ClassifierModel<DefaultBackend> for DetachedActivationModel {
    fn device(&self) -> Device {
        self.inner.device()
    }

    fn predict_proba(&self, input: Tensor<Inner, 4>) -> Result<Tensor<Inner, 2>, ModelError> {
        self.inner.predict_proba(input)
    }

    fn layers(&self) -> Vec<LayerHandle> {
        self.inner.layers()
    }

    fn forward_with_activation(
        &self,
        input: Tensor<DefaultBackend, 4>,
        layer: &LayerHandle,
    ) -> Result<LayerForward<DefaultBackend>, ModelError> {
        let activation = self.inner.forward_until(input.clone(), layer.index).detach();
        let scores = self.inner.forward(input.detach().require_grad());
        Ok(LayerForward { scores, activation })
    }
}

/// 推論中にパニックする分類器
pub struct PanickingModel;

impl ClassifierModel<DefaultBackend> for PanickingModel {
    fn device(&self) -> Device {
        Default::default()
    }

    fn predict_proba(&self, _input: Tensor<Inner, 4>) -> Result<Tensor<Inner, 2>, ModelError> {
        panic!("backend failure")
    }

    fn layers(&self) -> Vec<LayerHandle> {
        Vec::new()
    }

    fn forward_with_activation(
        &self,
        _input: Tensor<DefaultBackend, 4>,
        _layer: &LayerHandle,
    ) -> Result<LayerForward<DefaultBackend>, ModelError> {
        panic!("backend failure")
    }
}
