pub mod clahe;
pub mod diagnosis;
pub mod fallback;
pub mod grad_cam;
pub mod inference;
pub mod ml_model;
pub mod overlay;
pub mod preprocess;

#[cfg(test)]
pub(crate) mod mock;

pub use diagnosis::Diagnoser;
pub use fallback::FallbackHeatmap;
pub use grad_cam::{ActivationMap, GradCam};
pub use inference::{infer, select_class};
pub use ml_model::{
    ClassifierModel, DefaultBackend, LayerForward, LayerHandle, ModelConfig, PneumoniaClassifier,
    CLASS_NAMES, EXPLANATION_LAYER, IMAGE_SIZE, NUM_CLASSES,
};
pub use preprocess::{ImagePreprocessor, PreprocessedTensor};
