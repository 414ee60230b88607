pub mod config;
pub mod model_metadata;
pub mod model_storage;
pub mod provider;

pub use config::{AppConfig, ExplanationSettings, HistorySettings, ModelSettings, PreprocessSettings};
pub use model_metadata::ModelMetadata;
pub use model_storage::{
    load_metadata, load_model_binary, load_model_with_metadata, log_metadata_info,
    save_model_with_metadata,
};
pub use provider::{resolve_explanation_layer, ModelProvider};
