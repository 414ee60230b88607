//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、入力サイズ、チャネル構成など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : モデルの重み
///
/// # 戻り値
/// - 実際に書き込んだパス（拡張子が `.gz` でなければ `.tar.gz` を付与）
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    };

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .context(format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .context(format!("Failed to add {} to tar", name))
}

/// アーカイブから名前の一致するエントリを読み出す（見つからなければ `None`）
fn read_entries(tar_gz_path: &Path, wanted: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut found = vec![None; wanted.len()];
    for entry in archive.entries()? {
        let mut entry = entry?;
        let slot = entry
            .path()?
            .to_str()
            .and_then(|name| wanted.iter().position(|w| *w == name));
        if let Some(slot) = slot {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found[slot] = Some(buffer);
        }
    }
    Ok(found)
}

fn parse_metadata(bytes: Option<Vec<u8>>) -> Result<ModelMetadata> {
    let bytes = bytes.ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY))?;
    let json_str = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json_str)
}

fn require_binary(bytes: Option<Vec<u8>>) -> Result<Vec<u8>> {
    bytes.ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", MODEL_ENTRY))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut found = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    parse_metadata(found.pop().flatten())
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let mut found = read_entries(tar_gz_path, &[MODEL_ENTRY])?;
    require_binary(found.pop().flatten())
}

/// メタデータとモデルバイナリを1回の走査で共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut found = read_entries(tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?.into_iter();
    let metadata = parse_metadata(found.next().flatten())?;
    let binary = require_binary(found.next().flatten())?;
    Ok((metadata, binary))
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    log::info!("=== モデルメタデータ ===");
    log::info!("クラスラベル: {}", metadata.class_labels.join(", "));
    log::info!("モデル入力サイズ: {}x{}", metadata.input_size, metadata.input_size);
    log::info!(
        "チャネル構成: {:?}, 中間層: {}",
        metadata.conv_channels,
        metadata.hidden_units
    );
    log::info!("説明レイヤ: {}", metadata.explanation_layer);
    log::info!("作成日時: {}", metadata.created_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ml_model::ModelConfig;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("neumonia_storage_{}_{}", std::process::id(), name));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_save_and_load_archive() {
        let dir = temp_dir("roundtrip");
        let metadata = ModelMetadata::from_config(&ModelConfig::new());
        let binary = vec![1u8, 2, 3, 4, 5];

        let written = save_model_with_metadata(&dir.join("model"), &metadata, &binary).unwrap();
        assert!(written.to_string_lossy().ends_with("model.tar.gz"));

        let (loaded_meta, loaded_bin) = load_model_with_metadata(&written).unwrap();
        assert_eq!(loaded_meta.class_labels, metadata.class_labels);
        assert_eq!(loaded_bin, binary);

        assert_eq!(load_metadata(&written).unwrap().input_size, 512);
        assert_eq!(load_model_binary(&written).unwrap(), binary);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_archive_without_model_binary() {
        let dir = temp_dir("partial");
        let path = dir.join("partial.tar.gz");
        let metadata = ModelMetadata::from_config(&ModelConfig::new());

        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = Builder::new(encoder);
        append_entry(&mut builder, METADATA_ENTRY, metadata.to_json_string().unwrap().as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert_eq!(load_metadata(&path).unwrap().class_labels, metadata.class_labels);
        let err = load_model_binary(&path).unwrap_err();
        assert!(err.to_string().contains(MODEL_ENTRY));
        assert!(load_model_with_metadata(&path).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_archive() {
        let dir = temp_dir("missing");
        assert!(load_metadata(&dir.join("nothing.tar.gz")).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
