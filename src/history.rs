//! 診断履歴のCSV記録
//!
//! 1診断につき1行を追記します。ファイルが新規のときだけヘッダー行を書きます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

use crate::types::DiagnosticOutcome;

/// 履歴の1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// 患者の識別番号
    #[serde(rename = "Cédula")]
    pub identifier: String,
    #[serde(rename = "Diagnóstico")]
    pub label: String,
    /// 確信度（例: "87.50%"）
    #[serde(rename = "Probabilidad")]
    pub confidence: String,
    /// UTC時刻（秒まで）
    #[serde(rename = "Fecha")]
    pub timestamp: String,
}

impl HistoryRecord {
    pub fn from_outcome(identifier: &str, outcome: &DiagnosticOutcome) -> Self {
        Self {
            identifier: identifier.to_string(),
            label: outcome.label.to_string(),
            confidence: format!("{:.2}%", outcome.confidence),
            timestamp: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

/// 履歴ファイルへ1行追記
pub fn append_record(path: &Path, record: &HistoryRecord) -> Result<()> {
    let is_new = !path.exists();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create history directory: {:?}", parent))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(format!("Failed to open history file: {:?}", path))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    writer.serialize(record)?;
    writer.flush()?;

    log::info!("診断履歴を保存しました: {}", path.display());
    Ok(())
}

/// 履歴ファイルを読み込む
pub fn load_records(path: &Path) -> Result<Vec<HistoryRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context(format!("Failed to open history file: {:?}", path))?;

    let mut records = Vec::new();
    for result in reader.deserialize() {
        records.push(result?);
    }
    Ok(records)
}
