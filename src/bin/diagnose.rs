//! 胸部X線画像を1枚診断するコマンドラインツール
//!
//! ```text
//! diagnose <image> [--id <識別番号>] [--config <config.json>] [--output <出力先>] [--model <model.tar.gz>]
//! ```

use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;

use neumonia_detector::history::{append_record, HistoryRecord};
use neumonia_detector::ml::{DefaultBackend, Diagnoser};
use neumonia_detector::model::AppConfig;
use neumonia_detector::types::RawImage;

#[derive(FromArgs)]
/// 胸部X線画像から肺炎の種類を推定し、判断根拠のヒートマップを出力する
struct DiagnoseArgs {
    /// 診断する画像（JPEG/PNG）
    #[argh(positional)]
    image: PathBuf,

    /// 患者の識別番号（履歴CSVに記録）
    #[argh(option, short = 'i')]
    id: Option<String>,

    /// 設定ファイルのパス
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// ヒートマップの出力先ディレクトリ
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// 優先して読み込むモデルファイル
    #[argh(option, short = 'm')]
    model: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args: DiagnoseArgs = argh::from_env();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(),
    };
    if let Some(model) = &args.model {
        config.prepend_model_path(model);
    }
    config.log_summary();

    let image = RawImage::open(&args.image)?;
    let diagnoser = Diagnoser::<DefaultBackend>::new(&config, Default::default());
    let outcome = diagnoser.diagnose(Some(&image));

    println!("診断結果: {}", outcome.label);
    println!("確信度: {:.2}% ({})", outcome.confidence, outcome.confidence_level());

    let output_dir = args
        .output
        .unwrap_or_else(|| PathBuf::from(&config.history.heatmap_dir));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("出力先を作成できません: {}", output_dir.display()))?;

    let stem = args
        .image
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "imagen".to_string());
    let heatmap_path = output_dir.join(format!("{}_heatmap.png", stem));
    outcome
        .heatmap
        .save(&heatmap_path)
        .with_context(|| format!("ヒートマップを保存できません: {}", heatmap_path.display()))?;
    println!("ヒートマップ: {}", heatmap_path.display());

    if outcome.is_error() {
        anyhow::bail!("画像を処理できませんでした: {}", args.image.display());
    }

    if let Some(id) = &args.id {
        let record = HistoryRecord::from_outcome(id, &outcome);
        append_record(PathBuf::from(&config.history.csv_path).as_path(), &record)?;
    }

    Ok(())
}
