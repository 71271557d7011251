use anyhow::{Context, Result};
use std::time::Instant;

use rcnn_cat_detector::config::DetectorConfig;
use rcnn_cat_detector::detector::CatDetector;
use rcnn_cat_detector::intake::Workspace;

fn main() -> Result<()> {
    pretty_env_logger::init();

    // 使い方: detect <image> [config.toml]
    let mut args = std::env::args().skip(1);
    let image_path = args.next().context("usage: detect <image> [config.toml]")?;
    let config = match args.next() {
        Some(path) => DetectorConfig::from_file(path)?,
        None => DetectorConfig::default(),
    };

    // アップロードと同じ手順で画像を受け付ける
    let ws = Workspace::new(config.upload.clone())?;
    let filename = std::path::Path::new(&image_path)
        .file_name()
        .and_then(|n| n.to_str())
        .context("invalid image path")?;
    let data = std::fs::read(&image_path)?;
    let name = ws.accept(filename, &data)?;

    // モデルを読み込む
    let detector = CatDetector::from_config(config)?;

    let start = Instant::now();
    let result = detector.process_file(&ws, &name)?;
    let t = start.elapsed().as_secs_f64() * 1000.0;

    for d in &result.report.detections {
        println!("{:?}", d);
    }
    println!(
        "{} proposals, {} before NMS, {} after NMS",
        result.report.proposals,
        result.report.candidates.len(),
        result.report.detections.len()
    );
    println!("Processing time:{:.03}ms", t);
    println!("uploaded:  {}", result.uploaded.display());
    println!("processed: {}", result.processed.display());

    Ok(())
}
