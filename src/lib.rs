//! # 領域候補ベースの猫検出ライブラリ
//!
//! このクレートは、画像から猫を検出し、バウンディングボックスを描画するRustライブラリです。
//!
//! ## 主な機能
//!
//! 1. **領域候補の生成**: 画像から猫がいそうな矩形領域を列挙します。
//! 2. **領域の分類**: 切り出した領域をCNNで分類し、「猫」である確率を求めます。
//! 3. **NMS**: 重なり合うボックスをまとめ、最終的な検出結果を求めます。
//! 4. **描画**: 検出結果を画像に描画して保存します。
//!
//! ## Example
//! ```no_run
//! use rcnn_cat_detector::config::DetectorConfig;
//! use rcnn_cat_detector::detector::CatDetector;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = DetectorConfig::from_file("config.toml")?;
//! let detector = CatDetector::from_config(config)?;
//! let img = image::open("cat.jpg")?;
//! let (mut resized, report) = detector.detect_with_img_proc(&img)?;
//! detector.annotate(&mut resized, &report.detections);
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod detection_result;
pub mod detector;
pub mod img_proc;
pub mod intake;
pub mod model_bundle;
pub mod nms;
pub mod region;
