//! 検出パイプラインの設定を扱うモジュール

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

/// 検出パイプラインの設定
///
/// TOMLから読み込みます。省略した項目にはデフォルト値が使われます。
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// モデルバンドル (model.onnx と labels.txt を含む tar.gz) のパス
    pub model_path: PathBuf,
    /// ONNX Runtimeの共有ライブラリ。ない場合は `ORT_DYLIB_PATH` が使われます
    pub ort_dylib_path: Option<PathBuf>,
    /// 分類器の入力名
    pub input_name: String,
    /// 分類器の出力名
    pub output_name: String,
    /// 分類器の入力サイズ (幅, 高さ)
    pub input_dims: (u32, u32),
    /// 検出対象のラベル
    pub target_label: String,
    /// 分類する領域候補の最大数
    pub max_proposals: usize,
    /// この確率未満の候補は捨てられます
    pub min_proba: f32,
    /// NMSの閾値
    pub overlap_thresh: f32,
    /// 領域候補を出す前に画像をこの幅にリサイズします
    pub resize_width: u32,
    /// ラベル描画用のフォント (TTF)。ない場合は枠だけ描画します
    pub font_path: Option<PathBuf>,
    pub proposals: ProposalConfig,
    pub upload: UploadConfig,
}

/// スライディングウィンドウによる領域候補の設定
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProposalConfig {
    /// 画像の短辺に対するウィンドウの大きさの割合 (大きい順に走査します)
    pub scales: Vec<f32>,
    /// ウィンドウの大きさに対するステップ幅の割合
    pub step_ratio: f32,
    /// これより小さいウィンドウは出しません
    pub min_size: u32,
}

/// アップロードの設定
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub upload_dir: PathBuf,
    pub download_dir: PathBuf,
    /// アップロードの最大サイズ (バイト)
    pub max_upload_bytes: u64,
    /// 許可する拡張子 (小文字)
    pub allowed_extensions: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model/cat_detector.tar.gz"),
            ort_dylib_path: None,
            input_name: "input_1".to_string(),
            output_name: "dense_1".to_string(),
            input_dims: (224, 224),
            target_label: "cat".to_string(),
            max_proposals: 200,
            min_proba: 0.99,
            overlap_thresh: 0.3,
            resize_width: 500,
            font_path: None,
            proposals: ProposalConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            scales: vec![0.9, 0.6, 0.4],
            step_ratio: 0.25,
            min_size: 32,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("static/uploads"),
            download_dir: PathBuf::from("static/downloads"),
            max_upload_bytes: 2 * 1024 * 1024,
            allowed_extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
        }
    }
}

impl DetectorConfig {
    /// TOML文字列から設定を読み込みます。
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// TOMLファイルから設定を読み込みます。
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::from_toml_str(&s)
    }

    /// 設定値の範囲をチェックします。
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.overlap_thresh > 0. && self.overlap_thresh < 1.,
            "overlap_thresh must be in (0, 1): {}",
            self.overlap_thresh
        );
        ensure!(
            (0. ..=1.).contains(&self.min_proba),
            "min_proba must be in [0, 1]: {}",
            self.min_proba
        );
        ensure!(self.max_proposals > 0, "max_proposals must be positive");
        ensure!(
            self.input_dims.0 > 0 && self.input_dims.1 > 0,
            "input_dims must be positive: {:?}",
            self.input_dims
        );
        ensure!(self.resize_width > 0, "resize_width must be positive");
        ensure!(
            !self.proposals.scales.is_empty()
                && self.proposals.scales.iter().all(|s| *s > 0. && *s <= 1.),
            "proposal scales must be in (0, 1]: {:?}",
            self.proposals.scales
        );
        ensure!(
            self.proposals.step_ratio > 0. && self.proposals.step_ratio <= 1.,
            "step_ratio must be in (0, 1]: {}",
            self.proposals.step_ratio
        );
        Ok(())
    }
}
