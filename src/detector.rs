//! 領域候補・分類・NMSをつないで猫を検出するモジュール

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use image::{DynamicImage, RgbImage};
use log::{debug, info};
use rusttype::Font;

use crate::classifier::{Classifier, OnnxClassifier};
use crate::config::DetectorConfig;
use crate::detection_result::{BoundingBox, Detection, DetectionReport, ScoredBox};
use crate::img_proc::{self, DrawStyle};
use crate::intake::Workspace;
use crate::nms::nms_process;
use crate::region::{RegionProposer, SlidingWindowProposer};

/// 猫を検出する構造体
///
/// 生成後は状態を変更しないため、複数の画像に対して使い回せます。
pub struct CatDetector<P, C> {
    proposer: P,
    classifier: C,
    config: DetectorConfig,
    /// 分類器の出力のうち対象ラベルの位置
    target_idx: usize,
    font: Option<Font<'static>>,
    style: DrawStyle,
}

/// `process_file` の結果
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub uploaded: PathBuf,
    pub processed: PathBuf,
    pub report: DetectionReport,
}

impl CatDetector<SlidingWindowProposer, OnnxClassifier> {
    /// 設定からモデルを読み込み、新しい `CatDetector` インスタンスを作成します。
    ///
    /// # Args
    /// * `config` - 検出パイプラインの設定
    ///
    /// # Return
    /// * 新たな `CatDetector` インスタンス
    pub fn from_config(config: DetectorConfig) -> Result<Self> {
        if let Some(path) = &config.ort_dylib_path {
            ort::init_from(path.display().to_string()).commit()?;
        }
        let classifier = OnnxClassifier::from_bundle(
            &config.model_path,
            &config.input_name,
            &config.output_name,
            config.input_dims,
        )?;
        let proposer = SlidingWindowProposer::new(&config.proposals);

        let font = match &config.font_path {
            Some(path) => Some(img_proc::load_font(path)?),
            None => None,
        };

        Ok(Self::new(proposer, classifier, config)?.with_font(font))
    }
}

impl<P: RegionProposer, C: Classifier> CatDetector<P, C> {
    /// 新しい `CatDetector` インスタンスを作成します。
    ///
    /// # Args
    /// * `proposer` - 領域候補の生成器
    /// * `classifier` - 分類器
    /// * `config` - 検出パイプラインの設定
    pub fn new(proposer: P, classifier: C, config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        let target_idx = classifier
            .labels()
            .iter()
            .position(|l| *l == config.target_label)
            .with_context(|| {
                format!(
                    "label {:?} not in classifier labels {:?}",
                    config.target_label,
                    classifier.labels()
                )
            })?;
        ensure!(
            classifier.input_dims() == config.input_dims,
            "classifier input {:?} does not match config {:?}",
            classifier.input_dims(),
            config.input_dims
        );

        Ok(Self {
            proposer,
            classifier,
            config,
            target_idx,
            font: None,
            style: DrawStyle::default(),
        })
    }

    /// ラベル描画用のフォントを設定します。
    pub fn with_font(mut self, font: Option<Font<'static>>) -> Self {
        self.font = font;
        self
    }

    /// 描画スタイルを設定します。
    pub fn with_style(mut self, style: DrawStyle) -> Self {
        self.style = style;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// 画像から猫を検出します。
    ///
    /// # Args
    /// * `img` - 入力画像 (リサイズ済み)
    ///
    /// # Return
    /// * 物体検出結果
    pub fn detect(&self, img: &RgbImage) -> Result<DetectionReport> {
        let mut regions = self.proposer.propose(img);
        regions.truncate(self.config.max_proposals);
        debug!("{} region proposals", regions.len());

        if regions.is_empty() {
            return Ok(DetectionReport::default());
        }

        let rois: Vec<RgbImage> = regions
            .iter()
            .map(|r| img_proc::crop_roi(img, r, self.config.input_dims))
            .collect();
        let proba = self.classifier.classify(&rois)?;
        ensure!(
            proba.len() == regions.len(),
            "classifier returned {} results for {} regions",
            proba.len(),
            regions.len()
        );

        let scored = self.select_target(&regions, &proba)?;
        let (candidates, kept) =
            nms_process(&scored, self.config.min_proba, self.config.overlap_thresh)?;

        let label = &self.config.target_label;
        let report = DetectionReport {
            proposals: regions.len(),
            candidates: candidates.into_iter().map(|sb| Detection::new(label, sb)).collect(),
            detections: kept.into_iter().map(|sb| Detection::new(label, sb)).collect(),
        };
        info!(
            "{} proposals, {} candidates, {} detections",
            report.proposals,
            report.candidates.len(),
            report.detections.len()
        );
        Ok(report)
    }

    /// 最も確率の高いラベルが対象ラベルである領域を、その確率とともに返します。
    fn select_target(&self, regions: &[BoundingBox], proba: &[Vec<f32>]) -> Result<Vec<ScoredBox>> {
        let n_labels = self.classifier.labels().len();
        let mut scored = Vec::new();
        for (region, p) in regions.iter().zip(proba) {
            ensure!(
                p.len() == n_labels,
                "expected {} probabilities, got {}",
                n_labels,
                p.len()
            );
            let best = p
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(i, _)| i);
            if best == Some(self.target_idx) {
                scored.push(ScoredBox::new(*region, p[self.target_idx]));
            }
        }
        Ok(scored)
    }

    /// 画像をリサイズしてから猫を検出します。
    ///
    /// # Args
    /// * `img` - 入力画像
    ///
    /// # Return
    /// * (リサイズした画像, 物体検出結果)
    pub fn detect_with_img_proc(&self, img: &DynamicImage) -> Result<(RgbImage, DetectionReport)> {
        let resized = img_proc::resize_to_width(img, self.config.resize_width).to_rgb8();
        let report = self.detect(&resized)?;
        Ok((resized, report))
    }

    /// 検出結果を画像に描画します。
    pub fn annotate(&self, img: &mut RgbImage, detections: &[Detection]) {
        img_proc::draw_detections(img, detections, self.font.as_ref(), &self.style);
    }

    /// アップロード済みの画像から猫を検出し、結果を描画した画像を保存します。
    ///
    /// # Args
    /// * `workspace` - アップロードと出力のディレクトリ
    /// * `name` - `Workspace::accept` が返したファイル名
    ///
    /// # Return
    /// * 入力と出力のパス、検出結果
    pub fn process_file(&self, workspace: &Workspace, name: &str) -> Result<ProcessedFile> {
        let uploaded = workspace.upload_path(name);
        let img = image::open(&uploaded)
            .with_context(|| format!("failed to open image: {}", uploaded.display()))?;

        let (mut resized, report) = self.detect_with_img_proc(&img)?;
        self.annotate(&mut resized, &report.detections);

        let processed = workspace.output_path(name);
        resized
            .save(&processed)
            .with_context(|| format!("failed to save image: {}", processed.display()))?;
        info!("saved {}", processed.display());

        Ok(ProcessedFile {
            uploaded,
            processed,
            report,
        })
    }
}
