//! 切り出した領域を分類するモジュール

use std::path::Path;

use anyhow::{ensure, Context, Result};
use image::RgbImage;
use log::debug;
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
};

use crate::img_proc;
use crate::model_bundle::ModelBundle;

/// 領域画像をラベルごとの確率に変換する分類器
///
/// 同じ入力に対しては常に同じ確率を返す必要があります。
pub trait Classifier {
    /// 出力の順に並んだラベル
    fn labels(&self) -> &[String];

    /// 分類器の入力サイズ (幅, 高さ)
    fn input_dims(&self) -> (u32, u32);

    /// 領域ごとの確率分布を返します。
    ///
    /// # Args
    /// * `rois` - `input_dims` の大きさにリサイズ済みの領域画像
    ///
    /// # Return
    /// * `rois` と同じ長さの、`labels` と同じ長さの確率ベクトルの配列
    fn classify(&self, rois: &[RgbImage]) -> Result<Vec<Vec<f32>>>;
}

/// ONNX Runtimeで動く分類器
///
/// モデルは生成時に一度だけ読み込まれます。
pub struct OnnxClassifier {
    sess: Session,
    labels: Vec<String>,
    input_name: String,
    output_name: String,
    input_dims: (u32, u32),
}

impl OnnxClassifier {
    /// モデルバンドルから分類器を作成します。
    ///
    /// # Args
    /// * `path` - モデルバンドルのパス
    /// * `input_name` - モデルの入力名
    /// * `output_name` - モデルの出力名
    /// * `input_dims` - モデルの入力サイズ (幅, 高さ)
    pub fn from_bundle<P: AsRef<Path>>(
        path: P,
        input_name: &str,
        output_name: &str,
        input_dims: (u32, u32),
    ) -> Result<Self> {
        let bundle = ModelBundle::read(path)?;
        let sess = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_memory(&bundle.model)?;

        Ok(Self {
            sess,
            labels: bundle.labels,
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
            input_dims,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn input_dims(&self) -> (u32, u32) {
        self.input_dims
    }

    fn classify(&self, rois: &[RgbImage]) -> Result<Vec<Vec<f32>>> {
        if rois.is_empty() {
            return Ok(vec![]);
        }
        let input = img_proc::to_input_tensor(rois)?;

        let mut outputs = self
            .sess
            .run(inputs![self.input_name.as_str() => input]?)?;
        let output = outputs
            .get_mut(self.output_name.as_str())
            .with_context(|| format!("model has no output named {}", self.output_name))?;

        let proba = output.try_extract_tensor::<f32>()?;
        let proba = proba.into_dimensionality::<ndarray::Ix2>()?;
        ensure!(
            proba.nrows() == rois.len() && proba.ncols() == self.labels.len(),
            "unexpected output shape {:?} for {} regions and {} labels",
            proba.shape(),
            rois.len(),
            self.labels.len()
        );
        debug!("classified {} regions", rois.len());

        Ok(proba.outer_iter().map(|row| row.to_vec()).collect())
    }
}
