//! 分類モデルとラベルをまとめたバンドルを読み込むモジュール

use std::io::Read;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use flate2::read::GzDecoder;
use log::{info, warn};

const MODEL_ENTRY: &str = "model.onnx";
const LABELS_ENTRY: &str = "labels.txt";

/// gzipで圧縮されたtarアーカイブから読み込んだモデルとラベル
pub struct ModelBundle {
    /// ONNXモデルのバイト列
    pub model: Vec<u8>,
    /// モデルの出力順に並んだラベル
    pub labels: Vec<String>,
}

impl ModelBundle {
    /// バンドルを読み込みます。
    ///
    /// # Args
    /// * `path` - モデルとラベルが格納されているgzipアーカイブへのパス
    ///
    /// # 注意
    /// * ファイル名が "model.onnx" の場合、ONNXモデルとして読み込みます。
    /// * ファイル名が "labels.txt" の場合、1行に1ラベルとして読み込みます。
    /// * それ以外のファイルは警告をログに出力して無視します。
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open model bundle: {}", path.display()))?;
        let bundle = Self::from_reader(file)?;
        info!(
            "loaded model bundle {} ({} bytes, labels: {:?})",
            path.display(),
            bundle.model.len(),
            bundle.labels
        );
        Ok(bundle)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        let mut model = None;
        let mut labels = None;

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?.into_owned();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

            match name {
                MODEL_ENTRY => {
                    let mut buf = Vec::new();
                    entry.read_to_end(&mut buf)?;
                    model = Some(buf);
                }
                LABELS_ENTRY => {
                    let mut s = String::new();
                    entry.read_to_string(&mut s)?;
                    labels = Some(parse_labels(&s));
                }
                _ => warn!("ignoring unknown bundle entry: {}", path.display()),
            }
        }

        let model = model.with_context(|| format!("{} not found in bundle", MODEL_ENTRY))?;
        let labels = labels.with_context(|| format!("{} not found in bundle", LABELS_ENTRY))?;
        ensure!(!labels.is_empty(), "{} is empty", LABELS_ENTRY);

        Ok(Self { model, labels })
    }
}

fn parse_labels(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
