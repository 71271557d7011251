//! アップロードされた画像ファイルを受け付けるモジュール

use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use log::info;

use crate::config::UploadConfig;

/// ファイル名の拡張子が許可されているかを返します。
///
/// # Args
///
/// * `filename` - ファイル名
/// * `allowed` - 許可する拡張子 (小文字)
pub fn allowed_file(filename: &str, allowed: &[String]) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_lowercase();
            allowed.iter().any(|a| *a == ext)
        }
        None => false,
    }
}

/// ファイル名を安全な形に変換します。
///
/// ASCIIの英数字と `.`, `-`, `_` だけを残し、空白は `_` に置き換えます。
/// パス区切りは取り除かれ、先頭の `.` と `_` も削除されます。
///
/// # Return
/// * 変換後のファイル名。空になった場合はエラー
pub fn secure_filename(filename: &str) -> Result<String> {
    let name: String = filename
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() => Some(c),
            '.' | '-' | '_' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let name = name.trim_start_matches(['.', '_']).to_string();
    ensure!(!name.is_empty(), "invalid file name: {:?}", filename);
    Ok(name)
}

/// アップロードと出力画像を置くディレクトリ
#[derive(Debug, Clone)]
pub struct Workspace {
    config: UploadConfig,
}

impl Workspace {
    /// ディレクトリを作成し、新しいWorkspaceを返します。
    pub fn new(config: UploadConfig) -> Result<Self> {
        for dir in [&config.upload_dir, &config.download_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(Self { config })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.upload_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.config.download_dir
    }

    /// アップロードされたファイルを検査して保存します。
    ///
    /// # Args
    ///
    /// * `filename` - クライアントが送ってきたファイル名
    /// * `data` - ファイルの中身
    ///
    /// # Return
    /// * 保存したファイル名 (secure_filename適用後)
    pub fn accept(&self, filename: &str, data: &[u8]) -> Result<String> {
        if filename.is_empty() {
            bail!("no file selected");
        }
        ensure!(
            allowed_file(filename, &self.config.allowed_extensions),
            "file type not allowed: {}",
            filename
        );
        ensure!(
            data.len() as u64 <= self.config.max_upload_bytes,
            "upload too large: {} bytes (max: {})",
            data.len(),
            self.config.max_upload_bytes
        );

        let name = secure_filename(filename)?;
        ensure!(
            allowed_file(&name, &self.config.allowed_extensions),
            "file name {:?} lost its extension after sanitizing: {:?}",
            filename,
            name
        );
        let path = self.upload_path(&name);
        std::fs::write(&path, data)
            .with_context(|| format!("failed to save upload: {}", path.display()))?;
        info!("accepted upload {} ({} bytes)", name, data.len());
        Ok(name)
    }

    /// 保存済みのアップロードファイルのパス
    pub fn upload_path(&self, name: &str) -> PathBuf {
        self.config.upload_dir.join(name)
    }

    /// 検出結果を描画した画像のパス
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.config.download_dir.join(name)
    }
}
