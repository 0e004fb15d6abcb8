//! ビルドコンテキスト管理
//!
//! ビルド試行ごとに一意なスクラッチディレクトリを作り、その中に展開した
//! ソースと描画済み Dockerfile を置きます。固定の共有ディレクトリを
//! 使うと並行ビルドで衝突するため、ディレクトリ名はジョブID + ランダム
//! サフィックスです。

use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;

/// 描画済みマニフェストのファイル名（コンテキストルート直下）
pub const DOCKERFILE_NAME: &str = "Dockerfile";
/// 展開したソースを置くサブフォルダ名
pub const CODE_FOLDER: &str = "code";
/// 依存ファイル名。ソースツリーに存在する場合のみイメージに取り込む
pub const REQUIREMENTS_FILE: &str = "kiln_requirements.txt";
/// セットアップスクリプト名。ソースツリーに存在する場合のみ実行する
pub const SETUP_SCRIPT: &str = "kiln_setup.sh";

/// 1回のビルド試行が専有するコンテキスト
#[derive(Debug)]
pub struct BuildContext {
    build_root: PathBuf,
    source_path: PathBuf,
    dockerfile_path: PathBuf,
}

impl BuildContext {
    /// スクラッチルート配下に試行ごとのコンテキストを作成
    pub fn create(scratch_root: &Path, job_id: &str) -> Result<Self> {
        fs::create_dir_all(scratch_root)?;
        let build_root = tempfile::Builder::new()
            .prefix(&format!("{}-", job_id))
            .tempdir_in(scratch_root)?
            .keep();
        let source_path = build_root.join(CODE_FOLDER);
        fs::create_dir_all(&source_path)?;

        let dockerfile_path = build_root.join(DOCKERFILE_NAME);
        Ok(Self {
            build_root,
            source_path,
            dockerfile_path,
        })
    }

    /// デーモンにコンテキストとして渡すルート
    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// ソース展開先（`<build_root>/code`）
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn dockerfile_path(&self) -> &Path {
        &self.dockerfile_path
    }

    /// 依存ファイルのコンテキスト相対パス（存在する場合のみ）
    pub fn requirements_path(&self) -> Option<String> {
        let path = self.source_path.join(REQUIREMENTS_FILE);
        if path.is_file() {
            Some(format!("{}/{}", CODE_FOLDER, REQUIREMENTS_FILE))
        } else {
            None
        }
    }

    /// セットアップスクリプトのコンテキスト相対パス（存在する場合のみ）
    ///
    /// 検出時に実行ビットを立てます。
    pub fn setup_path(&self) -> Result<Option<String>> {
        let path = self.source_path.join(SETUP_SCRIPT);
        if !path.is_file() {
            return Ok(None);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(&path)?.permissions();
            permissions.set_mode(permissions.mode() | 0o111);
            fs::set_permissions(&path, permissions)?;
        }
        Ok(Some(format!("{}/{}", CODE_FOLDER, SETUP_SCRIPT)))
    }

    /// 描画済み Dockerfile を書き込む（既存内容は上書き）
    pub fn write_dockerfile(&self, content: &str) -> Result<()> {
        fs::write(&self.dockerfile_path, content)?;
        Ok(())
    }

    /// コンテキスト全体を tar.gz アーカイブにする
    ///
    /// Dockerfile もコンテキストルート直下に含まれます。
    pub fn archive(&self) -> Result<Vec<u8>> {
        if !self.build_root.exists() {
            return Err(BuildError::ContextNotFound(self.build_root.clone()));
        }

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);
            tar.append_dir_all(".", &self.build_root)
                .map_err(BuildError::Io)?;
            tar.finish().map_err(BuildError::Io)?;
        }
        tracing::debug!(
            "Build context archived: {} bytes from {}",
            archive_data.len(),
            self.build_root.display()
        );
        Ok(archive_data)
    }

    /// このコンテキストのクリーンアップガード
    ///
    /// Drop 時に Dockerfile と試行ディレクトリを削除します。早期 return や
    /// unwind を含むすべての終端パスで必ず1回だけ走ります。
    pub fn cleanup_guard(&self) -> CleanupGuard {
        CleanupGuard {
            dockerfile_path: self.dockerfile_path.clone(),
            build_root: self.build_root.clone(),
        }
    }
}

/// ビルド試行の成果物を削除するガード
#[derive(Debug)]
pub struct CleanupGuard {
    dockerfile_path: PathBuf,
    build_root: PathBuf,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.dockerfile_path.exists() {
            if let Err(e) = fs::remove_file(&self.dockerfile_path) {
                tracing::warn!(
                    "Failed to remove {}: {}",
                    self.dockerfile_path.display(),
                    e
                );
            }
        }
        if self.build_root.exists() {
            if let Err(e) = fs::remove_dir_all(&self.build_root) {
                tracing::warn!("Failed to remove {}: {}", self.build_root.display(), e);
            }
        }
    }
}
