//! ソースアーカイブの取得と展開
//!
//! ジョブのコード参照が指すアーカイブをコンテキスト内へダウンロードし、
//! `code/` サブフォルダへ展開します。アーカイブ自体は展開後に削除します。

use crate::context::BuildContext;
use crate::error::{BuildError, Result};
use flate2::read::GzDecoder;
use kilnflow_core::{CodeReference, JobKind};
use std::fs::{self, File};
use std::path::Path;
use std::process::Command;

/// ダウンロードした tar.gz の一時ファイル名
const CODE_ARCHIVE: &str = "_code.tar.gz";

pub struct SourceFetcher {
    client: reqwest::Client,
    internal_header: String,
}

impl SourceFetcher {
    /// `internal_header` は内部リポジトリのダウンロードに付けるヘッダ名
    pub fn new(internal_header: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            internal_header,
        }
    }

    /// アーカイブのダウンロード→展開→削除を行う
    pub async fn fetch(&self, reference: &CodeReference, context: &BuildContext) -> Result<()> {
        let archive_path = context.build_root().join(CODE_ARCHIVE);
        self.download(reference, &archive_path).await?;
        extract_archive(&archive_path, context.source_path())?;
        fs::remove_file(&archive_path)?;
        Ok(())
    }

    async fn download(&self, reference: &CodeReference, archive_path: &Path) -> Result<()> {
        let url = reference.download_url();
        tracing::debug!("Downloading code from {}", url);

        let mut request = self.client.get(url);
        if reference.is_internal() {
            // 内部リポジトリはサービス間認証ヘッダを要求する
            request = request.header(&self.internal_header, JobKind::Build.app_label());
        }

        let response = request.send().await.map_err(|e| BuildError::FetchFailed {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(BuildError::FetchFailed {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let body = response.bytes().await.map_err(|e| BuildError::FetchFailed {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        fs::write(archive_path, &body)?;
        Ok(())
    }
}

/// tar.gz アーカイブを展開する
pub fn extract_archive(archive_path: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(destination)?;
    Ok(())
}

/// ソースツリーを指定リビジョンへチェックアウトする
///
/// latest 以外のタグで呼ばれ、タグが識別するコミットに対してビルドを
/// 再現可能にします。
pub fn checkout_revision(repo_path: &Path, revision: &str) -> Result<()> {
    let output = Command::new("git")
        .arg("checkout")
        .arg(revision)
        .current_dir(repo_path)
        .output()
        .map_err(|e| BuildError::CheckoutFailed {
            revision: revision.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(BuildError::CheckoutFailed {
            revision: revision.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
