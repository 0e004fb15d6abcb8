//! ビルドジョブモデル

use crate::error::{CoreError, Result};
use crate::lifecycle::JobLifecycle;
use serde::{Deserialize, Serialize};

/// ジョブのソースコード参照
///
/// 内部リポジトリまたは外部リポジトリのどちらか一方のダウンロードURLを
/// 持ちます。どちらも存在しない場合は構築時エラーです。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeReference {
    Internal { download_url: String },
    External { download_url: String },
}

impl CodeReference {
    /// 内部 / 外部リポジトリのURLから参照を解決
    ///
    /// 内部リポジトリが優先されます。どちらも `None` の場合は
    /// `CoreError::MissingCodeReference` を返します。
    pub fn resolve(internal: Option<String>, external: Option<String>) -> Result<Self> {
        if let Some(url) = internal {
            return Ok(CodeReference::Internal { download_url: url });
        }
        if let Some(url) = external {
            return Ok(CodeReference::External { download_url: url });
        }
        Err(CoreError::MissingCodeReference)
    }

    pub fn download_url(&self) -> &str {
        match self {
            CodeReference::Internal { download_url } => download_url,
            CodeReference::External { download_url } => download_url,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CodeReference::Internal { .. })
    }
}

/// 1つのイメージビルドリクエスト
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    /// 安定な一意識別子。latest 以外のビルドではイメージタグとして使われる
    pub id: String,
    /// 人間可読な名前。ログ・ステータスのラベルに使われる
    pub name: String,
    /// ベースイメージ参照
    pub from_image: String,
    /// ビルドステップ（省略時は空。None にはしない）
    #[serde(default)]
    pub build_steps: Vec<String>,
    /// 環境変数（省略時は空。None にはしない）
    #[serde(default)]
    pub env_vars: Vec<String>,
    /// ソースコード参照
    pub code_reference: CodeReference,
    /// ビルドキャッシュを無効化するか（ビルド仕様由来）
    #[serde(default)]
    pub nocache: bool,
    /// ビルド時のメモリ上限（バイト）。未指定ならデーモンのデフォルト
    #[serde(default)]
    pub memory_limit: Option<u64>,
    pub status: JobLifecycle,
}

impl BuildJob {
    /// このジョブのイメージタグ
    ///
    /// ジョブIDがそのままタグになります。"latest" は再現性チェックアウトを
    /// スキップするセンチネルタグです。
    pub fn image_tag(&self) -> &str {
        &self.id
    }

    /// レジストリ内イメージ名（タグなし）
    ///
    /// ジョブ名の `.` 区切りをレジストリのパス区切りに変換します。
    pub fn image_name(&self, registry_host: &str) -> String {
        format!("{}/{}", registry_host, self.name.replace('.', "/"))
    }

    /// `image_name:image_tag` 形式の完全なイメージ参照
    pub fn tagged_image(&self, registry_host: &str) -> String {
        format!("{}:{}", self.image_name(registry_host), self.image_tag())
    }
}
