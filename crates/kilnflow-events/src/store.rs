//! ジョブレコード永続化の契約
//!
//! 永続化レイヤ（ORM / DB）はこのサブシステムの所有物ではなく、
//! `JobStore` という狭い read/write 契約としてのみ消費します。
//! `set_status` の一意性 / 並行性コンフリクトは `StoreError::Conflict`
//! として返し、ディスパッチャ側で握りつぶされます。

use async_trait::async_trait;
use kilnflow_core::{JobKind, JobLifecycle};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    /// 並行書き込みによる一意性コンフリクト。並行配送下では通常運転
    #[error("status write conflict for {kind:?} job {id}")]
    Conflict { kind: JobKind, id: String },

    #[error("backend error: {0}")]
    Backend(String),
}

/// 永続化されたジョブレコード
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub kind: JobKind,
    pub id: String,
    pub name: String,
    pub status: JobLifecycle,
    pub message: Option<String>,
    pub details: HashMap<String, serde_json::Value>,
}

impl JobRecord {
    pub fn new(kind: JobKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            status: JobLifecycle::Created,
            message: None,
            details: HashMap::new(),
        }
    }
}

/// ジョブレコードの読み書き契約
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 種別内でIDを解決。見つからなければ `Ok(None)`
    async fn get(&self, kind: JobKind, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// ステータス遷移を書き込む
    ///
    /// コンフリクトは `StoreError::Conflict`。呼び出し側は last-writer-wins
    /// を前提に握りつぶしてよい。
    async fn set_status(
        &self,
        kind: JobKind,
        id: &str,
        status: JobLifecycle,
        message: Option<String>,
        details: HashMap<String, serde_json::Value>,
    ) -> Result<(), StoreError>;
}

/// インメモリ実装（テスト・ワンショットビルド用）
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Arc<RwLock<HashMap<(JobKind, String), JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// レコードを登録（ジョブ作成に相当）
    pub async fn insert(&self, record: JobRecord) {
        let mut records = self.records.write().await;
        records.insert((record.kind, record.id.clone()), record);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, kind: JobKind, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&(kind, id.to_string())).cloned())
    }

    async fn set_status(
        &self,
        kind: JobKind,
        id: &str,
        status: JobLifecycle,
        message: Option<String>,
        details: HashMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&(kind, id.to_string())) {
            Some(record) => {
                record.status = status;
                record.message = message;
                record.details = details;
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "no record for {:?} job {}",
                kind, id
            ))),
        }
    }
}
