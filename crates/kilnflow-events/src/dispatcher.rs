//! ステータスイベントディスパッチャ
//!
//! ペイロードをジョブ種別に解決し、冪等なステータス遷移として適用します。
//! 「ジョブが存在しない」「書き込みコンフリクト」は at-least-once 配送の
//! 正常系であり、どちらもエラーに昇格させません。

use crate::error::Result;
use crate::sink::JobLogSink;
use crate::store::{JobStore, StoreError};
use kilnflow_core::{JobKind, LogLinePayload, StatusPayload};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    sink: JobLogSink,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, sink: JobLogSink) -> Self {
        Self { store, sink }
    }

    /// ステータスペイロードを1件適用する
    ///
    /// - 未知の `labels.app` → ログのみ、ドロップ
    /// - レコードなし → infoログ、ドロップ（イベントがレコード作成より
    ///   先行するレースや削除済みジョブで通常起こり得る）
    /// - 書き込みコンフリクト → 握りつぶす（last-writer-wins）
    pub async fn handle_status(&self, payload: StatusPayload) -> Result<()> {
        let labels = &payload.labels;
        debug!(
            "handling status event for job {} ({})",
            labels.job_name, labels.app
        );

        let Some(kind) = JobKind::from_app_label(&labels.app) else {
            info!("Unknown app label `{}`, dropping event", labels.app);
            return Ok(());
        };

        let record = self.store.get(kind, &labels.job_id).await?;
        if record.is_none() {
            info!("Job `{}` does not exist", labels.job_name);
            return Ok(());
        }

        match self
            .store
            .set_status(
                kind,
                &labels.job_id,
                payload.status,
                payload.message.clone(),
                payload.details.clone(),
            )
            .await
        {
            Ok(()) => Ok(()),
            // 並行配送でコンフリクトは起こり得る。無視する
            Err(StoreError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// ログ行イベントを1件適用する
    ///
    /// 参照先のジョブが存在しなければ黙ってドロップします。
    pub async fn handle_log_line(&self, kind: JobKind, payload: LogLinePayload) -> Result<()> {
        if self.store.get(kind, &payload.job_id).await?.is_none() {
            return Ok(());
        }
        debug!("handling log event for {}", payload.job_name);

        if let Err(e) = self.sink.append(&payload.job_name, &payload.formatted_line()) {
            // TODO: retry instead of dropping the line
            warn!("Dropping log line for {}: {}", payload.job_name, e);
        }
        Ok(())
    }
}
