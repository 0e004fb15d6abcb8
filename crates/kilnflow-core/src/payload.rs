//! キュー上を流れるイベントペイロード
//!
//! ステータスイベントとログ行イベントの2種類のワイヤ形式を定義します。
//! どちらも at-least-once 配送を前提とするため、受信側は重複・順序逆転を
//! 許容する必要があります（kilnflow-events 参照）。

use crate::lifecycle::JobLifecycle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// ステータスペイロードの識別ラベル
///
/// `app` / `jobId` / `jobName` は必須。それ以外のアプリ固有キーは
/// `extra` にそのまま保持されます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusLabels {
    pub app: String,
    pub job_id: String,
    pub job_name: String,
    #[serde(flatten, default)]
    pub extra: HashMap<String, String>,
}

/// ジョブステータスイベント
///
/// ビルドジョブ・通常ジョブ・実験ジョブ・プラグインジョブで共通の形式。
/// `details` は記録先にそのままエコーバックされる自由形式マップです。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub labels: StatusLabels,
    pub status: JobLifecycle,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl StatusPayload {
    pub fn new(labels: StatusLabels, status: JobLifecycle, message: Option<String>) -> Self {
        Self {
            labels,
            status,
            message,
            details: HashMap::new(),
        }
    }
}

/// ジョブログ行イベント
///
/// ステータス遷移ではなく、ジョブ名ごとのログシンクへ追記されます。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLinePayload {
    pub job_id: String,
    pub job_name: String,
    pub line: String,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub task_index: Option<u32>,
}

impl LogLinePayload {
    /// シンクへ書き込む整形済みの行
    ///
    /// 分散タスクの場合は `"{type}.{index+1} -- "` プレフィックスを付けます
    /// （index は0始まり、表示は1始まり）。
    pub fn formatted_line(&self) -> String {
        match (&self.task_type, self.task_index) {
            (Some(task_type), Some(idx)) => {
                format!("{}.{} -- {}", task_type, idx + 1, self.line)
            }
            _ => self.line.clone(),
        }
    }
}
