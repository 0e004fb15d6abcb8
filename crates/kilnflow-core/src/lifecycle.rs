//! ジョブライフサイクルとジョブ種別
//!
//! ライフサイクルはすべてのジョブ種別で共有される enum です。
//! ビルドジョブはそのうち Created / Building / Pushing / Succeeded / Failed
//! のサブセットのみを使用します。

use serde::{Deserialize, Serialize};
use std::fmt;

/// ジョブのライフサイクルステータス
///
/// ワイヤ上では Variant 名そのまま（"Created", "Building", ...）で
/// シリアライズされます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobLifecycle {
    Created,
    Building,
    Pushing,
    Scheduled,
    Starting,
    Running,
    Succeeded,
    Failed,
    Stopped,
    Skipped,
}

impl JobLifecycle {
    /// 終端ステータスかどうか
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            JobLifecycle::Succeeded
                | JobLifecycle::Failed
                | JobLifecycle::Stopped
                | JobLifecycle::Skipped
        )
    }

    /// 失敗系の終端ステータスかどうか
    pub fn is_failed(&self) -> bool {
        matches!(self, JobLifecycle::Failed | JobLifecycle::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobLifecycle::Created => "Created",
            JobLifecycle::Building => "Building",
            JobLifecycle::Pushing => "Pushing",
            JobLifecycle::Scheduled => "Scheduled",
            JobLifecycle::Starting => "Starting",
            JobLifecycle::Running => "Running",
            JobLifecycle::Succeeded => "Succeeded",
            JobLifecycle::Failed => "Failed",
            JobLifecycle::Stopped => "Stopped",
            JobLifecycle::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for JobLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ジョブ種別
///
/// ペイロードの `labels.app` 文字列で分岐する代わりに、閉じた enum として
/// 表現します。未知のラベルは `from_app_label` が `None` を返すので、
/// 呼び出し側で網羅的にハンドリングできます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Job,
    Build,
    Experiment,
    Tensorboard,
    Notebook,
}

impl JobKind {
    /// `labels.app` の値からジョブ種別を解決
    pub fn from_app_label(label: &str) -> Option<Self> {
        match label {
            "job" => Some(JobKind::Job),
            "dockerizer" => Some(JobKind::Build),
            "experiment" => Some(JobKind::Experiment),
            "tensorboard" => Some(JobKind::Tensorboard),
            "notebook" => Some(JobKind::Notebook),
            _ => None,
        }
    }

    /// ワイヤ上の `labels.app` 値
    pub fn app_label(&self) -> &'static str {
        match self {
            JobKind::Job => "job",
            JobKind::Build => "dockerizer",
            JobKind::Experiment => "experiment",
            JobKind::Tensorboard => "tensorboard",
            JobKind::Notebook => "notebook",
        }
    }

    /// プラグインジョブ（notebook / tensorboard）かどうか
    pub fn is_plugin(&self) -> bool {
        matches!(self, JobKind::Tensorboard | JobKind::Notebook)
    }
}
