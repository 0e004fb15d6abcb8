//! Kilnflow 共有モデル
//!
//! ビルドジョブ・ライフサイクル・ステータスイベントのデータモデルを定義します。
//! ビルドパイプライン (kilnflow-build) とイベントディスパッチャ (kilnflow-events)
//! の両方から参照される、依存の少ないベースクレートです。

pub mod error;
pub mod job;
pub mod lifecycle;
pub mod payload;

pub use error::{CoreError, Result};
pub use job::{BuildJob, CodeReference};
pub use lifecycle::{JobKind, JobLifecycle};
pub use payload::{LogLinePayload, StatusLabels, StatusPayload};
