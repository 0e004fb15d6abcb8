//! Kilnflow ステータスイベント伝搬
//!
//! キュー上のステータス / ログ行イベントを消費し、対応するジョブレコード
//! へ冪等に適用するサブシステムです。配送は at-least-once 前提のため、
//! ハンドラは重複・順序逆転・存在しないジョブを正常系として扱います
//! （drop-if-missing / last-writer-wins）。

pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod sink;
pub mod store;

pub use dispatcher::Dispatcher;
pub use error::{EventError, Result};
pub use queue::{EventPublisher, EventReceivers, event_channels, spawn_workers};
pub use sink::JobLogSink;
pub use store::{JobRecord, JobStore, MemoryJobStore, StoreError};
