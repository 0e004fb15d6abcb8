//! Kilnflow イメージビルドパイプライン
//!
//! ビルドジョブのソース取得から Dockerfile 描画、Docker デーモンでの
//! ビルド、レジストリへのプッシュ、ライフサイクルイベントの発行までを
//! 担当するクレートです。トップレベルのエントリポイントは
//! [`BuildOrchestrator::run`] です。

pub mod auth;
pub mod builder;
pub mod context;
pub mod dockerfile;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod progress;
pub mod pusher;

pub use auth::RegistryAuth;
pub use builder::{ImageBuilder, LATEST_TAG, WORKDIR};
pub use context::BuildContext;
pub use dockerfile::{RenderParams, render};
pub use error::{BuildError, Result};
pub use fetcher::SourceFetcher;
pub use orchestrator::{BuildOrchestrator, BuildOutcome};
pub use progress::{ProgressTracker, PushLine};
pub use pusher::ImagePusher;
