//! Kilnflow 設定読み込み
//!
//! TOMLファイルと `KILNFLOW_*` 環境変数をレイヤリングして `Settings` を
//! 構築します。環境変数がファイルより優先されます。
//!
//! 設定ファイルの検索順序:
//! 1. 環境変数 KILNFLOW_CONFIG_PATH（直接パス指定）
//! 2. カレントディレクトリの kilnflow.toml
//! 3. ~/.config/kilnflow/kilnflow.toml（グローバル設定）

pub mod error;

pub use error::{ConfigError, Result};

use serde::Deserialize;
use std::path::PathBuf;

/// コンテナレジストリ認証のトリプル
///
/// user / password が未設定の場合は匿名プッシュになります。認証が必要な
/// レジストリであれば、その失敗はプッシュ時にデーモンから返ってきます。
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySettings {
    /// レジストリホスト（例: "registry.kiln.local:5000"）
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            host: "localhost:5000".to_string(),
            user: None,
            password: None,
        }
    }
}

/// Kilnflow 全体の設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub registry: RegistrySettings,
    /// ビルドコンテキストのスクラッチルート。試行ごとの一意サブディレクトリが
    /// この下に作られる
    pub scratch_root: PathBuf,
    /// ジョブ名ごとのログシンクを置くルート
    pub logs_root: PathBuf,
    /// 内部リポジトリのダウンロードに付与するHTTPヘッダ名
    pub internal_header: String,
    /// GPUドライバのマウントパス（コンテナ内）。設定時のみ Dockerfile に
    /// ENV が描画される
    pub gpu_driver_path: Option<String>,
    /// イベントチャネルごとのバッファ長
    pub event_queue_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry: RegistrySettings::default(),
            scratch_root: PathBuf::from("/tmp/kilnflow/builds"),
            logs_root: PathBuf::from("/tmp/kilnflow/logs"),
            internal_header: "X-Kilnflow-Internal".to_string(),
            gpu_driver_path: None,
            event_queue_depth: 256,
        }
    }
}

impl Settings {
    /// 検索パスとプロセス環境から設定を読み込む
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = find_config_file() {
            tracing::debug!("Loading settings from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }

        let loaded = builder
            .add_source(config::Environment::with_prefix("KILNFLOW").separator("__"))
            .build()?;

        Ok(loaded.try_deserialize()?)
    }

    /// TOML文字列から設定を読み込む（テスト・組み込み用）
    pub fn from_toml(content: &str) -> Result<Self> {
        let loaded = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?;
        Ok(loaded.try_deserialize()?)
    }
}

/// 設定ファイルを探す
fn find_config_file() -> Option<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var("KILNFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. カレントディレクトリ
    let local = PathBuf::from("kilnflow.toml");
    if local.exists() {
        return Some(local);
    }

    // 3. グローバル設定 (~/.config/kilnflow/kilnflow.toml)
    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("kilnflow").join("kilnflow.toml");
        if global.exists() {
            return Some(global);
        }
    }

    None
}
