use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("設定の読み込みに失敗しました: {0}")]
    Load(#[from] config::ConfigError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
