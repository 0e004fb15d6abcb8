//! ジョブ名ごとのログシンク
//!
//! ログ行イベントはステータス遷移ではなく、`<logs_root>/<job_name>.log`
//! への追記として処理されます。

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// 追記専用のファイルログシンク
#[derive(Debug, Clone)]
pub struct JobLogSink {
    logs_root: PathBuf,
}

impl JobLogSink {
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        Self {
            logs_root: logs_root.into(),
        }
    }

    /// ジョブ名に対応するログファイルのパス
    pub fn path_for(&self, job_name: &str) -> PathBuf {
        // ジョブ名の区切り文字がパスにならないように潰す
        let safe_name = job_name.replace(['/', '\\'], "_");
        self.logs_root.join(format!("{}.log", safe_name))
    }

    /// 1行追記する。タイムスタンプとレベルを前置する
    pub fn append(&self, job_name: &str, line: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.logs_root)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(job_name))?;
        writeln!(
            file,
            "{} INFO {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            line
        )
    }

    pub fn logs_root(&self) -> &Path {
        &self.logs_root
    }
}
