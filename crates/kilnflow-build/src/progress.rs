//! プッシュ進捗の集約
//!
//! プッシュストリームのレイヤごとの進捗を保持し、1.5秒ウィンドウで
//! スナップショットを出力します。生の行転送（高頻度の詳細ビュー）とは
//! 独立した低頻度のサマリビューです。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// スナップショット出力の最小間隔
pub const EMIT_INTERVAL: Duration = Duration::from_millis(1500);

/// デーモンのプッシュストリーム1行分
///
/// bollard がチャンクごとの複数 JSON オブジェクトを分解した後の、
/// 1オブジェクトに対応します。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_detail: Option<PushProgressDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<PushErrorDetail>,
}

impl PushLine {
    /// この行が示す失敗メッセージ（あれば）
    ///
    /// Docker API はトップレベルの `error` 文字列を非推奨にして
    /// `errorDetail` へ移行しているため、どちらか一方でも失敗扱いです。
    pub fn error_message(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        self.error_detail
            .as_ref()
            .map(|detail| match &detail.message {
                Some(message) => message.clone(),
                None => "Unknown push error".to_string(),
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushErrorDetail {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushProgressDetail {
    #[serde(default)]
    pub current: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
}

impl PushProgressDetail {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.total.is_none()
    }
}

/// レイヤごとの最新進捗
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LayerProgress {
    Detail(PushProgressDetail),
    Status(String),
}

/// per-push のインメモリ進捗集約
#[derive(Debug)]
pub struct ProgressTracker {
    layers: HashMap<String, LayerProgress>,
    interval: Duration,
    last_emit: Instant,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::with_interval(EMIT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            layers: HashMap::new(),
            interval,
            // ウィンドウはプッシュ開始時点から数え始める
            last_emit: Instant::now(),
        }
    }

    /// レイヤの進捗を更新する
    ///
    /// 構造化された進捗詳細があればそれを優先し、なければステータス文字列に
    /// フォールバックします。
    pub fn record(&mut self, id: &str, detail: Option<&PushProgressDetail>, status: Option<&str>) {
        let progress = match detail {
            Some(detail) if !detail.is_empty() => LayerProgress::Detail(detail.clone()),
            _ => LayerProgress::Status(status.unwrap_or_default().to_string()),
        };
        self.layers.insert(id.to_string(), progress);
    }

    /// 前回出力から最小間隔が経過していればスナップショットを返す
    ///
    /// ウィンドウは前回出力時点から測ります（プッシュ開始時点からではない）。
    pub fn snapshot_at(&mut self, now: Instant) -> Option<HashMap<String, LayerProgress>> {
        if now.duration_since(self.last_emit) <= self.interval {
            return None;
        }
        self.last_emit = now;
        Some(self.layers.clone())
    }

    pub fn layers(&self) -> &HashMap<String, LayerProgress> {
        &self.layers
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(current: i64, total: i64) -> PushProgressDetail {
        PushProgressDetail {
            current: Some(current),
            total: Some(total),
        }
    }

    #[test]
    fn test_record_prefers_detail_over_status() {
        let mut tracker = ProgressTracker::new();
        tracker.record("layer-a", Some(&detail(10, 100)), Some("Pushing"));
        assert_eq!(
            tracker.layers().get("layer-a"),
            Some(&LayerProgress::Detail(detail(10, 100)))
        );
    }

    #[test]
    fn test_record_falls_back_to_status_when_detail_empty() {
        let mut tracker = ProgressTracker::new();
        tracker.record(
            "layer-a",
            Some(&PushProgressDetail::default()),
            Some("Layer already exists"),
        );
        assert_eq!(
            tracker.layers().get("layer-a"),
            Some(&LayerProgress::Status("Layer already exists".to_string()))
        );
    }

    #[test]
    fn test_record_keeps_latest_per_layer() {
        let mut tracker = ProgressTracker::new();
        tracker.record("layer-a", Some(&detail(10, 100)), None);
        tracker.record("layer-a", Some(&detail(90, 100)), None);
        assert_eq!(tracker.layers().len(), 1);
        assert_eq!(
            tracker.layers().get("layer-a"),
            Some(&LayerProgress::Detail(detail(90, 100)))
        );
    }

    #[test]
    fn test_snapshot_throttled_to_window() {
        let mut tracker = ProgressTracker::with_interval(Duration::from_millis(1500));
        let start = Instant::now();

        // 3秒間に100行相当の進捗を流し、10ms刻みでスナップショットを試みる
        let mut emitted = 0;
        for i in 0..300 {
            tracker.record("layer-a", Some(&detail(i, 300)), None);
            let now = start + Duration::from_millis(10 * (i as u64 + 1));
            if tracker.snapshot_at(now).is_some() {
                emitted += 1;
            }
        }

        // ⌈3s / 1.5s⌉ + 1 = 3 を超えない
        assert!(emitted <= 3, "emitted {} snapshots", emitted);
        assert!(emitted >= 1);
    }

    #[test]
    fn test_snapshot_window_measured_from_last_emission() {
        let mut tracker = ProgressTracker::with_interval(Duration::from_millis(1500));
        let start = Instant::now();
        tracker.record("layer-a", None, Some("Preparing"));

        let first = start + Duration::from_millis(1600);
        assert!(tracker.snapshot_at(first).is_some());
        // 直後は出力しない
        assert!(tracker.snapshot_at(first + Duration::from_millis(100)).is_none());
        // 前回の出力から1.5秒超で再度出力する
        assert!(
            tracker
                .snapshot_at(first + Duration::from_millis(1700))
                .is_some()
        );
    }

    #[test]
    fn test_push_line_decodes_daemon_json() {
        let line: PushLine = serde_json::from_str(
            r#"{"id":"5f70bf18","status":"Pushing","progressDetail":{"current":512,"total":2048},"progress":"[==>  ]"}"#,
        )
        .unwrap();
        assert_eq!(line.id.as_deref(), Some("5f70bf18"));
        assert_eq!(line.progress_detail, Some(detail(512, 2048)));
        assert!(line.error_message().is_none());
    }

    #[test]
    fn test_push_line_error_message_from_either_form() {
        let legacy: PushLine =
            serde_json::from_str(r#"{"error":"denied: access forbidden"}"#).unwrap();
        assert_eq!(
            legacy.error_message().as_deref(),
            Some("denied: access forbidden")
        );

        let detail_only: PushLine = serde_json::from_str(
            r#"{"errorDetail":{"message":"denied: access forbidden"}}"#,
        )
        .unwrap();
        assert_eq!(
            detail_only.error_message().as_deref(),
            Some("denied: access forbidden")
        );

        // メッセージなしの errorDetail も失敗として扱う
        let empty_detail: PushLine = serde_json::from_str(r#"{"errorDetail":{}}"#).unwrap();
        assert_eq!(
            empty_detail.error_message().as_deref(),
            Some("Unknown push error")
        );
    }
}
