//! イメージプッシュ処理
//!
//! ビルド済みイメージをレジストリへプッシュし、ストリームの各行を
//! 処理します。行ごとの規則:
//! - `error` または `errorDetail` を含む行は致命的。ログして即座に中断し、
//!   以降の行は処理しない
//! - `id` のない行は情報のみ。ログシンクへ転送するが集約には畳み込まない
//! - `id` のある行はレイヤ進捗集約を更新する
//! - 上記と独立に、すべての生の行を無条件でログシンクへ転送する

// Bollard 0.19.4 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::error::{BuildError, Result};
use crate::progress::{ProgressTracker, PushLine};
use bollard::Docker;
use bollard::models::PushImageInfo;
use futures_util::stream::{Stream, StreamExt};
use kilnflow_core::BuildJob;
use kilnflow_events::EventPublisher;
use std::time::Instant;

pub struct ImagePusher {
    docker: Docker,
    publisher: EventPublisher,
}

impl ImagePusher {
    pub fn new(docker: Docker, publisher: EventPublisher) -> Self {
        Self { docker, publisher }
    }

    /// イメージをレジストリにプッシュ
    ///
    /// ストリームが `error` オブジェクトなしで完走した場合のみ成功です。
    /// 失敗時のリトライはしません。
    pub async fn push(
        &self,
        job: &BuildJob,
        image: &str,
        tag: &str,
        credentials: Option<bollard::auth::DockerCredentials>,
    ) -> Result<()> {
        let options = bollard::image::PushImageOptions::<String> {
            tag: tag.to_string(),
        };
        let stream = self
            .docker
            .push_image(image, Some(options), credentials)
            .map(|item| match item {
                Ok(info) => Ok(decode_line(&info)),
                Err(e) => Err(BuildError::PushFailed {
                    message: e.to_string(),
                }),
            });

        process_push_stream(&self.publisher, job, stream).await
    }
}

/// プッシュストリームを行単位で処理する
///
/// 行はストリームの到着順に厳密に処理されます（集約と error 中断の両方が
/// この順序に依存します）。
pub(crate) async fn process_push_stream<S>(
    publisher: &EventPublisher,
    job: &BuildJob,
    stream: S,
) -> Result<()>
where
    S: Stream<Item = Result<PushLine>>,
{
    tokio::pin!(stream);
    let mut tracker = ProgressTracker::new();

    while let Some(item) = stream.next().await {
        let line = item?;

        // 生の行はすべて転送する（集約とは別の高頻度ビュー）
        forward_log(publisher, job, &line).await;

        if let Some(message) = line.error_message() {
            tracing::error!("Push failed for {}: {}", job.name, message);
            return Err(BuildError::PushFailed { message });
        }

        // id のない行は情報のみ
        let Some(id) = &line.id else { continue };
        tracker.record(id, line.progress_detail.as_ref(), line.status.as_deref());

        if let Some(snapshot) = tracker.snapshot_at(Instant::now()) {
            tracing::debug!(job = %job.name, progress = ?snapshot, "Pushing image");
        }
    }

    Ok(())
}

async fn forward_log(publisher: &EventPublisher, job: &BuildJob, line: &PushLine) {
    if let Ok(raw) = serde_json::to_string(line) {
        publisher.publish_build_log(&job.id, &job.name, raw).await;
    }
}

/// bollard のモデルをワイヤ形式の行へ写像する
///
/// `PushImageInfo` が持たないフィールド（レイヤid等）は `None` のまま
/// 残ります。フィールドは JSON キー名で対応付けます。
fn decode_line(info: &PushImageInfo) -> PushLine {
    serde_json::to_value(info)
        .ok()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::PushProgressDetail;
    use futures_util::stream;
    use kilnflow_core::{CodeReference, JobLifecycle};
    use kilnflow_events::event_channels;

    fn test_job() -> BuildJob {
        BuildJob {
            id: "3f2a9c".to_string(),
            name: "demo.builds.1".to_string(),
            from_image: "python:3.11".to_string(),
            build_steps: vec![],
            env_vars: vec![],
            code_reference: CodeReference::External {
                download_url: "http://example.test/code.tar.gz".to_string(),
            },
            nocache: false,
            memory_limit: None,
            status: JobLifecycle::Building,
        }
    }

    fn line(id: Option<&str>, status: &str) -> PushLine {
        PushLine {
            id: id.map(str::to_string),
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    fn error_line(message: &str) -> PushLine {
        PushLine {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_push_aborts_on_error_object() {
        let (publisher, mut receivers) = event_channels(64);
        let job = test_job();

        let lines = vec![
            Ok(line(Some("a"), "Pushing")),
            Ok(error_line("disk full")),
            Ok(line(Some("b"), "Pushing")),
        ];
        let result = process_push_stream(&publisher, &job, stream::iter(lines)).await;

        match result {
            Err(BuildError::PushFailed { message }) => assert_eq!(message, "disk full"),
            other => panic!("expected push failure, got {:?}", other.map(|_| ())),
        }

        // error の後の行は処理も転送もされない
        drop(publisher);
        let mut forwarded = Vec::new();
        while let Some(payload) = receivers.build_log.recv().await {
            forwarded.push(payload.line);
        }
        assert_eq!(forwarded.len(), 2);
        assert!(forwarded[0].contains("\"a\""));
        assert!(forwarded[1].contains("disk full"));
        assert!(!forwarded.iter().any(|l| l.contains("\"b\"")));
    }

    #[tokio::test]
    async fn test_push_succeeds_on_clean_stream() {
        let (publisher, mut receivers) = event_channels(64);
        let job = test_job();

        let lines = vec![
            Ok(line(None, "The push refers to repository [demo]")),
            Ok(PushLine {
                id: Some("a".to_string()),
                status: Some("Pushing".to_string()),
                progress_detail: Some(PushProgressDetail {
                    current: Some(512),
                    total: Some(2048),
                }),
                ..Default::default()
            }),
            Ok(line(Some("a"), "Pushed")),
        ];
        let result = process_push_stream(&publisher, &job, stream::iter(lines)).await;
        assert!(result.is_ok());

        // id の有無に関わらず、生の行はすべて転送される
        drop(publisher);
        let mut forwarded = 0;
        while receivers.build_log.recv().await.is_some() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 3);
    }

    #[tokio::test]
    async fn test_push_aborts_on_error_detail_only() {
        let (publisher, _receivers) = event_channels(64);
        let job = test_job();

        // 新しいデーモンはトップレベルの error を省き errorDetail だけを返す
        let lines = vec![
            Ok(line(Some("a"), "Pushing")),
            Ok(PushLine {
                error_detail: Some(crate::progress::PushErrorDetail {
                    code: None,
                    message: Some("unauthorized: authentication required".to_string()),
                }),
                ..Default::default()
            }),
            Ok(line(Some("b"), "Pushing")),
        ];
        let result = process_push_stream(&publisher, &job, stream::iter(lines)).await;

        match result {
            Err(BuildError::PushFailed { message }) => {
                assert_eq!(message, "unauthorized: authentication required")
            }
            other => panic!("expected push failure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_push_transport_error_is_fatal() {
        let (publisher, _receivers) = event_channels(64);
        let job = test_job();

        let lines: Vec<Result<PushLine>> = vec![
            Ok(line(Some("a"), "Pushing")),
            Err(BuildError::PushFailed {
                message: "connection reset".to_string(),
            }),
        ];
        let result = process_push_stream(&publisher, &job, stream::iter(lines)).await;
        assert!(matches!(result, Err(BuildError::PushFailed { .. })));
    }
}
