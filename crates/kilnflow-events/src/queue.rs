//! 名前付きタスクチャネルとワーカープール
//!
//! イベント種別ごとに1本のチャネルを持ちます。送信側ハンドル
//! （[`EventPublisher`]）はグローバルシングルトンではなく、明示的に
//! 構築してコンポーネントへ注入します。ブローカーなしでテストできる
//! ようにするための設計です。
//!
//! チャネル構成（イベント種別ごと）:
//! - build-status / job-status / experiment-job-status / plugin-job-status
//! - build-log / job-log / experiment-log

use crate::dispatcher::Dispatcher;
use kilnflow_core::{JobKind, LogLinePayload, StatusPayload};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// イベント送信側ハンドル（クローン可）
#[derive(Debug, Clone)]
pub struct EventPublisher {
    build_status: mpsc::Sender<StatusPayload>,
    job_status: mpsc::Sender<StatusPayload>,
    experiment_status: mpsc::Sender<StatusPayload>,
    plugin_status: mpsc::Sender<StatusPayload>,
    build_log: mpsc::Sender<LogLinePayload>,
    job_log: mpsc::Sender<LogLinePayload>,
    experiment_log: mpsc::Sender<LogLinePayload>,
}

impl EventPublisher {
    pub async fn publish_build_status(&self, payload: StatusPayload) {
        Self::send(&self.build_status, payload, "build-status").await;
    }

    pub async fn publish_job_status(&self, payload: StatusPayload) {
        Self::send(&self.job_status, payload, "job-status").await;
    }

    pub async fn publish_experiment_status(&self, payload: StatusPayload) {
        Self::send(&self.experiment_status, payload, "experiment-job-status").await;
    }

    pub async fn publish_plugin_status(&self, payload: StatusPayload) {
        Self::send(&self.plugin_status, payload, "plugin-job-status").await;
    }

    /// ビルドジョブのログ行を発行
    pub async fn publish_build_log(&self, job_id: &str, job_name: &str, line: String) {
        let payload = LogLinePayload {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            line,
            task_type: None,
            task_index: None,
        };
        Self::send(&self.build_log, payload, "build-log").await;
    }

    pub async fn publish_job_log(&self, payload: LogLinePayload) {
        Self::send(&self.job_log, payload, "job-log").await;
    }

    pub async fn publish_experiment_log(&self, payload: LogLinePayload) {
        Self::send(&self.experiment_log, payload, "experiment-log").await;
    }

    async fn send<T: Send>(sender: &mpsc::Sender<T>, payload: T, channel: &str) {
        // 受信側が落ちている場合はイベントを失うしかない。発行側は止めない
        if sender.send(payload).await.is_err() {
            warn!("Event channel `{}` is closed, dropping event", channel);
        }
    }
}

/// イベント受信側の束
pub struct EventReceivers {
    pub build_status: mpsc::Receiver<StatusPayload>,
    pub job_status: mpsc::Receiver<StatusPayload>,
    pub experiment_status: mpsc::Receiver<StatusPayload>,
    pub plugin_status: mpsc::Receiver<StatusPayload>,
    pub build_log: mpsc::Receiver<LogLinePayload>,
    pub job_log: mpsc::Receiver<LogLinePayload>,
    pub experiment_log: mpsc::Receiver<LogLinePayload>,
}

/// イベントチャネル一式を作成
pub fn event_channels(depth: usize) -> (EventPublisher, EventReceivers) {
    let (build_status_tx, build_status_rx) = mpsc::channel(depth);
    let (job_status_tx, job_status_rx) = mpsc::channel(depth);
    let (experiment_status_tx, experiment_status_rx) = mpsc::channel(depth);
    let (plugin_status_tx, plugin_status_rx) = mpsc::channel(depth);
    let (build_log_tx, build_log_rx) = mpsc::channel(depth);
    let (job_log_tx, job_log_rx) = mpsc::channel(depth);
    let (experiment_log_tx, experiment_log_rx) = mpsc::channel(depth);

    (
        EventPublisher {
            build_status: build_status_tx,
            job_status: job_status_tx,
            experiment_status: experiment_status_tx,
            plugin_status: plugin_status_tx,
            build_log: build_log_tx,
            job_log: job_log_tx,
            experiment_log: experiment_log_tx,
        },
        EventReceivers {
            build_status: build_status_rx,
            job_status: job_status_rx,
            experiment_status: experiment_status_rx,
            plugin_status: plugin_status_rx,
            build_log: build_log_rx,
            job_log: job_log_rx,
            experiment_log: experiment_log_rx,
        },
    )
}

/// チャネルごとに1ワーカーを起動
///
/// 各メッセージは1ワーカーが処理しますが、チャネル間は完全に並行です。
/// 同じジョブのステータスイベントとログ行イベントが同時に処理されることも
/// あり、その正しさはハンドラの冪等性（drop-if-missing / last-writer-wins）
/// に依ります。
pub fn spawn_workers(dispatcher: Arc<Dispatcher>, receivers: EventReceivers) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for (mut rx, channel) in [
        (receivers.build_status, "build-status"),
        (receivers.job_status, "job-status"),
        (receivers.experiment_status, "experiment-job-status"),
        (receivers.plugin_status, "plugin-job-status"),
    ] {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if let Err(e) = dispatcher.handle_status(payload).await {
                    error!("Status handler failed on `{}`: {}", channel, e);
                }
            }
        }));
    }

    for (mut rx, kind, channel) in [
        (receivers.build_log, JobKind::Build, "build-log"),
        (receivers.job_log, JobKind::Job, "job-log"),
        (receivers.experiment_log, JobKind::Experiment, "experiment-log"),
    ] {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if let Err(e) = dispatcher.handle_log_line(kind, payload).await {
                    error!("Log handler failed on `{}`: {}", channel, e);
                }
            }
        }));
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::JobLogSink;
    use crate::store::{JobRecord, JobStore, MemoryJobStore};
    use kilnflow_core::{JobLifecycle, StatusLabels};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_status_event_flows_through_worker() {
        let store = Arc::new(MemoryJobStore::new());
        store
            .insert(JobRecord::new(JobKind::Build, "b1", "demo.builds.1"))
            .await;
        let logs = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            JobLogSink::new(logs.path()),
        ));

        let (publisher, receivers) = event_channels(16);
        let handles = spawn_workers(dispatcher, receivers);

        publisher
            .publish_build_status(StatusPayload {
                labels: StatusLabels {
                    app: "dockerizer".to_string(),
                    job_id: "b1".to_string(),
                    job_name: "demo.builds.1".to_string(),
                    extra: HashMap::new(),
                },
                status: JobLifecycle::Pushing,
                message: None,
                details: HashMap::new(),
            })
            .await;

        // 送信側を落としてワーカーを終了させる
        drop(publisher);
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get(JobKind::Build, "b1").await.unwrap().unwrap();
        assert_eq!(record.status, JobLifecycle::Pushing);
    }

    #[tokio::test]
    async fn test_log_event_routed_by_channel_kind() {
        let store = Arc::new(MemoryJobStore::new());
        store
            .insert(JobRecord::new(JobKind::Job, "j1", "demo.jobs.1"))
            .await;
        let logs = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            JobLogSink::new(logs.path()),
        ));

        let (publisher, receivers) = event_channels(16);
        let handles = spawn_workers(dispatcher, receivers);

        publisher
            .publish_job_log(LogLinePayload {
                job_id: "j1".to_string(),
                job_name: "demo.jobs.1".to_string(),
                line: "epoch 1 done".to_string(),
                task_type: None,
                task_index: None,
            })
            .await;

        drop(publisher);
        for handle in handles {
            handle.await.unwrap();
        }

        let sink = JobLogSink::new(logs.path());
        let content = std::fs::read_to_string(sink.path_for("demo.jobs.1")).unwrap();
        assert!(content.contains("epoch 1 done"));
    }
}
