//! Kilnflow ビルドワーカー
//!
//! ジョブ定義JSONを読み込み、インプロセスのイベントキューとワーカーを
//! 配線した上でビルドを1回試行します。元々スケジューラから1ビルド =
//! 1ワーカー実行として起動される前提のバイナリです。

use anyhow::Context;
use bollard::Docker;
use clap::{Parser, Subcommand};
use kilnflow_build::BuildOrchestrator;
use kilnflow_config::Settings;
use kilnflow_core::{BuildJob, JobKind};
use kilnflow_events::{
    Dispatcher, JobLogSink, JobRecord, JobStore, MemoryJobStore, event_channels, spawn_workers,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kilnflowd")]
#[command(about = "Kilnflow container image build worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ビルドジョブを1件実行
    Build {
        /// ジョブ定義JSONのパス
        #[arg(short, long)]
        job: PathBuf,
        /// ビルドキャッシュを無効化
        #[arg(long)]
        no_cache: bool,
    },
    /// バージョンを表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("kilnflowd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Build { job, no_cache } => run_build(job, no_cache).await,
    }
}

async fn run_build(job_path: PathBuf, no_cache: bool) -> anyhow::Result<()> {
    let settings = Settings::load()?;

    let content = std::fs::read_to_string(&job_path)
        .with_context(|| format!("ジョブ定義を読み込めません: {}", job_path.display()))?;
    let mut job: BuildJob = serde_json::from_str(&content)
        .with_context(|| format!("ジョブ定義が不正です: {}", job_path.display()))?;
    if no_cache {
        job.nocache = true;
    }

    let docker = init_docker().await?;

    // インプロセスのストアとイベント配線
    let store = Arc::new(MemoryJobStore::new());
    store
        .insert(JobRecord::new(JobKind::Build, job.id.clone(), job.name.clone()))
        .await;
    let (publisher, receivers) = event_channels(settings.event_queue_depth);
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        JobLogSink::new(settings.logs_root.clone()),
    ));
    let workers = spawn_workers(dispatcher, receivers);

    // ビルドは専用タスクで実行する。遅いビルドがイベント処理を塞がない
    let orchestrator = BuildOrchestrator::new(docker, settings, publisher.clone());
    let build_job = job.clone();
    let result = tokio::spawn(async move { orchestrator.run(&build_job).await }).await?;

    // 発行側を閉じてチャネルを排水させてからワーカーを回収
    drop(publisher);
    for worker in workers {
        worker.await?;
    }

    let outcome = result?;
    tracing::info!("Build finished: {:?}", outcome);

    if let Some(record) = store.get(JobKind::Build, &job.id).await? {
        tracing::info!("Job {} recorded status: {}", record.name, record.status);
    }
    Ok(())
}

async fn init_docker() -> anyhow::Result<Docker> {
    let docker = Docker::connect_with_local_defaults()
        .context("Docker デーモンへの接続を初期化できません")?;
    docker
        .ping()
        .await
        .context("Docker デーモンが応答しません (docker ps で確認してください)")?;
    Ok(docker)
}
