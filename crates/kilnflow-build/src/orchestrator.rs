//! ビルドオーケストレータ
//!
//! 1つのビルドジョブを終端まで進めるトップレベルの状態機械:
//! Resolving → (CacheHit | Building) → Pushing → Done。中間状態はどこにも
//! 永続化せず、外部から観測できる耐久状態はイベント経由で記録された
//! ものだけです。
//!
//! 明示的な `Failed` イベントを出すのはソース取得失敗とプッシュ失敗のみ。
//! ビルド失敗は転送済みのログストリームから見えるため、ここでは
//! イベントを出しません（意図的な非対称）。

use crate::auth::RegistryAuth;
use crate::builder::ImageBuilder;
use crate::context::BuildContext;
use crate::error::Result;
use crate::fetcher::SourceFetcher;
use crate::pusher::ImagePusher;
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use kilnflow_config::Settings;
use kilnflow_core::{BuildJob, JobKind, JobLifecycle, StatusLabels, StatusPayload};
use kilnflow_events::EventPublisher;
use std::collections::HashMap;

/// 成功した試行の内訳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// 同じタグのイメージが既にローカルストアに存在した
    CacheHit,
    /// ビルドとプッシュを実行した
    Built,
}

/// デーモンに対する操作の縫い目
///
/// オーケストレータはこの契約越しにのみデーモンへ触れます。
#[async_trait]
pub(crate) trait ImagePipeline: Send + Sync {
    async fn image_exists(&self, tagged_image: &str) -> Result<bool>;

    async fn build(
        &self,
        job: &BuildJob,
        context: &BuildContext,
        tagged_image: &str,
        gpu_driver_path: Option<&str>,
    ) -> Result<()>;

    async fn push(
        &self,
        job: &BuildJob,
        image: &str,
        tag: &str,
        credentials: Option<DockerCredentials>,
    ) -> Result<()>;
}

struct DockerPipeline {
    builder: ImageBuilder,
    pusher: ImagePusher,
}

#[async_trait]
impl ImagePipeline for DockerPipeline {
    async fn image_exists(&self, tagged_image: &str) -> Result<bool> {
        self.builder.image_exists(tagged_image).await
    }

    async fn build(
        &self,
        job: &BuildJob,
        context: &BuildContext,
        tagged_image: &str,
        gpu_driver_path: Option<&str>,
    ) -> Result<()> {
        self.builder
            .build(job, context, tagged_image, gpu_driver_path)
            .await
    }

    async fn push(
        &self,
        job: &BuildJob,
        image: &str,
        tag: &str,
        credentials: Option<DockerCredentials>,
    ) -> Result<()> {
        self.pusher.push(job, image, tag, credentials).await
    }
}

pub struct BuildOrchestrator {
    settings: Settings,
    publisher: EventPublisher,
    pipeline: Box<dyn ImagePipeline>,
}

impl BuildOrchestrator {
    pub fn new(docker: Docker, settings: Settings, publisher: EventPublisher) -> Self {
        let pipeline = DockerPipeline {
            builder: ImageBuilder::new(docker.clone(), publisher.clone()),
            pusher: ImagePusher::new(docker, publisher.clone()),
        };
        Self {
            settings,
            publisher,
            pipeline: Box::new(pipeline),
        }
    }

    pub(crate) fn with_pipeline(
        settings: Settings,
        publisher: EventPublisher,
        pipeline: Box<dyn ImagePipeline>,
    ) -> Self {
        Self {
            settings,
            publisher,
            pipeline,
        }
    }

    /// ビルドジョブを1回試行する
    ///
    /// 描画済み Dockerfile と試行ディレクトリは、成功・ビルド失敗・
    /// プッシュ失敗・パニックを含むすべての終端パスでガード経由で
    /// 削除されます。
    pub async fn run(&self, job: &BuildJob) -> Result<BuildOutcome> {
        let context = BuildContext::create(&self.settings.scratch_root, &job.id)?;
        let _cleanup = context.cleanup_guard();

        // 1. ソース取得
        let fetcher = SourceFetcher::new(self.settings.internal_header.clone());
        if let Err(e) = fetcher.fetch(&job.code_reference, &context).await {
            self.report_failed(job, "Could not download code to build the image.")
                .await;
            return Err(e);
        }

        // 2. 認証解決（失敗してもビルド自体は試みる）
        let credentials = RegistryAuth::new(self.settings.registry.clone()).credentials();

        // 3. キャッシュチェック: ビルドはタグ単位で冪等
        let tagged_image = job.tagged_image(&self.settings.registry.host);
        if self.pipeline.image_exists(&tagged_image).await? {
            tracing::info!("Image {} already built, skipping", tagged_image);
            return Ok(BuildOutcome::CacheHit);
        }

        // 4. ビルド。失敗時のステータスイベントはなし（ログストリームで可視）
        self.pipeline
            .build(
                job,
                &context,
                &tagged_image,
                self.settings.gpu_driver_path.as_deref(),
            )
            .await?;

        // 5. プッシュ
        if let Err(e) = self
            .pipeline
            .push(
                job,
                &job.image_name(&self.settings.registry.host),
                job.image_tag(),
                credentials,
            )
            .await
        {
            self.report_failed(job, "The image could not be pushed.").await;
            return Err(e);
        }

        // 成功時にここから Succeeded は発行しない。イメージが利用可能に
        // なったことを受けた呼び出し側のスケジューリング遷移が成功を伝える
        Ok(BuildOutcome::Built)
    }

    async fn report_failed(&self, job: &BuildJob, message: &str) {
        let payload = StatusPayload {
            labels: StatusLabels {
                app: JobKind::Build.app_label().to_string(),
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                extra: HashMap::new(),
            },
            status: JobLifecycle::Failed,
            message: Some(message.to_string()),
            details: HashMap::new(),
        };
        self.publisher.publish_build_status(payload).await;
    }
}
