//! イメージビルド
//!
//! Docker デーモンに対してビルドを実行し、構造化ログ行をそのまま
//! ビルドジョブのログチャネルへ転送します。転送がニアリアルタイムの
//! ビルドログ可視化の仕組みそのものなので、フィルタもバッファリングも
//! しません。

// bollard 0.19 の非推奨オプション構造体を使用
#![allow(deprecated)]

use crate::context::{BuildContext, CODE_FOLDER};
use crate::dockerfile::{RenderParams, render};
use crate::error::{BuildError, Result};
use crate::fetcher::checkout_revision;
use crate::progress::PushProgressDetail;
use bollard::Docker;
use bollard::image::BuildImageOptions;
use bollard::models::BuildInfo;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use http_body_util::{Either, Full};
use kilnflow_core::BuildJob;
use kilnflow_events::EventPublisher;
use serde::Serialize;

/// 再現性チェックアウトをスキップするセンチネルタグ
pub const LATEST_TAG: &str = "latest";
/// イメージ内のソース配置先
pub const WORKDIR: &str = "/code";

/// ビルドストリーム1行分のワイヤ形式
///
/// bollard のモデルはデシリアライズ専用なので、ログチャネルへの転送は
/// この構造体に写してから JSON 化します。フィールドはデーモンの
/// JSON キー名で対応付けます。
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress_detail: Option<PushProgressDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_detail: Option<BuildLineErrorDetail>,
}

#[derive(Debug, Clone, Serialize)]
struct BuildLineErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<&BuildInfo> for BuildLine {
    fn from(info: &BuildInfo) -> Self {
        Self {
            id: info.id.clone(),
            stream: info.stream.clone(),
            status: info.status.clone(),
            progress: info.progress.clone(),
            progress_detail: info.progress_detail.as_ref().map(|d| PushProgressDetail {
                current: d.current,
                total: d.total,
            }),
            error: info.error.clone(),
            error_detail: info.error_detail.as_ref().map(|d| BuildLineErrorDetail {
                code: d.code,
                message: d.message.clone(),
            }),
        }
    }
}

pub struct ImageBuilder {
    docker: Docker,
    publisher: EventPublisher,
}

impl ImageBuilder {
    pub fn new(docker: Docker, publisher: EventPublisher) -> Self {
        Self { docker, publisher }
    }

    /// ジョブのイメージをビルドする
    ///
    /// クリーンアップは行いません（呼び出し側のガードの責務）。
    /// デーモン接続やプロトコルの失敗はこの試行にとって致命的で、
    /// 内部リトライせずそのまま失敗として返します。
    pub async fn build(
        &self,
        job: &BuildJob,
        context: &BuildContext,
        tagged_image: &str,
        gpu_driver_path: Option<&str>,
    ) -> Result<()> {
        tracing::debug!("Starting build in {}", context.build_root().display());

        // タグが識別するコミットへチェックアウト（latest のみスキップ）
        if job.image_tag() != LATEST_TAG {
            checkout_revision(context.source_path(), job.image_tag())?;
        }

        let requirements_path = context.requirements_path();
        let setup_path = context.setup_path()?;
        let dockerfile = render(&RenderParams {
            from_image: &job.from_image,
            requirements_path: requirements_path.as_deref(),
            setup_path: setup_path.as_deref(),
            build_steps: &job.build_steps,
            env_vars: &job.env_vars,
            folder_name: CODE_FOLDER,
            workdir: WORKDIR,
            gpu_driver_path,
            copy_code: true,
        })?;
        context.write_dockerfile(&dockerfile)?;

        let context_data = context.archive()?;

        let options = BuildImageOptions::<String> {
            dockerfile: "Dockerfile".to_string(),
            t: tagged_image.to_string(),
            nocache: job.nocache,
            rm: true,
            forcerm: true,
            // ベースイメージは常にpull
            pull: true,
            // ビルド中のスワップは常に無効
            memswap: Some(-1),
            memory: job.memory_limit,
            ..Default::default()
        };

        let body = Full::new(Bytes::from(context_data));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        while let Some(msg) = stream.next().await {
            let info = msg.map_err(BuildError::DockerConnection)?;
            self.forward_log(job, &info).await;

            if let Some(error) = info.error {
                return Err(BuildError::BuildFailed(error));
            }
            if let Some(detail) = info.error_detail {
                let message = detail
                    .message
                    .unwrap_or_else(|| "Unknown build error".to_string());
                return Err(BuildError::BuildFailed(message));
            }
        }

        tracing::info!("Successfully built {}", tagged_image);
        Ok(())
    }

    /// 構造化ログ行をそのままログチャネルへ流す
    async fn forward_log(&self, job: &BuildJob, info: &BuildInfo) {
        if let Ok(line) = serde_json::to_string(&BuildLine::from(info)) {
            self.publisher
                .publish_build_log(&job.id, &job.name, line)
                .await;
        }
    }

    /// タグ付きイメージがデーモンのローカルストアに存在するか
    pub async fn image_exists(&self, tagged_image: &str) -> Result<bool> {
        match self.docker.inspect_image(tagged_image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            }) => Ok(false),
            Err(e) => Err(BuildError::DockerConnection(e)),
        }
    }
}
