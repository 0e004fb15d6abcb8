//! レジストリ認証処理
//!
//! 設定の username / password / host トリプルを最優先し、なければ
//! Docker config.json の auths セクションへフォールバックします。
//! どちらでも解決できない場合は匿名プッシュで続行します。認証が本当に
//! 必要なレジストリであれば、その失敗はプッシュ時にデーモンから
//! 返ってきます。解決の失敗はログのみで、伝搬させません。

use base64::Engine;
use bollard::auth::DockerCredentials;
use kilnflow_config::RegistrySettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Docker config.json の構造
#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// 認証エントリ
#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

/// レジストリ認証を管理
#[derive(Debug)]
pub struct RegistryAuth {
    registry: RegistrySettings,
    config_path: PathBuf,
}

impl RegistryAuth {
    /// デフォルトで ~/.docker/config.json をフォールバックに使用
    pub fn new(registry: RegistrySettings) -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self {
            registry,
            config_path,
        }
    }

    /// フォールバック先の config.json を指定して作成
    pub fn with_config_path(registry: RegistrySettings, config_path: PathBuf) -> Self {
        Self {
            registry,
            config_path,
        }
    }

    /// プッシュに使う認証情報を解決
    ///
    /// `None` は匿名プッシュを意味します。
    pub fn credentials(&self) -> Option<DockerCredentials> {
        // 1. 設定のトリプル
        if let (Some(user), Some(password)) = (&self.registry.user, &self.registry.password) {
            return Some(DockerCredentials {
                username: Some(user.clone()),
                password: Some(password.clone()),
                serveraddress: Some(self.registry.host.clone()),
                ..Default::default()
            });
        }

        // 2. Docker config.json の auths
        match self.from_docker_config() {
            Ok(Some(credentials)) => Some(credentials),
            Ok(None) => {
                tracing::debug!("No credentials found for {}", self.registry.host);
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to resolve credentials for {}: {}. Continuing unauthenticated",
                    self.registry.host,
                    e
                );
                None
            }
        }
    }

    fn from_docker_config(&self) -> std::io::Result<Option<DockerCredentials>> {
        if !self.config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let config: DockerConfig = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let Some(auth_b64) = config
            .auths
            .get(&self.registry.host)
            .and_then(|entry| entry.auth.as_ref())
        else {
            return Ok(None);
        };

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth_b64)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let auth_str = String::from_utf8(decoded)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        Ok(auth_str.split_once(':').map(|(username, password)| {
            DockerCredentials {
                username: Some(username.to_string()),
                password: Some(password.to_string()),
                serveraddress: Some(self.registry.host.clone()),
                ..Default::default()
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn settings(user: Option<&str>, password: Option<&str>) -> RegistrySettings {
        RegistrySettings {
            host: "registry.kiln.local:5000".to_string(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn test_settings_triple_takes_priority() {
        let auth = RegistryAuth::with_config_path(
            settings(Some("kiln"), Some("hunter2")),
            PathBuf::from("/nonexistent/config.json"),
        );
        let credentials = auth.credentials().unwrap();
        assert_eq!(credentials.username.as_deref(), Some("kiln"));
        assert_eq!(credentials.password.as_deref(), Some("hunter2"));
        assert_eq!(
            credentials.serveraddress.as_deref(),
            Some("registry.kiln.local:5000")
        );
    }

    #[test]
    fn test_docker_config_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        // "kiln:hunter2" の Base64
        let auth_b64 = base64::engine::general_purpose::STANDARD.encode("kiln:hunter2");
        fs::write(
            &config_path,
            format!(
                r#"{{"auths": {{"registry.kiln.local:5000": {{"auth": "{}"}}}}}}"#,
                auth_b64
            ),
        )
        .unwrap();

        let auth = RegistryAuth::with_config_path(settings(None, None), config_path);
        let credentials = auth.credentials().unwrap();
        assert_eq!(credentials.username.as_deref(), Some("kiln"));
        assert_eq!(credentials.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_missing_everything_yields_anonymous() {
        let auth = RegistryAuth::with_config_path(
            settings(None, None),
            PathBuf::from("/nonexistent/config.json"),
        );
        assert!(auth.credentials().is_none());
    }

    #[test]
    fn test_malformed_config_is_nonfatal() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, "not json").unwrap();

        let auth = RegistryAuth::with_config_path(settings(None, None), config_path);
        assert!(auth.credentials().is_none());
    }
}
