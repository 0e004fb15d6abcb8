//! Dockerfile 描画
//!
//! ビルドマニフェスト（Dockerfile）を Tera テンプレートから描画します。
//! 純粋関数で、I/O や副作用はありません。同じ入力からは必ず同じ
//! テキストが得られます。

use crate::error::Result;
use tera::{Context, Tera};

/// 描画テンプレート
///
/// ディレクティブの順序は固定:
/// FROM → (GPUパス) → (依存ファイル) → (セットアップスクリプト) →
/// ビルドステップ → WORKDIR → ENV → (ソースコピー)
const DOCKERFILE_TEMPLATE: &str = r#"FROM {{ from_image }}
{%- if gpu_driver_path %}
ENV PATH {{ gpu_driver_path }}:$PATH
{%- endif %}
{%- if requirements_path %}
COPY {{ requirements_path }} /tmp/kiln_requirements.txt
RUN pip install --no-cache-dir -r /tmp/kiln_requirements.txt
{%- endif %}
{%- if setup_path %}
COPY {{ setup_path }} /tmp/kiln_setup.sh
RUN chmod +x /tmp/kiln_setup.sh && /tmp/kiln_setup.sh
{%- endif %}
{%- for step in build_steps %}
{{ step }}
{%- endfor %}
WORKDIR {{ workdir }}
{%- for var in env_vars %}
ENV {{ var }}
{%- endfor %}
{%- if copy_code %}
COPY {{ folder_name }} {{ workdir }}
{%- endif %}
"#;

/// 描画パラメータ
///
/// `requirements_path` / `setup_path` / `folder_name` はビルドコンテキスト
/// からの相対パスです。Option が `None` のものは対応するディレクティブを
/// 一切出力しません（空のディレクティブも出さない）。
#[derive(Debug, Clone)]
pub struct RenderParams<'a> {
    pub from_image: &'a str,
    pub requirements_path: Option<&'a str>,
    pub setup_path: Option<&'a str>,
    pub build_steps: &'a [String],
    pub env_vars: &'a [String],
    pub folder_name: &'a str,
    pub workdir: &'a str,
    pub gpu_driver_path: Option<&'a str>,
    pub copy_code: bool,
}

/// Dockerfile テキストを描画
///
/// ビルドステップは加工せずそのまま1行ずつ注入されます。
pub fn render(params: &RenderParams<'_>) -> Result<String> {
    let mut context = Context::new();
    context.insert("from_image", params.from_image);
    context.insert("requirements_path", &params.requirements_path);
    context.insert("setup_path", &params.setup_path);
    context.insert("build_steps", params.build_steps);
    context.insert("env_vars", params.env_vars);
    context.insert("folder_name", params.folder_name);
    context.insert("workdir", params.workdir);
    context.insert("gpu_driver_path", &params.gpu_driver_path);
    context.insert("copy_code", &params.copy_code);

    let rendered = Tera::one_off(DOCKERFILE_TEMPLATE, &context, false)?;

    // 条件分岐の残した空行を落として正規化
    let mut lines: Vec<&str> = rendered
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    lines.push("");
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params<'a>(steps: &'a [String], env_vars: &'a [String]) -> RenderParams<'a> {
        RenderParams {
            from_image: "python:3.11",
            requirements_path: None,
            setup_path: None,
            build_steps: steps,
            env_vars,
            folder_name: "code",
            workdir: "/code",
            gpu_driver_path: None,
            copy_code: true,
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let steps = vec!["RUN apt-get update".to_string()];
        let env_vars = vec!["MODEL_DIR=/data/models".to_string()];
        let params = base_params(&steps, &env_vars);
        let first = render(&params).unwrap();
        let second = render(&params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_render_minimal() {
        let params = RenderParams {
            copy_code: false,
            ..base_params(&[], &[])
        };
        let dockerfile = render(&params).unwrap();
        assert_eq!(dockerfile, "FROM python:3.11\nWORKDIR /code\n");
    }

    #[test]
    fn test_render_directive_order() {
        let steps = vec!["RUN pip install torch".to_string()];
        let env_vars = vec!["EPOCHS=10".to_string()];
        let params = RenderParams {
            requirements_path: Some("code/kiln_requirements.txt"),
            setup_path: Some("code/kiln_setup.sh"),
            gpu_driver_path: Some("/usr/local/nvidia/bin"),
            ..base_params(&steps, &env_vars)
        };
        let dockerfile = render(&params).unwrap();

        let from = dockerfile.find("FROM python:3.11").unwrap();
        let gpu = dockerfile.find("ENV PATH /usr/local/nvidia/bin:$PATH").unwrap();
        let requirements = dockerfile.find("COPY code/kiln_requirements.txt").unwrap();
        let setup = dockerfile.find("COPY code/kiln_setup.sh").unwrap();
        let step = dockerfile.find("RUN pip install torch").unwrap();
        let workdir = dockerfile.find("WORKDIR /code").unwrap();
        let env = dockerfile.find("ENV EPOCHS=10").unwrap();
        let copy = dockerfile.find("COPY code /code").unwrap();

        assert!(from < gpu);
        assert!(gpu < requirements);
        assert!(requirements < setup);
        assert!(setup < step);
        assert!(step < workdir);
        assert!(workdir < env);
        assert!(env < copy);
    }

    #[test]
    fn test_render_build_steps_are_verbatim() {
        let steps = vec![
            "RUN apt-get install -y libsndfile1".to_string(),
            "ARG CACHE_BUST=1".to_string(),
        ];
        let params = base_params(&steps, &[]);
        let dockerfile = render(&params).unwrap();
        assert!(dockerfile.contains("RUN apt-get install -y libsndfile1\n"));
        assert!(dockerfile.contains("ARG CACHE_BUST=1\n"));
    }

    #[test]
    fn test_render_omits_absent_optionals() {
        let params = base_params(&[], &[]);
        let dockerfile = render(&params).unwrap();
        assert!(!dockerfile.contains("kiln_requirements"));
        assert!(!dockerfile.contains("kiln_setup"));
        assert!(!dockerfile.contains("pip install --no-cache-dir"));
        assert!(!dockerfile.contains("ENV PATH"));
        // 空のディレクティブ行を残さない
        for line in dockerfile.lines() {
            assert!(!line.trim().is_empty());
            assert_ne!(line.trim(), "COPY");
            assert_ne!(line.trim(), "ENV");
        }
    }

    #[test]
    fn test_render_one_env_directive_per_var() {
        let env_vars = vec![
            "A=1".to_string(),
            "B=2".to_string(),
            "C=3".to_string(),
        ];
        let params = base_params(&[], &env_vars);
        let dockerfile = render(&params).unwrap();
        let count = dockerfile
            .lines()
            .filter(|line| line.starts_with("ENV "))
            .count();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_render_copy_code_only_when_requested() {
        let with_code = base_params(&[], &[]);
        assert!(render(&with_code).unwrap().contains("COPY code /code"));

        let without_code = RenderParams {
            copy_code: false,
            ..base_params(&[], &[])
        };
        assert!(!render(&without_code).unwrap().contains("COPY code"));
    }
}
