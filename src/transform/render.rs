use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::error::RenderError;
use crate::settings::RendererConfig;

/// Renders a markup file into a fixed-layout document file.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, input: &Path, output: &Path) -> Result<(), RenderError>;
}

/// Spawns an external converter such as `wkhtmltopdf`.
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(config: &RendererConfig, timeout: Duration) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout,
        }
    }

    fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    async fn render(&self, input: &Path, output: &Path) -> Result<(), RenderError> {
        let args = self.expand_args(input, output);
        debug!("Rendering with {} {:?}", self.program, args);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| RenderError::Timeout(self.timeout))?
            .map_err(|source| RenderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(RenderError::Failed {
                code: result.status.code(),
                stderr: crate::llm::truncate(stderr.trim(), 500).to_string(),
            });
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(RenderError::MissingOutput(output.display().to_string()));
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn renderer(program: &str, args: &[&str], timeout: Duration) -> CommandRenderer {
        CommandRenderer::new(
            &RendererConfig {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
            timeout,
        )
    }

    #[test]
    fn placeholders_are_expanded() {
        let r = renderer("wkhtmltopdf", &["--quiet", "{input}", "{output}"], Duration::from_secs(1));
        let args = r.expand_args(Path::new("/tmp/a.html"), Path::new("/tmp/a.pdf"));
        assert_eq!(args, ["--quiet", "/tmp/a.html", "/tmp/a.pdf"]);
    }

    #[tokio::test]
    async fn copying_command_produces_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.html");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, "<p>x</p>").unwrap();

        renderer("cp", &["{input}", "{output}"], Duration::from_secs(5))
            .render(&input, &output)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"<p>x</p>");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = renderer("false", &[], Duration::from_secs(5))
            .render(&dir.path().join("a"), &dir.path().join("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Failed { .. }));
    }

    #[tokio::test]
    async fn success_without_output_file_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = renderer("true", &[], Duration::from_secs(5))
            .render(&dir.path().join("a"), &dir.path().join("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingOutput(_)));
    }

    #[tokio::test]
    async fn slow_renderer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = renderer("sleep", &["5"], Duration::from_millis(100))
            .render(&dir.path().join("a"), &dir.path().join("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = renderer("definitely-not-a-renderer-binary", &[], Duration::from_secs(5))
            .render(&dir.path().join("a"), &dir.path().join("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Spawn { .. }));
    }
}
