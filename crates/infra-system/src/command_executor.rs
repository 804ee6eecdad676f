// Command executor implementation
// reason: tokio::process for async converter invocation with timeout and kill-on-drop
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use convoy_core::domain::Job;
use convoy_core::port::{
    ConversionExecutor, ConversionOutcome, ExecutionError, ExecutionStatus, TimeProvider,
};

/// External converter invocation
///
/// `args` may contain `{input}`, `{output}` and `{job_id}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandExecutorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub output_dir: PathBuf,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    /// Kill the converter after this long
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Only these variables of the daemon's environment reach the converter
    #[serde(default = "default_env_allowlist")]
    pub env_allowlist: Vec<String>,
}

fn default_output_extension() -> String {
    "pdf".to_string()
}

fn default_env_allowlist() -> Vec<String> {
    vec!["PATH".to_string(), "HOME".to_string(), "LANG".to_string()]
}

/// Runs one converter process per dispatched job
pub struct CommandExecutor {
    config: CommandExecutorConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl CommandExecutor {
    /// # Example
    /// ```ignore
    /// let executor = CommandExecutor::new(config, Arc::new(SystemTimeProvider));
    /// ```
    pub fn new(config: CommandExecutorConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time_provider,
        }
    }

    /// Keep allowlisted variables only
    fn filter_env(&self, env: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
        env.filter(|(k, _)| self.config.env_allowlist.contains(k))
            .collect()
    }

    /// `<output_dir>/<input stem>.<extension>`
    fn output_path(&self, job: &Job, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| job.id.clone());
        self.config
            .output_dir
            .join(format!("{}.{}", stem, self.config.output_extension))
    }

    fn render_args(&self, job: &Job, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{job_id}", &job.id)
            })
            .collect()
    }

    /// Spawn the converter and wait for it, honoring the timeout
    async fn spawn_and_wait(&self, args: &[String]) -> Result<std::process::Output, ExecutionError> {
        let child = Command::new(&self.config.program)
            .args(args)
            .env_clear()
            .envs(self.filter_env(std::env::vars()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout kills the child
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Failed(format!("spawn {}: {}", self.config.program, e)))?;

        match self.config.timeout_ms {
            Some(limit) => match timeout(Duration::from_millis(limit), child.wait_with_output()).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(ExecutionError::IoError(e.to_string())),
                Err(_) => Err(ExecutionError::Timeout(limit as i64)),
            },
            None => child
                .wait_with_output()
                .await
                .map_err(|e| ExecutionError::IoError(e.to_string())),
        }
    }
}

#[async_trait]
impl ConversionExecutor for CommandExecutor {
    async fn convert(&self, job: &Job) -> Result<ConversionOutcome, ExecutionError> {
        let input = job
            .input_file
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| ExecutionError::Unsupported(format!("job {} has no input file", job.id)))?;
        let output = self.output_path(job, &input);
        let args = self.render_args(job, &input, &output);

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| ExecutionError::IoError(e.to_string()))?;

        let start_time = self.time_provider.now_millis();
        info!(
            job_id = %job.id,
            program = %self.config.program,
            args = ?args,
            timeout_ms = ?self.config.timeout_ms,
            "Starting conversion"
        );

        let result = self.spawn_and_wait(&args).await?;
        let duration_ms = self.time_provider.now_millis() - start_time;

        // No exit code: terminated by a signal
        let Some(code) = result.status.code() else {
            warn!(job_id = %job.id, duration_ms, "Converter terminated by signal");
            return Ok(ConversionOutcome {
                status: ExecutionStatus::Cancelled,
                duration_ms,
                output_file: None,
                output_size: None,
            });
        };

        if code != 0 {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ExecutionError::Failed(format!(
                "exit code {}: {}",
                code,
                stderr.trim()
            )));
        }

        let output_size = tokio::fs::metadata(&output).await.ok().map(|m| m.len());
        if output_size.is_none() {
            warn!(job_id = %job.id, output = %output.display(), "Converter produced no output file");
        }

        info!(
            job_id = %job.id,
            duration_ms,
            output_size = ?output_size,
            "Conversion completed"
        );

        Ok(ConversionOutcome {
            status: ExecutionStatus::Success,
            duration_ms,
            output_file: output_size.map(|_| output.to_string_lossy().into_owned()),
            output_size,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use convoy_core::port::time_provider::SystemTimeProvider;

    fn executor(script: &str, output_dir: &Path, timeout_ms: Option<u64>) -> CommandExecutor {
        CommandExecutor::new(
            CommandExecutorConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                output_dir: output_dir.to_path_buf(),
                output_extension: "pdf".to_string(),
                timeout_ms,
                env_allowlist: default_env_allowlist(),
            },
            Arc::new(SystemTimeProvider),
        )
    }

    fn job_for(input: &Path) -> Job {
        let mut job = Job::new("job-1", 0);
        job.input_file = Some(input.to_string_lossy().into_owned());
        job
    }

    #[tokio::test]
    async fn test_convert_success() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.docx");
        std::fs::write(&input, b"hello world").unwrap();
        let out_dir = dir.path().join("out");

        let executor = executor("cp {input} {output}", &out_dir, None);
        let outcome = executor.convert(&job_for(&input)).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.output_size, Some(11));
        assert_eq!(
            outcome.output_file.as_deref(),
            Some(out_dir.join("report.pdf").to_string_lossy().as_ref())
        );
    }

    #[tokio::test]
    async fn test_convert_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.docx");
        std::fs::write(&input, b"x").unwrap();

        let executor = executor("echo corrupt >&2; exit 3", dir.path(), None);
        let err = executor.convert(&job_for(&input)).await.unwrap_err();

        match err {
            ExecutionError::Failed(msg) => {
                assert!(msg.contains("exit code 3"));
                assert!(msg.contains("corrupt"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_convert_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("slow.docx");
        std::fs::write(&input, b"x").unwrap();

        let executor = executor("sleep 10", dir.path(), Some(100));
        let result = executor.convert(&job_for(&input)).await;

        assert!(matches!(result, Err(ExecutionError::Timeout(100))));
    }

    #[tokio::test]
    async fn test_missing_input_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("true", dir.path(), None);

        let result = executor.convert(&Job::new("no-input", 0)).await;

        assert!(matches!(result, Err(ExecutionError::Unsupported(_))));
    }

    #[test]
    fn test_env_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("true", dir.path(), None);

        let filtered = executor.filter_env(
            vec![
                ("PATH".to_string(), "/bin".to_string()),
                ("AWS_SECRET_ACCESS_KEY".to_string(), "x".to_string()),
            ]
            .into_iter(),
        );

        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("PATH"));
    }
}
