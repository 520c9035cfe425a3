//! Downstream SQL transformations: `dbt run`, then `dbt test`.

use crate::error::{PipelineError, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

/// One step of the transformation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStep {
    Run,
    Test,
}

impl TransformStep {
    pub fn subcommand(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Test => "test",
        }
    }
}

pub struct TransformRunner {
    program: String,
    project_dir: PathBuf,
    profiles_dir: String,
    credentials: Option<PathBuf>,
}

impl TransformRunner {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "dbt".into(),
            project_dir: project_dir.into(),
            profiles_dir: ".dbt".into(),
            credentials: None,
        }
    }

    /// Replace the `dbt` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Exported to the child as `GOOGLE_APPLICATION_CREDENTIALS`.
    pub fn with_credentials(mut self, key_file: impl Into<PathBuf>) -> Self {
        self.credentials = Some(key_file.into());
        self
    }

    fn command(&self, step: TransformStep) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(step.subcommand())
            .args(["--profiles-dir", self.profiles_dir.as_str()])
            .current_dir(&self.project_dir);
        if let Some(creds) = &self.credentials {
            cmd.env("GOOGLE_APPLICATION_CREDENTIALS", creds);
        }
        cmd
    }

    /// Run one step to completion; a non-zero exit is fatal.
    pub fn execute(&self, step: TransformStep) -> Result<()> {
        let name = format!("{} {}", self.program, step.subcommand());
        info!(dir = %self.project_dir.display(), "Running {name}...");

        let output = self
            .command(step)
            .output()
            .map_err(|e| PipelineError::Transform {
                step: name.clone(),
                detail: format!("cannot start: {e}"),
            })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(step = %name, %stdout, %stderr, "transformation output");
            return Err(PipelineError::Transform {
                step: name,
                detail: format!("exited with {}: {}", output.status, tail(&stderr, &stdout)),
            });
        }

        info!("{name} finished");
        Ok(())
    }

    pub fn run(&self) -> Result<()> {
        self.execute(TransformStep::Run)
    }

    pub fn test(&self) -> Result<()> {
        self.execute(TransformStep::Test)
    }
}

/// Last non-empty line of stderr, falling back to stdout (dbt reports there).
fn tail<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    [stderr, stdout]
        .into_iter()
        .find_map(|s| s.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("")
        .trim()
}
