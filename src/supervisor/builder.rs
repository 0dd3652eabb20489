//! Build step run before every start.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait Builder: Send + Sync {
    /// Build one target, blocking until the build tool exits.
    async fn build(&self, target: &str) -> Result<()>;
}

/// Runs `<tool> <target>` in the project directory, e.g. `make wasm`.
#[derive(Debug, Clone)]
pub struct MakeBuilder {
    tool: String,
    workdir: PathBuf,
}

impl MakeBuilder {
    pub fn new(tool: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl Builder for MakeBuilder {
    async fn build(&self, target: &str) -> Result<()> {
        let output = Command::new(&self.tool)
            .arg(target)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("run {} {target}", self.tool))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            match last_line(&stderr) {
                Some(line) => bail!("{}: {line}", output.status),
                None => bail!("{}", output.status),
            }
        }
        Ok(())
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}
