//! Runs a recipe's build steps inside the staging folder.
//!
//! Each `run` step is a shell command (`sh -c`, or `cmd /C` on Windows) with
//! the staging folder as working directory and these variables set:
//!
//! | Variable                 | Value                                  |
//! |--------------------------|----------------------------------------|
//! | `MORLOCK_HOME`           | root of morlock state                  |
//! | `MORLOCK_APP`            | app name                               |
//! | `MORLOCK_VERSION`        | version being installed                |
//! | `MORLOCK_INSTALL_FOLDER` | staging folder that becomes the version |
//!
//! Output is captured and attached to the error when a step fails. Ctrl-C
//! while a step runs kills the child process and yields
//! [`BuildError::Interrupted`].

use crate::config::Context;
use crate::extract;
use crate::fsutil;
use crate::recipe::BuildStep;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Captured output kept for diagnostics
const OUTPUT_TAIL: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{message}")]
    Step { message: String, output: String },

    #[error("interrupted")]
    Interrupted,
}

impl BuildError {
    fn step(message: impl Into<String>) -> Self {
        BuildError::Step {
            message: message.into(),
            output: String::new(),
        }
    }
}

pub struct BuildRunner<'a> {
    ctx: &'a Context,
    app: &'a str,
    version: String,
    staging: &'a Path,
}

impl<'a> BuildRunner<'a> {
    pub fn new(ctx: &'a Context, app: &'a str, version: String, staging: &'a Path) -> Self {
        Self {
            ctx,
            app,
            version,
            staging,
        }
    }

    pub async fn run_all(&self, steps: &[BuildStep]) -> Result<(), BuildError> {
        for (i, step) in steps.iter().enumerate() {
            tracing::debug!("Build step {}/{}: {:?}", i + 1, steps.len(), step);
            self.run_step(step).await?;
        }
        Ok(())
    }

    async fn run_step(&self, step: &BuildStep) -> Result<(), BuildError> {
        match step {
            BuildStep::Run { run } => self.run_command(run).await,
            BuildStep::Download { download, filename } => {
                let name = filename
                    .clone()
                    .or_else(|| file_name_from_url(download))
                    .ok_or_else(|| {
                        BuildError::step(format!("cannot derive a file name from {download}"))
                    })?;
                let dest = self.resolve(&name)?;
                let progress = self.ctx.reporter.progress_bar(&name);
                let result = self.ctx.fetcher.download(download, &dest, &progress).await;
                progress.finish_and_clear();
                result
                    .map(|_| ())
                    .map_err(|e| BuildError::step(format!("download step failed: {e}")))
            }
            BuildStep::Unpack { unpack } => {
                let archive = self.resolve(unpack)?;
                extract::unpack(&archive, self.staging, self.app)
                    .map_err(|e| BuildError::step(format!("unpack step failed: {e:#}")))
            }
            BuildStep::InstallBinary {
                install_binary,
                name,
            } => self.install_binary(install_binary, name.as_deref()),
        }
    }

    async fn run_command(&self, script: &str) -> Result<(), BuildError> {
        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(script);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(script);
            c
        };

        let child = command
            .current_dir(self.staging)
            .env("MORLOCK_HOME", &self.ctx.config.home)
            .env("MORLOCK_APP", self.app)
            .env("MORLOCK_VERSION", &self.version)
            .env("MORLOCK_INSTALL_FOLDER", self.staging)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::step(format!("failed to start '{script}': {e}")))?;

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|e| BuildError::step(format!("failed waiting for '{script}': {e}")))?,
            _ = tokio::signal::ctrl_c() => return Err(BuildError::Interrupted),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        tracing::debug!("'{}' exited with {}:\n{}", script, output.status, text);

        if output.status.success() {
            Ok(())
        } else {
            Err(BuildError::Step {
                message: format!("'{script}' exited with {}", output.status),
                output: tail(&text, OUTPUT_TAIL).to_string(),
            })
        }
    }

    fn install_binary(&self, source: &str, name: Option<&str>) -> Result<(), BuildError> {
        let from = self.resolve(source)?;
        if !from.is_file() {
            return Err(BuildError::step(format!("install_binary: {source} not found")));
        }

        let name = match name {
            Some(name) => name.to_string(),
            None if cfg!(windows) => format!("{}.exe", self.app),
            None => self.app.to_string(),
        };
        let bin = self.staging.join("bin");
        let to = fsutil::safe_join(&bin, &name).ok_or_else(|| {
            BuildError::step(format!("install_binary: name '{name}' leaves the bin folder"))
        })?;

        let copy = || -> std::io::Result<()> {
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if from != to {
                std::fs::copy(&from, &to)?;
            }
            fsutil::make_executable(&to)
        };
        copy().map_err(|e| BuildError::step(format!("install_binary {source}: {e}")))
    }

    fn resolve(&self, relative: &str) -> Result<std::path::PathBuf, BuildError> {
        fsutil::safe_join(self.staging, relative)
            .ok_or_else(|| BuildError::step(format!("path '{relative}' leaves the build folder")))
    }
}

fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Last `max` bytes of `text`, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
