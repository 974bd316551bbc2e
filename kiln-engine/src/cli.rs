//! Docker-compatible command line engine
//!
//! Implements [`Engine`] by running the `docker` (or `podman`) binary:
//! - Short commands are run to completion and their stdout parsed
//! - Pull progress and container logs are read line by line as they arrive
//! - Archives are streamed to `cp -` through the child's stdin

use async_trait::async_trait;
use kiln_core::domain::progress::ProgressEvent;
use kiln_core::dto::image::{ImageInspect, ImageSummary};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::engine::{Archive, Engine, ProgressSink};
use crate::error::{EngineError, Result};

/// Bytes written to the engine per upload chunk
const UPLOAD_CHUNK: usize = 64 * 1024;

/// Stderr lines kept for the error message of a failed streaming command
const STDERR_TAIL: usize = 20;

/// Engine backed by a Docker-compatible CLI
#[derive(Debug, Clone)]
pub struct CliEngine {
    /// Binary to run, e.g. "docker" or "podman"
    program: String,
}

impl CliEngine {
    /// Creates an engine running the given binary
    ///
    /// # Example
    /// ```
    /// use kiln_engine::CliEngine;
    ///
    /// let engine = CliEngine::new("podman");
    /// assert_eq!(engine.program(), "podman");
    /// ```
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Checks that the engine binary runs
    ///
    /// # Returns
    /// The version line it reports
    pub async fn check_available(&self) -> Result<String> {
        let version = self.run(&["--version".to_string()]).await?;
        let version = version.trim().to_string();
        info!("{} is available: {}", self.program, version);
        Ok(version)
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            program: self.program.clone(),
            source,
        }
    }

    /// Runs a command to completion
    ///
    /// # Returns
    /// Its stdout
    async fn run(&self, args: &[String]) -> Result<String> {
        debug!("Running {} {}", self.program, args.join(" "));

        let output = self
            .command(args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(EngineError::command_failed(
                args.join(" "),
                output.status.code(),
                &stderr,
            ));
        }

        Ok(stdout)
    }

    /// Runs a command, handing every stdout and stderr line to `sink` as it arrives
    async fn stream_lines(
        &self,
        args: &[String],
        sink: &mut dyn ProgressSink,
        event: fn(String) -> ProgressEvent,
    ) -> Result<()> {
        debug!("Streaming {} {}", self.program, args.join(" "));

        let mut child = self.command(args).spawn().map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::ParseError("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::ParseError("stderr was not captured".to_string()))?;

        let mut out = BufReader::new(stdout);
        let mut err = BufReader::new(stderr);
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out_done = false;
        let mut err_done = false;
        let mut stderr_tail: Vec<String> = Vec::new();

        // Partial reads stay in the buffers when the other branch wins
        while !(out_done && err_done) {
            tokio::select! {
                read = out.read_until(b'\n', &mut out_buf), if !out_done => {
                    if read? == 0 {
                        out_done = true;
                    } else {
                        sink.write(event(take_line(&mut out_buf)));
                    }
                }
                read = err.read_until(b'\n', &mut err_buf), if !err_done => {
                    if read? == 0 {
                        err_done = true;
                    } else {
                        let line = take_line(&mut err_buf);
                        if stderr_tail.len() == STDERR_TAIL {
                            stderr_tail.remove(0);
                        }
                        stderr_tail.push(line.clone());
                        sink.write(event(line));
                    }
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(EngineError::command_failed(
                args.join(" "),
                status.code(),
                &stderr_tail.join("\n"),
            ));
        }

        Ok(())
    }

    /// Runs a removal command, treating a missing resource as success
    async fn remove(&self, args: &[String]) -> Result<()> {
        match self.run(args).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Nothing to remove for '{}': {}", args.join(" "), e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Engine for CliEngine {
    async fn list_images(&self, label_filter: &str) -> Result<Vec<ImageSummary>> {
        let ids = parse_id_lines(&self.run(&list_images_args(label_filter)).await?);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["image".to_string(), "inspect".to_string()];
        args.extend(ids);

        parse_inspect_output(&self.run(&args).await?)?
            .iter()
            .map(|inspect| {
                inspect
                    .to_summary()
                    .map_err(|e| EngineError::ParseError(e.to_string()))
            })
            .collect()
    }

    async fn list_containers(&self, label_filter: &str) -> Result<Vec<String>> {
        let args = vec![
            "ps".to_string(),
            "--all".to_string(),
            "--quiet".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={}", label_filter),
        ];

        Ok(parse_id_lines(&self.run(&args).await?))
    }

    async fn pull(
        &self,
        repository: &str,
        tag: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        let args = vec!["pull".to_string(), format!("{}:{}", repository, tag)];
        self.stream_lines(&args, progress, ProgressEvent::Pull).await
    }

    async fn create_container(&self, image: &str, command: Option<&[String]>) -> Result<String> {
        let mut args = vec!["create".to_string(), image.to_string()];
        if let Some(command) = command {
            args.extend(command.iter().cloned());
        }

        let id = self.run(&args).await?.trim().to_string();
        if id.is_empty() {
            return Err(EngineError::ParseError(format!(
                "'create {}' printed no container id",
                image
            )));
        }

        debug!("Created container {} from {}", id, image);
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.run(&["start".to_string(), container_id.to_string()])
            .await
            .map(|_| ())
    }

    async fn attach_stream(
        &self,
        container_id: &str,
        output: &mut dyn ProgressSink,
    ) -> Result<()> {
        let args = vec![
            "logs".to_string(),
            "--follow".to_string(),
            container_id.to_string(),
        ];
        self.stream_lines(&args, output, ProgressEvent::Output).await
    }

    async fn wait(&self, container_id: &str) -> Result<i64> {
        let stdout = self
            .run(&["wait".to_string(), container_id.to_string()])
            .await?;
        parse_exit_code(&stdout)
    }

    async fn commit(
        &self,
        container_id: &str,
        labels: &BTreeMap<String, String>,
        repository: Option<&str>,
    ) -> Result<String> {
        let id = self
            .run(&commit_args(container_id, labels, repository))
            .await?
            .trim()
            .to_string();

        if id.is_empty() {
            return Err(EngineError::ParseError(format!(
                "commit of {} printed no image id",
                container_id
            )));
        }

        Ok(id)
    }

    async fn inspect_image(&self, image_id: &str) -> Result<ImageInspect> {
        let stdout = self
            .run(&[
                "image".to_string(),
                "inspect".to_string(),
                image_id.to_string(),
            ])
            .await?;

        parse_inspect_output(&stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NotFound(image_id.to_string()))
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.remove(&[
            "rm".to_string(),
            "--force".to_string(),
            container_id.to_string(),
        ])
        .await
    }

    async fn remove_image(&self, image_id: &str) -> Result<()> {
        self.remove(&["rmi".to_string(), image_id.to_string()])
            .await
    }

    async fn put_archive(
        &self,
        container_id: &str,
        dest_path: &str,
        mut archive: Archive,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        let args = vec![
            "cp".to_string(),
            "-".to_string(),
            format!("{}:{}", container_id, dest_path),
        ];
        debug!("Streaming {} bytes to {} {}", archive.size, self.program, args.join(" "));

        let mut child = self
            .command(&args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::ParseError("stdin was not captured".to_string()))?;

        let mut buffer = vec![0u8; UPLOAD_CHUNK];
        let mut sent: u64 = 0;
        let mut write_error = None;

        loop {
            let read = archive.reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            if let Err(e) = stdin.write_all(&buffer[..read]).await {
                write_error = Some(e);
                break;
            }
            sent += read as u64;
            progress.write(ProgressEvent::Upload {
                sent,
                total: archive.size,
            });
        }
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(EngineError::command_failed(
                args.join(" "),
                output.status.code(),
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        match write_error {
            Some(e) => Err(EngineError::Io(e)),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Argument builders and output parsers
// =============================================================================

fn list_images_args(label_filter: &str) -> Vec<String> {
    vec![
        "images".to_string(),
        "--all".to_string(),
        "--quiet".to_string(),
        "--no-trunc".to_string(),
        "--filter".to_string(),
        format!("label={}", label_filter),
    ]
}

fn commit_args(
    container_id: &str,
    labels: &BTreeMap<String, String>,
    repository: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["commit".to_string()];
    for (key, value) in labels {
        args.push("--change".to_string());
        args.push(label_change(key, value));
    }
    args.push(container_id.to_string());
    if let Some(repository) = repository {
        args.push(repository.to_string());
    }
    args
}

/// A `LABEL` instruction for `commit --change`, with both sides quoted
fn label_change(key: &str, value: &str) -> String {
    format!("LABEL {}={}", quote(key), quote(value))
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Non-empty, de-duplicated lines in order of first appearance
fn parse_id_lines(stdout: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !ids.iter().any(|id| id == line) {
            ids.push(line.to_string());
        }
    }
    ids
}

/// Drains a raw output line, decoding invalid UTF-8 lossily
fn take_line(buf: &mut Vec<u8>) -> String {
    let mut end = buf.len();
    if buf[..end].ends_with(b"\n") {
        end -= 1;
    }
    if buf[..end].ends_with(b"\r") {
        end -= 1;
    }
    let line = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.clear();
    line
}

fn parse_exit_code(stdout: &str) -> Result<i64> {
    stdout
        .trim()
        .parse::<i64>()
        .map_err(|_| EngineError::ParseError(format!("invalid exit status '{}'", stdout.trim())))
}

fn parse_inspect_output(stdout: &str) -> Result<Vec<ImageInspect>> {
    serde_json::from_str(stdout)
        .map_err(|e| EngineError::ParseError(format!("invalid image inspect output: {}", e)))
}
