// Vision backends run as child processes
//
// Protocol: the input image is written to the child's stdin as PNG. A
// background remover answers with an image (PNG with alpha) on stdout; a
// detector answers with a JSON array of
// `{"x", "y", "width", "height", "confidence"}` objects in source pixels.
//
// Children run with a cleared environment plus an allowlist.

use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use std::io::Cursor;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{debug, warn};

use photospec_core::domain::Detection;
use photospec_core::port::{BackgroundRemover, Detector, VisionError};

/// Environment variables passed through to vision children by default
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "TMPDIR"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const STDERR_EXCERPT_CHARS: usize = 500;

/// A child process invocation
#[derive(Debug, Clone, PartialEq)]
pub struct SubprocessCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    env_allowlist: Vec<String>,
}

impl SubprocessCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Build from `[program, args...]`; `None` when empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = allowlist;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Feed `input` to the child and collect its stdout.
    ///
    /// Vision ports are synchronous and called from the blocking pool, so the
    /// child is driven on the runtime that owns the calling thread.
    fn run(&self, input: Vec<u8>) -> Result<Vec<u8>, VisionError> {
        let handle = Handle::try_current().map_err(|e| {
            VisionError::Backend(format!("{}: no async runtime: {}", self.program, e))
        })?;
        handle.block_on(self.run_async(input))
    }

    async fn run_async(&self, input: Vec<u8>) -> Result<Vec<u8>, VisionError> {
        let started = Instant::now();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.env_allowlist {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VisionError::Unavailable(format!("{}: {}", self.program, e))
            }
            _ => VisionError::Backend(format!("failed to spawn {}: {}", self.program, e)),
        })?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut pipe) = stdin {
                pipe.write_all(&input).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        // Dropping the child on timeout kills it (kill_on_drop)
        let output = match timeout(self.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        {
            Ok((written, output)) => {
                if let Err(e) = written {
                    // The child may legitimately exit without reading all input
                    debug!(program = %self.program, error = %e, "stdin write ended early");
                }
                output.map_err(|e| {
                    VisionError::Backend(format!("failed waiting for {}: {}", self.program, e))
                })?
            }
            Err(_) => {
                warn!(program = %self.program, timeout = ?self.timeout, "Killed vision subprocess");
                return Err(VisionError::Backend(format!(
                    "{} timed out after {:?}",
                    self.program, self.timeout
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect();
            return Err(VisionError::Backend(format!(
                "{} exited with {}: {}",
                self.program, output.status, excerpt
            )));
        }

        debug!(
            program = %self.program,
            bytes = output.stdout.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Vision subprocess finished"
        );
        Ok(output.stdout)
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, VisionError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| VisionError::Backend(format!("PNG encode failed: {}", e)))?;
    Ok(buf)
}

/// `remove_background` delegated to an external matting tool
pub struct SubprocessBackgroundRemover {
    command: SubprocessCommand,
}

impl SubprocessBackgroundRemover {
    pub fn new(command: SubprocessCommand) -> Self {
        Self { command }
    }
}

impl BackgroundRemover for SubprocessBackgroundRemover {
    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage, VisionError> {
        let output = self.command.run(encode_png(image)?)?;
        image::load_from_memory(&output).map_err(|e| {
            VisionError::InvalidOutput(format!(
                "{} did not return an image: {}",
                self.command.program(),
                e
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    confidence: f64,
}

/// Face or person detector delegated to an external tool
pub struct SubprocessDetector {
    command: SubprocessCommand,
}

impl SubprocessDetector {
    pub fn new(command: SubprocessCommand) -> Self {
        Self { command }
    }
}

impl Detector for SubprocessDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
        let output = self.command.run(encode_png(image)?)?;
        let wire: Vec<WireDetection> = serde_json::from_slice(&output).map_err(|e| {
            VisionError::InvalidOutput(format!(
                "{} returned malformed detections: {}",
                self.command.program(),
                e
            ))
        })?;
        Ok(wire
            .into_iter()
            .map(|d| Detection::new(d.x, d.y, d.width, d.height, d.confidence))
            .collect())
    }
}

/// Keeps the input as is (already cut-out or plain-background photos)
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughRemover;

impl BackgroundRemover for PassThroughRemover {
    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage, VisionError> {
        Ok(DynamicImage::ImageRgba8(image.to_rgba8()))
    }
}

/// Stage placeholder for an unconfigured detector; always finds nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
        Ok(Vec::new())
    }
}
