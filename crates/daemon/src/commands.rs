//! Subcommand handlers

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::{error, info};

use photospec_core::application::{dispatch_channel, shutdown_channel, JobService, ShutdownSender};
use photospec_core::domain::{Job, JobId, JobStatus, PhotoSpec, SelectionRect};

use crate::wiring::Components;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Time allowed on top of vision timeouts for decoding and encoding
const INLINE_RENDER_ALLOWANCE: Duration = Duration::from_secs(60);

#[derive(Tabled)]
struct CountryRow {
    country: String,
    name: String,
    size: String,
    head: String,
    top_margin: String,
    bottom_margin: String,
    max_file: String,
    dpi: u16,
}

impl From<&PhotoSpec> for CountryRow {
    fn from(spec: &PhotoSpec) -> Self {
        let range = |r: Option<photospec_core::domain::PixelRange>| {
            r.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
        };
        Self {
            country: spec.country_id.clone(),
            name: spec.name.clone(),
            size: format!("{}x{}", spec.output_width_px, spec.output_height_px),
            head: format!("{:.0}%", spec.head_height_ratio * 100.0),
            top_margin: range(spec.top_margin_px_range),
            bottom_margin: range(spec.bottom_margin_px_range),
            max_file: spec
                .max_file_size_bytes
                .map(|b| format!("{} KB", b / 1000))
                .unwrap_or_else(|| "-".to_string()),
            dpi: spec.dpi,
        }
    }
}

#[derive(Tabled)]
struct JobRow {
    job_id: String,
    country: String,
    status: String,
    detail: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        let detail = match (&job.result, &job.error) {
            (Some(out), _) => format!(
                "{}x{} q{} {} bytes",
                out.width, out.height, out.quality, out.byte_size
            ),
            (_, Some(err)) => err.to_string(),
            _ => String::new(),
        };
        Self {
            job_id: job.id.clone(),
            country: job.country_id.clone(),
            status: job.status.to_string(),
            detail,
        }
    }
}

fn print_job(job: &Job) {
    let headline = match job.status {
        JobStatus::Completed => "✓ Job completed".green().bold(),
        JobStatus::Failed => "✗ Job failed".red().bold(),
        _ => format!("Job {}", job.status.to_string().to_lowercase()).cyan().bold(),
    };
    println!("{}", headline);
    println!("{}", Table::new(vec![JobRow::from(job)]));
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))
}

/// Run workers, crash recovery and retention sweeping until Ctrl+C
pub async fn serve(components: Components) -> Result<()> {
    info!("Running crash recovery...");
    match components.recovery().recover_interrupted_jobs().await {
        Ok(count) => info!(interrupted_jobs = count, "Crash recovery completed"),
        Err(e) => error!(error = ?e, "Crash recovery failed"),
    }

    let (shutdown_tx, _shutdown_rx) = shutdown_channel();

    // Submissions come from other processes, so these workers poll the store
    let mut handles = Vec::new();
    for i in 0..components.settings.workers {
        let worker = components.worker(format!("worker-{}", i));
        let token = shutdown_tx.token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!(error = ?e, "Worker failed");
            }
        }));
    }
    info!(workers = components.settings.workers, "Workers started");

    let sweeper = components.sweeper();
    handles.push(tokio::spawn(sweeper.run(shutdown_tx.token())));

    info!("✅ System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    shutdown_tx.shutdown();
    for handle in handles {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
    }
    info!("Shutdown complete.");
    Ok(())
}

pub async fn countries(components: &Components) -> Result<()> {
    let specs = components
        .job_service(None)
        .list_countries()
        .await?;
    if specs.is_empty() {
        println!("{}", "No countries configured".yellow());
        return Ok(());
    }
    let rows: Vec<CountryRow> = specs.iter().map(CountryRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}

pub async fn submit(components: &Components, image: &Path, country: &str) -> Result<()> {
    let service = components.job_service(None);
    let job_id = service
        .submit(&read_image(image)?, country)
        .await?;
    println!("{}", "✓ Job submitted".green().bold());
    println!("{}", job_id);
    Ok(())
}

/// Submit and run to completion in this process
pub async fn process(
    components: &Components,
    image: &Path,
    country: &str,
    output: &Path,
) -> Result<()> {
    let run = InlineRun::start(components);
    let job_id = run.service.submit(&read_image(image)?, country).await?;
    run.finish(&job_id, output).await
}

pub async fn status(components: &Components, job_id: &str, output: Option<&Path>) -> Result<()> {
    let service = components.job_service(None);
    let job_id: JobId = job_id.to_string();
    let job = service.get_status(&job_id).await?;
    print_job(&job);
    if let Some(path) = output {
        write_output(&service, &job_id, path).await?;
    }
    Ok(())
}

pub async fn prepare(
    components: &Components,
    image: &Path,
    country: &str,
    output: &Path,
) -> Result<()> {
    let prepared = components
        .job_service(None)
        .prepare(&read_image(image)?, country)
        .await?;
    std::fs::write(output, &prepared.image_data)
        .with_context(|| format!("Cannot write {}", output.display()))?;

    let sel = prepared.default_selection;
    println!("{}", "✓ Image prepared".green().bold());
    println!("intermediate: {} ({})", output.display(), prepared.image_size);
    println!(
        "head:         {} via {} (confidence {:.2})",
        prepared.head_box.rect, prepared.head_box.method, prepared.head_box.confidence
    );
    println!(
        "selection:    {:.1},{:.1},{:.1},{:.1}",
        sel.x, sel.y, sel.width, sel.height
    );
    Ok(())
}

pub async fn generate(
    components: &Components,
    image: &Path,
    selection: SelectionRect,
    country: &str,
    output: Option<&Path>,
) -> Result<()> {
    let image = read_image(image)?;
    match output {
        Some(path) => {
            let run = InlineRun::start(components);
            let job_id = run.service.generate(&image, selection, country).await?;
            run.finish(&job_id, path).await
        }
        None => {
            let job_id = components
                .job_service(None)
                .generate(&image, selection, country)
                .await?;
            println!("{}", "✓ Job submitted".green().bold());
            println!("{}", job_id);
            Ok(())
        }
    }
}

/// A job service whose submissions are handed over the dispatch channel to
/// a worker running in this process
struct InlineRun {
    service: JobService,
    shutdown: ShutdownSender,
    worker: tokio::task::JoinHandle<()>,
    wait_limit: Duration,
}

impl InlineRun {
    fn start(components: &Components) -> Self {
        let (dispatch_tx, dispatch_rx) = dispatch_channel();
        let (shutdown, token) = shutdown_channel();
        let worker = components.worker("inline").dispatch_only(dispatch_rx);
        let worker = tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!(error = ?e, "Inline worker failed");
            }
        });
        // Every vision stage may run to its timeout
        let wait_limit =
            Duration::from_secs(components.settings.vision.timeout_secs * 4) + INLINE_RENDER_ALLOWANCE;
        Self {
            service: components.job_service(Some(dispatch_tx)),
            shutdown,
            worker,
            wait_limit,
        }
    }

    /// Wait for the job to finish, whichever worker claimed it, then write its output
    async fn finish(self, job_id: &JobId, output: &Path) -> Result<()> {
        let waited = self.service.wait_for_terminal(job_id, self.wait_limit).await;
        self.shutdown.shutdown();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, self.worker).await;

        let job = waited.with_context(|| format!("Job {} did not finish", job_id))?;
        print_job(&job);
        match job.status {
            JobStatus::Completed => write_output(&self.service, job_id, output).await,
            _ => anyhow::bail!("job {} failed", job_id),
        }
    }
}

async fn write_output(service: &JobService, job_id: &JobId, path: &Path) -> Result<()> {
    let bytes = service.get_output(job_id).await?;
    std::fs::write(path, &bytes).with_context(|| format!("Cannot write {}", path.display()))?;
    println!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
