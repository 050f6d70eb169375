use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use todosync_core::CycleReport;
use todosync_sync::{CycleOutcome, Pipeline};

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, todosync_root};
use crate::protocol::{
    CycleSummary, DaemonRequest, DaemonResponse, DaemonState, DaemonStatus, Stopping,
};

struct CycleJob {
    source: &'static str,
    respond_to: oneshot::Sender<Result<CycleSummary, String>>,
}

impl DaemonState {
    fn record_success(&mut self, report: &CycleReport) {
        self.cycles_completed += 1;
        self.last_cycle_at = Some(report.finished_at);
        self.last_report = Some(report.clone());
        self.last_error = None;
    }

    fn record_failure(&mut self, error: String) {
        self.cycles_failed += 1;
        self.last_cycle_at = Some(Utc::now());
        self.last_error = Some(error);
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, pipeline: Pipeline) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), Arc::new(pipeline)))
}

/// Run the daemon until `stop`, ctrl-c or a fatal cycle.
pub async fn run(home: PathBuf, pipeline: Arc<Pipeline>) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let state = Arc::new(RwLock::new(DaemonState::default()));
    let started_at = Utc::now();
    let interval = pipeline.settings().interval();

    let (job_tx, job_rx) = mpsc::channel::<CycleJob>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        repository = %pipeline.settings().repository.display(),
        local_dir = %pipeline.settings().local_dir.display(),
        interval_secs = interval.as_secs(),
        "daemon starting",
    );

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = scheduler_task(interval, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let pipeline = pipeline.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = processor_task(pipeline, state, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let pipeline = pipeline.clone();
        let state = state.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                pipeline,
                state,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Task {
                            task: "signal_handler",
                            message: err.to_string(),
                        }),
                    }
                }
            }
        })
    };
    drop(job_tx);

    let (scheduler_result, processor_result, socket_result, signal_result) = tokio::join!(
        scheduler_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("cycle_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Enqueue a cycle every `interval`, waiting for each to finish before the next.
///
/// Ticks missed while a cycle runs are not replayed; the next one is
/// scheduled a full interval after the late tick.
async fn scheduler_task(
    interval: Duration,
    job_tx: mpsc::Sender<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match enqueue_cycle(&job_tx, "timer").await {
                    Ok(summary) if summary.changed > 0 => {
                        tracing::info!(
                            changed = summary.changed,
                            snapshots = summary.snapshots,
                            duration_ms = summary.duration_ms,
                            "scheduled cycle propagated changes",
                        );
                    }
                    Ok(_) => {}
                    Err(DaemonError::ChannelClosed(_)) => break,
                    // Already logged by the processor.
                    Err(_) => {}
                }
            }
        }
    }

    Ok(())
}

/// Run queued cycles one at a time; a fatal outcome stops the daemon.
async fn processor_task(
    pipeline: Arc<Pipeline>,
    state: Arc<RwLock<DaemonState>>,
    mut job_rx: mpsc::Receiver<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let runner = pipeline.clone();
                let outcome = tokio::task::spawn_blocking(move || runner.run_cycle())
                    .await
                    .map_err(|err| DaemonError::Task {
                        task: "cycle",
                        message: err.to_string(),
                    })?;

                match outcome {
                    CycleOutcome::Completed(report) => {
                        state.write().await.record_success(&report);
                        let summary = CycleSummary {
                            source: job.source.to_string(),
                            changed: report.changed(),
                            snapshots: report.snapshots(),
                            duration_ms: u64::try_from(started.elapsed().as_millis())
                                .unwrap_or(u64::MAX),
                            report,
                        };
                        let _ = job.respond_to.send(Ok(summary));
                    }
                    CycleOutcome::Retryable(err) => {
                        tracing::warn!(source = job.source, error = %err, "cycle aborted, retrying next tick");
                        state.write().await.record_failure(err.to_string());
                        let _ = job.respond_to.send(Err(err.to_string()));
                    }
                    CycleOutcome::Fatal(err) => {
                        tracing::error!(source = job.source, error = %err, "fatal cycle error, stopping daemon");
                        state.write().await.record_failure(err.to_string());
                        let _ = job.respond_to.send(Err(err.to_string()));
                        return Err(DaemonError::Sync(err));
                    }
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    pipeline: Arc<Pipeline>,
    state: Arc<RwLock<DaemonState>>,
    job_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let client = Client {
                    home: home.clone(),
                    pipeline: pipeline.clone(),
                    state: state.clone(),
                    job_tx: job_tx.clone(),
                    shutdown_tx: shutdown_tx.clone(),
                    started_at,
                };
                tokio::spawn(async move {
                    if let Err(err) = client.serve(stream).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

/// Per-connection handles into the running daemon.
struct Client {
    home: PathBuf,
    pipeline: Arc<Pipeline>,
    state: Arc<RwLock<DaemonState>>,
    job_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
}

impl Client {
    async fn serve(self, stream: UnixStream) -> Result<(), DaemonError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| io_err("daemon socket read", e))?
        {
            if line.trim().is_empty() {
                continue;
            }

            let request: DaemonRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    write_response(
                        &mut writer,
                        &DaemonResponse::error(format!("invalid request: {err}")),
                    )
                    .await?;
                    continue;
                }
            };

            let response = self.respond(request).await;
            write_response(&mut writer, &response).await?;
            if request == DaemonRequest::Stop {
                break;
            }
        }

        Ok(())
    }

    async fn respond(&self, request: DaemonRequest) -> DaemonResponse {
        match request {
            DaemonRequest::Status => DaemonResponse::ok(
                &build_status(&self.home, &self.pipeline, &self.state, self.started_at).await,
            ),
            DaemonRequest::Sync => match enqueue_cycle(&self.job_tx, "socket").await {
                Ok(summary) => DaemonResponse::ok(&summary),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            DaemonRequest::Stop => {
                let _ = self.shutdown_tx.send(());
                DaemonResponse::ok(&Stopping { stopping: true })
            }
        }
    }
}

async fn build_status(
    home: &Path,
    pipeline: &Pipeline,
    state: &RwLock<DaemonState>,
    started_at: DateTime<Utc>,
) -> DaemonStatus {
    let settings = pipeline.settings();
    DaemonStatus {
        running: true,
        pid: std::process::id(),
        started_at,
        interval_secs: settings.interval_secs,
        repository: settings.repository.clone(),
        local_dir: settings.local_dir.clone(),
        tracked_files: settings.tracked_files.clone(),
        socket: socket_path(home),
        state: state.read().await.clone(),
    }
}

async fn enqueue_cycle(
    job_tx: &mpsc::Sender<CycleJob>,
    source: &'static str,
) -> Result<CycleSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(CycleJob {
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle response"))?;
    outcome.map_err(DaemonError::CycleFailed)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::AlreadyRunning {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = todosync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    result.map_err(|err| DaemonError::Task {
        task,
        message: err.to_string(),
    })?
}

/// Install the global stderr subscriber. `RUST_LOG` filters (default `info`);
/// `TODOSYNC_LOG_FORMAT=json` switches to one JSON object per line.
///
/// Also bridges `log` records from the sync engine.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TODOSYNC_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let _ = if json {
        fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init()
    } else {
        fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
