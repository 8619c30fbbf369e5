// Worker-process execution context
// Decision: One worker process per instance; a crash in the engine takes down only that process
// Decision: The worker announces its address on stdout, then speaks gRPC on loopback
// Decision: A supervisor task owns the child; process exit is observed, never polled
// Decision: Stdin stays open for the worker's lifetime so an orphaned worker exits on EOF
//
// Failure classification:
// - engine failure in the reply          -> Error::Engine
// - InvalidArgument status from worker   -> Error::Protocol (we sent something malformed)
// - any other status, exit, or watchdog  -> Error::InstanceCrashed (worker killed if still up)

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docgate_engine::{LocalRequest, LocalResponse};
use docgate_protocol::proto::{PingRequest, ShutdownRequest};
use docgate_protocol::wire::{self, Handshake, PROTOCOL_VERSION};
use docgate_protocol::{EngineServiceClient, InstanceId, Request, Response};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::{debug, info, instrument, warn};

use super::{ExecutionContext, InstanceState, Liveness};
use crate::config::{PoolConfig, PoolMode, WorkerCommand};
use crate::error::{Error, Result};
use crate::registry::HandleRegistry;

pub struct IsolatedContext {
    state: Arc<InstanceState>,
    client: tokio::sync::Mutex<EngineServiceClient<Channel>>,
    sequence: AtomicU64,
    pid: Option<u32>,
    watchdog: Option<Duration>,
    probe_timeout: Duration,
    shutdown_grace: Duration,
    stdin: Mutex<Option<ChildStdin>>,
    /// Cancelled by the supervisor once the process is gone.
    exited: CancellationToken,
    /// Cancel to have the supervisor kill the process.
    kill: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl IsolatedContext {
    /// Starts a worker and connects to it. Everything is torn down again if
    /// the worker does not come up within `spawn_timeout`.
    #[instrument(skip(config), fields(worker = %config.worker.program.display()))]
    pub async fn spawn(config: &PoolConfig) -> Result<Self> {
        let id = InstanceId::new();
        let mut child = worker_command(&config.worker, id)
            .spawn()
            .map_err(|e| {
                Error::Spawn(format!(
                    "{}: {}",
                    config.worker.program.display(),
                    e
                ))
            })?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("worker stdout was not captured".into()))?;
        let stdin = child.stdin.take();

        let startup = async {
            let mut lines = BufReader::new(stdout).lines();
            let handshake = read_handshake(&mut lines).await?;
            let channel = Endpoint::from_shared(format!("http://{}", handshake.addr))
                .map_err(|e| Error::Spawn(format!("bad worker address: {}", e)))?
                .connect_timeout(config.spawn_timeout)
                .connect()
                .await
                .map_err(|e| Error::Spawn(format!("connect to {}: {}", handshake.addr, e)))?;
            Ok::<_, Error>((lines, channel, handshake))
        };
        let (lines, channel, handshake) = match tokio::time::timeout(config.spawn_timeout, startup).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                let _ = child.start_kill();
                return Err(e);
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(Error::Spawn(format!(
                    "worker did not come up within {:?}",
                    config.spawn_timeout
                )));
            }
        };

        let state = Arc::new(InstanceState::new(id, Liveness::Spawning));
        let exited = CancellationToken::new();
        let kill = CancellationToken::new();
        tokio::spawn(drain_stdout(id, lines));
        let supervisor = tokio::spawn(supervise(
            child,
            state.clone(),
            exited.clone(),
            kill.clone(),
        ));

        state.set_healthy();
        info!(
            instance_id = %id,
            pid = ?pid,
            addr = %handshake.addr,
            "Worker started"
        );

        Ok(Self {
            state,
            client: tokio::sync::Mutex::new(EngineServiceClient::new(channel)),
            sequence: AtomicU64::new(1),
            pid,
            watchdog: config.watchdog(),
            probe_timeout: config.spawn_timeout,
            shutdown_grace: config.shutdown_grace,
            stdin: Mutex::new(stdin),
            exited,
            kill,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Marks the instance crashed and makes sure the process is gone.
    fn crash(&self, reason: impl Into<String>) -> Error {
        self.kill.cancel();
        self.state.crash(reason)
    }
}

#[async_trait]
impl ExecutionContext for IsolatedContext {
    fn id(&self) -> InstanceId {
        self.state.id()
    }

    fn mode(&self) -> PoolMode {
        PoolMode::Isolated
    }

    fn liveness(&self) -> Liveness {
        self.state.get()
    }

    fn registry(&self) -> &Arc<HandleRegistry> {
        self.state.registry()
    }

    async fn invoke(&self, request: Request) -> Result<Response> {
        self.state.ensure_live()?;
        let operation = request.operation();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let message = wire::encode_request(&request, sequence)
            .map_err(|e| Error::Protocol(e.to_string()))?;
        drop(request);

        let mut client = self.client.lock().await;
        self.state.ensure_live()?;

        let reply = tokio::select! {
            biased;
            reply = client.invoke(message) => reply,
            _ = self.exited.cancelled() => {
                return Err(self.crash(format!("worker exited during {}", operation)));
            }
            _ = expire(self.watchdog) => {
                return Err(self.crash(format!(
                    "{} got no reply within {:?}",
                    operation,
                    self.watchdog.unwrap_or_default()
                )));
            }
        };

        let reply = match reply {
            Ok(reply) => reply.into_inner(),
            Err(status) if status.code() == Code::InvalidArgument => {
                return Err(Error::Protocol(status.message().to_string()));
            }
            Err(status) => {
                return Err(self.crash(format!("{} transport failure: {}", operation, status)));
            }
        };
        if reply.sequence != sequence {
            return Err(Error::Protocol(format!(
                "reply for call {} answered call {}",
                sequence, reply.sequence
            )));
        }

        let outcome = wire::decode_reply(reply).map_err(|e| Error::Protocol(e.to_string()))?;
        let response = outcome.map_err(|source| Error::Engine {
            operation: operation.name(),
            source,
        })?;
        if response.operation() != operation {
            return Err(Error::Protocol(format!(
                "{} answered with {}",
                operation,
                response.operation()
            )));
        }
        Ok(response)
    }

    async fn invoke_local(&self, request: LocalRequest) -> Result<LocalResponse> {
        Err(Error::ModeUnsupported {
            operation: request.operation().name(),
            mode: PoolMode::Isolated,
        })
    }

    async fn check_health(&self) -> Result<()> {
        self.state.ensure_live()?;
        let probe = async {
            let mut client = self.client.lock().await;
            client.ping(PingRequest {}).await
        };
        let reply = match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(reply)) => reply.into_inner(),
            Ok(Err(status)) => return Err(self.crash(format!("ping failed: {}", status))),
            Err(_) => {
                return Err(self.crash(format!(
                    "ping unanswered after {:?}",
                    self.probe_timeout
                )))
            }
        };
        if reply.instance_id != self.state.id().to_string() {
            return Err(self.crash(format!(
                "worker reports instance {}",
                reply.instance_id
            )));
        }
        if reply.protocol_version != PROTOCOL_VERSION {
            return Err(self.crash(format!(
                "worker speaks protocol {}",
                reply.protocol_version
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %self.state.id(), pid = ?self.pid))]
    async fn close(&self) -> Result<()> {
        let previous = self.state.close();
        if previous == Liveness::Closed {
            return Ok(());
        }

        if previous != Liveness::Crashed {
            let graceful = async {
                let mut client = self.client.lock().await;
                client.shutdown(ShutdownRequest {}).await
            };
            if let Ok(Err(status)) = tokio::time::timeout(self.shutdown_grace, graceful).await {
                debug!(error = %status, "Shutdown request failed");
            }
        }
        self.stdin.lock().take();

        let result = match tokio::time::timeout(self.shutdown_grace, self.exited.cancelled()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(grace = ?self.shutdown_grace, "Worker ignored shutdown, killing it");
                self.kill.cancel();
                Err(Error::ShutdownTimeout(self.shutdown_grace))
            }
        };

        let supervisor = self.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            // After a kill the exit is prompt; do not wait forever regardless.
            if tokio::time::timeout(self.shutdown_grace, supervisor).await.is_err() {
                warn!("Supervisor did not finish");
            }
        }
        debug!("Worker closed");
        result
    }
}

impl Drop for IsolatedContext {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

fn worker_command(worker: &WorkerCommand, id: InstanceId) -> Command {
    let mut command = Command::new(&worker.program);
    command
        .args(&worker.args)
        .arg("--instance-id")
        .arg(id.to_string())
        .arg("--listen")
        .arg("127.0.0.1:0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    command
}

async fn read_handshake(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<Handshake> {
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| Error::Spawn(format!("reading handshake: {}", e)))?
            .ok_or_else(|| Error::Spawn("worker exited before its handshake".into()))?;
        if line.trim().is_empty() {
            continue;
        }
        let handshake = Handshake::parse(&line).map_err(|e| Error::Spawn(e.to_string()))?;
        if handshake.version != PROTOCOL_VERSION {
            return Err(Error::Spawn(format!(
                "worker speaks protocol {}, expected {}",
                handshake.version, PROTOCOL_VERSION
            )));
        }
        return Ok(handshake);
    }
}

/// Keeps the pipe from filling up if the worker prints after the handshake.
async fn drain_stdout(id: InstanceId, mut lines: Lines<BufReader<ChildStdout>>) {
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(instance_id = %id, line = %line, "Worker stdout");
    }
}

async fn supervise(
    mut child: Child,
    state: Arc<InstanceState>,
    exited: CancellationToken,
    kill: CancellationToken,
) {
    let id = state.id();
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if state.get() == Liveness::Closed => {
                debug!(instance_id = %id, %status, "Worker exited");
            }
            Ok(status) => {
                state.crash(format!("worker exited unexpectedly ({})", status));
            }
            Err(e) => {
                state.crash(format!("lost track of worker: {}", e));
            }
        },
        _ = kill.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(instance_id = %id, error = %e, "Failed to kill worker");
            }
        }
    }
    exited.cancel();
}

async fn expire(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
