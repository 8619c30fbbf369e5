// Worker process: one engine behind a loopback gRPC server
//
// Decision: The first stdout line is the handshake; everything else goes to stderr
// Decision: Calls run one at a time on the blocking pool; the engine never sees two callers
// Decision: Exit on Shutdown, on stdin EOF (parent gone) or on ctrl-c
// Decision: A panic in the engine ends the process; its state is not trusted afterwards

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use docgate_engine::{Engine, EngineFactory, FaultInjectingFactory, LopdfEngineFactory};
use docgate_protocol::proto::{
    InvokeReply, InvokeRequest, PingReply, PingRequest, ShutdownReply, ShutdownRequest,
};
use docgate_protocol::wire::{self, Handshake, PROTOCOL_VERSION};
use docgate_protocol::{EngineService, EngineServiceServer, InstanceId};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Parser)]
#[command(name = "docgate-worker", about = "Hosts one document engine instance")]
pub struct WorkerArgs {
    /// Identity the engine stamps on every handle it issues
    #[arg(long, env = "DOCGATE_INSTANCE_ID")]
    pub instance_id: Option<InstanceId>,

    /// Address to serve on; port 0 picks a free one
    #[arg(long, default_value = "127.0.0.1:0")]
    pub listen: SocketAddr,

    /// Honor crash and stall markers in opened documents
    #[arg(long, env = "DOCGATE_FAULT_INJECTION")]
    pub fault_injection: bool,
}

/// gRPC service implementation for one engine instance
pub struct EngineServiceImpl<E: Engine> {
    instance: InstanceId,
    engine: Arc<Mutex<E>>,
    shutdown: CancellationToken,
}

impl<E: Engine> EngineServiceImpl<E> {
    pub fn new(instance: InstanceId, engine: E, shutdown: CancellationToken) -> Self {
        Self {
            instance,
            engine: Arc::new(Mutex::new(engine)),
            shutdown,
        }
    }

    /// Create a tonic server for this service
    pub fn into_server(self) -> EngineServiceServer<Self> {
        EngineServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl<E: Engine> EngineService for EngineServiceImpl<E> {
    async fn invoke(
        &self,
        request: Request<InvokeRequest>,
    ) -> Result<Response<InvokeReply>, Status> {
        let message = request.into_inner();
        let call = wire::decode_request(&message)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let operation = call.operation();
        debug!(instance_id = %self.instance, %operation, sequence = message.sequence, "Invoke");

        let engine = self.engine.clone();
        let outcome = tokio::task::spawn_blocking(move || engine.lock().execute(call))
            .await
            .map_err(|e| {
                error!(instance_id = %self.instance, %operation, error = %e, "Engine panicked, shutting down");
                self.shutdown.cancel();
                Status::internal(format!("{} panicked", operation))
            })?;

        let reply = wire::encode_reply(message.sequence, &outcome)
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(reply))
    }

    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingReply>, Status> {
        Ok(Response::new(PingReply {
            instance_id: self.instance.to_string(),
            protocol_version: PROTOCOL_VERSION,
        }))
    }

    async fn shutdown(
        &self,
        _request: Request<ShutdownRequest>,
    ) -> Result<Response<ShutdownReply>, Status> {
        info!(instance_id = %self.instance, "Shutdown requested");
        self.shutdown.cancel();
        Ok(Response::new(ShutdownReply {}))
    }
}

/// Runs a worker until it is told to stop.
pub async fn run(args: WorkerArgs) -> Result<()> {
    let instance = args.instance_id.unwrap_or_default();
    if args.fault_injection {
        serve(
            FaultInjectingFactory::new(LopdfEngineFactory::new()),
            instance,
            args.listen,
        )
        .await
    } else {
        serve(LopdfEngineFactory::new(), instance, args.listen).await
    }
}

async fn serve<F: EngineFactory>(factory: F, instance: InstanceId, listen: SocketAddr) -> Result<()> {
    factory.init_library();
    let engine = factory
        .create(instance)
        .map_err(|e| anyhow!("Failed to create engine: {}", e))?;

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    let addr = listener.local_addr().context("Failed to read bound address")?;

    let shutdown = CancellationToken::new();
    let service = EngineServiceImpl::new(instance, engine, shutdown.clone());

    announce(&Handshake::new(addr))?;
    watch_stdin(shutdown.clone());
    info!(instance_id = %instance, %addr, pid = std::process::id(), "Worker listening");

    let signal = shutdown.clone();
    tonic::transport::Server::builder()
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            tokio::select! {
                _ = signal.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                }
            }
        })
        .await
        .context("gRPC server error")?;

    factory.destroy_library();
    info!(instance_id = %instance, "Worker stopped");
    Ok(())
}

fn announce(handshake: &Handshake) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", handshake).context("Failed to write handshake")?;
    stdout.flush().context("Failed to flush handshake")?;
    Ok(())
}

/// Cancels `shutdown` once stdin closes. Runs on a plain thread so a
/// pending read never holds up runtime shutdown.
fn watch_stdin(shutdown: CancellationToken) {
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        debug!("Stdin closed");
        shutdown.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_engine::fixtures::SampleDocument;
    use docgate_engine::LopdfEngine;
    use docgate_protocol::requests::{DocumentSource, GetPageCount, OpenDocument};
    use docgate_protocol::{Call, Response as EngineResponse};

    fn service() -> (EngineServiceImpl<LopdfEngine>, CancellationToken) {
        let instance = InstanceId::new();
        let shutdown = CancellationToken::new();
        let service = EngineServiceImpl::new(instance, LopdfEngine::new(instance), shutdown.clone());
        (service, shutdown)
    }

    #[test]
    fn test_args_parse() {
        let id = InstanceId::new();
        let args = WorkerArgs::parse_from([
            "docgate-worker",
            "--instance-id",
            &id.to_string(),
            "--listen",
            "127.0.0.1:0",
            "--fault-injection",
        ]);
        assert_eq!(args.instance_id, Some(id));
        assert!(args.fault_injection);
    }

    #[tokio::test]
    async fn test_invoke_echoes_sequence_and_result() {
        let (service, _) = service();
        let bytes = SampleDocument::new(3).build().unwrap();
        let open = OpenDocument {
            source: DocumentSource::Bytes(bytes),
            password: None,
        }
        .into_request();
        let message = wire::encode_request(&open, 7).unwrap();

        let reply = service.invoke(Request::new(message)).await.unwrap().into_inner();
        assert_eq!(reply.sequence, 7);
        let document = match wire::decode_reply(reply).unwrap().unwrap() {
            EngineResponse::OpenDocument(opened) => opened.document,
            other => panic!("unexpected {:?}", other.operation()),
        };

        let count = GetPageCount { document }.into_request();
        let reply = service
            .invoke(Request::new(wire::encode_request(&count, 8).unwrap()))
            .await
            .unwrap()
            .into_inner();
        let response = wire::decode_reply(reply).unwrap().unwrap();
        assert_eq!(GetPageCount::from_response(response).unwrap().page_count, 3);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_invalid_argument() {
        let (service, _) = service();
        let message = InvokeRequest {
            operation: "GetPageCount".to_string(),
            payload: b"{not json".to_vec(),
            sequence: 1,
        };
        let status = service.invoke(Request::new(message)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_ping_and_shutdown() {
        let (service, shutdown) = service();
        let reply = service.ping(Request::new(PingRequest {})).await.unwrap().into_inner();
        assert_eq!(reply.instance_id, service.instance.to_string());
        assert_eq!(reply.protocol_version, PROTOCOL_VERSION);

        service.shutdown(Request::new(ShutdownRequest {})).await.unwrap();
        assert!(shutdown.is_cancelled());
    }
}
