//! The agent's `tonic` service: runs whatever the coordinator dials in
//! for on this node. `Join` is not served here — the agent calls it as
//! a client against the coordinator at startup (see `main.rs`).

use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use futures_core::Stream;
use stratum_proto::{
    AgentFleet, ExecChunk, ExecRequest, JoinRequest, JoinResponse, PingPongRequest, PingPongResponse,
    PingPongResult as WirePingPongResult, Probe as WireProbe, ShutdownRequest, ShutdownResponse, ValidateRequest,
    ValidateResponse,
};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

pub struct AgentServer {
    pub shutdown: tokio::sync::watch::Sender<bool>,
}

impl AgentServer {
    pub fn new() -> (Self, tokio::sync::watch::Receiver<bool>) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (Self { shutdown: tx }, rx)
    }
}

#[tonic::async_trait]
impl AgentFleet for AgentServer {
    type ExecStream = Pin<Box<dyn Stream<Item = Result<ExecChunk, Status>> + Send + 'static>>;

    async fn join(&self, _request: Request<JoinRequest>) -> Result<Response<JoinResponse>, Status> {
        Err(Status::unimplemented("agents call Join on the coordinator; they do not serve it"))
    }

    async fn exec(&self, request: Request<ExecRequest>) -> Result<Response<Self::ExecStream>, Status> {
        let req = request.into_inner();
        let Some((program, args)) = req.argv.split_first() else {
            return Err(Status::invalid_argument("argv must not be empty"));
        };

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Status::internal(format!("failed to spawn {program}: {e}")))?;

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut stdout_buf = [0u8; 4096];
            let mut stderr_buf = [0u8; 4096];
            let mut stdout_done = false;
            let mut stderr_done = false;

            while !stdout_done || !stderr_done {
                tokio::select! {
                    result = stdout.read(&mut stdout_buf), if !stdout_done => {
                        match result {
                            Ok(0) | Err(_) => stdout_done = true,
                            Ok(n) => { let _ = tx.send(Ok(ExecChunk { data: stdout_buf[..n].to_vec(), stderr: false, exit_code: None })).await; }
                        }
                    }
                    result = stderr.read(&mut stderr_buf), if !stderr_done => {
                        match result {
                            Ok(0) | Err(_) => stderr_done = true,
                            Ok(n) => { let _ = tx.send(Ok(ExecChunk { data: stderr_buf[..n].to_vec(), stderr: true, exit_code: None })).await; }
                        }
                    }
                }
            }

            let status = child.wait().await.ok();
            let code = status.and_then(|s| s.code()).unwrap_or(-1);
            let _ = tx.send(Ok(ExecChunk { data: vec![], stderr: false, exit_code: Some(code) })).await;
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn validate(&self, request: Request<ValidateRequest>) -> Result<Response<ValidateResponse>, Status> {
        let req = request.into_inner();
        let mut probes = Vec::new();

        probes.push(WireProbe {
            name: "manifest-parses".into(),
            passed: serde_json::from_slice::<serde_json::Value>(&req.manifest).is_ok(),
            message: String::new(),
        });

        let disk_ok = tokio::fs::metadata("/var/lib/stratum").await.is_ok() || tokio::fs::create_dir_all("/var/lib/stratum").await.is_ok();
        probes.push(WireProbe { name: "state-dir-writable".into(), passed: disk_ok, message: req.profile });

        Ok(Response::new(ValidateResponse { probes }))
    }

    async fn check_ports(&self, request: Request<PingPongRequest>) -> Result<Response<PingPongResponse>, Status> {
        Ok(Response::new(ping_pong(request.into_inner()).await))
    }

    async fn check_bandwidth(&self, request: Request<PingPongRequest>) -> Result<Response<PingPongResponse>, Status> {
        Ok(Response::new(ping_pong(request.into_inner()).await))
    }

    async fn shutdown(&self, _request: Request<ShutdownRequest>) -> Result<Response<ShutdownResponse>, Status> {
        let _ = self.shutdown.send(true);
        Ok(Response::new(ShutdownResponse {}))
    }
}

/// Bilateral reachability check: attempts a TCP connect to every
/// `other_addr` on the probed port, bounded by the tuple's own
/// duration (the coordinator applies the 2x timeout on its side).
async fn ping_pong(req: PingPongRequest) -> PingPongResponse {
    let mut results = std::collections::HashMap::new();
    for tuple in req.tuples {
        let mut ok = true;
        let mut message = String::new();
        for addr in &tuple.other_addrs {
            let target = format!("{addr}:{}", tuple.port);
            let connect = tokio::net::TcpStream::connect(&target);
            match tokio::time::timeout(Duration::from_millis(tuple.duration_ms.max(100)), connect).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => { ok = false; message = format!("{target}: {e}"); }
                Err(_) => { ok = false; message = format!("{target}: timed out"); }
            }
        }
        results.insert(tuple.addr, WirePingPongResult { ok, message });
    }
    PingPongResponse { results }
}
