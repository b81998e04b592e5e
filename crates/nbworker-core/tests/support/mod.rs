//! Test doubles for the worker process: a scripted worker speaking the
//! signed line protocol and launchers that stand in for process spawning.

#![allow(dead_code)]

use async_trait::async_trait;
use nbworker_core::ipc::protocol::{verify_signature, SignedMessage};
use nbworker_core::{Command, ProcessLauncher, SpawnSpec, WorkerEnvironment, WorkerSettings};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const KEY: &str = "7f3c0c2e-test-key";

/// Maps a received command to the frames written back, in order.
pub type Handler = Arc<dyn Fn(&Command) -> Vec<Value> + Send + Sync>;

/// Replies of a healthy worker with no open sessions.
pub fn standard_reply(command: &Command) -> Vec<Value> {
    let reply = match command {
        Command::IsReady(_) => json!(true),
        Command::IsOpen(_) => json!(false),
        Command::Close(_) | Command::ForceClose(_) => json!({"status": true}),
        Command::Run(_) => json!({"notebook": {"cells": []}}),
        Command::Status(_) => json!("workers: 0\n"),
        Command::Stop(_) => json!({"message": "Server stopped."}),
    };
    vec![reply]
}

pub fn standard_handler() -> Handler {
    Arc::new(standard_reply)
}

/// Standard replies, except for commands `f` answers.
pub fn handler_with<F>(f: F) -> Handler
where
    F: Fn(&Command) -> Option<Vec<Value>> + Send + Sync + 'static,
{
    Arc::new(move |command: &Command| f(command).unwrap_or_else(|| standard_reply(command)))
}

/// In-process stand-in for the worker.
pub struct FakeWorker {
    pub port: u16,
    received: Arc<Mutex<Vec<Command>>>,
    task: JoinHandle<()>,
}

impl FakeWorker {
    pub async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, handler.clone(), log.clone()));
            }
        });

        Self {
            port,
            received,
            task,
        }
    }

    /// Every command received so far, across all connections.
    pub fn received(&self) -> Vec<Command> {
        self.received.lock().unwrap().clone()
    }

    /// Wire names of the received commands.
    pub fn received_types(&self) -> Vec<&'static str> {
        self.received().iter().map(|c| c.kind().as_str()).collect()
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(stream: TcpStream, handler: Handler, log: Arc<Mutex<Vec<Command>>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let message: SignedMessage = serde_json::from_str(&line).unwrap();
        if !verify_signature(KEY.as_bytes(), message.payload.as_bytes(), &message.hmac) {
            let reply = json!({"error": "Incorrect HMAC digest"});
            let _ = write_half.write_all(format!("{}\n", reply).as_bytes()).await;
            continue;
        }
        let command: Command = serde_json::from_str(&message.payload).unwrap();
        log.lock().unwrap().push(command.clone());

        let mut out = String::new();
        for frame in handler(&command) {
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        if write_half.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Write a transport file advertising `port`.
pub fn write_descriptor(path: &Path, port: u16, pid: u32) {
    let line = json!({
        "port": port,
        "pid": pid,
        "key": KEY,
        "juliaVersion": "1.10.4",
        "environment": "/env",
        "runnerVersion": "0.11.0"
    });
    std::fs::write(path, format!("{}\n", line)).unwrap();
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// What a spawned worker does.
#[derive(Clone)]
pub enum Spawned {
    /// Starts and advertises a [`FakeWorker`] with this handler.
    Serve(Handler),
    /// Advertises a port nobody listens on.
    AdvertiseDeadPort,
    /// Never writes a transport file.
    Silent,
}

/// Launcher that counts spawns and simulates the worker's startup.
pub struct FakeLauncher {
    transport: PathBuf,
    behavior: Spawned,
    spawns: AtomicUsize,
    workers: Mutex<Vec<Arc<FakeWorker>>>,
}

impl FakeLauncher {
    pub fn new(settings: &WorkerSettings, behavior: Spawned) -> Arc<Self> {
        Arc::new(Self {
            transport: settings.transport_file(),
            behavior,
            spawns: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// The most recently spawned worker.
    pub fn worker(&self) -> Arc<FakeWorker> {
        self.workers.lock().unwrap().last().cloned().expect("no worker spawned")
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn_detached(&self, _spec: &SpawnSpec) -> nbworker_core::Result<()> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Spawned::Serve(handler) => {
                let worker = FakeWorker::start(handler.clone()).await;
                write_descriptor(&self.transport, worker.port, std::process::id());
                self.workers.lock().unwrap().push(Arc::new(worker));
            }
            Spawned::AdvertiseDeadPort => {
                let port = closed_port().await;
                write_descriptor(&self.transport, port, std::process::id());
            }
            Spawned::Silent => {}
        }
        Ok(())
    }
}

/// Environment that is always ready.
pub struct ReadyEnvironment;

#[async_trait]
impl WorkerEnvironment for ReadyEnvironment {
    async fn prepare(&self) -> nbworker_core::Result<PathBuf> {
        Ok(PathBuf::from("/env"))
    }
}

/// Settings rooted in a fresh temporary directory with short timeouts.
pub fn test_settings() -> (TempDir, WorkerSettings) {
    let dir = TempDir::new().unwrap();
    let settings = WorkerSettings::new(dir.path(), dir.path())
        .with_discovery_attempts(5)
        .with_ready_timeout(Duration::from_millis(500));
    (dir, settings)
}
