// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leaf instance lifecycle.
//!
//! Starting a leaf allocates a port, spawns the configured command with its
//! stdout/stderr captured into a per-leaf log file, gates on readiness
//! (TCP connect or a configured start message), binds the instance into the
//! stem's HAProxy backend and persists it in the catalog. Stopping reverses
//! the order: HAProxy member first, then the process, then the record.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use herbarium_core::models::{self, Leaf, LeafStatus, Stem, StemKey};
use herbarium_core::{CatalogError, LeafRepository, StemRepository};
use herbarium_haproxy::Balancer;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RuntimeError};
use crate::graft;
use crate::settings::RuntimeSettings;

/// How long the readiness gate waits for a fresh leaf.
pub(crate) const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval of the readiness gate.
pub(crate) const CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound (exclusive) of the port scan.
const PORT_SCAN_END: u16 = 65535;

/// Methods for managing leaves, mockable at the seam.
#[async_trait]
pub trait LeafLifecycle: Send + Sync {
    /// Start a new leaf instance. With `replace_server` set the new instance
    /// atomically replaces that backend member in HAProxy.
    async fn start_leaf(&self, key: &StemKey, replace_server: Option<&str>) -> Result<String>;

    /// Stop a specific leaf instance.
    async fn stop_leaf(&self, key: &StemKey, leaf_id: &str) -> Result<()>;

    /// All running leaves of a stem, sorted by ID.
    fn running_leaves(&self, key: &StemKey) -> Result<Vec<Leaf>>;

    /// Install a graft node standing in for an idle stem.
    async fn start_graft_node(&self, key: &StemKey) -> Result<String>;
}

/// Manages leaf instances against the catalog and HAProxy.
#[derive(Clone)]
pub struct LeafManager {
    leaf_repo: LeafRepository,
    stem_repo: StemRepository,
    balancer: Arc<dyn Balancer>,
    settings: Arc<RuntimeSettings>,
}

impl LeafManager {
    /// Create a manager over the given repositories and balancer.
    pub fn new(
        leaf_repo: LeafRepository,
        stem_repo: StemRepository,
        balancer: Arc<dyn Balancer>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            leaf_repo,
            stem_repo,
            balancer,
            settings: Arc::new(settings),
        }
    }

    pub(crate) fn repo(&self) -> &LeafRepository {
        &self.leaf_repo
    }

    /// Start a new leaf for the stem, optionally replacing an existing
    /// HAProxy backend member in the same transaction.
    pub async fn start_leaf(&self, key: &StemKey, replace_server: Option<&str>) -> Result<String> {
        info!(stem = %key, "starting leaf");

        let leaf_id = models::leaf_id(&key.name, &key.version);
        let port = alloc_port(self.settings.base_port)?;
        let stem = self.stem_repo.fetch(key)?;

        let pid = self.spawn_ready_process(&leaf_id, port, &stem).await?;

        let bind_result = match replace_server {
            Some(old_server) => {
                self.balancer
                    .replace_leaf(&stem.haproxy_backend, old_server, &leaf_id, "localhost", port)
                    .await
            }
            None => {
                self.balancer
                    .bind_leaf(&stem.haproxy_backend, &leaf_id, "localhost", port)
                    .await
            }
        };
        if let Err(err) = bind_result {
            error!(leaf_id = %leaf_id, error = %err, "failed to bind leaf into HAProxy");
            kill_process(pid);
            return Err(err.into());
        }

        if let Err(err) = self
            .leaf_repo
            .add_leaf(key, &leaf_id, &leaf_id, pid, port, Utc::now())
        {
            error!(leaf_id = %leaf_id, error = %err, "leaf started but could not be persisted");
            if let Err(unbind_err) = self
                .balancer
                .unbind_leaf(&stem.haproxy_backend, &leaf_id)
                .await
            {
                warn!(leaf_id = %leaf_id, error = %unbind_err, "failed to unbind orphaned leaf");
            }
            kill_process(pid);
            return Err(err.into());
        }

        info!(
            leaf_id = %leaf_id,
            url = %format_args!("http://localhost:{}", port),
            "leaf started"
        );
        Ok(leaf_id)
    }

    /// Stop a leaf: HAProxy member first, then the process, then the record.
    pub async fn stop_leaf(&self, key: &StemKey, leaf_id: &str) -> Result<()> {
        let stem = self.stem_repo.fetch(key)?;
        let leaf = stem
            .leaf_instances
            .get(leaf_id)
            .cloned()
            .ok_or_else(|| CatalogError::LeafNotFound {
                leaf_id: leaf_id.to_string(),
                name: key.name.clone(),
                version: key.version.clone(),
            })?;

        self.balancer
            .unbind_leaf(&stem.haproxy_backend, &leaf.haproxy_server)
            .await?;

        kill_process(leaf.pid);

        self.leaf_repo.remove_leaf(key, leaf_id)?;
        info!(stem = %key, leaf_id = %leaf_id, "leaf stopped");
        Ok(())
    }

    /// All running leaves of the stem, sorted ascending by ID.
    pub fn running_leaves(&self, key: &StemKey) -> Result<Vec<Leaf>> {
        let stem = self.stem_repo.fetch(key)?;
        let mut running: Vec<Leaf> = stem
            .leaf_instances
            .values()
            .filter(|leaf| leaf.status == LeafStatus::Running)
            .cloned()
            .collect();
        running.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(running)
    }

    /// Install a graft node as the sole backend member of an idle stem.
    pub async fn start_graft_node(&self, key: &StemKey) -> Result<String> {
        info!(stem = %key, "starting graft node");

        let stem = self.stem_repo.fetch(key)?;
        if self.leaf_repo.graft_node(key)?.is_some() {
            return Err(CatalogError::GraftNodeAlreadyExists {
                name: key.name.clone(),
                version: key.version.clone(),
            }
            .into());
        }

        let graft_id = models::graft_node_id(&key.name, &key.version);
        let port = alloc_port(self.settings.base_port)?;
        let graft_leaf = Leaf {
            id: graft_id.clone(),
            pid: 0,
            haproxy_server: graft_id.clone(),
            port,
            status: LeafStatus::Running,
            initialized: Utc::now(),
        };

        self.balancer
            .bind_leaf(&stem.haproxy_backend, &graft_id, "localhost", port)
            .await?;

        graft::spawn_graft_server(self.clone(), &stem, graft_id.clone(), port).await?;

        self.leaf_repo.set_graft_node(key, graft_leaf)?;

        info!(graft_id = %graft_id, port = port, "graft node started");
        Ok(graft_id)
    }

    /// Spawn the stem's command for a new leaf and wait for it to become
    /// ready. Returns the PID; on a readiness timeout the process is killed.
    async fn spawn_ready_process(&self, leaf_id: &str, port: u16, stem: &Stem) -> Result<u32> {
        let config = &stem.config;
        let workdir = self.working_directory(&stem.name, &stem.version)?;

        let command = expand_placeholders(&config.command, port);
        let mut parts = command.split_whitespace();
        let executable = parts.next().ok_or_else(|| {
            RuntimeError::BadConfig(format!("empty command for stem '{}'", stem.name))
        })?;
        let args: Vec<&str> = parts.collect();

        let env: HashMap<String, String> = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_placeholders(v, port)))
            .collect();

        std::fs::create_dir_all(&self.settings.log_folder)?;
        let log_path = self.settings.log_folder.join(format!("{}.log", leaf_id));
        let log_file = Arc::new(Mutex::new(std::fs::File::create(&log_path)?));
        debug!(leaf_id = %leaf_id, log = %log_path.display(), "using log file");

        info!(leaf_id = %leaf_id, command = %command, "executing leaf command");
        let mut child = Command::new(executable)
            .args(&args)
            .current_dir(&workdir)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id().unwrap_or_default();
        info!(leaf_id = %leaf_id, pid = pid, "leaf process started");

        let (marker_tx, marker_rx) = mpsc::channel::<()>(2);
        let start_message = config.start_message.clone();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(
                stdout,
                log_file.clone(),
                leaf_id.to_string(),
                "stdout",
                start_message.clone(),
                marker_tx.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(
                stderr,
                log_file.clone(),
                leaf_id.to_string(),
                "stderr",
                start_message.clone(),
                marker_tx,
            ));
        }

        // Reap the child in the background so it never lingers as a zombie.
        let reap_id = leaf_id.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(leaf_id = %reap_id, status = %status, "leaf process exited"),
                Err(err) => warn!(leaf_id = %reap_id, error = %err, "failed to await leaf process"),
            }
        });

        if !wait_for_ready(port, marker_rx, start_message.is_some(), STARTUP_TIMEOUT).await {
            warn!(leaf_id = %leaf_id, port = port, "leaf did not become ready, killing it");
            kill_process(pid);
            return Err(RuntimeError::NotReady {
                leaf_id: leaf_id.to_string(),
                timeout_secs: STARTUP_TIMEOUT.as_secs(),
            });
        }

        info!(leaf_id = %leaf_id, port = port, "leaf is ready");
        Ok(pid)
    }

    fn working_directory(&self, name: &str, version: &str) -> Result<PathBuf> {
        let dir = self
            .settings
            .root_folder
            .join("services")
            .join(name)
            .join(version);
        if !dir.is_dir() {
            return Err(RuntimeError::BadConfig(format!(
                "working directory {} does not exist",
                dir.display()
            )));
        }
        Ok(dir)
    }
}

#[async_trait]
impl LeafLifecycle for LeafManager {
    async fn start_leaf(&self, key: &StemKey, replace_server: Option<&str>) -> Result<String> {
        LeafManager::start_leaf(self, key, replace_server).await
    }

    async fn stop_leaf(&self, key: &StemKey, leaf_id: &str) -> Result<()> {
        LeafManager::stop_leaf(self, key, leaf_id).await
    }

    fn running_leaves(&self, key: &StemKey) -> Result<Vec<Leaf>> {
        LeafManager::running_leaves(self, key)
    }

    async fn start_graft_node(&self, key: &StemKey) -> Result<String> {
        LeafManager::start_graft_node(self, key).await
    }
}

/// Scan upward from `base` and return the first port that accepts a bind.
pub(crate) fn alloc_port(base: u16) -> Result<u16> {
    for port in base..PORT_SCAN_END {
        if let Ok(listener) = std::net::TcpListener::bind(("0.0.0.0", port)) {
            drop(listener);
            return Ok(port);
        }
    }
    Err(RuntimeError::NoFreePort(base))
}

/// Replace the `{PORT}` placeholder in a command or env value.
fn expand_placeholders(template: &str, port: u16) -> String {
    template.replace("{PORT}", &port.to_string())
}

/// Force-kill a process by PID. PID 0 (graft nodes) and processes that are
/// already gone are tolerated.
pub(crate) fn kill_process(pid: u32) {
    if pid == 0 {
        return;
    }
    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid = pid, "killed leaf process"),
        Err(Errno::ESRCH) => debug!(pid = pid, "process already gone"),
        Err(err) => warn!(pid = pid, error = %err, "failed to kill leaf process"),
    }
}

/// Mirror one output stream into the leaf's log file, flagging the start
/// message when it appears.
async fn pump_output<R>(
    reader: R,
    log_file: Arc<Mutex<std::fs::File>>,
    leaf_id: String,
    stream: &'static str,
    start_message: Option<String>,
    marker_tx: mpsc::Sender<()>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(leaf_id = %leaf_id, stream = stream, "{}", line);
        {
            let mut file = log_file.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = writeln!(file, "{}", line) {
                warn!(leaf_id = %leaf_id, error = %err, "failed to write leaf log");
            }
        }
        if let Some(marker) = &start_message {
            if line.contains(marker) {
                let _ = marker_tx.try_send(());
            }
        }
    }
}

/// Wait until the leaf accepts TCP connections on its port or, when a start
/// message is configured, until that message shows up on its output.
async fn wait_for_ready(
    port: u16,
    mut marker_rx: mpsc::Receiver<()>,
    has_marker: bool,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    let address = format!("localhost:{}", port);
    while Instant::now() < deadline {
        if has_marker && marker_rx.try_recv().is_ok() {
            debug!(port = port, "start message detected");
            return true;
        }
        if let Ok(Ok(conn)) =
            tokio::time::timeout(CHECK_INTERVAL, TcpStream::connect(address.as_str())).await
        {
            drop(conn);
            debug!(port = port, "port is accepting connections");
            return true;
        }
        tokio::time::sleep(CHECK_INTERVAL).await;
    }
    false
}
