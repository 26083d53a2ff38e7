//! Test doubles for the port probe and the container runtime.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::allocator::PortProbe;
use crate::runtime::{ContainerRuntime, NetworkAttachment, RunSpec, RuntimeError, StatsSnapshot};

#[derive(Debug, Default)]
pub struct FakeProbe {
    busy: HashSet<u16>,
    fail: bool,
}

impl FakeProbe {
    pub fn busy(busy: HashSet<u16>) -> Self {
        Self { busy, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            busy: HashSet::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl PortProbe for FakeProbe {
    async fn is_free(&self, port: u16) -> io::Result<bool> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "probe denied"));
        }
        Ok(!self.busy.contains(&port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Failure {
    #[default]
    None,
    Build,
    Run,
    Inspect,
    Stats,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub dockerfiles: Vec<String>,
    pub context_dirs: Vec<std::path::PathBuf>,
    pub tags: Vec<String>,
    pub runs: Vec<RunSpec>,
    pub removed: Vec<String>,
    pub removed_images: Vec<String>,
    pub inspections: usize,
}

/// Records every call and answers from canned data.
#[derive(Debug, Clone)]
pub struct FakeRuntime {
    pub state: Arc<Mutex<FakeState>>,
    pub attachments: Vec<NetworkAttachment>,
    pub stats: Vec<StatsSnapshot>,
    pub failure: Failure,
    next_handle: Arc<Mutex<u32>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            attachments: vec![NetworkAttachment {
                network: "bridge".into(),
                address: Some("172.17.0.2".into()),
            }],
            stats: Vec::new(),
            failure: Failure::None,
            next_handle: Arc::default(),
        }
    }
}

impl FakeRuntime {
    pub fn failing(failure: Failure) -> Self {
        Self {
            failure,
            ..Self::default()
        }
    }

    pub fn with_attachments(attachments: Vec<NetworkAttachment>) -> Self {
        Self {
            attachments,
            ..Self::default()
        }
    }

    pub fn with_stats(stats: Vec<StatsSnapshot>) -> Self {
        Self {
            stats,
            ..Self::default()
        }
    }

    pub fn snapshot<R>(&self, f: impl FnOnce(&FakeState) -> R) -> R {
        let state = self.state.lock().unwrap();
        f(&state)
    }

    fn fail(&self, command: &str) -> RuntimeError {
        RuntimeError::CommandFailed {
            command: format!("docker {command}"),
            status: "exit status: 1".into(),
            stderr: format!("{command} failed"),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError> {
        let dockerfile = std::fs::read_to_string(context_dir.join("Dockerfile"))
            .map_err(|e| RuntimeError::Decode(e.to_string()))?;
        let mut state = self.state.lock().unwrap();
        state.dockerfiles.push(dockerfile);
        state.context_dirs.push(context_dir.to_path_buf());
        state.tags.push(tag.to_string());
        if self.failure == Failure::Build {
            return Err(self.fail("build"));
        }
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
        self.state.lock().unwrap().runs.push(spec.clone());
        if self.failure == Failure::Run {
            return Err(self.fail("run"));
        }
        let mut next = self.next_handle.lock().unwrap();
        *next += 1;
        Ok(format!("{:012x}{:052}", 0xabc000 + *next, 0))
    }

    async fn network_attachments(
        &self,
        _handle: &str,
    ) -> Result<Vec<NetworkAttachment>, RuntimeError> {
        self.state.lock().unwrap().inspections += 1;
        if self.failure == Failure::Inspect {
            return Err(self.fail("inspect"));
        }
        Ok(self.attachments.clone())
    }

    async fn remove(&self, handle: &str) -> Result<(), RuntimeError> {
        self.state.lock().unwrap().removed.push(handle.to_string());
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<(), RuntimeError> {
        self.state.lock().unwrap().removed_images.push(tag.to_string());
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<StatsSnapshot>, RuntimeError> {
        if self.failure == Failure::Stats {
            return Err(self.fail("stats"));
        }
        Ok(self.stats.clone())
    }
}

pub fn stats_line(container: &str, cpu: &str, mem_usage: &str, mem_perc: &str) -> StatsSnapshot {
    StatsSnapshot {
        container: container.into(),
        cpu_percent: cpu.into(),
        mem_usage: mem_usage.into(),
        mem_percent: mem_perc.into(),
        net_io: "1.2kB / 648B".into(),
        block_io: "0B / 0B".into(),
        pids: "3".into(),
    }
}
