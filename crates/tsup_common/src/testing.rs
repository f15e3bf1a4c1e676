//! In-memory collaborators for driving runs without a router
//!
//! Each fake is cheaply cloneable and shares its state between clones, so a
//! test can hand one clone to the orchestrator and keep another for
//! assertions.

use crate::agent::{ActivationOptions, AgentClient};
use crate::command::CommandError;
use crate::config_store::{ConfigStore, OptionValue, Section};
use crate::error::{FetchError, StoreError};
use crate::fetch::Fetcher;
use crate::packages::PackageInstaller;
use crate::service::{has_start_link, ServiceController};
use crate::version::parse_reported_version;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failed(command: String) -> CommandError {
    CommandError {
        command,
        reason: "exit status: 1".to_string(),
    }
}

// ============================================================================
// Fetcher
// ============================================================================

#[derive(Debug, Clone)]
enum Response {
    Body(Vec<u8>),
    /// Download reports success but leaves no file behind.
    NoFile,
}

#[derive(Debug, Default)]
struct FetcherState {
    responses: HashMap<String, Response>,
    requests: Vec<String>,
}

/// Serves canned bodies by URL; anything else is a 404.
#[derive(Debug, Clone, Default)]
pub struct FakeFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, url: &str, body: impl AsRef<[u8]>) -> Self {
        lock(&self.state)
            .responses
            .insert(url.to_string(), Response::Body(body.as_ref().to_vec()));
        self
    }

    pub fn with_file(self, url: &str, bytes: impl AsRef<[u8]>) -> Self {
        self.with_document(url, bytes)
    }

    pub fn with_missing_download(self, url: &str) -> Self {
        lock(&self.state)
            .responses
            .insert(url.to_string(), Response::NoFile);
        self
    }

    pub fn request_count(&self, url: &str) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|u| *u == url)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        lock(&self.state).requests.len()
    }

    fn respond(&self, url: &str) -> Result<Response, FetchError> {
        let mut state = lock(&self.state);
        state.requests.push(url.to_string());
        state
            .responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

impl Fetcher for FakeFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        match self.respond(url)? {
            Response::Body(body) => Ok(body),
            Response::NoFile => Ok(Vec::new()),
        }
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        match self.respond(url)? {
            Response::Body(body) => {
                fs::write(dest, &body)?;
                Ok(body.len() as u64)
            }
            Response::NoFile => Ok(0),
        }
    }
}

/// Gzipped tarball holding `files` as `(path, contents)`, mode 0755.
pub fn build_release_archive(files: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents)?;
    }
    builder.into_inner()?.finish()
}

// ============================================================================
// Config store
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    staged: BTreeMap<String, Vec<Section>>,
    committed: BTreeMap<String, Vec<Section>>,
    commits: BTreeMap<String, usize>,
    failing_commits: BTreeSet<String>,
    next_id: u32,
}

/// Two-level store: writes land in a staged view that `commit` publishes.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an already committed section.
    pub fn with_section(self, package: &str, section: Section) -> Self {
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            for view in [&mut state.staged, &mut state.committed] {
                view.entry(package.to_string())
                    .or_default()
                    .push(section.clone());
            }
        }
        self
    }

    /// Make every commit of `package` fail.
    pub fn failing_commit(self, package: &str) -> Self {
        lock(&self.state).failing_commits.insert(package.to_string());
        self
    }

    pub fn committed_section(&self, package: &str, id: &str) -> Option<Section> {
        lock(&self.state)
            .committed
            .get(package)
            .and_then(|sections| sections.iter().find(|s| s.id == id).cloned())
    }

    pub fn committed_sections_of_kind(&self, package: &str, kind: &str) -> Vec<Section> {
        lock(&self.state)
            .committed
            .get(package)
            .map(|sections| sections.iter().filter(|s| s.kind == kind).cloned().collect())
            .unwrap_or_default()
    }

    pub fn committed_snapshot(&self) -> BTreeMap<String, Vec<Section>> {
        lock(&self.state).committed.clone()
    }

    pub fn commit_count(&self, package: &str) -> usize {
        lock(&self.state).commits.get(package).copied().unwrap_or(0)
    }

    pub fn total_commits(&self) -> usize {
        lock(&self.state).commits.values().sum()
    }

    /// Staged changes not yet committed.
    pub fn has_pending_changes(&self) -> bool {
        let state = lock(&self.state);
        state.staged != state.committed
    }
}

impl ConfigStore for MemoryConfigStore {
    fn sections(&self, package: &str) -> Result<Vec<Section>, StoreError> {
        Ok(lock(&self.state)
            .staged
            .get(package)
            .cloned()
            .unwrap_or_default())
    }

    fn add_section(
        &self,
        package: &str,
        kind: &str,
        id: Option<&str>,
    ) -> Result<String, StoreError> {
        let mut state = lock(&self.state);
        let id = match id {
            Some(id) => id.to_string(),
            None => {
                state.next_id += 1;
                format!("cfg{:06x}", state.next_id)
            }
        };

        let sections = state.staged.entry(package.to_string()).or_default();
        match sections.iter_mut().find(|s| s.id == id) {
            Some(existing) => existing.kind = kind.to_string(),
            None => sections.push(Section::new(id.clone(), kind)),
        }
        Ok(id)
    }

    fn set(
        &self,
        package: &str,
        section: &str,
        option: &str,
        value: &OptionValue,
    ) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        let target = state
            .staged
            .get_mut(package)
            .and_then(|sections| sections.iter_mut().find(|s| s.id == section))
            .ok_or_else(|| StoreError::MissingSection {
                package: package.to_string(),
                section: section.to_string(),
            })?;
        target.options.insert(option.to_string(), value.clone());
        Ok(())
    }

    fn commit(&self, package: &str) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.failing_commits.contains(package) {
            return Err(StoreError::Command {
                command: format!("uci commit {}", package),
                stderr: "commit refused".to_string(),
            });
        }

        let staged = state.staged.get(package).cloned().unwrap_or_default();
        state.committed.insert(package.to_string(), staged);
        *state.commits.entry(package.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Default)]
struct ServiceState {
    running: BTreeSet<String>,
    calls: Vec<String>,
    failing: BTreeSet<String>,
    skip_autostart_artifact: bool,
}

/// Records service actions. `enable` drops an `S99<service>` link under
/// `<root>/etc/rc.d` like the real init scripts do.
#[derive(Debug, Clone)]
pub struct FakeServiceController {
    root: PathBuf,
    state: Arc<Mutex<ServiceState>>,
}

impl FakeServiceController {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Arc::new(Mutex::new(ServiceState::default())),
        }
    }

    pub fn with_running(self, service: &str) -> Self {
        lock(&self.state).running.insert(service.to_string());
        self
    }

    /// Make `action` (`start`, `stop`, `enable`, `reload`) fail for every service.
    pub fn failing(self, action: &str) -> Self {
        lock(&self.state).failing.insert(action.to_string());
        self
    }

    pub fn failing_stop(self) -> Self {
        self.failing("stop")
    }

    /// `enable` succeeds but creates no boot link.
    pub fn without_autostart_artifact(self) -> Self {
        lock(&self.state).skip_autostart_artifact = true;
        self
    }

    pub fn is_running(&self, service: &str) -> bool {
        lock(&self.state).running.contains(service)
    }

    /// `"<action> <service>"` in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    fn record(
        &self,
        service: &str,
        action: &str,
    ) -> Result<MutexGuard<'_, ServiceState>, CommandError> {
        let mut state = lock(&self.state);
        state.calls.push(format!("{} {}", action, service));
        if state.failing.contains(action) {
            return Err(failed(format!("/etc/init.d/{} {}", service, action)));
        }
        Ok(state)
    }
}

impl ServiceController for FakeServiceController {
    fn start(&self, service: &str) -> Result<(), CommandError> {
        self.record(service, "start")?
            .running
            .insert(service.to_string());
        Ok(())
    }

    fn stop(&self, service: &str) -> Result<(), CommandError> {
        self.record(service, "stop")?.running.remove(service);
        Ok(())
    }

    fn enable(&self, service: &str) -> Result<(), CommandError> {
        let state = self.record(service, "enable")?;
        if state.skip_autostart_artifact {
            return Ok(());
        }
        let rc_dir = self.root.join("etc/rc.d");
        let link = rc_dir.join(format!("S99{}", service));
        fs::create_dir_all(&rc_dir)
            .and_then(|_| fs::write(&link, b""))
            .map_err(|e| CommandError {
                command: format!("/etc/init.d/{} enable", service),
                reason: e.to_string(),
            })
    }

    fn reload(&self, service: &str) -> Result<(), CommandError> {
        self.record(service, "reload").map(|_| ())
    }

    fn autostart_enabled(&self, service: &str) -> bool {
        has_start_link(&self.root.join("etc/rc.d"), service)
    }
}

// ============================================================================
// Packages and agent
// ============================================================================

#[derive(Debug, Default)]
struct PackageState {
    installed: Vec<Vec<String>>,
    failing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakePackageInstaller {
    state: Arc<Mutex<PackageState>>,
}

impl FakePackageInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self) -> Self {
        lock(&self.state).failing = true;
        self
    }

    /// Package lists passed to each `install` call.
    pub fn installs(&self) -> Vec<Vec<String>> {
        lock(&self.state).installed.clone()
    }
}

impl PackageInstaller for FakePackageInstaller {
    fn install(&self, packages: &[String]) -> Result<(), CommandError> {
        let mut state = lock(&self.state);
        state.installed.push(packages.to_vec());
        if state.failing {
            return Err(failed(format!("opkg install {}", packages.join(" "))));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AgentState {
    activations: Vec<ActivationOptions>,
    failing_auth: bool,
}

/// Treats the agent binary's contents as its `version` output.
#[derive(Debug, Clone, Default)]
pub struct FakeAgent {
    state: Arc<Mutex<AgentState>>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_auth(self) -> Self {
        lock(&self.state).failing_auth = true;
        self
    }

    pub fn activations(&self) -> Vec<ActivationOptions> {
        lock(&self.state).activations.clone()
    }
}

impl AgentClient for FakeAgent {
    fn installed_version(&self, agent_binary: &Path) -> Option<String> {
        let output = fs::read_to_string(agent_binary).ok()?;
        parse_reported_version(&output)
    }

    fn authenticate(
        &self,
        agent_binary: &Path,
        options: &ActivationOptions,
    ) -> Result<(), CommandError> {
        let mut state = lock(&self.state);
        state.activations.push(options.clone());
        if state.failing_auth {
            return Err(failed(format!(
                "{} {}",
                agent_binary.display(),
                options.up_args().join(" ")
            )));
        }
        Ok(())
    }
}
