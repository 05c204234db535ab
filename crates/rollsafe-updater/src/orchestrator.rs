use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use rollsafe_core::{
    normalize_identifier, BatchMode, BatchResponse, Component, ComponentSelection,
    ComponentStatus, PlanEntry, PreflightReport, UpdateCandidate, UpdateError, UpdateErrorKind,
    UpdateRequest, UpdateResult, UpdateState,
};
use rollsafe_resolver::PackageResolver;
use serde::{Deserialize, Serialize};

use crate::backup::{Backup, BackupManager};
use crate::fetch::{fetch_package, FetchOptions, HttpTransport, PackageTransport};
use crate::fs_utils::{copy_dir_recursive, current_unix_timestamp};
use crate::health::{HealthProbe, HttpHealthProbe};
use crate::host::ComponentHost;
use crate::idempotency::{IdempotencyStore, DEFAULT_IDEMPOTENCY_TTL_SECS};
use crate::janitor::Janitor;
use crate::lock::{BatchLock, DEFAULT_LOCK_TTL_SECS};
use crate::preflight::{free_space_for, preflight_with_probe, DEFAULT_MIN_FREE_BYTES};
use crate::swap::{FsSwapExecutor, SwapExecutor};
use crate::unpack::unpack;
use crate::workspace::Workspace;
use crate::HostLayout;

const MIN_REQUEST_TIMEOUT_SECS: u64 = 5;

static BATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What happens to a backup once its update succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupRetention {
    #[default]
    Keep,
    DeleteOnSuccess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    pub fetch: FetchOptions,
    pub health_target: Option<String>,
    pub health_timeout: Duration,
    pub lock_ttl_secs: u64,
    pub idempotency_ttl_secs: u64,
    pub min_free_bytes: u64,
    pub retention: BackupRetention,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            fetch: FetchOptions::default(),
            health_target: None,
            health_timeout: Duration::from_secs(10),
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            idempotency_ttl_secs: DEFAULT_IDEMPOTENCY_TTL_SECS,
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            retention: BackupRetention::Keep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    BatchStarted {
        components: Vec<String>,
        dry_run: bool,
    },
    StateChanged {
        component_id: String,
        state: UpdateState,
    },
    ComponentFinished {
        result: UpdateResult,
    },
}

type FreeSpaceProbe = Box<dyn Fn(&Path) -> Option<u64> + Send + Sync>;

/// Runs update batches: one component at a time, each through
/// download, unpack, stage, backup, swap, health check and reactivation,
/// restoring the backup when anything after the swap goes wrong.
pub struct Orchestrator {
    layout: HostLayout,
    host: Box<dyn ComponentHost>,
    resolver: PackageResolver,
    transport: Box<dyn PackageTransport>,
    swapper: Box<dyn SwapExecutor>,
    probe: Box<dyn HealthProbe>,
    free_space: FreeSpaceProbe,
    options: UpdateOptions,
}

impl Orchestrator {
    pub fn new(
        layout: HostLayout,
        host: Box<dyn ComponentHost>,
        resolver: PackageResolver,
        options: UpdateOptions,
    ) -> Self {
        Self {
            layout,
            host,
            resolver,
            transport: Box::new(HttpTransport::default()),
            swapper: Box::new(FsSwapExecutor),
            probe: Box::new(HttpHealthProbe),
            free_space: Box::new(free_space_for),
            options,
        }
    }

    pub fn with_transport(mut self, transport: Box<dyn PackageTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_swap_executor(mut self, swapper: Box<dyn SwapExecutor>) -> Self {
        self.swapper = swapper;
        self
    }

    pub fn with_health_probe(mut self, probe: Box<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_free_space_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn(&Path) -> Option<u64> + Send + Sync + 'static,
    {
        self.free_space = Box::new(probe);
        self
    }

    pub fn layout(&self) -> &HostLayout {
        &self.layout
    }

    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    pub fn run_batch(&self, request: &UpdateRequest) -> Result<BatchResponse, UpdateError> {
        self.run_batch_with_progress(request, |_| {})
    }

    pub fn run_batch_with_progress<F>(
        &self,
        request: &UpdateRequest,
        mut progress: F,
    ) -> Result<BatchResponse, UpdateError>
    where
        F: FnMut(ProgressEvent),
    {
        let ids = self.select_components(&request.components)?;
        if ids.is_empty() {
            return Err(UpdateError::NoValidComponents);
        }

        let idempotency = IdempotencyStore::new(&self.layout, self.options.idempotency_ttl_secs);
        let key = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty());
        if let Some(key) = key {
            match idempotency.lookup(key, current_unix_timestamp()?) {
                Ok(Some(cached)) => {
                    tracing::info!("replaying stored response for idempotency key");
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "idempotency lookup failed; running batch");
                }
            }
        }

        let holder = lock_holder("batch")?;
        let guard = self.batch_lock().acquire(&holder)?;
        let _span = tracing::info_span!("batch", holder = %holder, dry_run = request.dry_run).entered();

        if !request.dry_run {
            let report = self.preflight();
            if !report.ok {
                return Err(UpdateError::PreflightFailed(report.why.join("; ")));
            }
        }

        let mut installed: IndexMap<String, Option<Component>> = IndexMap::new();
        for id in &ids {
            installed.insert(id.clone(), self.lookup_component(id));
        }
        if installed.values().all(Option::is_none) {
            return Err(UpdateError::NoValidComponents);
        }

        progress(ProgressEvent::BatchStarted {
            components: ids.clone(),
            dry_run: request.dry_run,
        });

        self.refresh_resolver();
        let mut plan = IndexMap::new();
        for (id, component) in &installed {
            let entry = match component {
                Some(component) => self.resolver.plan(component),
                None => PlanEntry::not_found(id),
            };
            plan.insert(id.clone(), entry);
        }

        let mode = request.mode.unwrap_or_else(|| BatchMode::for_count(ids.len()));
        let response = if request.dry_run {
            BatchResponse {
                ok: plan.values().all(|entry| entry.ok),
                dry_run: true,
                mode,
                updated: Vec::new(),
                results: IndexMap::new(),
                plan,
            }
        } else {
            let mut results = IndexMap::new();
            let mut updated = Vec::new();
            for id in &ids {
                let result = self.update_component(id, request, &mut progress);
                tracing::info!(
                    component = %id,
                    action = %result.action,
                    ok = result.ok,
                    final_state = %result.final_state,
                    "component finished"
                );
                if result.ok && result.action == rollsafe_core::UpdateAction::Updated {
                    updated.push(id.clone());
                }
                progress(ProgressEvent::ComponentFinished {
                    result: result.clone(),
                });
                results.insert(id.clone(), result);
                self.refresh_resolver();
            }
            BatchResponse {
                ok: results.values().all(|result| result.ok),
                dry_run: false,
                mode,
                updated,
                results,
                plan,
            }
        };

        if let Some(key) = key {
            if let Err(err) = idempotency.store(key, &response, current_unix_timestamp()?) {
                tracing::warn!(error = %format!("{err:#}"), "failed to store idempotency record");
            }
        }
        drop(guard);
        Ok(response)
    }

    pub fn preflight(&self) -> PreflightReport {
        preflight_with_probe(&self.layout, self.options.min_free_bytes, &*self.free_space)
    }

    pub fn status(&self) -> anyhow::Result<Vec<ComponentStatus>> {
        let mut statuses = Vec::new();
        for component in self.host.list_components()? {
            let candidate = self.resolver.resolve(&component);
            let available_version = candidate
                .as_ref()
                .map(|candidate| candidate.target_version.clone())
                .or_else(|| self.resolver.available_version(&component.identifier));
            statuses.push(ComponentStatus {
                component_id: component.identifier,
                name: component.name,
                installed_version: component.installed_version,
                active: component.active,
                available_version,
                has_update: candidate.is_some(),
            });
        }
        Ok(statuses)
    }

    /// On-demand rescue. Holds the batch lock so it never rewrites a live
    /// directory that a running batch is swapping or restoring.
    pub fn rescue(&self, component_id: &str) -> Result<bool, UpdateError> {
        let holder = lock_holder("rescue")?;
        let _guard = self.batch_lock().acquire(&holder)?;
        Ok(Janitor::new(self.layout.clone()).rescue(component_id)?)
    }

    fn batch_lock(&self) -> BatchLock {
        BatchLock::new(self.layout.batch_lock_path(), self.options.lock_ttl_secs)
    }

    fn select_components(&self, selection: &ComponentSelection) -> Result<Vec<String>, UpdateError> {
        let ids: IndexSet<String> = match selection {
            ComponentSelection::All => self
                .host
                .list_components()?
                .into_iter()
                .map(|component| component.identifier)
                .collect(),
            ComponentSelection::Ids(raw) => raw
                .iter()
                .filter_map(|value| normalize_identifier(value))
                .collect(),
        };
        Ok(ids.into_iter().collect())
    }

    fn lookup_component(&self, component_id: &str) -> Option<Component> {
        match self.host.component(component_id) {
            Ok(component) => component,
            Err(err) => {
                tracing::warn!(component = component_id, error = %format!("{err:#}"), "failed to read component");
                None
            }
        }
    }

    fn refresh_resolver(&self) {
        if let Err(err) = self.resolver.refresh() {
            tracing::warn!(error = %format!("{err:#}"), "failed to refresh update metadata");
        }
    }

    fn update_component(
        &self,
        component_id: &str,
        request: &UpdateRequest,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> UpdateResult {
        let _span = tracing::info_span!("component", component = component_id).entered();
        let Some(component) = self.lookup_component(component_id) else {
            return UpdateResult::not_found(component_id);
        };

        let mut attempt = Attempt::new(&component, progress);
        let Some(candidate) = self.resolver.resolve(&component) else {
            attempt.advance(UpdateState::Done);
            return UpdateResult::up_to_date(component_id, &component.installed_version);
        };
        tracing::info!(
            from = %candidate.current_version,
            to = %candidate.target_version,
            source = %candidate.source,
            "update available"
        );

        attempt.advance(UpdateState::Downloading);
        let workspace = match Workspace::create(&self.layout, component_id) {
            Ok(workspace) => workspace,
            Err(err) => return attempt.fail(UpdateError::stage(err)),
        };
        if let Err(err) = fetch_package(
            self.transport.as_ref(),
            &candidate,
            workspace.download_path(),
            self.fetch_options(request),
        ) {
            return attempt.fail(err);
        }

        attempt.advance(UpdateState::Unpacking);
        let payload_root = match unpack(workspace.download_path(), workspace.unpack_dir()) {
            Ok(root) => root,
            Err(err) => return attempt.fail(err),
        };

        attempt.advance(UpdateState::Staging);
        if let Err(err) = copy_dir_recursive(&payload_root, workspace.stage_dir()) {
            return attempt.fail(UpdateError::stage(err));
        }
        attempt.note("Package staged.");

        let live_path = self.host.install_path(component_id);
        if request.deactivate_during_swap && component.active {
            match self.host.deactivate(component_id) {
                Ok(()) => attempt.deactivated = true,
                Err(err) => attempt.note(format!("Could not deactivate before swap: {err:#}")),
            }
        }

        attempt.advance(UpdateState::BackingUp);
        let backups = BackupManager::new(self.layout.backups_dir());
        let backup = match backups.snapshot(component_id, &live_path) {
            Ok(backup) => backup,
            Err(err) => {
                self.reactivate_after_abort(&mut attempt);
                return attempt.fail(UpdateError::backup(err));
            }
        };
        attempt.note(format!("Backup created at {}.", backup.path.display()));

        attempt.advance(UpdateState::Swapping);
        match self.swapper.swap(workspace.stage_dir(), &live_path) {
            Ok(method) => attempt.note(format!("Swapped in new files ({method}).")),
            Err(err) => {
                return self.roll_back(attempt, &backups, &backup, &live_path, UpdateError::swap(err));
            }
        }
        if !live_path.is_dir() {
            match Janitor::new(self.layout.clone()).rescue(component_id) {
                Ok(true) => attempt.note("Live directory was missing after swap; rescued."),
                Ok(false) => {
                    let err = UpdateError::Swap("live directory missing after swap".to_string());
                    return self.roll_back(attempt, &backups, &backup, &live_path, err);
                }
                Err(err) => {
                    return self.roll_back(attempt, &backups, &backup, &live_path, UpdateError::swap(err));
                }
            }
        }

        attempt.advance(UpdateState::HealthChecking);
        match self.options.health_target.as_deref() {
            Some(target) if request.health_check => {
                let status = self.probe.check(target, self.options.health_timeout);
                if !status.healthy {
                    let err = UpdateError::HealthCheck(status.detail);
                    return self.roll_back(attempt, &backups, &backup, &live_path, err);
                }
                attempt.note(format!("Health check passed ({}).", status.detail));
            }
            _ => attempt.note("Health check skipped."),
        }

        attempt.advance(UpdateState::Reactivating);
        let new_version = self.installed_version_after_update(component_id, &candidate);
        let reactivation = if request.reactivate_after && (component.active || attempt.deactivated) {
            self.host.activate(component_id).err()
        } else {
            None
        };

        let mut backup_path = Some(backup.path.display().to_string());
        if self.options.retention == BackupRetention::DeleteOnSuccess && reactivation.is_none() {
            match backups.discard(&backup) {
                Ok(()) => backup_path = None,
                Err(err) => {
                    tracing::warn!(backup = %backup.path.display(), error = %format!("{err:#}"), "failed to discard backup");
                }
            }
        }

        attempt.advance(UpdateState::Done);
        let mut result = attempt.finish(UpdateState::Done, &candidate);
        result.to_version = Some(new_version);
        result.backup_path = backup_path;
        match reactivation {
            None => {
                result.ok = true;
                result.action = rollsafe_core::UpdateAction::Updated;
                result.messages.push("Update completed (transactional).".to_string());
            }
            Some(err) => {
                let err = UpdateError::reactivation(err);
                result.ok = false;
                result.action = err.action();
                result.error_kind = Some(err.kind());
                result
                    .messages
                    .push(format!("Updated but failed to reactivate: {err}"));
            }
        }
        result
    }

    fn fetch_options(&self, request: &UpdateRequest) -> FetchOptions {
        let mut options = self.options.fetch;
        if let Some(secs) = request.timeout_secs {
            options.timeout = Duration::from_secs(secs.max(MIN_REQUEST_TIMEOUT_SECS));
        }
        options
    }

    fn installed_version_after_update(&self, component_id: &str, candidate: &UpdateCandidate) -> String {
        self.lookup_component(component_id)
            .map(|component| component.installed_version)
            .unwrap_or_else(|| candidate.target_version.clone())
    }

    fn reactivate_after_abort(&self, attempt: &mut Attempt<'_>) {
        if !attempt.deactivated {
            return;
        }
        if let Err(err) = self.host.activate(&attempt.component_id) {
            attempt.note(format!("Could not reactivate previous version: {err:#}"));
        }
    }

    fn roll_back(
        &self,
        mut attempt: Attempt<'_>,
        backups: &BackupManager,
        backup: &Backup,
        live_path: &Path,
        cause: UpdateError,
    ) -> UpdateResult {
        debug_assert!(
            attempt.state.requires_rollback(),
            "nothing to roll back in {}",
            attempt.state
        );
        tracing::warn!(error = %cause, "rolling back");
        attempt.note(cause.to_string());

        match backups.restore(backup, live_path) {
            Ok(()) => {
                self.reactivate_after_abort(&mut attempt);
                attempt.note("Restored previous version.");
                attempt.advance(UpdateState::RolledBack);
                let mut result = attempt.failed_result(UpdateState::RolledBack, &cause);
                result.backup_path = Some(backup.path.display().to_string());
                result
            }
            Err(err) => {
                tracing::error!(
                    backup = %backup.path.display(),
                    error = %format!("{err:#}"),
                    "restore failed; manual intervention required"
                );
                let restore_err = UpdateError::restore(err);
                attempt.note(format!(
                    "{restore_err}. Backup kept at {}.",
                    backup.path.display()
                ));
                attempt.advance(UpdateState::Failed);
                let mut result = attempt.failed_result(UpdateState::Failed, &cause);
                result.error_kind = Some(UpdateErrorKind::RestoreFailed);
                result.backup_path = Some(backup.path.display().to_string());
                result.requires_intervention = true;
                result
            }
        }
    }
}

/// Bookkeeping for one component's pass through the pipeline.
fn lock_holder(kind: &str) -> anyhow::Result<String> {
    Ok(format!(
        "{kind}-{}-{}-{}",
        std::process::id(),
        current_unix_timestamp()?,
        BATCH_COUNTER.fetch_add(1, Ordering::SeqCst)
    ))
}

struct Attempt<'a> {
    component_id: String,
    from_version: String,
    state: UpdateState,
    messages: Vec<String>,
    deactivated: bool,
    progress: &'a mut dyn FnMut(ProgressEvent),
}

impl<'a> Attempt<'a> {
    fn new(component: &Component, progress: &'a mut dyn FnMut(ProgressEvent)) -> Self {
        progress(ProgressEvent::StateChanged {
            component_id: component.identifier.clone(),
            state: UpdateState::Planned,
        });
        Self {
            component_id: component.identifier.clone(),
            from_version: component.installed_version.clone(),
            state: UpdateState::Planned,
            messages: Vec::new(),
            deactivated: false,
            progress,
        }
    }

    fn advance(&mut self, next: UpdateState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        tracing::info!(from = %self.state, to = %next, "state transition");
        self.state = next;
        (self.progress)(ProgressEvent::StateChanged {
            component_id: self.component_id.clone(),
            state: next,
        });
    }

    fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Failure before the live directory was touched.
    fn fail(mut self, err: UpdateError) -> UpdateResult {
        debug_assert!(
            !self.state.requires_rollback(),
            "failure in {} must roll back",
            self.state
        );
        tracing::warn!(error = %err, state = %self.state, "update attempt failed");
        self.messages.push(err.to_string());
        self.advance(UpdateState::Failed);
        UpdateResult::failed(&self.component_id, &self.from_version, &err, self.messages)
    }

    fn failed_result(self, final_state: UpdateState, cause: &UpdateError) -> UpdateResult {
        let mut result =
            UpdateResult::failed(&self.component_id, &self.from_version, cause, self.messages);
        result.final_state = final_state;
        result
    }

    fn finish(self, final_state: UpdateState, candidate: &UpdateCandidate) -> UpdateResult {
        UpdateResult {
            component_id: self.component_id,
            ok: true,
            action: rollsafe_core::UpdateAction::Updated,
            from_version: Some(self.from_version),
            to_version: Some(candidate.target_version.clone()),
            messages: self.messages,
            final_state,
            error_kind: None,
            backup_path: None,
            requires_intervention: false,
        }
    }
}
