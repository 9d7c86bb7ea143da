//! Reconciliation of the manifest, lockfile, registries and sinks.
//!
//! [`InstallEngine::install_all`] is the single entry point; every other operation mutates the
//! in-memory manifest (or the set of entries to re-resolve) and then delegates to it.
//!
//! For each manifest entry the engine:
//! 1. Opens the entry's registry through the [`RegistryAdapter`].
//! 2. Adopts the lockfile's pinned version when the declared constraint still admits it,
//!    otherwise lists the registry's versions and picks the best match.
//! 3. Fetches the package (cache first), checks its integrity against the lockfile.
//! 4. Compiles YAML resources for each sink's tool and deploys the result.
//!
//! Entries are processed in parallel, bounded by [`EngineConfig::parallelism`]. Afterwards the
//! lockfile is rewritten with the resolved versions and pruned of entries the manifest no
//! longer references.

mod retry;
pub mod types;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use types::*;

use retry::with_retry;

use crate::compile::{Tool, compile_resource};
use crate::lockfile::{JsonLockStore, LockStore, Lockfile};
use crate::manifest::{
  JsonManifestStore, Manifest, ManifestError, ManifestSinks, ManifestStore, PackageEntry, SinkConfigStore,
};
use crate::registry::{Registry, RegistryAdapter, RegistryConfig, RegistryError};
use crate::resource::{ResourceParser, ResourceType, YamlResourceParser, is_resource_file};
use crate::sink::{Deployment, Sink, SinkDeployer};
use crate::store::PackageRequest;
use crate::types::{PackageFile, PackageId};
use crate::version::{Constraint, Version, admits, best_match, parse_constraint, parse_version};

/// State shared by every package task of one run.
struct RunContext {
  lockfile: Lockfile,
  registries: BTreeMap<String, RegistryConfig>,
  sinks: Arc<dyn SinkConfigStore>,
}

#[derive(Clone)]
pub struct InstallEngine {
  config: EngineConfig,
  adapter: RegistryAdapter,
  manifests: Arc<dyn ManifestStore>,
  locks: Arc<dyn LockStore>,
  sink_base: PathBuf,
  sink_store: Option<Arc<dyn SinkConfigStore>>,
  parser: Arc<dyn ResourceParser>,
}

impl InstallEngine {
  /// Create an engine. Relative sink directories resolve against `sink_base`.
  pub fn new(
    config: EngineConfig,
    adapter: RegistryAdapter,
    manifests: Arc<dyn ManifestStore>,
    locks: Arc<dyn LockStore>,
    sink_base: impl Into<PathBuf>,
  ) -> Self {
    Self {
      config,
      adapter,
      manifests,
      locks,
      sink_base: sink_base.into(),
      sink_store: None,
      parser: Arc::new(YamlResourceParser),
    }
  }

  /// Engine over `arm.json` at `manifest_path`, with `arm-lock.json` beside it.
  pub fn for_manifest(config: EngineConfig, adapter: RegistryAdapter, manifest_path: impl Into<PathBuf>) -> Self {
    let manifests = JsonManifestStore::new(manifest_path);
    let locks = JsonLockStore::new(manifests.lockfile_path());
    let base = manifests.base_dir();
    Self::new(config, adapter, Arc::new(manifests), Arc::new(locks), base)
  }

  /// Resolve sinks through `store` instead of the manifest's `sinks` table.
  pub fn with_sink_store(mut self, store: Arc<dyn SinkConfigStore>) -> Self {
    self.sink_store = Some(store);
    self
  }

  pub fn with_parser(mut self, parser: Arc<dyn ResourceParser>) -> Self {
    self.parser = parser;
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn adapter(&self) -> &RegistryAdapter {
    &self.adapter
  }

  fn sinks_for(&self, manifest: &Manifest) -> Arc<dyn SinkConfigStore> {
    match &self.sink_store {
      Some(store) => store.clone(),
      None => Arc::new(ManifestSinks::new(manifest, self.sink_base.clone())),
    }
  }

  fn deployer(&self, sink: Sink) -> SinkDeployer {
    SinkDeployer::new(sink).with_lock_timeout(self.config.lock_timeout)
  }

  /// Install every manifest entry, honouring lockfile pins.
  pub async fn install_all(&self, cancel: &CancellationToken) -> Result<InstallReport, InstallError> {
    let manifest = self.manifests.load()?;
    self.reconcile(cancel, &manifest, &BTreeSet::new()).await
  }

  /// Add or replace a manifest entry and install. The manifest is saved only when the package
  /// installed successfully.
  pub async fn install(
    &self,
    cancel: &CancellationToken,
    id: &PackageId,
    entry: PackageEntry,
  ) -> Result<InstallReport, InstallError> {
    let mut manifest = self.manifests.load()?;
    manifest.insert(id, entry);
    manifest.validate().map_err(ManifestError::Invalid)?;

    let report = self.reconcile(cancel, &manifest, &BTreeSet::new()).await?;
    if report.installed(id).is_some() {
      self.manifests.save(&manifest)?;
    }
    Ok(report)
  }

  /// Re-resolve `ids` (all entries when empty) within their declared constraints, ignoring pins.
  pub async fn update(&self, cancel: &CancellationToken, ids: &[PackageId]) -> Result<InstallReport, InstallError> {
    let manifest = self.manifests.load()?;
    let refresh = refresh_set(&manifest, ids)?;
    self.reconcile(cancel, &manifest, &refresh).await
  }

  /// Like [`update`](Self::update), then raise each upgraded entry's constraint floor to the
  /// version it resolved to (`^1.0.0` becomes `^1.3.0`). Exact and `latest` constraints are kept.
  pub async fn upgrade(&self, cancel: &CancellationToken, ids: &[PackageId]) -> Result<InstallReport, InstallError> {
    let mut manifest = self.manifests.load()?;
    let refresh = refresh_set(&manifest, ids)?;
    let report = self.reconcile(cancel, &manifest, &refresh).await?;

    let mut changed = false;
    for installed in &report.installed {
      if !refresh.contains(&installed.id) {
        continue;
      }
      let Some(entry) = manifest.get_mut(&installed.id) else {
        continue;
      };
      let raised = match parse_constraint(&entry.version, self.config.constraint_mode) {
        Ok(Constraint::Major(_)) => format!("^{}", installed.version),
        Ok(Constraint::Minor(_)) => format!("~{}", installed.version),
        _ => continue,
      };
      if parse_version(&installed.version).is_semantic() && raised != entry.version {
        info!(package = %installed.id, from = %entry.version, to = %raised, "raised constraint");
        entry.version = raised;
        changed = true;
      }
    }
    if changed {
      self.manifests.save(&manifest)?;
    }
    Ok(report)
  }

  /// Remove a package from its sinks, the manifest and the lockfile.
  ///
  /// Returns the sinks that held files of the package.
  pub async fn uninstall(&self, cancel: &CancellationToken, id: &PackageId) -> Result<Vec<String>, InstallError> {
    let mut manifest = self.manifests.load()?;
    let entry = manifest
      .get(id)
      .cloned()
      .ok_or_else(|| InstallError::NotInstalled(id.clone()))?;
    let sinks = self.sinks_for(&manifest);

    let mut removed_from = Vec::new();
    for name in &entry.sinks {
      let deployer = self.deployer(sinks.resolve(name)?);
      let cancel = cancel.clone();
      let package = id.clone();
      let removed = tokio::task::spawn_blocking(move || deployer.uninstall(&cancel, &package))
        .await?
        .map_err(|source| InstallError::Sink {
          sink: name.clone(),
          source,
        })?;
      if removed {
        removed_from.push(name.clone());
      }
    }

    manifest.remove(id);
    self.manifests.save(&manifest)?;

    let mut lockfile = self.locks.load()?;
    let dropped = lockfile.remove_package(id);
    self.locks.save(&lockfile)?;

    info!(package = %id, sinks = removed_from.len(), lock_entries = dropped, "uninstalled package");
    Ok(removed_from)
  }

  /// Entries whose locked version trails the best version their registry offers.
  pub async fn outdated(&self, cancel: &CancellationToken) -> Result<Vec<OutdatedPackage>, InstallError> {
    let manifest = self.manifests.load()?;
    let lockfile = self.locks.load()?;

    let mut outdated = Vec::new();
    for (id, entry) in manifest.entries() {
      let config = manifest
        .registries
        .get(&id.registry)
        .ok_or_else(|| InstallError::UnknownRegistry(id.registry.clone()))?;
      let constraint = self.parse_constraint(&id, entry)?;
      let registry = self.open_registry(cancel, &id, config).await?;
      let versions = self.list_versions(cancel, &id, &registry, &entry.request(&id.package)).await?;

      let wanted = select(&id, &versions, &constraint)?;
      let latest = select(&id, &versions, &Constraint::Latest(None))?;
      let current = locked_version(&lockfile, &id, &Constraint::Latest(None)).map(|v| v.canonical());

      let wanted = wanted.canonical();
      let latest = latest.canonical();
      if current.as_deref() != Some(wanted.as_str()) || wanted != latest {
        outdated.push(OutdatedPackage {
          id,
          constraint: entry.version.clone(),
          current,
          wanted,
          latest,
        });
      }
    }
    Ok(outdated)
  }

  /// Manifest entries with their locked versions. Touches neither registries nor sinks.
  pub fn list(&self) -> Result<Vec<ListedPackage>, InstallError> {
    let manifest = self.manifests.load()?;
    let lockfile = self.locks.load()?;

    Ok(
      manifest
        .entries()
        .into_iter()
        .map(|(id, entry)| {
          let version = locked_version(&lockfile, &id, &Constraint::Latest(None)).map(|v| v.canonical());
          let integrity = version
            .as_deref()
            .and_then(|v| lockfile.get(&id, v))
            .map(|locked| locked.integrity.clone());
          ListedPackage {
            resource_type: entry.resource_type,
            constraint: entry.version.clone(),
            sinks: entry.sinks.clone(),
            id,
            version,
            integrity,
          }
        })
        .collect(),
    )
  }

  /// Remove unreferenced files from every declared sink.
  pub async fn clean_sinks(&self, cancel: &CancellationToken) -> Result<Vec<CleanedSink>, InstallError> {
    let manifest = self.manifests.load()?;
    let sinks = self.sinks_for(&manifest);

    let mut cleaned = Vec::new();
    for name in manifest.sinks.keys() {
      let deployer = self.deployer(sinks.resolve(name)?);
      let cancel = cancel.clone();
      let removed = tokio::task::spawn_blocking(move || deployer.clean(&cancel))
        .await?
        .map_err(|source| InstallError::Sink {
          sink: name.clone(),
          source,
        })?;
      cleaned.push(CleanedSink {
        sink: name.clone(),
        removed,
      });
    }
    Ok(cleaned)
  }

  async fn reconcile(
    &self,
    cancel: &CancellationToken,
    manifest: &Manifest,
    refresh: &BTreeSet<PackageId>,
  ) -> Result<InstallReport, InstallError> {
    let ctx = Arc::new(RunContext {
      lockfile: self.locks.load()?,
      registries: manifest.registries.clone(),
      sinks: self.sinks_for(manifest),
    });

    let cancel = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let mut join_set = JoinSet::new();
    let mut pending = BTreeSet::new();

    for (id, entry) in manifest.entries() {
      pending.insert(id.clone());
      let engine = self.clone();
      let ctx = ctx.clone();
      let cancel = cancel.clone();
      let semaphore = semaphore.clone();
      let entry = entry.clone();
      let refresh = refresh.contains(&id);

      join_set.spawn(async move {
        let result = match semaphore.acquire_owned().await {
          Ok(_permit) => engine.install_one(&cancel, &ctx, &id, &entry, refresh).await,
          Err(_) => Err(InstallError::Cancelled),
        };
        (id, result)
      });
    }

    let mut report = InstallReport::default();
    let mut aborted = false;
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((id, Ok(installed))) => {
          pending.remove(&id);
          report.installed.push(installed);
        }
        Ok((_, Err(e))) if aborted && e.kind() == ErrorKind::Cancelled => {}
        Ok((id, Err(e))) => {
          error!(package = %id, kind = %e.kind(), error = %e, "package failed");
          pending.remove(&id);
          report.failed.push(PackageFailure { id, error: e });
          if self.config.fail_fast && !aborted {
            warn!("aborting remaining packages");
            aborted = true;
            cancel.cancel();
            join_set.abort_all();
          }
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!(error = %e, "install task panicked"),
      }
    }
    report.skipped = pending.into_iter().collect();
    report.installed.sort_by(|a, b| a.id.cmp(&b.id));
    report.failed.sort_by(|a, b| a.id.cmp(&b.id));

    let mut lockfile = ctx.lockfile.clone();
    for installed in &report.installed {
      lockfile.remove_package(&installed.id);
      lockfile.insert(&installed.id, &installed.version, installed.integrity.clone());
    }
    report.pruned = lockfile.retain(|id, _| manifest.get(id).is_some());
    for key in &report.pruned {
      debug!(key = %key, "pruned lockfile entry");
    }
    self.locks.save(&lockfile)?;

    info!(
      installed = report.installed.len(),
      failed = report.failed.len(),
      skipped = report.skipped.len(),
      "reconcile complete"
    );
    Ok(report)
  }

  async fn install_one(
    &self,
    cancel: &CancellationToken,
    ctx: &RunContext,
    id: &PackageId,
    entry: &PackageEntry,
    refresh: bool,
  ) -> Result<InstalledPackage, InstallError> {
    if cancel.is_cancelled() {
      return Err(InstallError::Cancelled);
    }

    let config = ctx
      .registries
      .get(&id.registry)
      .ok_or_else(|| InstallError::UnknownRegistry(id.registry.clone()))?;
    let constraint = self.parse_constraint(id, entry)?;
    let registry = self.open_registry(cancel, id, config).await?;
    let request = entry.request(&id.package);

    let pinned = if refresh {
      None
    } else {
      locked_version(&ctx.lockfile, id, &constraint)
    };
    let version = match &pinned {
      Some(version) => {
        debug!(package = %id, version = %version, "using locked version");
        version.clone()
      }
      None => {
        let versions = self.list_versions(cancel, id, &registry, &request).await?;
        select(id, &versions, &constraint)?
      }
    };

    let package = with_retry(&self.config.retry, cancel, "fetch package", || {
      self.adapter.get_package(cancel, &registry, &request, &version)
    })
    .await
    .map_err(registry_error(id))?;

    let canonical = version.canonical();
    if let Some(locked) = ctx.lockfile.get(id, &canonical)
      && locked.integrity != package.integrity
    {
      return Err(InstallError::IntegrityMismatch {
        package: id.clone(),
        version: canonical,
        expected: locked.integrity.clone(),
        actual: package.integrity,
      });
    }

    let mut compiled: HashMap<Tool, Arc<Vec<PackageFile>>> = HashMap::new();
    let mut sinks = Vec::new();
    for name in &entry.sinks {
      let sink = ctx.sinks.resolve(name)?;
      let files = match compiled.get(&sink.tool) {
        Some(files) => files.clone(),
        None => {
          let files = Arc::new(compile_package(
            self.parser.as_ref(),
            sink.tool,
            id,
            entry.resource_type,
            &package.files,
          )?);
          compiled.insert(sink.tool, files.clone());
          files
        }
      };
      let written = self.deploy(cancel, sink, id, &canonical, entry, files).await?;
      sinks.push((name.clone(), written));
    }

    info!(
      package = %id,
      version = %canonical,
      integrity = %package.integrity,
      pinned = pinned.is_some(),
      sinks = sinks.len(),
      "installed package"
    );
    Ok(InstalledPackage {
      id: id.clone(),
      version: canonical,
      integrity: package.integrity,
      pinned: pinned.is_some(),
      sinks,
    })
  }

  fn parse_constraint(&self, id: &PackageId, entry: &PackageEntry) -> Result<Constraint, InstallError> {
    parse_constraint(&entry.version, self.config.constraint_mode).map_err(|source| InstallError::Constraint {
      package: id.clone(),
      source,
    })
  }

  async fn open_registry(
    &self,
    cancel: &CancellationToken,
    id: &PackageId,
    config: &RegistryConfig,
  ) -> Result<Registry, InstallError> {
    self
      .adapter
      .open_registry(cancel, &id.registry, config)
      .await
      .map_err(registry_error(id))
  }

  async fn list_versions(
    &self,
    cancel: &CancellationToken,
    id: &PackageId,
    registry: &Registry,
    request: &PackageRequest,
  ) -> Result<Vec<Version>, InstallError> {
    with_retry(&self.config.retry, cancel, "list versions", || {
      self.adapter.list_versions(cancel, registry, request)
    })
    .await
    .map_err(registry_error(id))
  }

  async fn deploy(
    &self,
    cancel: &CancellationToken,
    sink: Sink,
    id: &PackageId,
    version: &str,
    entry: &PackageEntry,
    files: Arc<Vec<PackageFile>>,
  ) -> Result<usize, InstallError> {
    let name = sink.name.clone();
    let deployer = self.deployer(sink);
    let cancel = cancel.clone();
    let id = id.clone();
    let version = version.to_string();
    let resource_type = entry.resource_type;
    let priority = entry.priority;

    let written = tokio::task::spawn_blocking(move || {
      deployer.install(
        &cancel,
        &Deployment {
          id: &id,
          version: &version,
          resource_type,
          priority,
          files: &files,
        },
      )
    })
    .await?
    .map_err(|source| InstallError::Sink { sink: name, source })?;
    Ok(written.len())
  }
}

fn registry_error(id: &PackageId) -> impl FnOnce(RegistryError) -> InstallError + '_ {
  move |source| InstallError::Registry {
    package: id.clone(),
    source,
  }
}

/// Entries to re-resolve: `ids`, or every entry when `ids` is empty.
fn refresh_set(manifest: &Manifest, ids: &[PackageId]) -> Result<BTreeSet<PackageId>, InstallError> {
  if ids.is_empty() {
    return Ok(manifest.entries().into_iter().map(|(id, _)| id).collect());
  }
  match ids.iter().find(|id| manifest.get(id).is_none()) {
    Some(missing) => Err(InstallError::NotInstalled(missing.clone())),
    None => Ok(ids.iter().cloned().collect()),
  }
}

/// The best locked version of `id` that `constraint` still admits.
fn locked_version(lockfile: &Lockfile, id: &PackageId, constraint: &Constraint) -> Option<Version> {
  let pins: Vec<Version> = lockfile.versions(id).iter().map(|v| parse_version(v)).collect();
  if pins.is_empty() {
    return None;
  }
  best_match(&pins, constraint).ok()
}

/// Best match for `constraint`. When every candidate is opaque and the constraint is semantic,
/// the kind mismatch is reported instead of a bare no-match.
fn select(id: &PackageId, versions: &[Version], constraint: &Constraint) -> Result<Version, InstallError> {
  best_match(versions, constraint).map_err(|source| {
    if !versions.is_empty()
      && versions.iter().all(|v| !v.is_semantic())
      && let Err(kind) = admits(constraint, &versions[0])
    {
      return InstallError::VersionKind {
        package: id.clone(),
        source: kind,
      };
    }
    InstallError::NoMatch {
      package: id.clone(),
      source,
    }
  })
}

/// Compile a package's YAML resources for `tool`. Compiled files land beside the resource they
/// came from; other files pass through unchanged.
fn compile_package(
  parser: &dyn ResourceParser,
  tool: Tool,
  id: &PackageId,
  resource_type: ResourceType,
  files: &[PackageFile],
) -> Result<Vec<PackageFile>, InstallError> {
  let namespace = id.to_string();
  let mut out = Vec::new();
  for file in files {
    if !is_resource_file(&file.path) {
      out.push(file.clone());
      continue;
    }

    let resource = parser
      .parse(&file.path, &file.content, resource_type)
      .map_err(|source| InstallError::Resource {
        package: id.clone(),
        source,
      })?;
    let compiled = compile_resource(tool, &namespace, &resource).map_err(|source| InstallError::Compile {
      package: id.clone(),
      source,
    })?;

    let dir = file.path.rsplit_once('/').map(|(dir, _)| dir);
    out.extend(compiled.into_iter().map(|c| match dir {
      Some(dir) => PackageFile::new(format!("{dir}/{}", c.path), c.content),
      None => c,
    }));
  }
  Ok(out)
}
