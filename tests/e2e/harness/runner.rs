use super::assertions::{Assertion, FindingMatch, FixMatch};
use super::clock::MockClock;
use super::history::{ChangesetSpec, HistoryBuilder, Imported};
use super::steps::{Corruption, ErrorMatch, FsckRequest, RevisionArg, ScenarioStep};
use super::workspace::TestWorkspace;
use anyhow::{anyhow, bail, Context, Result};
use graft_core::{
    encode_tree, read_manifest, CheckStatus, Config, EntryMode, FileAttr, Finding, Fix, GraftError,
    GraftRepo, MappingKind, MappingStore, NodeId, ObjectAccess, ObjectKind, RawCommit, TargetRepo,
    TreeEntry, VerifyConfig, VerifyReport, EMPTY_TREE, GIT_TREE_ENTRY,
};
use std::collections::BTreeSet;

/// Setup applied before the first step
#[derive(Clone, Debug, Default)]
pub struct RunnerSetup {
    /// Format version of a freshly created metadata store.
    pub metadata_version: Option<u32>,
    /// Configuration written before the repository is opened.
    pub config: Option<Config>,
}

/// Executes scenarios against a real graft repository
pub struct ScenarioRunner {
    workspace: TestWorkspace,
    repo: GraftRepo,
    /// Metadata handle used by imports and corruptions. Closed before fsck.
    store: Option<MappingStore>,
    history: HistoryBuilder,
    last_report: Option<VerifyReport>,
    current_step: usize,
}

impl ScenarioRunner {
    /// Create a new runner with an initialized repository
    pub fn new(setup: &RunnerSetup) -> Result<Self> {
        let workspace = TestWorkspace::empty()?;
        let mut repo = workspace.init_graft()?;
        if let Some(config) = &setup.config {
            workspace.write_config(config)?;
            repo = workspace.open_graft()?;
        }

        let clock = MockClock::new();
        let mut history = HistoryBuilder::new(clock);
        let store = match setup.metadata_version {
            Some(version) => {
                history = history.with_inline_file_metadata(version < graft_core::METADATA_VERSION);
                Some(workspace.recreate_metadata(&repo, version)?)
            }
            None => None,
        };

        Ok(Self {
            workspace,
            repo,
            store,
            history,
            last_report: None,
            current_step: 0,
        })
    }

    /// Get current step number
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Execute all steps in sequence
    pub fn execute(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.current_step = i;
            self.execute_step(step)
                .with_context(|| format!("Step {}: {:?}", i, step))?;
        }
        self.flush_store()
    }

    /// Execute a single step
    fn execute_step(&mut self, step: &ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::Import(spec) => self.handle_import(spec),
            ScenarioStep::Corrupt(corruption) => self.handle_corrupt(corruption),
            ScenarioStep::Fsck(request) => self.handle_fsck(request),
            ScenarioStep::FsckFails { request, expected } => {
                self.handle_fsck_fails(request, *expected)
            }
            ScenarioStep::Reopen => self.handle_reopen(),
            ScenarioStep::Assert { assertion } => self.handle_assertion(assertion),
        }
    }

    // ===== Metadata handle =====

    fn store(&mut self) -> Result<&mut MappingStore> {
        if self.store.is_none() {
            let store = MappingStore::open(self.repo.metadata_path())
                .context("Failed to open metadata")?;
            self.store = Some(store);
        }
        self.store
            .as_mut()
            .ok_or_else(|| anyhow!("Metadata not available"))
    }

    fn flush_store(&mut self) -> Result<()> {
        if let Some(store) = self.store.take() {
            store.close().context("Failed to commit staged metadata")?;
        }
        Ok(())
    }

    fn changeset(&self, name: &str) -> Result<Imported> {
        self.history.get(name)
    }

    fn file_node(&self, name: &str, path: &str) -> Result<NodeId> {
        self.history
            .manifest(self.repo.target(), name)?
            .node(path)
            .ok_or_else(|| anyhow!("{:?} has no file {:?}", name, path))
    }

    // ===== History =====

    fn handle_import(&mut self, spec: &ChangesetSpec) -> Result<()> {
        self.store()?;
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| anyhow!("Metadata not available"))?;
        self.history.import(self.repo.target_mut(), store, spec)?;
        Ok(())
    }

    /// Replaces the named changeset's manifest commit with an edited copy.
    ///
    /// With `in_history` the copy takes the original's place among the
    /// manifest heads. Otherwise the manifest history is left alone.
    fn rewrite_manifest_commit(
        &mut self,
        name: &str,
        in_history: bool,
        edit: impl FnOnce(&mut TargetRepo, &mut RawCommit) -> Result<()>,
    ) -> Result<()> {
        let imported = self.changeset(name)?;
        let original = self.repo.target().read_commit(imported.manifest_commit)?;
        let mut raw = original.clone();
        edit(self.repo.target_mut(), &mut raw)?;
        let commit = self
            .repo
            .target_mut()
            .write_object(ObjectKind::Commit, &raw.encode())?;

        let store = self.store()?;
        store.set_mapping(imported.manifest, commit, MappingKind::Commit);
        if in_history {
            let mut heads = store.manifest_heads()?;
            heads.remove(&imported.manifest_commit);
            heads.insert(commit);
            heads.extend(original.parents);
            store.set_manifest_heads(heads);
        }
        Ok(())
    }

    // ===== Damage =====

    fn handle_corrupt(&mut self, corruption: &Corruption) -> Result<()> {
        match corruption {
            Corruption::DropNote(name) => {
                let commit = self.changeset(name)?.commit;
                self.store()?.tombstone_note(commit);
            }
            Corruption::DropChangesetMapping(name) => {
                let changeset = self.changeset(name)?.changeset;
                self.store()?.tombstone(changeset);
            }
            Corruption::DropManifestMapping(name) => {
                let manifest = self.changeset(name)?.manifest;
                self.store()?.tombstone(manifest);
            }
            Corruption::RemapChangeset { name, to } => {
                let changeset = self.changeset(name)?.changeset;
                let commit = self.changeset(to)?.commit;
                self.store()?
                    .set_mapping(changeset, commit, MappingKind::Commit);
            }
            Corruption::AddPhantomFile(name) => {
                let commit = self.changeset(name)?.commit;
                let store = self.store()?;
                let mut data = store
                    .resolve_changeset(commit)?
                    .ok_or_else(|| anyhow!("{:?} has no note", name))?;
                data.files.push("phantom".to_string());
                store.set_note(commit, data);
            }
            Corruption::RewriteFile {
                name,
                path,
                content,
            } => {
                let file = self.file_node(name, path)?;
                let blob = self
                    .repo
                    .target_mut()
                    .write_object(ObjectKind::Blob, content)?;
                self.store()?.set_mapping(file, blob, MappingKind::Blob);
            }
            Corruption::DropFileMapping { name, path } => {
                let file = self.file_node(name, path)?;
                self.store()?.tombstone(file);
            }
            Corruption::StrayMapping => {
                let blob = self
                    .repo
                    .target_mut()
                    .write_object(ObjectKind::Blob, b"stray\n")?;
                self.store()?
                    .set_mapping(NodeId::from_bytes([0x5a; 20]), blob, MappingKind::Blob);
            }
            Corruption::StrayNote => {
                let data = graft_core::ChangesetData {
                    changeset: NodeId::from_bytes([0x6c; 20]),
                    manifest: NodeId::NULL,
                    parents: vec![],
                    author: None,
                    extra: None,
                    files: vec![],
                };
                self.store()?.set_note(NodeId::from_bytes([0x6b; 20]), data);
            }
            Corruption::StaleHead(name) => {
                let changeset = self.changeset(name)?.changeset;
                let branch = self.history.branch(name)?.to_string();
                self.store()?.add_head(changeset, &branch);
            }
            Corruption::DropHead(name) => {
                let changeset = self.changeset(name)?.changeset;
                self.store()?.remove_head(changeset);
            }
            Corruption::StaleManifestHead(name) => {
                let manifest_commit = self.changeset(name)?.manifest_commit;
                let store = self.store()?;
                let mut heads = store.manifest_heads()?;
                heads.insert(manifest_commit);
                store.set_manifest_heads(heads);
            }
            Corruption::OrphanManifestHead => {
                let orphan = RawCommit {
                    tree: EMPTY_TREE,
                    parents: vec![],
                    author: "graft <graft@localhost> 0 +0000".to_string(),
                    committer: "graft <graft@localhost> 0 +0000".to_string(),
                    message: b"orphan".to_vec(),
                };
                let commit = self
                    .repo
                    .target_mut()
                    .write_object(ObjectKind::Commit, &orphan.encode())?;
                let store = self.store()?;
                let mut heads = store.manifest_heads()?;
                heads.insert(commit);
                store.set_manifest_heads(heads);
            }
            Corruption::MislabelHead { name, branch } => {
                let changeset = self.changeset(name)?.changeset;
                self.store()?.add_head(changeset, branch);
            }
            Corruption::ReparentManifest(name) => {
                self.rewrite_manifest_commit(name, true, |_, raw| {
                    raw.parents.clear();
                    Ok(())
                })?;
            }
            Corruption::RetargetManifestTree(name) => {
                self.rewrite_manifest_commit(name, true, |target, raw| {
                    let blob = target.write_object(ObjectKind::Blob, b"elsewhere\n")?;
                    let elsewhere = target.write_object(
                        ObjectKind::Tree,
                        &encode_tree(&[TreeEntry::new(EntryMode::Regular, "elsewhere.txt", blob)]),
                    )?;
                    let mut entries = target.list_tree(raw.tree)?;
                    for entry in entries.iter_mut().filter(|e| e.name == GIT_TREE_ENTRY) {
                        entry.id = elsewhere;
                    }
                    raw.tree = target.write_object(ObjectKind::Tree, &encode_tree(&entries))?;
                    Ok(())
                })?;
            }
            Corruption::DropManifestTree(name) => {
                self.rewrite_manifest_commit(name, true, |target, raw| {
                    let entries: Vec<TreeEntry> = target
                        .list_tree(raw.tree)?
                        .into_iter()
                        .filter(|e| e.name != GIT_TREE_ENTRY)
                        .collect();
                    raw.tree = target.write_object(ObjectKind::Tree, &encode_tree(&entries))?;
                    Ok(())
                })?;
            }
            Corruption::DetachManifest(name) => {
                self.rewrite_manifest_commit(name, false, |_, raw| {
                    raw.message = b"detached".to_vec();
                    Ok(())
                })?;
            }
            Corruption::TamperManifest(name) => {
                let manifest_commit = self.changeset(name)?.manifest_commit;
                self.rewrite_manifest_commit(name, true, |target, raw| {
                    let mut manifest = read_manifest(&*target, manifest_commit)?;
                    let entry = manifest
                        .files
                        .values_mut()
                        .next()
                        .ok_or_else(|| anyhow!("Manifest has no files"))?;
                    entry.attr = FileAttr::Executable;
                    let git_tree = graft_core::manifest_git_tree(&*target, manifest_commit)?
                        .ok_or_else(|| anyhow!("Manifest has no git tree"))?;
                    raw.tree = manifest.write_tree(target, git_tree)?;
                    Ok(())
                })?;
            }
            Corruption::ConflictingNote { name, onto } => {
                let source = self.changeset(name)?.commit;
                let commit = self.changeset(onto)?.commit;
                let store = self.store()?;
                let mut data = store
                    .resolve_changeset(source)?
                    .ok_or_else(|| anyhow!("{:?} has no note", name))?;
                data.parents = vec![NodeId::from_bytes([0x11; 20])];
                store.set_note(commit, data);
            }
        }
        Ok(())
    }

    // ===== Checks =====

    fn verify_config(&self, request: &FsckRequest) -> Result<VerifyConfig> {
        let revisions = request
            .revisions
            .iter()
            .map(|arg| {
                Ok(match arg {
                    RevisionArg::Commit(name) => self.changeset(name)?.commit.as_hex(),
                    RevisionArg::Changeset(name) => self.changeset(name)?.changeset.as_hex(),
                    RevisionArg::Raw(raw) => raw.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(VerifyConfig {
            revisions,
            check_manifests: request.manifests,
            check_files: request.files,
        })
    }

    fn handle_fsck(&mut self, request: &FsckRequest) -> Result<()> {
        self.flush_store()?;
        let config = self.verify_config(request)?;
        let report = self.repo.fsck(&config)?;
        self.last_report = Some(report);
        Ok(())
    }

    fn handle_fsck_fails(&mut self, request: &FsckRequest, expected: ErrorMatch) -> Result<()> {
        self.flush_store()?;
        let config = self.verify_config(request)?;
        match self.repo.fsck(&config) {
            Ok(report) => bail!("Expected fsck to fail with {:?}, got {:?}", expected, report),
            Err(e) => {
                let matched = match expected {
                    ErrorMatch::InvalidArguments => matches!(e, GraftError::InvalidArguments(_)),
                    ErrorMatch::LegacyFormat => {
                        matches!(e, GraftError::LegacyFormatUnsupported { .. })
                    }
                    ErrorMatch::UnknownRevision => matches!(e, GraftError::UnknownRevision(_)),
                    ErrorMatch::GraphConflict => matches!(e, GraftError::GraphConflict { .. }),
                };
                if !matched {
                    bail!("Expected {:?}, got: {}", expected, e);
                }
            }
        }
        Ok(())
    }

    fn handle_reopen(&mut self) -> Result<()> {
        self.flush_store()?;
        self.repo = self.workspace.open_graft()?;
        Ok(())
    }

    // ===== Assertions =====

    fn report(&self) -> Result<&VerifyReport> {
        self.last_report
            .as_ref()
            .ok_or_else(|| anyhow!("No fsck has run yet"))
    }

    fn handle_assertion(&mut self, assertion: &Assertion) -> Result<()> {
        match assertion {
            Assertion::Status(expected) => self.assert_status(*expected),
            Assertion::NoFindings => {
                let report = self.report()?;
                if !report.findings.is_empty() {
                    bail!("Expected no findings, got {:?}", report.findings);
                }
                Ok(())
            }
            Assertion::HasFinding(kind) => {
                let report = self.report()?;
                if !report.findings.iter().any(|f| finding_matches(f, *kind)) {
                    bail!("Expected a {:?} finding, got {:?}", kind, report.findings);
                }
                Ok(())
            }
            Assertion::FindingCount(n) => {
                let report = self.report()?;
                if report.findings.len() != *n {
                    bail!("Expected {} findings, got {:?}", n, report.findings);
                }
                Ok(())
            }
            Assertion::NoFixes => {
                let report = self.report()?;
                if !report.fixes.is_empty() {
                    bail!("Expected no repairs, got {:?}", report.fixes);
                }
                Ok(())
            }
            Assertion::FixCount(n) => {
                let report = self.report()?;
                if report.fixes.len() != *n {
                    bail!("Expected {} repairs, got {:?}", n, report.fixes);
                }
                Ok(())
            }
            Assertion::HasFix(kind) => {
                let report = self.report()?;
                if !report.fixes.iter().any(|f| fix_matches(f, *kind)) {
                    bail!("Expected a {:?} repair, got {:?}", kind, report.fixes);
                }
                Ok(())
            }
            Assertion::CommitsChecked(n) => {
                self.assert_count("commits checked", self.report()?.commits_checked, *n)
            }
            Assertion::ManifestsChecked(n) => {
                self.assert_count("manifests checked", self.report()?.manifests_checked, *n)
            }
            Assertion::FilesChecked(n) => {
                self.assert_count("files checked", self.report()?.files_checked, *n)
            }
            Assertion::FilesUpgraded(n) => {
                self.assert_count("files upgraded", self.report()?.upgraded_files, *n)
            }
            Assertion::BranchHeads { branch, changesets } => {
                self.assert_branch_heads(branch, changesets)
            }
            Assertion::ManifestHeads(names) => self.assert_manifest_heads(names),
            Assertion::ChangesetMapped(name) => self.assert_mapped(name, true),
            Assertion::ChangesetUnmapped(name) => self.assert_mapped(name, false),
            Assertion::NoteAttached(name) => {
                let commit = self.changeset(name)?.commit;
                if self.store()?.resolve_changeset(commit)?.is_none() {
                    bail!("{:?} has no note", name);
                }
                Ok(())
            }
            Assertion::MetadataCurrent => {
                self.flush_store()?;
                MappingStore::open(self.repo.metadata_path())
                    .context("Metadata is not at the current format")?;
                Ok(())
            }
            Assertion::CopyMetadata { name, path } => {
                let file = self.file_node(name, path)?;
                let store = self.store()?;
                let metadata = store
                    .file_metadata(file)?
                    .ok_or_else(|| anyhow!("{:?} in {:?} has no copy metadata", path, name))?;
                if !metadata.starts_with(b"copy: ") {
                    bail!("Unexpected metadata {:?}", String::from_utf8_lossy(&metadata));
                }
                let mapped = store
                    .lookup(file)?
                    .ok_or_else(|| anyhow!("{:?} in {:?} is not mapped", path, name))?;
                let content = self.repo.target().read_object(ObjectKind::Blob, mapped.id)?;
                if content.starts_with(graft_core::METADATA_MARKER) {
                    bail!("Blob for {:?} still carries metadata", path);
                }
                Ok(())
            }
            Assertion::Custom(f) => {
                self.flush_store()?;
                f(&mut self.repo)
            }
        }
    }

    fn assert_status(&self, expected: CheckStatus) -> Result<()> {
        let report = self.report()?;
        if report.status() != expected {
            bail!(
                "Expected status {}, got {} (findings: {:?}, fixes: {:?})",
                expected,
                report.status(),
                report.findings,
                report.fixes
            );
        }
        Ok(())
    }

    fn assert_count(&self, what: &str, actual: usize, expected: usize) -> Result<()> {
        if actual != expected {
            bail!("Expected {} {}, got {}", expected, what, actual);
        }
        Ok(())
    }

    fn assert_branch_heads(&mut self, branch: &str, names: &[String]) -> Result<()> {
        let expected = names
            .iter()
            .map(|n| Ok(self.changeset(n)?.changeset))
            .collect::<Result<BTreeSet<_>>>()?;
        let actual = self
            .store()?
            .heads(&BTreeSet::from([branch.to_string()]))?;
        if actual != expected {
            bail!("Expected heads {:?} on {}, got {:?}", names, branch, actual);
        }
        Ok(())
    }

    fn assert_manifest_heads(&mut self, names: &[String]) -> Result<()> {
        let expected = names
            .iter()
            .map(|n| Ok(self.changeset(n)?.manifest_commit))
            .collect::<Result<BTreeSet<_>>>()?;
        let actual = self.store()?.manifest_heads()?;
        if actual != expected {
            bail!("Expected manifest heads of {:?}, got {:?}", names, actual);
        }
        Ok(())
    }

    fn assert_mapped(&mut self, name: &str, mapped: bool) -> Result<()> {
        let changeset = self.changeset(name)?.changeset;
        let found = self.store()?.lookup(changeset)?.is_some();
        if found != mapped {
            bail!("Expected {:?} mapped: {}, got {}", name, mapped, found);
        }
        Ok(())
    }
}

fn finding_matches(finding: &Finding, kind: FindingMatch) -> bool {
    matches!(
        (finding, kind),
        (Finding::MissingNote { .. }, FindingMatch::MissingNote)
            | (Finding::CommitterMismatch { .. }, FindingMatch::CommitterMismatch)
            | (Finding::ChangesetMappingMismatch { .. }, FindingMatch::ChangesetMappingMismatch)
            | (Finding::ChangesetHashMismatch { .. }, FindingMatch::ChangesetHashMismatch)
            | (Finding::MissingManifestMapping { .. }, FindingMatch::MissingManifestMapping)
            | (Finding::MissingManifestCommit { .. }, FindingMatch::MissingManifestCommit)
            | (Finding::ManifestHashMismatch { .. }, FindingMatch::ManifestHashMismatch)
            | (Finding::ManifestParentMismatch { .. }, FindingMatch::ManifestParentMismatch)
            | (Finding::MissingManifestTree { .. }, FindingMatch::MissingManifestTree)
            | (Finding::TreeMismatch { .. }, FindingMatch::TreeMismatch)
            | (Finding::MissingFileMapping { .. }, FindingMatch::MissingFileMapping)
            | (Finding::FileHashMismatch { .. }, FindingMatch::FileHashMismatch)
    )
}

fn fix_matches(fix: &Fix, kind: FixMatch) -> bool {
    matches!(
        (fix, kind),
        (Fix::RemovedManifestCommit { .. }, FixMatch::RemovedManifestCommit)
            | (Fix::RemovedManifestHeadReference { .. }, FixMatch::RemovedManifestHeadReference)
            | (Fix::ReplacedManifestHeads { .. }, FixMatch::ReplacedManifestHeads)
            | (Fix::RemovedDanglingMapping { .. }, FixMatch::RemovedDanglingMapping)
            | (Fix::RemovedDanglingNote { .. }, FixMatch::RemovedDanglingNote)
            | (Fix::AddedHead { .. }, FixMatch::AddedHead)
            | (Fix::RemovedHead { .. }, FixMatch::RemovedHead)
    )
}
