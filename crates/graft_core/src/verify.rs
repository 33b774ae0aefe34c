//! Bridge consistency checking and repair.
//!
//! Walks target commits, resolves each to its source changeset and
//! cross-checks changeset, manifest and file hashes against the mapping.
//! Integrity problems are reported, never repaired. Stale bookkeeping
//! (heads, dangling entries) is repaired through the mapping store when the
//! walk covered everything and nothing is broken.

use crate::access::{CommitQuery, ObjectAccess};
use crate::dag::Dag;
use crate::error::{GraftError, Result};
use crate::manifest::{manifest_changes, manifest_git_tree, read_manifest, Manifest};
use crate::mapping::{MappingKind, MappingStore};
use crate::node_id::NodeId;
use crate::objects::{ObjectKind, RawCommit, EMPTY_TREE};
use crate::revision::{
    changeset_text, file_text, source_hash, split_file_metadata, AuthorInfo, ChangesetData,
    HG_EMPTY_FILE,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Label used for every node of the manifest graph.
const MANIFEST_LABEL: &str = "";

/// Progress callback: phase name and number of items done so far.
pub type VerifyProgressCallback<'a> = &'a dyn Fn(&str, usize);

/// Configuration for a consistency check.
#[derive(Debug, Clone, Default)]
pub struct VerifyConfig {
    /// Commits, changesets or ref names to check. Empty checks everything.
    pub revisions: Vec<String>,

    /// Rebuild manifests and verify their hashes.
    pub check_manifests: bool,

    /// Verify the hash of every changed file.
    pub check_files: bool,
}

impl VerifyConfig {
    fn scoped(&self) -> bool {
        !self.revisions.is_empty()
    }
}

/// Outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Nothing to report.
    Clean,
    /// Only repairable problems were found, and were repaired.
    Fixed,
    /// Integrity problems were found.
    Broken,
}

impl CheckStatus {
    /// Process exit code: 0 clean, 2 fixed, 1 broken.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::Fixed => 2,
            Self::Broken => 1,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "clean",
            Self::Fixed => "fixed",
            Self::Broken => "broken",
        })
    }
}

/// A problem found during a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// A walked commit carries no changeset metadata.
    MissingNote { commit: NodeId },
    /// Committer recorded in the changeset extra matches nothing in the commit.
    CommitterMismatch { changeset: NodeId, commit: NodeId },
    /// Committer recorded in the changeset extra could have been derived.
    UselessCommitterMetadata { changeset: NodeId },
    /// Empty extra recorded although the commit doesn't need one.
    UselessEmptyExtra { changeset: NodeId },
    /// The changeset maps to another commit, or to nothing.
    ChangesetMappingMismatch {
        changeset: NodeId,
        commit: NodeId,
        mapped: Option<NodeId>,
    },
    /// The rebuilt changeset hashes to another node.
    ChangesetHashMismatch { changeset: NodeId, computed: NodeId },
    /// The changeset's manifest has no mapping.
    MissingManifestMapping { manifest: NodeId },
    /// The manifest commit isn't reachable from the stored manifest heads.
    MissingManifestCommit { manifest: NodeId, commit: NodeId },
    /// The rebuilt manifest hashes to another node.
    ManifestHashMismatch { manifest: NodeId, computed: NodeId },
    /// The manifest commit's parents don't match the changeset's parent manifests.
    ManifestParentMismatch {
        manifest: NodeId,
        commit: NodeId,
        recorded: Vec<NodeId>,
        computed: Vec<NodeId>,
    },
    /// A manifest commit has no `git` entry and isn't empty.
    MissingManifestTree { commit: NodeId },
    /// The manifest commit's `git` tree differs from the changeset commit tree.
    TreeMismatch { manifest_commit: NodeId, commit: NodeId },
    /// A file revision has no blob mapping.
    MissingFileMapping { file: NodeId, path: String },
    /// The file content hashes to another node.
    FileHashMismatch { file: NodeId, manifest_commit: NodeId },
}

impl Finding {
    /// Returns true for findings that make the bridge broken.
    pub fn is_integrity(&self) -> bool {
        !matches!(
            self,
            Self::UselessCommitterMetadata { .. } | Self::UselessEmptyExtra { .. }
        )
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingNote { commit } => write!(f, "missing note for commit {}", commit),
            Self::CommitterMismatch { changeset, commit } => write!(
                f,
                "committer mismatch between commit {} and metadata for changeset {}",
                commit, changeset
            ),
            Self::UselessCommitterMetadata { changeset } => {
                write!(f, "useless committer metadata for changeset {}", changeset)
            }
            Self::UselessEmptyExtra { changeset } => {
                write!(f, "useless empty extra metadata for changeset {}", changeset)
            }
            Self::ChangesetMappingMismatch {
                changeset,
                commit,
                mapped: Some(mapped),
            } => write!(
                f,
                "commit mismatch for changeset {}: mapped to {}, found in {}",
                changeset, mapped, commit
            ),
            Self::ChangesetMappingMismatch {
                changeset,
                mapped: None,
                ..
            } => write!(f, "missing mapping for changeset {}", changeset),
            Self::ChangesetHashMismatch { changeset, computed } => {
                write!(f, "sha1 mismatch for changeset {} (computed {})", changeset, computed)
            }
            Self::MissingManifestMapping { manifest } => {
                write!(f, "missing mapping for manifest {}", manifest)
            }
            Self::MissingManifestCommit { manifest, commit } => write!(
                f,
                "manifest commit {} for manifest {} is not in the manifest history",
                commit, manifest
            ),
            Self::ManifestHashMismatch { manifest, computed } => {
                write!(f, "sha1 mismatch for manifest {} (computed {})", manifest, computed)
            }
            Self::ManifestParentMismatch {
                manifest,
                commit,
                recorded,
                computed,
            } => write!(
                f,
                "parent mismatch for manifest {} in commit {}: recorded [{}], expected [{}]",
                manifest,
                commit,
                join_ids(recorded),
                join_ids(computed)
            ),
            Self::MissingManifestTree { commit } => {
                write!(f, "missing git tree in manifest commit {}", commit)
            }
            Self::TreeMismatch {
                manifest_commit,
                commit,
            } => write!(
                f,
                "tree mismatch between manifest commit {} and commit {}",
                manifest_commit, commit
            ),
            Self::MissingFileMapping { file, path } => {
                write!(f, "missing mapping for file {} ({})", file, path)
            }
            Self::FileHashMismatch {
                file,
                manifest_commit,
            } => write!(
                f,
                "sha1 mismatch for file {} in manifest commit {}",
                file, manifest_commit
            ),
        }
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter().map(NodeId::as_hex).collect::<Vec<_>>().join(", ")
}

/// A repair applied during a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fix {
    /// A manifest commit no changeset refers to was dropped from the manifest history.
    RemovedManifestCommit { commit: NodeId },
    /// A stored manifest head that isn't a head anymore was dropped.
    RemovedManifestHeadReference { commit: NodeId },
    /// The stored manifest heads were replaced by the computed ones.
    ReplacedManifestHeads { heads: Vec<NodeId> },
    /// A mapping entry nothing refers to was removed.
    RemovedDanglingMapping { source: NodeId },
    /// A note on a commit outside the history was removed.
    RemovedDanglingNote { commit: NodeId },
    /// A computed head was missing from the stored heads.
    AddedHead { changeset: NodeId, branch: String },
    /// A stored head isn't a head.
    RemovedHead { changeset: NodeId, branch: String },
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemovedManifestCommit { commit } => write!(
                f,
                "removing metadata commit {} with no corresponding changeset",
                commit
            ),
            Self::RemovedManifestHeadReference { commit } => write!(
                f,
                "removing non-head reference to {} in manifests metadata",
                commit
            ),
            Self::ReplacedManifestHeads { heads } => {
                write!(f, "replacing manifest heads with [{}]", join_ids(heads))
            }
            Self::RemovedDanglingMapping { source } => {
                write!(f, "removing dangling metadata for {}", source)
            }
            Self::RemovedDanglingNote { commit } => {
                write!(f, "removing dangling note for commit {}", commit)
            }
            Self::AddedHead { changeset, branch } => {
                write!(f, "adding missing head {} in branch {}", changeset, branch)
            }
            Self::RemovedHead { changeset, branch } => write!(
                f,
                "removing non-head reference to {} in branch {}",
                changeset, branch
            ),
        }
    }
}

/// Report from a consistency check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Target commits walked.
    pub commits_checked: usize,

    /// Distinct changesets seen.
    pub changesets_checked: usize,

    /// Distinct manifests seen.
    pub manifests_checked: usize,

    /// Distinct file revisions verified.
    pub files_checked: usize,

    /// File revisions whose copy metadata was moved out of their blob.
    pub upgraded_files: usize,

    /// Problems, in the order they were found.
    pub findings: Vec<Finding>,

    /// Repairs, in the order they were applied.
    pub fixes: Vec<Fix>,
}

impl VerifyReport {
    /// Terminal status of the check.
    pub fn status(&self) -> CheckStatus {
        if self.findings.iter().any(Finding::is_integrity) {
            CheckStatus::Broken
        } else if !self.fixes.is_empty() {
            CheckStatus::Fixed
        } else {
            CheckStatus::Clean
        }
    }

    /// Returns a summary message.
    pub fn summary(&self) -> String {
        match self.status() {
            CheckStatus::Clean => "Bridge metadata is consistent. No issues found.".to_string(),
            CheckStatus::Fixed => format!(
                "Repaired {} metadata issue{}.",
                self.fixes.len(),
                if self.fixes.len() == 1 { "" } else { "s" }
            ),
            CheckStatus::Broken => {
                let broken = self.findings.iter().filter(|f| f.is_integrity()).count();
                format!(
                    "Bridge metadata is corrupted: {} integrity problem{}.\n\
                     Re-create the bridge from scratch to reset it. This may change\n\
                     target commit ids. Please report any corruption detected after that.",
                    broken,
                    if broken == 1 { "" } else { "s" }
                )
            }
        }
    }

    /// Serializes the report, including its status, as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Json<'a> {
            status: CheckStatus,
            #[serde(flatten)]
            report: &'a VerifyReport,
        }
        serde_json::to_string_pretty(&Json {
            status: self.status(),
            report: self,
        })
        .map_err(|e| GraftError::Serialization(e.to_string()))
    }
}

/// Checks bridge consistency and applies repairs to `store`.
///
/// Repairs are staged in `store`; they reach disk when the caller closes it.
///
/// # Errors
///
/// Fails on unresolvable revisions and on accessor or store errors.
/// Integrity problems are reported in the returned report instead.
pub fn verify<A: ObjectAccess + ?Sized>(
    store: &mut MappingStore,
    access: &A,
    config: &VerifyConfig,
    progress: Option<VerifyProgressCallback<'_>>,
) -> Result<VerifyReport> {
    let mut checker = Checker::new(store, access, config);
    let commits = if config.scoped() {
        checker.resolve_revisions()?
    } else {
        checker.load_full_history()?
    };

    checker.walk(commits, progress)?;
    checker.finish()
}

/// Moves copy metadata out of file blobs into the metadata store.
///
/// Returns the number of files rewritten.
pub fn upgrade_files_metadata<A: ObjectAccess + ?Sized>(
    store: &mut MappingStore,
    access: &mut A,
    progress: Option<VerifyProgressCallback<'_>>,
) -> Result<usize> {
    let blobs: Vec<_> = store
        .mapping_entries()?
        .into_iter()
        .filter(|(_, target)| target.kind == MappingKind::Blob)
        .collect();
    debug!(files = blobs.len(), "upgrading files metadata");

    let mut upgraded = 0;
    for (i, (file, target)) in blobs.into_iter().enumerate() {
        if let Some(cb) = progress {
            cb("Upgrading files metadata", i + 1);
        }
        let content = access.read_object(ObjectKind::Blob, target.id)?;
        let Some((metadata, data)) = split_file_metadata(&content) else {
            continue;
        };
        let metadata = metadata.to_vec();
        let blob = access.write_object(ObjectKind::Blob, data)?;
        store.set_file_metadata(file, metadata);
        store.set_mapping(file, blob, MappingKind::Blob);
        upgraded += 1;
    }
    Ok(upgraded)
}

/// Opens the metadata at `metadata_path`, upgrades it if needed, checks it
/// and commits repairs.
pub fn run_fsck<A: ObjectAccess + ?Sized>(
    metadata_path: &Path,
    access: &mut A,
    config: &VerifyConfig,
    progress: Option<VerifyProgressCallback<'_>>,
) -> Result<VerifyReport> {
    let mut config = config.clone();
    let mut upgraded_files = 0;

    let mut store = match MappingStore::open(metadata_path) {
        Ok(store) => store,
        Err(GraftError::UpgradeRequired { found, expected }) => {
            let refused = if config.scoped() {
                Some("specifying revisions")
            } else if config.check_manifests {
                Some("--manifests")
            } else if config.check_files {
                Some("--files")
            } else {
                None
            };
            if let Some(what) = refused {
                return Err(GraftError::InvalidArguments(format!(
                    "metadata needs upgrade, re-run without {}",
                    what
                )));
            }

            info!(found, expected, "upgrading metadata");
            let mut store = MappingStore::open_for_upgrade(metadata_path)?;
            upgraded_files = upgrade_files_metadata(&mut store, access, progress)?;
            store.close()?;

            // File metadata moved, so file hashes need a look.
            config.check_files = true;
            MappingStore::open(metadata_path)?
        }
        Err(e) => return Err(e),
    };

    let mut report = verify(&mut store, &*access, &config, progress)?;
    report.upgraded_files = upgraded_files;
    store.close()?;
    Ok(report)
}

struct Checker<'s, 'a, A: ?Sized> {
    store: &'s mut MappingStore,
    access: &'a A,
    config: &'a VerifyConfig,
    report: VerifyReport,

    changesets: Dag,
    manifests: Dag,

    seen_changesets: HashSet<NodeId>,
    seen_manifests: HashSet<NodeId>,
    seen_files: HashSet<NodeId>,
    seen_notes: HashSet<NodeId>,

    /// Manifest commit to recorded parents. Full mode only.
    manifest_commits: HashMap<NodeId, Vec<NodeId>>,
}

impl<'s, 'a, A: ObjectAccess + ?Sized> Checker<'s, 'a, A> {
    fn new(store: &'s mut MappingStore, access: &'a A, config: &'a VerifyConfig) -> Self {
        Self {
            store,
            access,
            config,
            report: VerifyReport::default(),
            changesets: Dag::new(),
            manifests: Dag::new(),
            seen_changesets: HashSet::new(),
            seen_manifests: HashSet::new(),
            seen_files: HashSet::new(),
            seen_notes: HashSet::new(),
            manifest_commits: HashMap::new(),
        }
    }

    fn report(&mut self, finding: Finding) {
        warn!("{}", finding);
        self.report.findings.push(finding);
    }

    fn fix(&mut self, fix: Fix) {
        info!("{}", fix);
        self.report.fixes.push(fix);
    }

    fn broken(&self) -> bool {
        self.report.status() == CheckStatus::Broken
    }

    fn parse_revision(&self, revision: &str) -> Result<NodeId> {
        if let Ok(id) = NodeId::from_hex(revision) {
            return Ok(id);
        }
        self.access
            .resolve_ref(revision)?
            .ok_or_else(|| GraftError::UnknownRevision(revision.to_string()))
    }

    /// Turns the requested revisions into target commits.
    fn resolve_revisions(&mut self) -> Result<CommitQuery> {
        let mut commits: Vec<NodeId> = Vec::new();
        let mut push = |id: NodeId| {
            if !commits.contains(&id) {
                commits.push(id);
            }
        };

        for revision in &self.config.revisions {
            let mut id = self.parse_revision(revision)?;
            let data = self.store.resolve_changeset(id)?;
            if let Some(data) = &data {
                push(id);
                id = data.changeset;
            }
            match self.store.lookup(id)? {
                Some(target) if data.is_none() => push(target.id),
                Some(_) => {}
                None if data.is_none() => {
                    return Err(GraftError::UnknownRevision(revision.to_string()))
                }
                None => {}
            }
        }
        debug!(commits = commits.len(), "resolved revisions");
        Ok(CommitQuery::listed(commits))
    }

    /// Prepares a walk of everything reachable from the stored heads.
    fn load_full_history(&mut self) -> Result<CommitQuery> {
        let mut heads = Vec::new();
        for (changeset, branch) in self.store.branch_heads()? {
            match self.store.lookup(changeset)? {
                Some(target) => heads.push(target.id),
                None => debug!(%changeset, %branch, "stored head has no mapping"),
            }
        }

        let manifest_heads: Vec<NodeId> = self.store.manifest_heads()?.into_iter().collect();
        for entry in self
            .access
            .enumerate_commits(&CommitQuery::ancestors(manifest_heads, []))?
        {
            let entry = entry?;
            self.manifest_commits.insert(entry.id, entry.parents);
        }
        debug!(
            heads = heads.len(),
            manifest_commits = self.manifest_commits.len(),
            "loaded history"
        );
        Ok(CommitQuery::ancestors(heads, []))
    }

    fn walk(
        &mut self,
        query: CommitQuery,
        progress: Option<VerifyProgressCallback<'_>>,
    ) -> Result<()> {
        let access = self.access;
        for entry in access.enumerate_commits(&query)? {
            let entry = entry?;
            self.report.commits_checked += 1;
            if let Some(cb) = progress {
                cb("Checking changesets", self.report.commits_checked);
            }
            self.check_commit(entry.id, entry.tree)?;
        }
        self.report.changesets_checked = self.seen_changesets.len();
        self.report.manifests_checked = self.seen_manifests.len();
        self.report.files_checked = self.seen_files.len();
        Ok(())
    }

    fn check_commit(&mut self, commit: NodeId, tree: NodeId) -> Result<()> {
        let Some(data) = self.store.resolve_changeset(commit)? else {
            self.report(Finding::MissingNote { commit });
            return Ok(());
        };
        self.seen_notes.insert(commit);

        let changeset = data.changeset;
        let raw = self.access.read_commit(commit)?;
        if let Some(extra) = &data.extra {
            self.check_committer(changeset, commit, &raw, extra)?;
        }

        self.seen_changesets.insert(changeset);
        match self.store.lookup(changeset)? {
            None => {
                self.report(Finding::ChangesetMappingMismatch {
                    changeset,
                    commit,
                    mapped: None,
                });
                return Ok(());
            }
            Some(target) if target.id != commit => {
                self.report(Finding::ChangesetMappingMismatch {
                    changeset,
                    commit,
                    mapped: Some(target.id),
                });
            }
            Some(_) => {}
        }

        let computed = source_hash(&data.parents, &changeset_text(&raw, &data)?);
        if computed != changeset {
            self.report(Finding::ChangesetHashMismatch { changeset, computed });
        }

        self.changesets.add(changeset, &data.parents, data.branch())?;

        let manifest = data.manifest;
        if manifest.is_null() || !self.seen_manifests.insert(manifest) {
            return Ok(());
        }
        self.check_manifest(&data, commit, tree)
    }

    fn check_committer(
        &mut self,
        changeset: NodeId,
        commit: NodeId,
        raw: &RawCommit,
        extra: &BTreeMap<String, String>,
    ) -> Result<()> {
        if let Some(recorded) = extra.get("committer") {
            let info = AuthorInfo::parse(&raw.committer)?;
            let committer = info.to_string();
            if &committer != recorded && &raw.committer != recorded && &info.who != recorded {
                self.report(Finding::CommitterMismatch { changeset, commit });
            }
            if &committer == recorded {
                self.report(Finding::UselessCommitterMetadata { changeset });
            }
        }
        if extra.is_empty() && raw.committer != raw.author {
            self.report(Finding::UselessEmptyExtra { changeset });
        }
        Ok(())
    }

    fn check_manifest(&mut self, data: &ChangesetData, commit: NodeId, tree: NodeId) -> Result<()> {
        let manifest = data.manifest;
        let Some(target) = self.store.lookup(manifest)? else {
            self.report(Finding::MissingManifestMapping { manifest });
            return Ok(());
        };
        let manifest_commit = target.id;
        if !self.config.scoped() && !self.manifest_commits.contains_key(&manifest_commit) {
            self.report(Finding::MissingManifestCommit {
                manifest,
                commit: manifest_commit,
            });
        }

        let mut parent_manifests = Vec::with_capacity(2);
        for parent in &data.parents {
            let Some(parent_commit) = self.store.lookup(*parent)? else {
                continue;
            };
            let Some(parent_data) = self.store.resolve_changeset(parent_commit.id)? else {
                continue;
            };
            if !parent_data.manifest.is_null()
                && !parent_manifests.contains(&parent_data.manifest)
            {
                parent_manifests.push(parent_data.manifest);
            }
        }
        let mut git_parents = Vec::with_capacity(2);
        for parent in &parent_manifests {
            if let Some(target) = self.store.lookup(*parent)? {
                if !git_parents.contains(&target.id) {
                    git_parents.push(target.id);
                }
            }
        }

        self.manifests.add(manifest_commit, &git_parents, MANIFEST_LABEL)?;

        let mut listing: Option<Manifest> = None;
        if self.config.check_manifests {
            let current = read_manifest(self.access, manifest_commit)?;
            let computed = current.node_id(&parent_manifests);
            if computed != manifest {
                self.report(Finding::ManifestHashMismatch { manifest, computed });
            }
            listing = Some(current);
        }

        let mut recorded = match self.manifest_commits.get(&manifest_commit) {
            Some(parents) => parents.clone(),
            None if self.config.scoped() => self.access.read_commit(manifest_commit)?.parents,
            None => Vec::new(),
        };
        let mut computed = git_parents.clone();
        recorded.sort();
        computed.sort();
        if recorded != computed {
            self.report(Finding::ManifestParentMismatch {
                manifest,
                commit: manifest_commit,
                recorded,
                computed,
            });
        }

        let git_tree = match manifest_git_tree(self.access, manifest_commit)? {
            Some(id) => Some(id),
            None if self.access.read_commit(manifest_commit)?.tree == EMPTY_TREE => {
                Some(EMPTY_TREE)
            }
            None => {
                self.report(Finding::MissingManifestTree {
                    commit: manifest_commit,
                });
                None
            }
        };
        if git_tree.is_some_and(|t| t != tree) {
            self.report(Finding::TreeMismatch {
                manifest_commit,
                commit,
            });
        }

        if self.config.check_files {
            let current = match listing {
                Some(m) => m,
                None => read_manifest(self.access, manifest_commit)?,
            };
            self.check_files(manifest_commit, &current, &git_parents)?;
        }
        Ok(())
    }

    fn check_files(
        &mut self,
        manifest_commit: NodeId,
        manifest: &Manifest,
        git_parents: &[NodeId],
    ) -> Result<()> {
        let parents = git_parents
            .iter()
            .map(|p| read_manifest(self.access, *p))
            .collect::<Result<Vec<_>>>()?;

        for change in manifest_changes(manifest, &parents) {
            let file = change.node;
            if file.is_null() || self.seen_files.contains(&file) {
                continue;
            }
            self.seen_files.insert(file);

            let content = if file == HG_EMPTY_FILE {
                Vec::new()
            } else {
                match self.store.lookup(file)? {
                    Some(target) if target.kind == MappingKind::Blob => {
                        self.access.read_object(ObjectKind::Blob, target.id)?
                    }
                    _ => {
                        self.report(Finding::MissingFileMapping {
                            file,
                            path: change.path,
                        });
                        continue;
                    }
                }
            };

            let metadata = self.store.file_metadata(file)?;
            let text = file_text(metadata.as_deref(), &content);
            if source_hash(&change.parents, &text) != file {
                self.report(Finding::FileHashMismatch {
                    file,
                    manifest_commit,
                });
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<VerifyReport> {
        if !self.config.scoped() && !self.broken() {
            self.reconcile_manifest_heads()?;
            self.sweep_dangling()?;
            self.reconcile_branch_heads()?;
        }
        debug!(
            status = %self.report.status(),
            findings = self.report.findings.len(),
            fixes = self.report.fixes.len(),
            "check finished"
        );
        Ok(self.report)
    }

    fn reconcile_manifest_heads(&mut self) -> Result<()> {
        let stored = self.store.manifest_heads()?;
        let computed = self.manifests.heads(None);
        if stored == computed {
            return Ok(());
        }

        let orphaned: Vec<NodeId> = stored.difference(&computed).copied().collect();
        let access = self.access;
        let query = CommitQuery::ancestors(orphaned.iter().copied(), computed.iter().copied());
        for entry in access.enumerate_commits(&query)? {
            let entry = entry?;
            self.fix(Fix::RemovedManifestCommit { commit: entry.id });
        }
        for head in orphaned {
            if self.manifests.contains(&head) {
                self.fix(Fix::RemovedManifestHeadReference { commit: head });
            }
        }

        self.fix(Fix::ReplacedManifestHeads {
            heads: computed.iter().copied().collect(),
        });
        self.store.set_manifest_heads(computed);
        Ok(())
    }

    fn sweep_dangling(&mut self) -> Result<()> {
        let considered: Vec<NodeId> = self
            .store
            .mapping_entries()?
            .into_iter()
            .filter(|(_, target)| self.config.check_files || target.kind == MappingKind::Commit)
            .map(|(source, _)| source)
            .collect();

        for source in considered {
            let seen = self.seen_changesets.contains(&source)
                || self.seen_manifests.contains(&source)
                || self.seen_files.contains(&source);
            if !seen || source == HG_EMPTY_FILE {
                self.fix(Fix::RemovedDanglingMapping { source });
                self.store.tombstone(source);
            }
        }

        for commit in self.store.note_ids()? {
            if !self.seen_notes.contains(&commit) {
                self.fix(Fix::RemovedDanglingNote { commit });
                self.store.tombstone_note(commit);
            }
        }
        Ok(())
    }

    fn reconcile_branch_heads(&mut self) -> Result<()> {
        debug!(heads = ?self.changesets.all_heads(), "computed branch heads");
        let stored = self.store.branch_heads()?;
        let mut branches = self.changesets.labels();
        branches.extend(stored.values().cloned());

        for branch in branches {
            let computed = self.changesets.heads(Some(&branch));
            // Live state: earlier branches may have moved a head here or away.
            let stored_heads = self.store.heads(&BTreeSet::from([branch.clone()]))?;

            for head in computed.difference(&stored_heads) {
                self.fix(Fix::AddedHead {
                    changeset: *head,
                    branch: branch.clone(),
                });
                self.store.add_head(*head, &branch);
            }
            for head in stored_heads.difference(&computed) {
                self.fix(Fix::RemovedHead {
                    changeset: *head,
                    branch: branch.clone(),
                });
                self.store.remove_head(*head);
            }
        }
        Ok(())
    }
}
