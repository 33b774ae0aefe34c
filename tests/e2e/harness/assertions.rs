use anyhow::Result;
use graft_core::{CheckStatus, GraftRepo};

/// Declarative assertions on the last fsck report and the stored metadata
pub enum Assertion {
    // Report
    Status(CheckStatus),
    NoFindings,
    HasFinding(FindingMatch),
    FindingCount(usize),
    NoFixes,
    FixCount(usize),
    HasFix(FixMatch),
    CommitsChecked(usize),
    ManifestsChecked(usize),
    FilesChecked(usize),
    FilesUpgraded(usize),

    // Metadata
    BranchHeads {
        branch: String,
        changesets: Vec<String>,
    },
    ManifestHeads(Vec<String>),
    ChangesetMapped(String),
    ChangesetUnmapped(String),
    NoteAttached(String),
    MetadataCurrent,
    CopyMetadata {
        name: String,
        path: String,
    },

    // Custom
    Custom(Box<dyn Fn(&mut GraftRepo) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(s) => write!(f, "Status({:?})", s),
            Self::NoFindings => write!(f, "NoFindings"),
            Self::HasFinding(m) => write!(f, "HasFinding({:?})", m),
            Self::FindingCount(n) => write!(f, "FindingCount({})", n),
            Self::NoFixes => write!(f, "NoFixes"),
            Self::FixCount(n) => write!(f, "FixCount({})", n),
            Self::HasFix(m) => write!(f, "HasFix({:?})", m),
            Self::CommitsChecked(n) => write!(f, "CommitsChecked({})", n),
            Self::ManifestsChecked(n) => write!(f, "ManifestsChecked({})", n),
            Self::FilesChecked(n) => write!(f, "FilesChecked({})", n),
            Self::FilesUpgraded(n) => write!(f, "FilesUpgraded({})", n),
            Self::BranchHeads { branch, changesets } => {
                write!(f, "BranchHeads {{ branch: {:?}, changesets: {:?} }}", branch, changesets)
            }
            Self::ManifestHeads(names) => write!(f, "ManifestHeads({:?})", names),
            Self::ChangesetMapped(name) => write!(f, "ChangesetMapped({:?})", name),
            Self::ChangesetUnmapped(name) => write!(f, "ChangesetUnmapped({:?})", name),
            Self::NoteAttached(name) => write!(f, "NoteAttached({:?})", name),
            Self::MetadataCurrent => write!(f, "MetadataCurrent"),
            Self::CopyMetadata { name, path } => {
                write!(f, "CopyMetadata {{ name: {:?}, path: {:?} }}", name, path)
            }
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// Match against finding kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindingMatch {
    MissingNote,
    CommitterMismatch,
    ChangesetMappingMismatch,
    ChangesetHashMismatch,
    MissingManifestMapping,
    MissingManifestCommit,
    ManifestHashMismatch,
    ManifestParentMismatch,
    MissingManifestTree,
    TreeMismatch,
    MissingFileMapping,
    FileHashMismatch,
}

/// Match against repair kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixMatch {
    RemovedManifestCommit,
    RemovedManifestHeadReference,
    ReplacedManifestHeads,
    RemovedDanglingMapping,
    RemovedDanglingNote,
    AddedHead,
    RemovedHead,
}
