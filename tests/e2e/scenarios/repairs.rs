use crate::harness::{Assertion, Corruption, FixMatch, Scenario};
use graft_core::{CheckStatus, Config};

#[test]
fn test_stale_head_removed() {
    Scenario::new("stale_head_removed")
        .changeset("a", &[], &[("a.txt", b"one\n")])
        .changeset("b", &["a"], &[("a.txt", b"two\n")])
        .corrupt(Corruption::StaleHead("a".into()))
        .assert_heads("default", &["a", "b"])
        .fsck()
        .assert_status(CheckStatus::Fixed)
        .assert_fix(FixMatch::RemovedHead)
        .assert(Assertion::FixCount(1))
        .assert_heads("default", &["b"])
        .fsck()
        .assert_clean()
        .run()
        .expect("scenario should pass");
}

#[test]
fn test_mislabelled_head_moves_branch() {
    for wrong in ["aardvark", "stable"] {
        Scenario::new("mislabelled_head")
            .changeset("a", &[], &[("a.txt", b"one\n")])
            .changeset("b", &["a"], &[("a.txt", b"two\n")])
            .corrupt(Corruption::MislabelHead {
                name: "b".into(),
                branch: wrong.into(),
            })
            .assert_heads("default", &[])
            .fsck()
            .assert_status(CheckStatus::Fixed)
            .assert_fix(FixMatch::AddedHead)
            .assert_heads("default", &["b"])
            .assert_heads(wrong, &[])
            // Nothing valid was dropped along the way.
            .fsck()
            .assert_clean()
            .assert(Assertion::CommitsChecked(2))
            .assert(Assertion::ChangesetMapped("a".into()))
            .assert(Assertion::NoteAttached("b".into()))
            .assert_manifest_heads(&["b"])
            .run()
            .unwrap();
    }
}

#[test]
fn test_missing_head_added() {
    // b stays the head of default once c moves to stable.
    Scenario::new("missing_head_added")
        .changeset("a", &[], &[("a.txt", b"one\n")])
        .changeset("b", &["a"], &[("a.txt", b"two\n")])
        .changeset_on("stable", "c", &["b"], &[("a.txt", b"three\n")])
        .corrupt(Corruption::DropHead("b".into()))
        .corrupt(Corruption::StaleHead("a".into()))
        .fsck()
        .assert_status(CheckStatus::Fixed)
        .assert_fix(FixMatch::AddedHead)
        .assert_fix(FixMatch::RemovedHead)
        .assert(Assertion::FixCount(2))
        .assert_heads("default", &["b"])
        .assert_heads("stable", &["c"])
        .fsck()
        .assert_clean()
        .run()
        .unwrap();
}

#[test]
fn test_stale_manifest_head_removed() {
    Scenario::new("stale_manifest_head")
        .changeset("a", &[], &[("a.txt", b"one\n")])
        .changeset("b", &["a"], &[("a.txt", b"two\n")])
        .corrupt(Corruption::StaleManifestHead("a".into()))
        .fsck()
        .assert_status(CheckStatus::Fixed)
        .assert_fix(FixMatch::RemovedManifestHeadReference)
        .assert_fix(FixMatch::ReplacedManifestHeads)
        .assert_manifest_heads(&["b"])
        .fsck()
        .assert_clean()
        .run()
        .unwrap();
}

#[test]
fn test_orphan_manifest_commit_removed() {
    Scenario::new("orphan_manifest_commit")
        .changeset("a", &[], &[("a.txt", b"one\n")])
        .corrupt(Corruption::OrphanManifestHead)
        .fsck()
        .assert_status(CheckStatus::Fixed)
        .assert_fix(FixMatch::RemovedManifestCommit)
        .assert_fix(FixMatch::ReplacedManifestHeads)
        .assert(Assertion::FixCount(2))
        .assert_manifest_heads(&["a"])
        .fsck()
        .assert_clean()
        .run()
        .unwrap();
}

#[test]
fn test_dangling_note_removed() {
    Scenario::new("dangling_note")
        .changeset("a", &[], &[("a.txt", b"one\n")])
        .corrupt(Corruption::StrayNote)
        .fsck()
        .assert_status(CheckStatus::Fixed)
        .assert_fix(FixMatch::RemovedDanglingNote)
        .assert(Assertion::FixCount(1))
        .assert(Assertion::NoteAttached("a".into()))
        .fsck()
        .assert_clean()
        .run()
        .unwrap();
}

#[test]
fn test_stray_blob_needs_file_checks() {
    Scenario::new("stray_blob")
        .changeset("a", &[], &[("a.txt", b"one\n")])
        .corrupt(Corruption::StrayMapping)
        // Blob mappings are only considered when files are checked.
        .fsck()
        .assert_clean()
        .fsck_all()
        .assert_status(CheckStatus::Fixed)
        .assert_fix(FixMatch::RemovedDanglingMapping)
        .assert(Assertion::FixCount(1))
        .assert(Assertion::ChangesetMapped("a".into()))
        .fsck_all()
        .assert_clean()
        .run()
        .unwrap();
}

#[test]
fn test_configured_file_checks() {
    let mut config = Config::default();
    config.fsck.check_files = true;

    Scenario::new("configured_file_checks")
        .with_config(config)
        .changeset("a", &[], &[("a.txt", b"one\n")])
        .corrupt(Corruption::StrayMapping)
        .fsck()
        .assert_status(CheckStatus::Fixed)
        .assert_fix(FixMatch::RemovedDanglingMapping)
        .assert(Assertion::FilesChecked(1))
        .run()
        .unwrap();
}

#[test]
fn test_all_repairs_in_one_run() {
    Scenario::new("all_repairs")
        .linear_history("r", 3, "a.txt")
        .corrupt(Corruption::StaleHead("r1".into()))
        .corrupt(Corruption::StaleManifestHead("r0".into()))
        .corrupt(Corruption::StrayNote)
        .corrupt(Corruption::StrayMapping)
        .fsck_all()
        .assert_status(CheckStatus::Fixed)
        .assert(Assertion::NoFindings)
        .assert_fix(FixMatch::RemovedHead)
        .assert_fix(FixMatch::RemovedManifestHeadReference)
        .assert_fix(FixMatch::RemovedDanglingNote)
        .assert_fix(FixMatch::RemovedDanglingMapping)
        .assert_heads("default", &["r2"])
        .assert_manifest_heads(&["r2"])
        .reopen()
        .fsck_all()
        .assert_clean()
        .run()
        .unwrap();
}
