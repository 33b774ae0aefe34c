use crate::harness::{Assertion, ErrorMatch, FsckRequest, RevisionArg, Scenario};

#[test]
fn test_upgrade_moves_copy_metadata() {
    Scenario::new("upgrade_copy_metadata")
        .with_metadata_version(2)
        .changeset("a", &[], &[("orig.txt", b"hello\n")])
        .copy("b", "a", "orig.txt", "copy.txt", b"hello\n")
        .fsck()
        .assert_clean()
        .assert(Assertion::FilesUpgraded(1))
        // File checks are forced after an upgrade.
        .assert(Assertion::FilesChecked(2))
        .assert(Assertion::MetadataCurrent)
        .assert(Assertion::CopyMetadata {
            name: "b".into(),
            path: "copy.txt".into(),
        })
        .fsck_all()
        .assert_clean()
        .assert(Assertion::FilesUpgraded(0))
        .run()
        .expect("scenario should pass");
}

#[test]
fn test_upgrade_refuses_partial_checks() {
    Scenario::new("upgrade_refusals")
        .with_metadata_version(2)
        .changeset("a", &[], &[("a.txt", b"one\n")])
        .fsck_fails(
            FsckRequest {
                files: true,
                ..FsckRequest::default()
            },
            ErrorMatch::InvalidArguments,
        )
        .fsck_fails(
            FsckRequest {
                manifests: true,
                ..FsckRequest::default()
            },
            ErrorMatch::InvalidArguments,
        )
        .fsck_fails(
            FsckRequest {
                revisions: vec![RevisionArg::Commit("a".into())],
                ..FsckRequest::default()
            },
            ErrorMatch::InvalidArguments,
        )
        .fsck()
        .assert_clean()
        .assert(Assertion::FilesUpgraded(0))
        .assert(Assertion::MetadataCurrent)
        .run()
        .unwrap();
}

#[test]
fn test_legacy_metadata_is_rejected() {
    Scenario::new("legacy_metadata")
        .with_metadata_version(1)
        .fsck_fails(FsckRequest::full(), ErrorMatch::LegacyFormat)
        .fsck_fails(FsckRequest::all_checks(), ErrorMatch::LegacyFormat)
        .run()
        .unwrap();
}
