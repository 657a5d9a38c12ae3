mod common;

use common::{cursor, init_repo, logical};
use ocfl_core::error::OcflError;
use ocfl_core::types::{CommitInfo, VersionNum};

#[test]
fn scenario_f_stage_three_times_then_commit_folds_into_one_version() {
    let (root, repo) = init_repo();

    for name in ["a.txt", "b.txt", "c.txt"] {
        let bytes = name.to_string();
        repo.stage_changes("o1", move |updater, staging_dir| {
            let proc = ocfl_core::add_file::AddFileProcessor::new(
                Box::new(ocfl_core::paths::WindowsSafeLogicalPathMapper),
                Box::new(ocfl_core::paths::DefaultContentPathConstraintProcessor),
                ocfl_core::digest::DigestAlgorithm::Sha512,
            );
            proc.add_file(updater, staging_dir, cursor(&bytes), logical(&bytes), false)
        })
        .unwrap();
    }

    let head = repo
        .commit_staged_changes("o1", CommitInfo::new().with_message("fold three revisions"))
        .unwrap();

    assert_eq!(VersionNum::new(2), head);

    let files = repo.list_files("o1", None).unwrap();
    assert_eq!(3, files.len());
    for name in ["a.txt", "b.txt", "c.txt"] {
        assert!(files.contains(&logical(name)));
    }

    assert!(!root.path().join("o1/extensions/0005-mutable-head").exists());
}

#[test]
fn updating_an_object_with_an_active_mutable_head_is_rejected() {
    let (_root, repo) = init_repo();

    repo.stage_changes("o1", |updater, staging_dir| {
        let proc = ocfl_core::add_file::AddFileProcessor::new(
            Box::new(ocfl_core::paths::WindowsSafeLogicalPathMapper),
            Box::new(ocfl_core::paths::DefaultContentPathConstraintProcessor),
            ocfl_core::digest::DigestAlgorithm::Sha512,
        );
        proc.add_file(updater, staging_dir, cursor("x"), logical("a.txt"), false)
    })
    .unwrap();

    let result = repo.put_object("o1", vec![(logical("b.txt"), cursor("y"))], CommitInfo::new());
    assert!(matches!(result, Err(OcflError::IllegalState(_))));
}

#[test]
fn purge_staged_changes_discards_overlay_without_new_version() {
    let (root, repo) = init_repo();

    repo.stage_changes("o1", |updater, staging_dir| {
        let proc = ocfl_core::add_file::AddFileProcessor::new(
            Box::new(ocfl_core::paths::WindowsSafeLogicalPathMapper),
            Box::new(ocfl_core::paths::DefaultContentPathConstraintProcessor),
            ocfl_core::digest::DigestAlgorithm::Sha512,
        );
        proc.add_file(updater, staging_dir, cursor("x"), logical("a.txt"), false)
    })
    .unwrap();

    repo.purge_staged_changes("o1").unwrap();

    assert!(!root.path().join("o1/extensions/0005-mutable-head").exists());
    assert_eq!(VersionNum::v1(), repo.get_object("o1", None).unwrap().version_num);
    assert!(repo.list_files("o1", None).unwrap().is_empty());
}
