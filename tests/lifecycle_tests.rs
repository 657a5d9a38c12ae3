mod common;

use common::{cursor, init_repo, logical};
use ocfl_core::digest::DigestAlgorithm;
use ocfl_core::layout::{HashedNTupleLayout, StorageLayout};
use ocfl_core::types::{CommitInfo, VersionNum};

#[test]
fn scenario_a_create_and_read() {
    let (root, repo) = init_repo();

    repo.put_object("o1", vec![(logical("f.txt"), cursor("hello"))], CommitInfo::new())
        .unwrap();

    let mut sink = Vec::new();
    repo.read_object_file("o1", &logical("f.txt"), None, &mut sink).unwrap();
    assert_eq!(b"hello".to_vec(), sink);

    let digest = DigestAlgorithm::Sha512.hash_hex(&mut cursor("hello")).unwrap();
    let object = repo.get_object("o1", None).unwrap();
    assert_eq!(VersionNum::v1(), object.version_num);
    assert_eq!(&digest, object.state.get(&logical("f.txt")).unwrap());

    let content = std::fs::read_dir(root.path()).unwrap().count();
    assert!(content > 0);
}

#[test]
fn scenario_b_dedup_across_versions() {
    let (root, repo) = init_repo();

    repo.put_object("o1", vec![(logical("p1"), cursor("a"))], CommitInfo::new())
        .unwrap();
    repo.put_object(
        "o1",
        vec![(logical("p1"), cursor("a")), (logical("p2"), cursor("a"))],
        CommitInfo::new(),
    )
    .unwrap();

    let object_root = root.path().join(find_object_root(root.path(), "o1"));
    assert!(!object_root.join("v2/content").exists());
    assert!(object_root.join("v1/content/p1").exists());

    let v2 = repo.get_object("o1", None).unwrap();
    let digest = DigestAlgorithm::Sha512.hash_hex(&mut cursor("a")).unwrap();
    assert_eq!(&digest, v2.state.get(&logical("p1")).unwrap());
    assert_eq!(&digest, v2.state.get(&logical("p2")).unwrap());
}

#[test]
fn scenario_c_rename_reuses_content() {
    let (root, repo) = init_repo();

    repo.put_object("o1", vec![(logical("p1"), cursor("x"))], CommitInfo::new())
        .unwrap();

    repo.update_object("o1", CommitInfo::new(), |updater, _staging_dir| {
        updater.rename_file(&logical("p1"), logical("p2"), false)
    })
    .unwrap();

    let object_root = root.path().join(find_object_root(root.path(), "o1"));
    assert!(!object_root.join("v2/content").exists());

    let files = repo.list_files("o1", None).unwrap();
    assert!(!files.contains(&logical("p1")));
    assert!(files.contains(&logical("p2")));

    let mut sink = Vec::new();
    repo.read_object_file("o1", &logical("p2"), None, &mut sink).unwrap();
    assert_eq!(b"x".to_vec(), sink);
}

#[test]
fn scenario_d_remove_all_leaves_no_content_dir() {
    let (root, repo) = init_repo();

    repo.put_object("o1", vec![(logical("p1"), cursor("y"))], CommitInfo::new())
        .unwrap();

    let head = repo
        .update_object("o1", CommitInfo::new(), |updater, _staging_dir| {
            updater.remove_file(&logical("p1"))
        })
        .unwrap();

    assert_eq!(VersionNum::new(2), head);
    let object_root = root.path().join(find_object_root(root.path(), "o1"));
    assert!(!object_root.join("v2/content").exists());
    assert!(repo.list_files("o1", None).unwrap().is_empty());
}

/// The relative object root the default hashed-n-tuple layout maps `object_id` to, matching
/// whatever `OcflRepository::init_fs` used internally.
fn find_object_root(_storage_root: &std::path::Path, object_id: &str) -> std::path::PathBuf {
    let layout = HashedNTupleLayout::default();
    std::path::PathBuf::from(layout.map_object_id(object_id))
}
