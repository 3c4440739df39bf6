use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::Repository;
use services::services::snapshot::{
    AUTOSAVE_SIGNATURE_EMAIL, AUTOSAVE_SIGNATURE_NAME, Confirmation, SnapshotError, SnapshotRepo,
};
use tempfile::TempDir;

fn write_file<P: AsRef<Path>>(base: P, rel: &str, content: &str) {
    let path = base.as_ref().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
}

fn init_repo(root: &TempDir) -> PathBuf {
    let path = root.path().join("repo");
    let repo = Repository::init(&path).unwrap();
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test User").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();
    path
}

fn commit_all(path: &Path, message: &str) -> String {
    let repo = Repository::open(path).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = repo.signature().unwrap();
    let parents = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(err) if err.code() == git2::ErrorCode::UnbornBranch => vec![],
        Err(err) => panic!("failed to read HEAD: {err}"),
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
        .to_string()
}

fn stage(path: &Path, rel: &str) {
    let repo = Repository::open(path).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(rel)).unwrap();
    index.write().unwrap();
}

fn head_oid(path: &Path) -> String {
    let repo = Repository::open(path).unwrap();
    repo.head().unwrap().target().unwrap().to_string()
}

fn head_refname(path: &Path) -> String {
    let repo = Repository::open(path).unwrap();
    repo.head().unwrap().name().unwrap().to_string()
}

fn autosave_tip(path: &Path, anchor: &str) -> Option<String> {
    let repo = Repository::open(path).unwrap();
    repo.find_reference(&format!("refs/heads/_asd_{anchor}"))
        .ok()
        .and_then(|reference| reference.target())
        .map(|oid| oid.to_string())
}

fn open_snapshot(path: &Path) -> SnapshotRepo {
    SnapshotRepo::open(path, Duration::ZERO).unwrap()
}

fn blob_content(path: &Path, commit: &str, rel: &str) -> Vec<u8> {
    let repo = Repository::open(path).unwrap();
    let commit = repo
        .find_commit(git2::Oid::from_str(commit).unwrap())
        .unwrap();
    let tree = commit.tree().unwrap();
    let entry = tree.get_path(Path::new(rel)).unwrap();
    repo.find_blob(entry.id()).unwrap().content().to_vec()
}

struct Always;

impl Confirmation for Always {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

struct Never;

impl Confirmation for Never {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

#[test]
fn save_preserves_head_index_and_worktree() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");
    commit_all(&repo_path, "initial");

    write_file(&repo_path, "hello.txt", "ab");
    write_file(&repo_path, "staged.txt", "staged content");
    stage(&repo_path, "staged.txt");

    let refname_before = head_refname(&repo_path);
    let oid_before = head_oid(&repo_path);
    let index_before = fs::read(repo_path.join(".git/index")).unwrap();

    let snapshot = open_snapshot(&repo_path);
    snapshot.save("manual save").unwrap();

    assert_eq!(head_refname(&repo_path), refname_before);
    assert_eq!(head_oid(&repo_path), oid_before);
    assert_eq!(fs::read(repo_path.join(".git/index")).unwrap(), index_before);
    assert_eq!(
        fs::read_to_string(repo_path.join("hello.txt")).unwrap(),
        "ab"
    );
    assert_eq!(
        fs::read_to_string(repo_path.join("staged.txt")).unwrap(),
        "staged content"
    );
}

#[test]
fn save_advances_one_sentinel_commit_from_the_anchor() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");
    let anchor = commit_all(&repo_path, "initial");
    write_file(&repo_path, "hello.txt", "ab");

    let snapshot = open_snapshot(&repo_path);
    let autosave = snapshot.save("manual save").unwrap().to_string();

    assert_eq!(autosave_tip(&repo_path, &anchor), Some(autosave.clone()));

    let repo = Repository::open(&repo_path).unwrap();
    let commit = repo
        .find_commit(git2::Oid::from_str(&autosave).unwrap())
        .unwrap();
    assert_eq!(commit.committer().name(), Some(AUTOSAVE_SIGNATURE_NAME));
    assert_eq!(commit.committer().email(), Some(AUTOSAVE_SIGNATURE_EMAIL));
    assert_eq!(commit.message(), Some("manual save"));
    assert_eq!(commit.parent_id(0).unwrap().to_string(), anchor);

    // the autosave tree matches the worktree at the moment of the call
    assert_eq!(blob_content(&repo_path, &autosave, "hello.txt"), b"ab");
}

#[test]
fn save_on_clean_worktree_is_nothing_to_save() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");
    let anchor = commit_all(&repo_path, "initial");

    let snapshot = open_snapshot(&repo_path);
    assert!(matches!(
        snapshot.save("manual save"),
        Err(SnapshotError::NothingToSave)
    ));
    assert_eq!(autosave_tip(&repo_path, &anchor), None);
}

#[test]
fn save_with_unborn_head_fails_without_touching_the_repo() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");

    let snapshot = open_snapshot(&repo_path);
    assert!(matches!(
        snapshot.save("manual save"),
        Err(SnapshotError::UnbornHead)
    ));

    let repo = Repository::open(&repo_path).unwrap();
    assert_eq!(repo.branches(None).unwrap().count(), 0);
    assert_eq!(
        fs::read_to_string(repo_path.join("hello.txt")).unwrap(),
        "a"
    );
}

#[test]
fn consecutive_saves_chain_on_one_branch() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");
    let anchor = commit_all(&repo_path, "initial");

    let snapshot = open_snapshot(&repo_path);
    write_file(&repo_path, "hello.txt", "ab");
    let first = snapshot.save("first autosave").unwrap().to_string();
    write_file(&repo_path, "hello.txt", "abc");
    let second = snapshot.save("second autosave").unwrap().to_string();

    assert_eq!(autosave_tip(&repo_path, &anchor), Some(second.clone()));

    let repo = Repository::open(&repo_path).unwrap();
    let tip = repo
        .find_commit(git2::Oid::from_str(&second).unwrap())
        .unwrap();
    assert_eq!(tip.parent_id(0).unwrap().to_string(), first);
    assert_eq!(blob_content(&repo_path, &second, "hello.txt"), b"abc");
}

#[test]
fn new_user_commit_anchors_a_new_branch() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");
    let first_anchor = commit_all(&repo_path, "initial");

    let snapshot = open_snapshot(&repo_path);
    write_file(&repo_path, "hello.txt", "ab");
    let first_autosave = snapshot.save("on first anchor").unwrap().to_string();

    let second_anchor = commit_all(&repo_path, "user commits their work");
    write_file(&repo_path, "hello.txt", "abc");
    let second_autosave = snapshot.save("on second anchor").unwrap().to_string();

    assert_ne!(first_anchor, second_anchor);
    assert_eq!(
        autosave_tip(&repo_path, &first_anchor),
        Some(first_autosave)
    );
    assert_eq!(
        autosave_tip(&repo_path, &second_anchor),
        Some(second_autosave.clone())
    );

    // the new chain is parented on the new anchor, not the old chain
    let repo = Repository::open(&repo_path).unwrap();
    let tip = repo
        .find_commit(git2::Oid::from_str(&second_autosave).unwrap())
        .unwrap();
    assert_eq!(tip.parent_id(0).unwrap().to_string(), second_anchor);
}

#[test]
fn save_then_restore_round_trips_the_worktree() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");
    commit_all(&repo_path, "initial");

    let snapshot = open_snapshot(&repo_path);
    write_file(&repo_path, "hello.txt", "ab");
    let autosave = snapshot.save("snapshot of ab").unwrap().to_string();

    write_file(&repo_path, "hello.txt", "abc");
    let refname_before = head_refname(&repo_path);
    let oid_before = head_oid(&repo_path);

    snapshot.restore(&autosave, &Always).unwrap();

    assert_eq!(
        fs::read_to_string(repo_path.join("hello.txt")).unwrap(),
        "ab"
    );
    assert_eq!(head_refname(&repo_path), refname_before);
    assert_eq!(head_oid(&repo_path), oid_before);
}

#[test]
fn restore_declined_leaves_the_worktree_alone() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");
    commit_all(&repo_path, "initial");

    let snapshot = open_snapshot(&repo_path);
    write_file(&repo_path, "hello.txt", "ab");
    let autosave = snapshot.save("snapshot of ab").unwrap().to_string();
    write_file(&repo_path, "hello.txt", "abc");

    assert!(matches!(
        snapshot.restore(&autosave, &Never),
        Err(SnapshotError::UserDidNotConfirm)
    ));
    assert_eq!(
        fs::read_to_string(repo_path.join("hello.txt")).unwrap(),
        "abc"
    );
}

#[test]
fn restore_rejects_malformed_hashes() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "hello.txt", "a");
    commit_all(&repo_path, "initial");

    let snapshot = open_snapshot(&repo_path);
    let not_hex = "z".repeat(40);
    for bad in ["abc", "", not_hex.as_str()] {
        assert!(matches!(
            snapshot.restore(bad, &Always),
            Err(SnapshotError::InvalidHash(_))
        ));
    }
}

#[test]
fn list_joins_autosaves_to_their_anchors() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "a.txt", "base");
    let parent = commit_all(&repo_path, "first");
    write_file(&repo_path, "a.txt", "v2");
    let middle = commit_all(&repo_path, "second");

    let snapshot = open_snapshot(&repo_path);
    write_file(&repo_path, "hello.txt", "x1");
    let autosave_one = snapshot.save("autosave one").unwrap().to_string();
    write_file(&repo_path, "hello.txt", "x2");
    let autosave_two = snapshot.save("autosave two").unwrap().to_string();

    let tip = commit_all(&repo_path, "third");
    write_file(&repo_path, "c.txt", "c");
    let autosave_three = snapshot.save("autosave three").unwrap().to_string();

    let entries = snapshot.list(10, 5).unwrap();
    assert_eq!(entries.len(), 3);

    assert_eq!(entries[0].commit.id.to_string(), tip);
    let ids: Vec<String> = entries[0]
        .autosaves
        .iter()
        .map(|c| c.id.to_string())
        .collect();
    assert_eq!(ids, vec![autosave_three]);

    assert_eq!(entries[1].commit.id.to_string(), middle);
    let ids: Vec<String> = entries[1]
        .autosaves
        .iter()
        .map(|c| c.id.to_string())
        .collect();
    assert_eq!(ids, vec![autosave_two, autosave_one]);

    assert_eq!(entries[2].commit.id.to_string(), parent);
    assert!(entries[2].autosaves.is_empty());
}

#[test]
fn list_never_mixes_user_and_autosave_commits() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "a.txt", "base");
    commit_all(&repo_path, "first");

    let snapshot = open_snapshot(&repo_path);
    write_file(&repo_path, "a.txt", "edited");
    snapshot.save("autosave").unwrap();
    commit_all(&repo_path, "second");
    write_file(&repo_path, "a.txt", "edited again");
    snapshot.save("another autosave").unwrap();

    for entry in snapshot.list(usize::MAX, usize::MAX).unwrap() {
        assert!(
            entry.commit.committer_name != AUTOSAVE_SIGNATURE_NAME
                || entry.commit.committer_email != AUTOSAVE_SIGNATURE_EMAIL,
            "user listing contains an autosave"
        );
        for autosave in &entry.autosaves {
            assert_eq!(autosave.committer_name, AUTOSAVE_SIGNATURE_NAME);
            assert_eq!(autosave.committer_email, AUTOSAVE_SIGNATURE_EMAIL);
        }
    }
}

#[test]
fn list_respects_limit_and_per_commit_cap() {
    let td = TempDir::new().unwrap();
    let repo_path = init_repo(&td);
    write_file(&repo_path, "a.txt", "base");
    commit_all(&repo_path, "first");
    write_file(&repo_path, "a.txt", "v2");
    let middle = commit_all(&repo_path, "second");

    let snapshot = open_snapshot(&repo_path);
    write_file(&repo_path, "hello.txt", "x1");
    snapshot.save("autosave one").unwrap();
    write_file(&repo_path, "hello.txt", "x2");
    let newest = snapshot.save("autosave two").unwrap().to_string();
    let tip = commit_all(&repo_path, "third");

    let entries = snapshot.list(2, 1).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].commit.id.to_string(), tip);
    assert_eq!(entries[1].commit.id.to_string(), middle);

    // newest-first chain, capped at one entry
    let ids: Vec<String> = entries[1]
        .autosaves
        .iter()
        .map(|c| c.id.to_string())
        .collect();
    assert_eq!(ids, vec![newest]);
}
