//! End-to-end scenarios exercising the overlay engine directly, without a
//! live 9P socket.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use overlayd::overlay::handlers::{self, OpenHandle};
use overlayd::overlay::merge::list_dir;
use overlayd::LayerStack;

fn names(entries: &[overlayd::overlay::merge::MergedEntry]) -> Vec<String> {
    let mut v: Vec<_> = entries
        .iter()
        .map(|e| e.name.to_string_lossy().to_string())
        .collect();
    v.sort();
    v
}

fn new_layer() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    (dir, path)
}

#[test]
fn s1_single_layer_basic() {
    let (_l0_dir, l0) = new_layer();
    let stack = LayerStack::new(vec![l0.clone()]);

    handlers::create(&stack, "/A", true, 0o770).unwrap();
    handlers::create(&stack, "/A/a", false, 0o770).unwrap();

    let st_dir = handlers::stat(&stack, "/A").unwrap();
    assert!(st_dir.is_dir);
    assert_eq!(st_dir.mode & 0o777, 0o770);

    let st_file = handlers::stat(&stack, "/A/a").unwrap();
    assert!(!st_file.is_dir);
    assert_eq!(st_file.mode & 0o777, 0o770);

    assert_eq!(names(&list_dir(&stack, "/A").unwrap()), vec!["a"]);
    assert_eq!(names(&list_dir(&stack, "/").unwrap()), vec!["A"]);
}

#[test]
fn s2_layer_addition_preserves_view() {
    let (_l0_dir, l0) = new_layer();
    let stack = LayerStack::new(vec![l0.clone()]);
    handlers::create(&stack, "/A", true, 0o770).unwrap();
    handlers::create(&stack, "/A/a", false, 0o770).unwrap();

    let (_l1_dir, l1) = new_layer();
    let stack2 = LayerStack::new(vec![l1, l0]);

    assert!(handlers::stat(&stack2, "/A").unwrap().is_dir);
    assert!(handlers::stat(&stack2, "/A/a").is_ok());
    assert_eq!(names(&list_dir(&stack2, "/A").unwrap()), vec!["a"]);

    // Creating the same directory again must fail: it already exists.
    assert!(handlers::create(&stack2, "/A", true, 0o770).is_err());
}

#[test]
fn s3_writes_land_on_top() {
    let (_l0_dir, l0) = new_layer();
    let (_l1_dir, l1) = new_layer();
    let stack = LayerStack::new(vec![l1.clone(), l0.clone()]);

    handlers::create(&stack, "/B", true, 0o771).unwrap();
    handlers::create(&stack, "/B/b", false, 0o771).unwrap();

    assert!(handlers::stat(&stack, "/B/b").is_ok());
    assert!(l1.join("B/b").exists());
    assert!(!l0.join("B").exists());
}

#[test]
fn s4_copy_up_on_write() {
    let (_l0_dir, l0) = new_layer();
    let (_l1_dir, l1) = new_layer();
    fs::create_dir(l0.join("A")).unwrap();
    fs::write(l0.join("A/a"), "from lower").unwrap();

    let stack = LayerStack::new(vec![l1.clone(), l0.clone()]);
    let handle = handlers::open(&stack, "/A/a", true).unwrap();
    drop(handle);

    assert!(l1.join("A").is_dir());
    assert_eq!(fs::read_to_string(l1.join("A/a")).unwrap(), "from lower");
    match handlers::open(&stack, "/A/a", false).unwrap() {
        OpenHandle::File(_) => {}
        OpenHandle::Dir(_) => panic!("expected a file handle"),
    }
}

#[test]
fn s5_remove_with_whiteout() {
    let (_l0_dir, l0) = new_layer();
    let (_l1_dir, l1) = new_layer();
    fs::create_dir(l0.join("A")).unwrap();
    fs::write(l0.join("A/a"), "x").unwrap();

    let stack = LayerStack::new(vec![l1.clone(), l0.clone()]);
    let (_l2_dir, l2) = new_layer();
    let stack3 = LayerStack::new(vec![l2.clone(), l1.clone(), l0.clone()]);

    handlers::remove(&stack3, "/A/a").unwrap();

    assert_eq!(names(&list_dir(&stack3, "/A").unwrap()), Vec::<String>::new());
    assert!(l2.join("A/.wh.a").exists());
    assert!(l0.join("A/a").exists());
}

#[test]
fn s6_directory_whiteout_and_recreate() {
    let (_l0_dir, l0) = new_layer();
    let (_l1_dir, l1) = new_layer();
    let (_l2_dir, l2) = new_layer();
    fs::create_dir(l0.join("A")).unwrap();

    let stack = LayerStack::new(vec![l2.clone(), l1.clone(), l0.clone()]);
    handlers::remove(&stack, "/A").unwrap();

    assert_eq!(names(&list_dir(&stack, "/").unwrap()), Vec::<String>::new());
    assert!(l2.join(".wh.A").exists());

    handlers::create(&stack, "/A", true, 0o755).unwrap();
    assert_eq!(names(&list_dir(&stack, "/").unwrap()), vec!["A"]);
    assert!(l2.join("A").is_dir());
}

#[test]
fn chmod_chown_utimes_truncate_copy_up_from_lower() {
    let (_l0_dir, l0) = new_layer();
    let (_l1_dir, l1) = new_layer();
    fs::write(l0.join("a"), "0123456789").unwrap();

    let stack = LayerStack::new(vec![l1.clone(), l0.clone()]);
    handlers::truncate(&stack, "/a", 4).unwrap();

    assert!(l1.join("a").exists());
    assert_eq!(fs::metadata(l1.join("a")).unwrap().len(), 4);
    // lower layer is untouched
    assert_eq!(fs::metadata(l0.join("a")).unwrap().len(), 10);

    let now = SystemTime::now() - Duration::from_secs(60);
    handlers::utimes(&stack, "/a", now, now).unwrap();
}

#[test]
fn rename_is_same_parent_only() {
    let (_l0_dir, l0) = new_layer();
    fs::write(l0.join("a"), "x").unwrap();
    let stack = LayerStack::new(vec![l0.clone()]);
    handlers::rename(&stack, "/a", "b").unwrap();
    assert!(!l0.join("a").exists());
    assert!(l0.join("b").exists());
}
