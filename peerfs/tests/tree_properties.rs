// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use peerfs::vfs::{AccessGate, FileKind, ROOT_INO, ShadowConfig, Tree, TreeBuilder};
use peerfs::{FsError, Manifest, PeerFs};

fn build(manifest: &Manifest) -> (Tree, AccessGate) {
    let tree = Tree::new();
    TreeBuilder::new(&tree)
        .build(manifest, &ShadowConfig::default())
        .expect("build");
    let gate = AccessGate::locate(&tree, ".all");
    (tree, gate)
}

fn child_names(tree: &Tree, path: &str) -> Vec<String> {
    tree.resolve(path)
        .expect("path exists")
        .as_dir()
        .expect("directory")
        .entries()
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

#[test]
fn end_to_end_scenario() {
    let manifest =
        Manifest::new([("file", "content"), ("subdir/other-file", "other-content")]).unwrap();
    let (tree, _) = build(&manifest);

    assert_eq!(child_names(&tree, ""), ["file", "subdir"]);
    assert_eq!(child_names(&tree, "subdir"), ["other-file"]);
    assert_eq!(
        tree.resolve("file").unwrap().read().unwrap().as_ref(),
        b"content"
    );
    assert_eq!(
        tree.resolve("subdir/other-file")
            .unwrap()
            .read()
            .unwrap()
            .as_ref(),
        b"other-content"
    );
}

#[test]
fn manifest_fidelity() {
    let manifest = Manifest::new([
        ("a", "1"),
        ("b/c", "22"),
        ("b/d/e", "333"),
        ("b/d/f", ""),
        ("x/y/z/w", "deep"),
    ])
    .unwrap();
    let (tree, _) = build(&manifest);
    for (path, content) in manifest.iter() {
        let node = tree.resolve(path).unwrap_or_else(|| panic!("{path} missing"));
        assert_eq!(&node.read().unwrap(), content, "{path}");
        assert_eq!(node.attributes().size, content.len() as u64);
    }
}

#[test]
fn build_order_does_not_matter() {
    let paths = ["p/q/r", "p/s", "p/q/t", "u", "p/q/v/w"];
    let forward = Manifest::new(paths.iter().map(|p| (*p, *p))).unwrap();
    let (tree_a, _) = build(&forward);

    // building the same entries in two passes, reversed, gives the same shape
    let tree_b = Tree::new();
    for p in paths.iter().rev() {
        let single = Manifest::new([(*p, *p)]).unwrap();
        TreeBuilder::new(&tree_b)
            .build(&single, &ShadowConfig::default())
            .unwrap();
    }

    for dir in ["", "p", "p/q", "p/q/v"] {
        assert_eq!(child_names(&tree_a, dir), child_names(&tree_b, dir), "{dir}");
    }
    assert_eq!(tree_a.len(), tree_b.len());
}

#[test]
fn gate_enforcement() {
    let manifest = Manifest::new([
        (".all/user1", "test1"),
        (".all/user2", "test2"),
        ("subdir/other-file", "other-content"),
    ])
    .unwrap();
    let (tree, gate) = build(&manifest);
    let subdir = tree.resolve("subdir").unwrap();

    for dir in [tree.root().clone(), subdir] {
        assert_eq!(
            tree.create(&dir, "user3", &gate).unwrap_err(),
            FsError::PermissionDenied("user3".into())
        );
        let created = tree.create(&dir, "user1", &gate).unwrap();
        assert_eq!(created.kind(), FileKind::File);
        assert!(created.read().unwrap().is_empty());
        assert_eq!(created.parent(), dir.ino());
    }
}

#[test]
fn concurrent_create_converges() {
    let (tree, gate) = build(&Manifest::builtin());
    let nodes_before = tree.len();
    let barrier = Barrier::new(100);

    let created: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..100)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    tree.create(tree.root(), "user1", &gate).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let first = &created[0];
    assert!(created.iter().all(|n| Arc::ptr_eq(n, first)));
    assert_eq!(tree.len(), nodes_before + 1);
    assert!(Arc::ptr_eq(&tree.lookup(ROOT_INO, "user1").unwrap(), first));
}

#[test]
fn concurrent_mkdir_converges() {
    let (tree, gate) = build(&Manifest::builtin());
    let inos: HashSet<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..32)
            .map(|_| s.spawn(|| tree.mkdir(tree.root(), "inbox", &gate).unwrap().ino()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(inos.len(), 1);
}

#[test]
fn attributes_stay_coherent_under_concurrency() {
    let (tree, gate) = build(&Manifest::builtin());
    let file = tree.resolve("file").unwrap();
    let expected = file.attributes();

    thread::scope(|s| {
        for i in 0..8 {
            let tree = &tree;
            let gate = &gate;
            s.spawn(move || {
                let dir = tree.mkdir(tree.root(), &format!("d{i}"), gate).unwrap();
                tree.create(&dir, "user2", gate).unwrap();
            });
        }
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..1000 {
                    assert_eq!(file.attributes(), expected);
                }
            });
        }
    });
}

#[test]
fn adapter_serves_builtin_seed() {
    let fs = PeerFs::new(Manifest::builtin(), ShadowConfig::default());
    fs.populate_on_mount().unwrap();

    let subdir = fs.lookup_child(ROOT_INO, "subdir").unwrap();
    let other = fs.lookup_child(subdir.ino, "other-file").unwrap();
    // whole-object reads: offset never shifts the returned bytes
    for offset in [0, 4, 100] {
        assert_eq!(
            fs.read_file(other.ino, offset, 4096).unwrap().as_ref(),
            b"other-content"
        );
    }

    let denied = fs.create_file(subdir.ino, "mallory").unwrap_err();
    assert_eq!(denied.errno(), libc::EACCES);
    assert_eq!(fs.create_file(subdir.ino, "user2").unwrap().size, 0);
}
