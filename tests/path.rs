mod common;

use common::build_image;
use forehand::{Archive, Config, ForehandError, InodeKind, PathResolver};
use test_log::test;

fn archive() -> Archive {
    Archive::new(build_image(true), Config::default()).unwrap()
}

#[test]
fn dot_and_empty_components_are_ignored() {
    let archive = archive();
    let inode = archive.open("//large_dir/./f00").unwrap();
    assert_eq!(inode.kind(), InodeKind::BasicFile);
    assert_eq!(inode.inode_number(), 3);
}

#[test]
fn dotdot_pops_and_stops_at_root() {
    let archive = archive();
    let inode = archive.open("/large_dir/../a").unwrap();
    assert_eq!(inode.read_to_vec().unwrap(), b"a\n");

    // cannot escape the root
    let inode = archive.open("/../../a").unwrap();
    assert_eq!(inode.read_to_vec().unwrap(), b"a\n");
}

#[test]
fn absolute_symlink_resets_to_root() {
    let archive = archive();
    // link -> /, so this path visits the root twice
    let inode = archive.open("/large_dir/link/large_dir/link").unwrap();
    assert!(inode.kind().is_directory());

    let mut names = Vec::new();
    let mut dir = inode.dir().unwrap();
    while let Some(entry) = dir.next().unwrap() {
        names.push(entry.name_str().unwrap().to_string());
    }
    assert_eq!(names, ["a", "b", "large_dir"]);
}

#[test]
fn symlink_not_followed_without_follow() {
    let archive = archive();
    let inode = archive.open_no_follow("/large_dir/link").unwrap();
    assert_eq!(inode.kind(), InodeKind::BasicSymlink);
    assert_eq!(inode.symlink_target().unwrap(), b"/");
    assert_eq!(inode.file_size(), 1);
}

#[test]
fn symlink_followed_with_follow() {
    let archive = archive();
    let inode = archive.open("/large_dir/link").unwrap();
    assert!(inode.kind().is_directory());
}

#[test]
fn intermediate_symlinks_always_follow() {
    let archive = archive();
    // `link` is not the final component, so no-follow still walks it
    let inode = archive.open_no_follow("/large_dir/link/a").unwrap();
    assert_eq!(inode.read_to_vec().unwrap(), b"a\n");
}

#[test]
fn symlink_cycle_is_too_deep() {
    let archive = archive();
    assert!(matches!(
        archive.open("/large_dir/loop").err(),
        Some(ForehandError::TooDeep)
    ));
}

#[test]
fn resolver_is_reusable() {
    let archive = archive();
    let mut resolver = PathResolver::new(&archive);
    let inode = resolver.resolve("large_dir", true).unwrap();
    assert!(inode.kind().is_directory());
    // relative to the directory reached above
    let inode = resolver.resolve("zzz", true).unwrap();
    assert_eq!(inode.read_to_vec().unwrap(), b"zzz\n");
    // and absolute paths reset it
    let inode = resolver.resolve("/a", true).unwrap();
    assert_eq!(inode.read_to_vec().unwrap(), b"a\n");
}

#[test]
fn walking_through_a_file_is_not_a_directory() {
    let archive = archive();
    assert!(matches!(
        archive.open("/a/impossible").err(),
        Some(ForehandError::NotADirectory)
    ));
}
