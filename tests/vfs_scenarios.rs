use std::fs;
use std::path::Path;

use tempfile::TempDir;
use zipvfs::vfs::MOUNT_SECTION;
use zipvfs::{Config, OpenMode, Vfs, VfsError, ZipArchive};

fn make_archive(path: &Path, files: &[(&str, &[u8])]) {
    let mut archive = ZipArchive::open(path);
    for (name, data) in files {
        let handle = archive.new_file(name, data.len(), true).unwrap();
        assert!(archive.append(&handle, data));
    }
    archive.flush().unwrap();
}

fn root(dir: &TempDir) -> String {
    dir.path().display().to_string()
}

#[test]
fn writes_land_in_the_first_directory_binding() {
    let dir = TempDir::new().unwrap();
    let root = root(&dir);
    let mut vfs = Vfs::new(Config::new());
    vfs.mount("/data", &format!("{root}/dir/, {root}/pics.zip")).unwrap();

    vfs.write_file("/data/readme.txt", b"hi").unwrap();

    assert_eq!(fs::read(dir.path().join("dir/readme.txt")).unwrap(), b"hi");
    assert_eq!(vfs.read_file("/data/readme.txt").unwrap(), b"hi");
    assert_eq!(vfs.real_path("/data/readme.txt").unwrap(), dir.path().join("dir/readme.txt"));
    // The archive binding was never needed
    assert!(!dir.path().join("pics.zip").exists());
}

#[test]
fn archive_listing_synthesizes_directories() {
    let dir = TempDir::new().unwrap();
    let zip = dir.path().join("assets.zip");
    make_archive(&zip, &[("a/b.txt", b"bee"), ("a/c/d.txt", b"dee")]);

    let mut vfs = Vfs::new(Config::new());
    vfs.mount("/mount", &zip.display().to_string()).unwrap();

    assert_eq!(vfs.find_files("/mount/a/"), ["/mount/a/b.txt", "/mount/a/c/"]);
    assert_eq!(vfs.find_files("/mount/"), ["/mount/a/"]);
    assert_eq!(vfs.find_files("/mount/a/c/*.txt"), ["/mount/a/c/d.txt"]);
    assert!(vfs.exists("/mount/a/c/"));
    assert_eq!(vfs.read_file("/mount/a/c/d.txt").unwrap(), b"dee");
}

#[test]
fn listing_merges_bindings_and_mount_points() {
    let dir = TempDir::new().unwrap();
    let root = root(&dir);
    fs::create_dir_all(dir.path().join("loose")).unwrap();
    fs::write(dir.path().join("loose/one.txt"), b"1").unwrap();
    fs::write(dir.path().join("loose/notes.md"), b"#").unwrap();
    make_archive(&dir.path().join("packed.zip"), &[("two.txt", b"2"), ("one.txt", b"shadowed")]);

    let mut vfs = Vfs::new(Config::new());
    vfs.mount("/data", &format!("{root}/loose/, {root}/packed.zip")).unwrap();
    vfs.mount("/data/extra", &format!("{root}/loose/")).unwrap();

    assert_eq!(
        vfs.find_files("/data/"),
        ["/data/extra/", "/data/notes.md", "/data/one.txt", "/data/two.txt"]
    );
    assert_eq!(vfs.find_files("/data/*.txt"), ["/data/one.txt", "/data/two.txt"]);
    assert_eq!(vfs.find_files("/"), ["/data/"]);
    // Earlier bindings shadow later ones
    assert_eq!(vfs.read_file("/data/one.txt").unwrap(), b"1");
    assert_eq!(vfs.read_file("/data/two.txt").unwrap(), b"2");
}

#[test]
fn longest_mount_prefix_wins() {
    let dir = TempDir::new().unwrap();
    let root = root(&dir);
    for sub in ["base", "maps", "db"] {
        fs::create_dir_all(dir.path().join(sub)).unwrap();
        fs::write(dir.path().join(sub).join("which.txt"), sub).unwrap();
    }

    let mut vfs = Vfs::new(Config::new());
    vfs.mount("/data", &format!("{root}/base/")).unwrap();
    vfs.mount("/data/maps", &format!("{root}/maps/")).unwrap();
    vfs.mount("/database", &format!("{root}/db/")).unwrap();

    for _ in 0..3 {
        assert_eq!(vfs.read_file("/data/maps/which.txt").unwrap(), b"maps");
        assert_eq!(vfs.read_file("/data/which.txt").unwrap(), b"base");
        assert_eq!(vfs.read_file("/database/which.txt").unwrap(), b"db");
        assert_eq!(vfs.read_file("/data/../data/./maps//which.txt").unwrap(), b"maps");
    }
    assert!(matches!(vfs.read_file("/nowhere/which.txt"), Err(VfsError::NotFound(_))));
}

#[test]
fn archive_writes_are_visible_after_sync() {
    let dir = TempDir::new().unwrap();
    let zip = dir.path().join("save.zip");
    let mut vfs = Vfs::new(Config::new());
    vfs.mount("/save", &zip.display().to_string()).unwrap();

    vfs.write_file("/save/slot1.dat", b"level 3, 120 hp").unwrap();
    vfs.write_file("/save/meta/info.txt", b"saved").unwrap();
    assert!(vfs.sync());

    let mut archive = ZipArchive::open(&zip);
    assert_eq!(archive.read("slot1.dat").unwrap(), b"level 3, 120 hp");
    drop(archive);

    assert!(vfs.exists("/save/slot1.dat"));
    assert_eq!(vfs.read_file("/save/meta/info.txt").unwrap(), b"saved");
    assert_eq!(vfs.find_files("/save/"), ["/save/meta/", "/save/slot1.dat"]);

    vfs.delete_file("/save/slot1.dat").unwrap();
    assert!(vfs.sync());
    assert!(!vfs.exists("/save/slot1.dat"));
    assert!(matches!(vfs.read_file("/save/slot1.dat"), Err(VfsError::NotFound(_))));
}

#[test]
fn open_file_streams_through_the_handle() {
    use zipvfs::FileOps;

    let dir = TempDir::new().unwrap();
    let zip = dir.path().join("stream.zip");
    make_archive(&zip, &[("big.txt", "0123456789".repeat(50).as_bytes())]);

    let mut vfs = Vfs::new(Config::new());
    vfs.mount("/s", &zip.display().to_string()).unwrap();

    let mut file = vfs.open("/s/big.txt", OpenMode::Read).unwrap();
    assert_eq!(file.size(), 500);
    let mut head = [0u8; 10];
    assert_eq!(file.read(&mut head), 10);
    assert_eq!(&head, b"0123456789");
    assert_eq!(file.position(), 10);
    assert!(!file.at_eof());
    assert_eq!(file.take_all_data().unwrap().len(), 500);
}

#[test]
fn mounts_survive_a_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let root = root(&dir);
    let config_path = dir.path().join("vfs.toml");

    let mut vfs = Vfs::new(Config::new());
    vfs.mount("/data", &format!("{root}/data/, {root}/data.zip")).unwrap();
    vfs.mount("/music", &format!("{root}/music/")).unwrap();
    vfs.save_mounts(&config_path).unwrap();
    let saved = vfs.mounts();

    let reloaded = Vfs::new(Config::load(&config_path).unwrap());
    assert_eq!(reloaded.mounts(), saved);
    assert_eq!(
        reloaded.config().get_str(MOUNT_SECTION, "/music").as_deref(),
        Some(format!("{root}/music/").as_str())
    );

    let mut vfs = reloaded;
    vfs.unmount("/music", None).unwrap();
    vfs.save_mounts(&config_path).unwrap();
    let reloaded = Vfs::new(Config::load(&config_path).unwrap());
    assert_eq!(reloaded.mounts().len(), 1);
}

#[test]
fn config_templates_expand_from_os_section() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("assets")).unwrap();
    fs::write(dir.path().join("assets/hello.txt"), b"hello").unwrap();

    let text = format!(
        "[VFS.{os}]\nZIPVFS_TEST_GAME_ROOT = {root:?}\n\n[VFS.Mount]\n\"/game\" = \"$(ZIPVFS_TEST_GAME_ROOT)/assets/\"\n",
        os = std::env::consts::OS,
        root = root(&dir),
    );
    let vfs = Vfs::new(Config::parse(&text).unwrap());

    assert_eq!(vfs.mounts(), [("/game/".to_string(), "$(ZIPVFS_TEST_GAME_ROOT)/assets/".to_string())]);
    assert_eq!(vfs.read_file("/game/hello.txt").unwrap(), b"hello");
}
