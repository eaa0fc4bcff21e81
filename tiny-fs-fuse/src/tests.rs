use std::path::PathBuf;
use std::sync::Arc;

use tiny_fs::journal::{Journal, RecordHeader, RecordKind};
use tiny_fs::layout::InodeKind;
use tiny_fs::{
    BlockDevice, FileSystemCheck, FsError, IssueKind, SnapshotManager, TinyFileSystem, BLOCK_SIZE,
    JOURNAL_BLOCKS, JOURNAL_START, ROOT_INODE,
};

use crate::BlockFile;

fn image_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tiny-fs-{}-{}.img", tag, std::process::id()))
}

/// 新镜像：建文件、格式化，返回设备句柄
fn fresh(tag: &str) -> Arc<BlockFile> {
    let dev = BlockFile::create(image_path(tag)).unwrap();
    let dyn_dev: Arc<dyn BlockDevice> = dev.clone();
    TinyFileSystem::format(&dyn_dev).unwrap();
    dev
}

fn mount(dev: &Arc<BlockFile>) -> TinyFileSystem {
    TinyFileSystem::mount(dev.clone()).unwrap()
}

fn names(fs: &TinyFileSystem) -> Vec<String> {
    fs.ls().unwrap().iter().map(|e| e.name()).collect()
}

#[test]
fn write_read_survives_remount() {
    let dev = fresh("persist");

    let mut fs = mount(&dev);
    fs.create("a.txt").unwrap();
    fs.write("a.txt", b"hello").unwrap();
    assert_eq!(b"hello".to_vec(), fs.read("a.txt").unwrap());
    fs.unmount().unwrap();

    let mut fs = mount(&dev);
    assert_eq!(b"hello".to_vec(), fs.read("a.txt").unwrap());
    let inode_num = fs.find_inode_by_path("/a.txt").unwrap();
    assert_eq!(5, fs.get_inode(inode_num).unwrap().size);
    fs.unmount().unwrap();
}

#[test]
fn mkdir_cd_ls() {
    let dev = fresh("mkdir");
    let mut fs = mount(&dev);

    fs.mkdir("d").unwrap();
    fs.cd("d").unwrap();
    fs.create("x").unwrap();
    fs.cd("..").unwrap();

    let entries = fs.ls().unwrap();
    let d = entries.iter().find(|e| e.name_bytes() == b"d").unwrap();
    let d_inode = fs.get_inode(d.inode_num() as u32).unwrap();
    assert_eq!(Some(InodeKind::Directory), d_inode.kind());

    fs.cd("d").unwrap();
    let inside = names(&fs);
    for expected in [".", "..", "x"] {
        assert!(inside.iter().any(|n| n == expected), "missing {expected}");
    }

    // `.` 指向自身，`..` 指向父目录
    let dot = fs.find_inode_by_path(".").unwrap();
    let dotdot = fs.find_inode_by_path("..").unwrap();
    assert_eq!(d.inode_num() as u32, dot);
    assert_eq!(ROOT_INODE, dotdot);
}

#[test]
fn hard_links_share_and_release_the_inode() {
    let dev = fresh("links");
    let mut fs = mount(&dev);

    fs.create("a").unwrap();
    fs.write("a", b"payload").unwrap();
    fs.link("a", "b").unwrap();

    let inode_num = fs.find_inode_by_path("a").unwrap();
    assert_eq!(inode_num, fs.find_inode_by_path("b").unwrap());
    assert_eq!(2, fs.get_inode(inode_num).unwrap().link_count);

    // 解除一个名字：目录项被摘除、链接数递减
    fs.unlink("a").unwrap();
    assert!(fs.find_inode_by_path("a").is_none());
    assert_eq!(1, fs.get_inode(inode_num).unwrap().link_count);
    assert_eq!(b"payload".to_vec(), fs.read("b").unwrap());

    // 最后一个名字消失后 inode 与数据块一并回收
    fs.unlink("b").unwrap();
    assert!(fs.find_inode_by_path("b").is_none());
    assert!(fs.get_inode(inode_num).unwrap().is_free());

    let issues = FileSystemCheck::new(&mut fs).check().unwrap();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn link_refuses_directories() {
    let dev = fresh("linkdir");
    let mut fs = mount(&dev);
    fs.mkdir("d").unwrap();
    assert!(matches!(fs.link("d", "d2"), Err(FsError::IsDirectory)));
    assert!(matches!(fs.unlink("d"), Err(FsError::IsDirectory)));
}

#[test]
fn large_file_spills_into_the_indirect_block() {
    let dev = fresh("large");
    let mut fs = mount(&dev);

    let len = 10 * BLOCK_SIZE + 3;
    let data = vec![0xAA; len];
    fs.create("big").unwrap();
    fs.write("big", &data).unwrap();

    let read_back = fs.read("big").unwrap();
    assert_eq!(len, read_back.len());
    assert!(read_back.iter().all(|&b| b == 0xAA));

    let inode_num = fs.find_inode_by_path("big").unwrap();
    let inode = fs.get_inode(inode_num).unwrap();
    assert_eq!(len as u32, inode.size);
    assert_ne!(0, inode.indirect_block);

    // 覆盖写回到小体量后间接块被释放
    fs.write("big", b"tiny").unwrap();
    let inode = fs.get_inode(inode_num).unwrap();
    assert_eq!(0, inode.indirect_block);
    assert_eq!(b"tiny".to_vec(), fs.read("big").unwrap());

    let issues = FileSystemCheck::new(&mut fs).check().unwrap();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn directory_exhausts_its_ten_direct_blocks() {
    let dev = fresh("dirfull");
    let mut fs = mount(&dev);

    fs.create("seed").unwrap();
    // 每块16个目录项，十个直接块共160槽；`.`、`..` 与 seed 已占3个
    for i in 0..157 {
        fs.link("seed", &format!("l{i:03}")).unwrap();
    }
    assert!(matches!(
        fs.link("seed", "one-too-many"),
        Err(FsError::NoSpaceInDirectory)
    ));
}

#[test]
fn symlink_roundtrip() {
    let dev = fresh("symlink");
    let mut fs = mount(&dev);

    fs.symlink("../data/file.bin", "ln").unwrap();
    assert_eq!("../data/file.bin", fs.read_link("ln").unwrap());

    let inode_num = fs.find_inode_by_path("ln").unwrap();
    let inode = fs.get_inode(inode_num).unwrap();
    assert_eq!(Some(InodeKind::Symlink), inode.kind());
    assert_eq!("../data/file.bin".len() as u32, inode.size);

    fs.unmount().unwrap();
    let mut fs = mount(&dev);
    assert_eq!("../data/file.bin", fs.read_link("ln").unwrap());
}

#[test]
fn chmod_replaces_only_permission_bits() {
    let dev = fresh("chmod");
    let mut fs = mount(&dev);

    fs.create("f").unwrap();
    fs.chmod("f", 0o600).unwrap();
    fs.chown("f", 2, 3).unwrap();
    fs.unmount().unwrap();

    let fs = mount(&dev);
    let inode_num = fs.find_inode_by_path("f").unwrap();
    let inode = fs.get_inode(inode_num).unwrap();
    assert_eq!(Some(InodeKind::File), inode.kind());
    assert_eq!(0o600, inode.perm());
    assert_eq!((2, 3), (inode.uid, inode.gid));
    fs.unmount().unwrap();
}

#[test]
fn freed_blocks_are_reused_most_recent_first() {
    let dev = fresh("lifo");
    let mut fs = mount(&dev);

    fs.create("x").unwrap();
    fs.write("x", b"one block").unwrap();
    let inode_num = fs.find_inode_by_path("x").unwrap();
    let block = fs.get_inode(inode_num).unwrap().direct_blocks[0];

    fs.unlink("x").unwrap();
    fs.create("y").unwrap();
    fs.write("y", b"reuses it").unwrap();
    let inode_num = fs.find_inode_by_path("y").unwrap();
    assert_eq!(block, fs.get_inode(inode_num).unwrap().direct_blocks[0]);
}

#[test]
fn out_of_space_surfaces_after_partial_write() {
    let dev = fresh("enospc");
    let mut fs = mount(&dev);

    // 单文件最大体量：10个直接块 + 128个间接槽
    let chunk = vec![0x5A; (10 + 128) * BLOCK_SIZE];
    let mut hit = false;

    for i in 0..40 {
        let name = format!("f{i}");
        fs.create(&name).unwrap();
        match fs.write(&name, &chunk) {
            Ok(()) => {}
            Err(FsError::OutOfSpace) => {
                // 部分状态照常提交：size 如实反映已落盘的字节
                let inode_num = fs.find_inode_by_path(&name).unwrap();
                let size = fs.get_inode(inode_num).unwrap().size as usize;
                assert!(size < chunk.len());
                let data = fs.read(&name).unwrap();
                assert_eq!(size, data.len());
                assert!(data.iter().all(|&b| b == 0x5A));
                hit = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(hit, "allocator never ran out of space");
}

#[test]
fn journal_state_machine_tolerates_misuse() {
    let dev = fresh("journal-state");
    let dyn_dev: Arc<dyn BlockDevice> = dev.clone();

    let mut journal = Journal::new(JOURNAL_START, JOURNAL_BLOCKS);
    // 事务外的log与commit都是空操作
    journal
        .log_metadata(dyn_dev.as_ref(), 0, &[0u8; BLOCK_SIZE])
        .unwrap();
    journal.commit(dyn_dev.as_ref()).unwrap();
    assert!(!journal.is_active());

    journal.begin(dyn_dev.as_ref()).unwrap();
    // 二次begin只是警告
    journal.begin(dyn_dev.as_ref()).unwrap();
    assert!(journal.is_active());
    journal.commit(dyn_dev.as_ref()).unwrap();
    assert!(!journal.is_active());
}

/// 把一条记录头写进日志区的指定块
fn put_record(dev: &Arc<BlockFile>, offset: usize, kind: RecordKind, block_num: i32, size: i32) {
    let mut buf = [0u8; BLOCK_SIZE];
    RecordHeader::new(kind, block_num, size).encode(&mut buf);
    dev.write_block(JOURNAL_START + offset, &buf).unwrap();
}

#[test]
fn mount_completes_a_committed_checkpoint() {
    let dev = fresh("redo");
    let mut fs = mount(&dev);
    fs.create("a").unwrap();
    fs.write("a", b"old").unwrap();
    let inode_num = fs.find_inode_by_path("a").unwrap();
    let data_block = fs.get_inode(inode_num).unwrap().direct_blocks[0];
    fs.unmount().unwrap();

    // 模拟COMMIT之后、检查点之前的崩溃现场
    put_record(&dev, 0, RecordKind::Begin, 1, 0);
    put_record(&dev, 1, RecordKind::Data, data_block as i32, BLOCK_SIZE as i32);
    let mut payload = [0u8; BLOCK_SIZE];
    payload[..3].copy_from_slice(b"new");
    dev.write_block(JOURNAL_START + 2, &payload).unwrap();
    put_record(&dev, 3, RecordKind::Commit, 1, 0);

    let mut fs = mount(&dev);
    assert_eq!(b"new".to_vec(), fs.read("a").unwrap());

    // 恢复后日志区整体清零
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(JOURNAL_START, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn mount_discards_an_uncommitted_transaction() {
    let dev = fresh("undo");
    let mut fs = mount(&dev);
    fs.create("a").unwrap();
    fs.write("a", b"old").unwrap();
    let inode_num = fs.find_inode_by_path("a").unwrap();
    let data_block = fs.get_inode(inode_num).unwrap().direct_blocks[0];
    fs.unmount().unwrap();

    // 最后一条负载之后崩溃，COMMIT 缺席
    put_record(&dev, 0, RecordKind::Begin, 1, 0);
    put_record(&dev, 1, RecordKind::Data, data_block as i32, BLOCK_SIZE as i32);
    let mut payload = [0u8; BLOCK_SIZE];
    payload[..3].copy_from_slice(b"new");
    dev.write_block(JOURNAL_START + 2, &payload).unwrap();

    let mut fs = mount(&dev);
    assert_eq!(b"old".to_vec(), fs.read("a").unwrap());

    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(JOURNAL_START, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn fsck_is_clean_on_a_fresh_image() {
    let dev = fresh("fsck-clean");
    let mut fs = mount(&dev);
    let issues = FileSystemCheck::new(&mut fs).check().unwrap();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn fsck_is_clean_after_a_workload() {
    let dev = fresh("fsck-workload");
    let mut fs = mount(&dev);

    fs.mkdir("docs").unwrap();
    fs.cd("docs").unwrap();
    fs.create("report").unwrap();
    fs.write("report", &vec![7u8; 12 * BLOCK_SIZE]).unwrap();
    fs.symlink("/docs/report", "latest").unwrap();
    fs.cd("/").unwrap();
    fs.create("tmp").unwrap();
    fs.link("tmp", "tmp2").unwrap();
    fs.unlink("tmp").unwrap();
    fs.unlink("tmp2").unwrap();

    let issues = FileSystemCheck::new(&mut fs).check().unwrap();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn fsck_moves_orphans_into_lost_found() {
    let dev = fresh("fsck-orphan");
    let mut fs = mount(&dev);
    fs.create("victim").unwrap();
    fs.write("victim", b"survivor").unwrap();
    let victim = fs.find_inode_by_path("victim").unwrap();
    let root_block = fs.get_inode(ROOT_INODE).unwrap().direct_blocks[0];
    fs.unmount().unwrap();

    // 直接在根目录块里把名字项砸成墓碑，制造孤儿
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(root_block as usize, &mut buf).unwrap();
    let mut hit = false;
    for chunk in buf.chunks_exact_mut(32) {
        if &chunk[..6] == b"victim" && chunk[6] == 0 {
            chunk[28..32].copy_from_slice(&(-1i32).to_le_bytes());
            hit = true;
        }
    }
    assert!(hit);
    dev.write_block(root_block as usize, &buf).unwrap();

    let mut fs = mount(&dev);
    assert!(fs.find_inode_by_path("/victim").is_none());

    let mut fsck = FileSystemCheck::new(&mut fs);
    let issues = fsck.check().unwrap();
    assert!(issues
        .iter()
        .any(|i| i.kind == IssueKind::OrphanedInode && i.inode_num == Some(victim)));
    assert!(issues
        .iter()
        .any(|i| i.kind == IssueKind::IncorrectLinkCount && i.inode_num == Some(victim)));

    fsck.fix_all_issues().unwrap();
    let remaining = fsck.check().unwrap();
    assert!(
        remaining.iter().all(|i| !i.can_fix),
        "fixable issues survived repair: {remaining:?}"
    );

    // 孤儿以合成名住进 /lost+found，内容完好
    let rescued = format!("/lost+found/#{victim}");
    assert_eq!(Some(victim), fs.find_inode_by_path(&rescued));
    assert_eq!(b"survivor".to_vec(), fs.read(&rescued).unwrap());
}

#[test]
fn fsck_zeroes_invalid_block_pointers() {
    let dev = fresh("fsck-badptr");
    let mut fs = mount(&dev);
    fs.create("f").unwrap();
    fs.write("f", b"x").unwrap();
    let inode_num = fs.find_inode_by_path("f").unwrap();
    fs.unmount().unwrap();

    // 在inode表里伪造一个越界指针
    let table_block = 1 + inode_num as usize / 4;
    let offset = (inode_num as usize % 4) * 128;
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(table_block, &mut buf).unwrap();
    // direct_blocks[1] 位于 inode 记录内偏移 44 + 4
    buf[offset + 48..offset + 52].copy_from_slice(&9999u32.to_le_bytes());
    dev.write_block(table_block, &buf).unwrap();

    let mut fs = mount(&dev);
    let mut fsck = FileSystemCheck::new(&mut fs);
    let issues = fsck.check().unwrap();
    assert!(issues
        .iter()
        .any(|i| i.kind == IssueKind::InvalidBlockPointer && i.inode_num == Some(inode_num)));

    fsck.fix_all_issues().unwrap();
    let remaining = fsck.check().unwrap();
    assert!(remaining.iter().all(|i| !i.can_fix));
    assert_eq!(0, fs.get_inode(inode_num).unwrap().direct_blocks[1]);
}

#[test]
fn fsck_frees_inodes_with_invalid_modes() {
    let dev = fresh("fsck-badmode");
    let fs = mount(&dev);
    fs.unmount().unwrap();

    // inode 5 的 mode 写成无法解析的类型
    let table_block = 1 + 5 / 4;
    let offset = (5 % 4) * 128;
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(table_block, &mut buf).unwrap();
    buf[offset..offset + 4].copy_from_slice(&(7u32 << 9).to_le_bytes());
    dev.write_block(table_block, &buf).unwrap();

    let mut fs = mount(&dev);
    let mut fsck = FileSystemCheck::new(&mut fs);
    let issues = fsck.check().unwrap();
    assert!(issues
        .iter()
        .any(|i| i.kind == IssueKind::InvalidInode && i.inode_num == Some(5)));

    fsck.fix_all_issues().unwrap();
    let remaining = fsck.check().unwrap();
    assert!(remaining.iter().all(|i| !i.can_fix));
    assert!(fs.get_inode(5).unwrap().is_free());
}

#[test]
fn snapshots_are_isolated_from_later_writes() {
    let dev = fresh("snapshot");
    let mut fs = mount(&dev);
    fs.create("a.txt").unwrap();
    fs.write("a.txt", b"v1").unwrap();

    let before = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    SnapshotManager::new(&mut fs).create_snapshot("s1").unwrap();

    fs.write("a.txt", b"v2-less-isolated").unwrap();

    let mut snapshots = SnapshotManager::new(&mut fs);
    let infos = snapshots.list_snapshots().unwrap();
    assert_eq!(1, infos.len());
    assert_eq!("s1", infos[0].name);
    assert!(infos[0].creation_time >= before);
    assert!(infos[0].blocks_used > 0);

    // 改动根树不会影响快照里的副本
    assert_eq!(b"v1".to_vec(), fs.read("/.snapshots/s1/a.txt").unwrap());
    assert_eq!(b"v2-less-isolated".to_vec(), fs.read("/a.txt").unwrap());

    // 块也互不共享
    let src = fs.find_inode_by_path("/a.txt").unwrap();
    let copy = fs.find_inode_by_path("/.snapshots/s1/a.txt").unwrap();
    assert_ne!(
        fs.get_inode(src).unwrap().direct_blocks[0],
        fs.get_inode(copy).unwrap().direct_blocks[0]
    );

    let issues = FileSystemCheck::new(&mut fs).check().unwrap();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn snapshot_names_must_be_unique() {
    let dev = fresh("snapshot-dup");
    let mut fs = mount(&dev);
    let mut snapshots = SnapshotManager::new(&mut fs);
    snapshots.create_snapshot("s1").unwrap();
    assert!(matches!(
        snapshots.create_snapshot("s1"),
        Err(FsError::AlreadyExists(_))
    ));
}

#[test]
fn deleting_a_snapshot_releases_its_tree() {
    let dev = fresh("snapshot-del");
    let mut fs = mount(&dev);
    fs.mkdir("d").unwrap();
    fs.cd("d").unwrap();
    fs.create("f").unwrap();
    fs.write("f", &vec![1u8; 3 * BLOCK_SIZE]).unwrap();
    fs.cd("/").unwrap();

    let mut snapshots = SnapshotManager::new(&mut fs);
    snapshots.create_snapshot("s1").unwrap();
    snapshots.delete_snapshot("s1").unwrap();
    assert!(snapshots.list_snapshots().unwrap().is_empty());
    assert!(matches!(
        snapshots.get_snapshot_info("s1"),
        Err(FsError::NotFound)
    ));

    let issues = FileSystemCheck::new(&mut fs).check().unwrap();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn restore_brings_back_the_snapshotted_tree() {
    let dev = fresh("snapshot-restore");
    let mut fs = mount(&dev);
    fs.create("keep.txt").unwrap();
    fs.write("keep.txt", b"v1").unwrap();

    SnapshotManager::new(&mut fs).create_snapshot("s1").unwrap();

    fs.write("keep.txt", b"v2").unwrap();
    fs.create("extra.txt").unwrap();

    SnapshotManager::new(&mut fs).restore_snapshot("s1").unwrap();

    assert_eq!(b"v1".to_vec(), fs.read("/keep.txt").unwrap());
    assert!(fs.find_inode_by_path("/extra.txt").is_none());
    // 保留目录与快照本身不受回滚影响
    assert_eq!(b"v1".to_vec(), fs.read("/.snapshots/s1/keep.txt").unwrap());

    let issues = FileSystemCheck::new(&mut fs).check().unwrap();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}
