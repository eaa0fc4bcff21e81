use tiny_fs::layout::{DirEntry, Inode, IndirectBlock, InodeKind, Superblock};
use tiny_fs::{BLOCK_SIZE, DATA_START, INODE_BLOCKS, JOURNAL_START};

#[test]
fn geometry() {
    assert_eq!(128, Inode::SIZE);
    assert_eq!(32, DirEntry::SIZE);
    assert_eq!(16, Superblock::SIZE);
    assert_eq!(32, INODE_BLOCKS);
    assert_eq!(33, JOURNAL_START);
    assert_eq!(133, DATA_START);
    assert_eq!(0, BLOCK_SIZE % DirEntry::SIZE);
    assert_eq!(0, BLOCK_SIZE % Inode::SIZE);
}

#[test]
fn superblock_codec() {
    let sb = Superblock::new(DATA_START as i32);
    let mut buf = [0u8; BLOCK_SIZE];
    sb.encode(&mut buf);

    // 四个小端32位整数按声明顺序排布
    assert_eq!(4096u32.to_le_bytes().as_slice(), &buf[0..4]);
    assert_eq!(128u32.to_le_bytes().as_slice(), &buf[4..8]);
    assert_eq!(32u32.to_le_bytes().as_slice(), &buf[8..12]);
    assert_eq!(133i32.to_le_bytes().as_slice(), &buf[12..16]);

    let decoded = Superblock::decode(&buf);
    assert!(decoded.is_valid());
    assert_eq!(sb.free_block_list_head, decoded.free_block_list_head);

    let exhausted = Superblock::new(-1);
    let mut buf = [0u8; BLOCK_SIZE];
    exhausted.encode(&mut buf);
    assert_eq!(-1, Superblock::decode(&buf).free_block_list_head);
}

#[test]
fn inode_codec() {
    let mut inode = Inode::default();
    inode.init(InodeKind::File, 0o644, 1_700_000_000);
    inode.size = 5123;
    inode.link_count = 3;
    inode.direct_blocks = [133, 134, 0, 0, 0, 0, 0, 0, 0, 0];
    inode.indirect_block = 200;

    let mut buf = [0u8; Inode::SIZE];
    inode.encode(&mut buf);
    let decoded = Inode::decode(&buf);

    assert_eq!(Some(InodeKind::File), decoded.kind());
    assert_eq!(0o644, decoded.perm());
    assert_eq!(5123, decoded.size);
    assert_eq!(3, decoded.link_count);
    assert_eq!(1_700_000_000, decoded.creation_time);
    assert_eq!([133, 134, 0, 0, 0, 0, 0, 0, 0, 0], decoded.direct_blocks);
    assert_eq!(200, decoded.indirect_block);
}

#[test]
fn mode_keeps_kind_through_chmod() {
    let mut inode = Inode::default();
    inode.init(InodeKind::Directory, 0o755, 0);
    inode.set_perm(0o700);
    assert_eq!(Some(InodeKind::Directory), inode.kind());
    assert_eq!(0o700, inode.perm());
}

#[test]
fn dir_entry_codec() {
    let entry = DirEntry::new("hello.txt", 7);
    let mut buf = [0u8; DirEntry::SIZE];
    entry.encode(&mut buf);
    let decoded = DirEntry::decode(&buf);

    assert_eq!(b"hello.txt", decoded.name_bytes());
    assert_eq!(7, decoded.inode_num());
    assert!(!decoded.is_empty());

    let mut buf = [0u8; DirEntry::SIZE];
    DirEntry::tombstone().encode(&mut buf);
    assert!(DirEntry::decode(&buf).is_empty());
    assert_eq!((-1i32).to_le_bytes().as_slice(), &buf[28..32]);
}

#[test]
fn indirect_codec() {
    let mut indirect = IndirectBlock::default();
    indirect.slots[0] = 140;
    indirect.slots[127] = 4095;

    let mut buf = [0u8; BLOCK_SIZE];
    indirect.encode(&mut buf);
    let decoded = IndirectBlock::decode(&buf);

    assert_eq!(vec![140, 4095], decoded.live().collect::<Vec<_>>());
}
