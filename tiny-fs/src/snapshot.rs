//! # 快照层
//!
//! 在保留目录 `/.snapshots` 下维护整棵树的时间点副本。
//! 复制是真实的：普通文件逐块分配新块并拷贝字节，绝不与源共享块；
//! 目录递归，符号链接按目标重建。
//!
//! 复制根树时跳过 `/.snapshots` 自身，否则快照会把历史快照
//! （包括正在建立的这一个）也卷进去。

use log::{debug, info};

use crate::layout::{IndirectBlock, InodeFlag, InodeKind};
use crate::tfs::TinyFileSystem;
use crate::{FsError, FsResult, ROOT_INODE};

/// 保留目录名
pub const SNAPSHOT_DIR: &str = ".snapshots";

#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub name: String,
    pub creation_time: i64,
    pub blocks_used: u32,
}

pub struct SnapshotManager<'fs> {
    fs: &'fs mut TinyFileSystem,
}

impl<'fs> SnapshotManager<'fs> {
    pub fn new(fs: &'fs mut TinyFileSystem) -> Self {
        Self { fs }
    }

    /// 建立名为 `name` 的快照；重名失败
    pub fn create_snapshot(&mut self, name: &str) -> FsResult<()> {
        let snapshot_dir = self.ensure_snapshot_dir()?;
        if self.fs.dir_entry_of(snapshot_dir, name).is_ok() {
            return Err(FsError::AlreadyExists(name.into()));
        }

        let snapshot_root = self.fs.mkdir_in(snapshot_dir, name)?;
        self.fs.inodes[snapshot_root as usize].set_flag(InodeFlag::Snapshot);
        self.fs.write_inode_block(snapshot_root)?;

        debug!("snapshot: copying root tree into /.snapshots/{name}");
        self.copy_directory(ROOT_INODE, snapshot_root)?;
        info!("snapshot: created '{name}'");
        Ok(())
    }

    /// 枚举 `/.snapshots` 下的快照
    pub fn list_snapshots(&mut self) -> FsResult<Vec<SnapshotInfo>> {
        let snapshot_dir = self.ensure_snapshot_dir()?;

        let mut infos = Vec::new();
        for entry in self.fs.get_dir_entries(snapshot_dir)? {
            if entry.name_bytes() == b"." || entry.name_bytes() == b".." {
                continue;
            }
            let inode_num = entry.inode_num() as u32;
            let Some(inode) = self.fs.get_inode(inode_num) else {
                continue;
            };
            // 只认打了快照标志的目录，手工放进来的东西不算
            if !inode.is_dir() || !inode.flags().contains(InodeFlag::Snapshot) {
                continue;
            }
            infos.push(SnapshotInfo {
                name: entry.name(),
                creation_time: inode.creation_time,
                blocks_used: self.count_blocks(inode_num)?,
            });
        }
        Ok(infos)
    }

    pub fn get_snapshot_info(&mut self, name: &str) -> FsResult<SnapshotInfo> {
        let snapshot_dir = self.ensure_snapshot_dir()?;
        let inode_num = self.fs.lookup(snapshot_dir, name)?;
        let inode = self.fs.inode(inode_num)?;
        Ok(SnapshotInfo {
            name: name.into(),
            creation_time: inode.creation_time,
            blocks_used: self.count_blocks(inode_num)?,
        })
    }

    /// 递归删除快照子树并摘除名字
    pub fn delete_snapshot(&mut self, name: &str) -> FsResult<()> {
        let snapshot_dir = self.ensure_snapshot_dir()?;
        self.fs.lookup(snapshot_dir, name)?;
        self.fs.remove_tree_entry(snapshot_dir, name)?;
        info!("snapshot: deleted '{name}'");
        Ok(())
    }

    /// 回滚到快照：清空根树（保留 `/.snapshots`），再把快照树拷回根
    pub fn restore_snapshot(&mut self, name: &str) -> FsResult<()> {
        let snapshot_dir = self.ensure_snapshot_dir()?;
        let snapshot_root = self.fs.lookup(snapshot_dir, name)?;

        let doomed: Vec<String> = self
            .fs
            .get_dir_entries(ROOT_INODE)?
            .iter()
            .filter(|e| {
                e.name_bytes() != b"."
                    && e.name_bytes() != b".."
                    && e.name_bytes() != SNAPSHOT_DIR.as_bytes()
            })
            .map(|e| e.name())
            .collect();
        for name in &doomed {
            self.fs.remove_tree_entry(ROOT_INODE, name)?;
        }

        self.copy_directory(snapshot_root, ROOT_INODE)?;
        info!("snapshot: restored '{name}'");
        Ok(())
    }
}

impl SnapshotManager<'_> {
    /// 按需建立保留目录
    fn ensure_snapshot_dir(&mut self) -> FsResult<u32> {
        if let Ok(inode_num) = self.fs.lookup(ROOT_INODE, SNAPSHOT_DIR) {
            return Ok(inode_num);
        }
        self.fs.mkdir_in(ROOT_INODE, SNAPSHOT_DIR)
    }

    /// 逐项复制 `src_dir` 到 `dest_dir`；根目录下跳过保留目录
    fn copy_directory(&mut self, src_dir: u32, dest_dir: u32) -> FsResult<()> {
        let entries = self.fs.get_dir_entries(src_dir)?;

        for entry in entries {
            if entry.name_bytes() == b"." || entry.name_bytes() == b".." {
                continue;
            }
            if src_dir == ROOT_INODE && entry.name_bytes() == SNAPSHOT_DIR.as_bytes() {
                continue;
            }

            let name = entry.name();
            let src = entry.inode_num() as u32;
            match self.fs.inode(src)?.kind() {
                Some(InodeKind::File) => {
                    // 新块、新字节，不与源共享
                    let data = self.fs.read_inode_data(src)?;
                    let dest = self.fs.create_in(dest_dir, &name)?;
                    self.fs.write_inode_data(dest, &data)?;
                }
                Some(InodeKind::Directory) => {
                    let dest = self.fs.mkdir_in(dest_dir, &name)?;
                    self.copy_directory(src, dest)?;
                }
                Some(InodeKind::Symlink) => {
                    let target = self.fs.symlink_target(src)?;
                    self.fs.symlink_in(dest_dir, &target, &name)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// 子树占用的块数：直接块、间接块自身及其引用的数据块
    fn count_blocks(&self, inode_num: u32) -> FsResult<u32> {
        let inode = self.fs.inode(inode_num)?.clone();
        let mut blocks = inode.direct_blocks.iter().filter(|&&b| b != 0).count() as u32;

        if inode.indirect_block != 0 {
            blocks += 1;
            let indirect = IndirectBlock::decode(&self.fs.read_block(inode.indirect_block)?);
            blocks += indirect.live().count() as u32;
        }

        if inode.is_dir() {
            for entry in self.fs.get_dir_entries(inode_num)? {
                if entry.name_bytes() == b"." || entry.name_bytes() == b".." {
                    continue;
                }
                blocks += self.count_blocks(entry.inode_num() as u32)?;
            }
        }
        Ok(blocks)
    }
}
