//! # 磁盘块管理器层
//!
//! [`TinyFileSystem`] 是一次挂载的全部状态：块设备句柄、内存中的超级块
//! 与 inode 表、当前目录以及日志对象。调度模型是单线程协作式的，
//! 任一时刻只有一个调用者，所有操作同步完成。
//!
//! 超级块随每次分配/回收立即落盘；inode 表惰性地在卸载时整体写回，
//! 事务中则以单块粒度经由日志持久化。

use std::sync::Arc;

use log::debug;

use crate::block_dev::BlockDevice;
use crate::journal::Journal;
use crate::layout::{DirEntry, Inode, InodeKind, Superblock};
use crate::{
    unix_now, DataBlock, FsError, FsResult, BLOCK_SIZE, DATA_START, INODE_BLOCKS, JOURNAL_BLOCKS,
    JOURNAL_START, NUM_BLOCKS, NUM_INODES, ROOT_INODE,
};

/// 每个 inode 表块容纳的 inode 数
pub(crate) const INODES_PER_BLOCK: usize = BLOCK_SIZE / Inode::SIZE;

pub struct TinyFileSystem {
    pub(crate) dev: Arc<dyn BlockDevice>,
    pub(crate) sb: Superblock,
    pub(crate) inodes: Vec<Inode>,
    pub(crate) journal: Journal,
    /// 当前目录，属于挂载句柄的状态而非进程全局
    pub(crate) cwd: u32,
}

impl TinyFileSystem {
    /// 初始化镜像：清零全部块、写超级块、把数据区串成空闲链表、
    /// 建立根目录（`.` 与 `..` 都指向自身）。
    pub fn format(dev: &Arc<dyn BlockDevice>) -> FsResult<()> {
        debug!("format: {NUM_BLOCKS} blocks, {NUM_INODES} inodes");

        let zero = [0u8; BLOCK_SIZE];
        for i in 0..NUM_BLOCKS {
            dev.write_block(i, &zero)?;
        }

        // 数据区从头到尾串成链表，每个空闲块的前4字节指向下一块
        for i in DATA_START..NUM_BLOCKS {
            let next: i32 = if i == NUM_BLOCKS - 1 { -1 } else { i as i32 + 1 };
            let mut buf = [0u8; BLOCK_SIZE];
            buf[..4].copy_from_slice(&next.to_le_bytes());
            dev.write_block(i, &buf)?;
        }

        let mut fs = Self {
            dev: Arc::clone(dev),
            sb: Superblock::new(DATA_START as i32),
            inodes: vec![Inode::default(); NUM_INODES],
            journal: Journal::new(JOURNAL_START, JOURNAL_BLOCKS),
            cwd: ROOT_INODE,
        };
        fs.write_superblock()?;

        let now = unix_now();
        fs.inodes[ROOT_INODE as usize].init(InodeKind::Directory, 0o755, now);
        // 自身的 `.` 加上自身的 `..`
        fs.inodes[ROOT_INODE as usize].link_count = 2;
        fs.add_dir_entry(ROOT_INODE, ".", ROOT_INODE)?;
        fs.add_dir_entry(ROOT_INODE, "..", ROOT_INODE)?;

        fs.write_superblock()?;
        fs.write_inodes()?;
        Ok(())
    }

    /// 挂载：读入超级块，重放日志，再装载 inode 表。
    /// inode 表必须在恢复之后读取，否则内存里会是检查点之前的旧内容。
    pub fn mount(dev: Arc<dyn BlockDevice>) -> FsResult<Self> {
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(0, &mut buf)?;
        let sb = Superblock::decode(&buf);
        if !sb.is_valid() {
            return Err(FsError::InvalidImage);
        }

        let mut journal = Journal::new(JOURNAL_START, JOURNAL_BLOCKS);
        journal.recover(dev.as_ref())?;

        // 恢复可能重放了超级块本身
        dev.read_block(0, &mut buf)?;
        let sb = Superblock::decode(&buf);

        let mut fs = Self {
            dev,
            sb,
            inodes: Vec::new(),
            journal,
            cwd: ROOT_INODE,
        };
        fs.read_inodes()?;
        debug!(
            "mount: free list head = {}",
            fs.sb.free_block_list_head
        );
        Ok(fs)
    }

    /// 卸载：超级块与 inode 表的最终写回
    pub fn unmount(mut self) -> FsResult<()> {
        self.write_superblock()?;
        self.write_inodes()
    }

    /// 当前目录的 inode 号
    #[inline]
    pub fn cwd(&self) -> u32 {
        self.cwd
    }

    pub fn get_inode(&self, inode_num: u32) -> Option<&Inode> {
        self.inodes.get(inode_num as usize)
    }

    pub fn is_valid_inode(&self, inode_num: i32) -> bool {
        (0..self.inodes.len() as i32).contains(&inode_num)
    }
}

/* 分配器。对数据是纯的：失败时不留任何效果。 */
impl TinyFileSystem {
    /// 弹出空闲链表头；头部的前4字节成为新的表头
    pub(crate) fn allocate_block(&mut self) -> FsResult<u32> {
        if self.sb.free_block_list_head < 0 {
            return Err(FsError::OutOfSpace);
        }

        let block_num = self.sb.free_block_list_head as u32;
        let buf = self.read_block(block_num)?;
        self.sb.free_block_list_head = i32::from_le_bytes(buf[..4].try_into().unwrap());
        self.write_superblock()?;
        Ok(block_num)
    }

    /// 归还到链表头，LIFO：最近释放的最先被复用
    pub(crate) fn free_block(&mut self, block_num: u32) -> FsResult<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[..4].copy_from_slice(&self.sb.free_block_list_head.to_le_bytes());
        self.write_block(block_num, &buf)?;
        self.sb.free_block_list_head = block_num as i32;
        self.write_superblock()
    }

    /// 线性扫描，返回编号最小的空闲 inode
    pub(crate) fn find_free_inode(&self) -> FsResult<u32> {
        self.inodes
            .iter()
            .position(|inode| inode.is_free())
            .map(|i| i as u32)
            .ok_or(FsError::NoFreeInode)
    }
}

/* 块与inode表的读写 */
impl TinyFileSystem {
    pub(crate) fn read_block(&self, block_num: u32) -> FsResult<DataBlock> {
        let mut buf = [0u8; BLOCK_SIZE];
        self.dev.read_block(block_num as usize, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn write_block(&self, block_num: u32, buf: &DataBlock) -> FsResult<()> {
        self.dev.write_block(block_num as usize, buf)?;
        Ok(())
    }

    pub(crate) fn write_superblock(&self) -> FsResult<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        self.sb.encode(&mut buf);
        self.write_block(0, &buf)
    }

    fn read_inodes(&mut self) -> FsResult<()> {
        self.inodes = Vec::with_capacity(NUM_INODES);
        for i in 0..INODE_BLOCKS {
            let buf = self.read_block(1 + i as u32)?;
            for j in 0..INODES_PER_BLOCK {
                self.inodes
                    .push(Inode::decode(&buf[j * Inode::SIZE..(j + 1) * Inode::SIZE]));
            }
        }
        Ok(())
    }

    pub(crate) fn write_inodes(&mut self) -> FsResult<()> {
        for i in 0..INODE_BLOCKS {
            let buf = self.encode_inode_table_block(i);
            self.write_block(1 + i as u32, &buf)?;
        }
        Ok(())
    }

    /// `inode_num` 所在的 inode 表块的块号
    #[inline]
    pub(crate) fn inode_table_block(inode_num: u32) -> u32 {
        1 + inode_num / INODES_PER_BLOCK as u32
    }

    /// 编码含有该 inode 的整个表块的当前内存内容
    fn encode_inode_table_block(&self, table_index: usize) -> DataBlock {
        let mut buf = [0u8; BLOCK_SIZE];
        let base = table_index * INODES_PER_BLOCK;
        for j in 0..INODES_PER_BLOCK {
            self.inodes[base + j].encode(&mut buf[j * Inode::SIZE..(j + 1) * Inode::SIZE]);
        }
        buf
    }

    /// 把该 inode 所在的表块直接写回磁盘（fsck 修复使用的常规路径）
    pub(crate) fn write_inode_block(&mut self, inode_num: u32) -> FsResult<()> {
        let table_index = inode_num as usize / INODES_PER_BLOCK;
        let buf = self.encode_inode_table_block(table_index);
        self.write_block(1 + table_index as u32, &buf)
    }

    /// 把该 inode 所在的表块作为元数据记录进当前事务
    pub(crate) fn log_inode_block(&mut self, inode_num: u32) -> FsResult<()> {
        let table_index = inode_num as usize / INODES_PER_BLOCK;
        let buf = self.encode_inode_table_block(table_index);
        let dev = Arc::clone(&self.dev);
        self.journal
            .log_metadata(dev.as_ref(), Self::inode_table_block(inode_num), &buf)
    }

    /// 把超级块记录进当前事务；分配器动过空闲链表的事务都应调用，
    /// 使空闲链表的完整性在崩溃后依然成立
    pub(crate) fn log_superblock(&mut self) -> FsResult<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        self.sb.encode(&mut buf);
        let dev = Arc::clone(&self.dev);
        self.journal.log_metadata(dev.as_ref(), 0, &buf)
    }

    /// 更新时间戳；写回随所属操作的持久化路径走
    pub(crate) fn touch(&mut self, inode_num: u32, access: bool, modify: bool, create: bool) {
        let now = unix_now();
        let inode = &mut self.inodes[inode_num as usize];
        if create {
            inode.creation_time = now;
        }
        if access {
            inode.access_time = now;
        }
        if modify {
            inode.modification_time = now;
        }
    }

    pub(crate) fn inode(&self, inode_num: u32) -> FsResult<&Inode> {
        self.inodes
            .get(inode_num as usize)
            .ok_or(FsError::NotFound)
    }

    /// 目录项形式的有效性检查：目标必须是现存目录
    pub(crate) fn require_dir(&self, inode_num: u32) -> FsResult<()> {
        if !self.inode(inode_num)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(())
    }

    pub(crate) fn dir_entry_of(&self, dir: u32, name: &str) -> FsResult<DirEntry> {
        self.get_dir_entries(dir)?
            .into_iter()
            .find(|e| e.name_bytes() == name.as_bytes())
            .ok_or(FsError::NotFound)
    }
}
