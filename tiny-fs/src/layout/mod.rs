//! # 磁盘数据结构层
//!
//! tiny-fs 的磁盘布局：
//! 超级块 | inode表 | 日志区 | 数据区（初始整体串成空闲链表）
//!
//! 所有结构都按固定宽度小端序显式编解码，保证镜像可移植；
//! 磁盘路径上不做任何 `repr(C)` 指针转换。

mod super_block;
pub use super_block::Superblock;

mod inode;
pub use inode::{Inode, InodeFlag, InodeKind, DIRECT_PTRS};

/// 文件系统项的元信息，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;

mod indirect;
pub use indirect::{IndirectBlock, PTRS_PER_BLOCK};
