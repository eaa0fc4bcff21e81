/* tiny-fs 的整体架构，自上而下 */

// 索引节点层：路径解析与文件创建、读写、链接等操作
mod vfs;

// 磁盘块管理器层：超级块、inode表、空闲块链表的管理者
mod tfs;
pub use tfs::TinyFileSystem;

// 日志层：redo日志，为元数据与部分数据写入提供崩溃一致性
pub mod journal;
pub use journal::Journal;

// 一致性检查层：结构性缺陷的检测与修复
mod fsck;
pub use fsck::{FileSystemCheck, Issue, IssueKind};

// 快照层：保留目录下的时间点副本
mod snapshot;
pub use snapshot::{SnapshotInfo, SnapshotManager};

// 磁盘数据结构层：表示磁盘文件系统的数据结构
pub mod layout;

// 磁盘块设备接口层：读写磁盘块设备的接口
mod block_dev;
pub use block_dev::BlockDevice;

mod error;
pub use error::{FsError, FsResult};

pub const BLOCK_SIZE: usize = 512;
pub const NUM_BLOCKS: usize = 4096;
pub const NUM_INODES: usize = 128;

/// 日志区块数，位于inode表之后
pub const JOURNAL_BLOCKS: usize = 100;
/// 日志记录头的魔数：区分原始区域与有意写空的提交
pub const JOURNAL_MAGIC: u32 = 0xDEAD_BEEF;

/// inode表占据块数
pub const INODE_BLOCKS: usize = (NUM_INODES * layout::Inode::SIZE).div_ceil(BLOCK_SIZE);
/// 日志区起始块
pub const JOURNAL_START: usize = 1 + INODE_BLOCKS;
/// 数据区起始块，格式化时整个数据区被串成空闲链表
pub const DATA_START: usize = JOURNAL_START + JOURNAL_BLOCKS;

pub const ROOT_INODE: u32 = 0;

type DataBlock = [u8; BLOCK_SIZE];

/// Unix时间戳（秒）
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
