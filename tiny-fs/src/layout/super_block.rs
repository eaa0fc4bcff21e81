use crate::{INODE_BLOCKS, NUM_BLOCKS, NUM_INODES};

/// 超级块：
/// - 记录文件系统全局参数；
/// - 持有空闲链表头
#[derive(Debug, Clone)]
pub struct Superblock {
    pub num_blocks: u32,
    pub num_inodes: u32,
    pub inode_blocks: u32,
    /// 第一个空闲块的块号，-1 表示耗尽
    pub free_block_list_head: i32,
}

impl Superblock {
    /// 编码后恒为四个小端32位整数
    pub const SIZE: usize = 16;

    #[inline]
    pub fn new(free_block_list_head: i32) -> Self {
        Self {
            num_blocks: NUM_BLOCKS as u32,
            num_inodes: NUM_INODES as u32,
            inode_blocks: INODE_BLOCKS as u32,
            free_block_list_head,
        }
    }

    /// 几何参数须与编译期配置一致
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.num_blocks == NUM_BLOCKS as u32
            && self.num_inodes == NUM_INODES as u32
            && self.inode_blocks == INODE_BLOCKS as u32
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.num_blocks.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_inodes.to_le_bytes());
        buf[8..12].copy_from_slice(&self.inode_blocks.to_le_bytes());
        buf[12..16].copy_from_slice(&self.free_block_list_head.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            num_blocks: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            num_inodes: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            inode_blocks: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            free_block_list_head: i32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}
