use enumflags2::{bitflags, BitFlags};

/// 直接块指针数；目录只使用直接块
pub const DIRECT_PTRS: usize = 10;

/// `mode` 低9位是权限位，类型编码在第9位之上
const KIND_SHIFT: u32 = 9;
const PERM_MASK: u32 = 0o777;

/// inode 的类型，编码于 `mode` 的高位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Free = 0,
    File = 1,
    Directory = 2,
    Symlink = 3,
}

/// inode 的附加标志位
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeFlag {
    /// 快照根目录
    Snapshot = 1,
}

/// 磁盘上的 inode，定长128字节（92字节字段 + 零填充）
#[derive(Debug, Clone, Default)]
pub struct Inode {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub link_count: u32,
    pub creation_time: i64,
    pub modification_time: i64,
    pub access_time: i64,
    /// 0 表示"无块"；块号0是超级块，不可能是数据块
    pub direct_blocks: [u32; DIRECT_PTRS],
    pub indirect_block: u32,
    pub flags: u32,
}

impl Inode {
    pub const SIZE: usize = 128;

    /// 以给定类型初始化；调用者随后按需调整 `link_count`
    pub fn init(&mut self, kind: InodeKind, perm: u32, now: i64) {
        *self = Self {
            mode: Self::mode_of(kind, perm),
            uid: 0,
            gid: 0,
            size: 0,
            link_count: 1,
            creation_time: now,
            modification_time: now,
            access_time: now,
            direct_blocks: [0; DIRECT_PTRS],
            indirect_block: 0,
            flags: 0,
        };
    }

    #[inline]
    pub fn mode_of(kind: InodeKind, perm: u32) -> u32 {
        ((kind as u32) << KIND_SHIFT) | (perm & PERM_MASK)
    }

    /// 解析类型位；损坏的 `mode` 返回 `None`
    pub fn kind(&self) -> Option<InodeKind> {
        match self.mode >> KIND_SHIFT {
            0 => Some(InodeKind::Free),
            1 => Some(InodeKind::File),
            2 => Some(InodeKind::Directory),
            3 => Some(InodeKind::Symlink),
            _ => None,
        }
    }

    #[inline]
    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }

    /// 只替换低9位权限位，类型位保持不变
    #[inline]
    pub fn set_perm(&mut self, perm: u32) {
        self.mode = (self.mode & !PERM_MASK) | (perm & PERM_MASK);
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.mode == 0
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind() == Some(InodeKind::File)
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == Some(InodeKind::Directory)
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.kind() == Some(InodeKind::Symlink)
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<InodeFlag> {
        BitFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn set_flag(&mut self, flag: InodeFlag) {
        self.flags |= flag as u32;
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.mode.to_le_bytes());
        buf[4..8].copy_from_slice(&self.uid.to_le_bytes());
        buf[8..12].copy_from_slice(&self.gid.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.link_count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.creation_time.to_le_bytes());
        buf[28..36].copy_from_slice(&self.modification_time.to_le_bytes());
        buf[36..44].copy_from_slice(&self.access_time.to_le_bytes());
        for (i, b) in self.direct_blocks.iter().enumerate() {
            buf[44 + i * 4..48 + i * 4].copy_from_slice(&b.to_le_bytes());
        }
        buf[84..88].copy_from_slice(&self.indirect_block.to_le_bytes());
        buf[88..92].copy_from_slice(&self.flags.to_le_bytes());
        buf[92..Self::SIZE].fill(0);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut direct_blocks = [0u32; DIRECT_PTRS];
        for (i, b) in direct_blocks.iter_mut().enumerate() {
            *b = u32::from_le_bytes(buf[44 + i * 4..48 + i * 4].try_into().unwrap());
        }

        Self {
            mode: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            uid: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            gid: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            size: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            link_count: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            creation_time: i64::from_le_bytes(buf[20..28].try_into().unwrap()),
            modification_time: i64::from_le_bytes(buf[28..36].try_into().unwrap()),
            access_time: i64::from_le_bytes(buf[36..44].try_into().unwrap()),
            direct_blocks,
            indirect_block: u32::from_le_bytes(buf[84..88].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[88..92].try_into().unwrap()),
        }
    }
}
