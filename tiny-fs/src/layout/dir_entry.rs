const NAME_MAX_LEN: usize = 27;

/// 文件系统项的元信息
#[derive(Debug, Clone)]
pub struct DirEntry {
    // 最后一字节留给 \0
    name: [u8; NAME_MAX_LEN + 1],
    /// -1 为墓碑，槽位可复用
    inode_num: i32,
}

impl DirEntry {
    /// 元信息大小恒为32字节
    pub const SIZE: usize = 32;

    pub const TOMBSTONE: i32 = -1;

    /// 名字可用长度上限（缓冲区含 \0 共28字节）
    pub const NAME_MAX: usize = NAME_MAX_LEN;

    pub fn new(name: &str, inode_num: u32) -> Self {
        let bytes = name.as_bytes();
        debug_assert!(bytes.len() <= NAME_MAX_LEN);
        let mut name = [0; NAME_MAX_LEN + 1];
        name[..bytes.len()].copy_from_slice(bytes);

        Self {
            name,
            inode_num: inode_num as i32,
        }
    }

    #[inline]
    pub fn tombstone() -> Self {
        Self {
            name: [0; NAME_MAX_LEN + 1],
            inode_num: Self::TOMBSTONE,
        }
    }

    /// 截止到 \0 的名字原始字节；路径匹配按字节精确比较
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }

    /// 供显示用；损坏的名字做有损替换而不是panic
    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    #[inline]
    pub fn inode_num(&self) -> i32 {
        self.inode_num
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inode_num == Self::TOMBSTONE
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..28].copy_from_slice(&self.name);
        buf[28..32].copy_from_slice(&self.inode_num.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0; NAME_MAX_LEN + 1];
        name.copy_from_slice(&buf[0..28]);
        Self {
            name,
            inode_num: i32::from_le_bytes(buf[28..32].try_into().unwrap()),
        }
    }
}
