use crate::BLOCK_SIZE;

/// 每个间接块可容纳的块指针数
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// 间接块：打包的32位块号数组，0 为空槽
#[derive(Debug, Clone)]
pub struct IndirectBlock {
    pub slots: [u32; PTRS_PER_BLOCK],
}

impl Default for IndirectBlock {
    fn default() -> Self {
        Self {
            slots: [0; PTRS_PER_BLOCK],
        }
    }
}

impl IndirectBlock {
    /// 非空槽位上的块号
    pub fn live(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().copied().filter(|&b| b != 0)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        for (i, b) in self.slots.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&b.to_le_bytes());
        }
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut slots = [0u32; PTRS_PER_BLOCK];
        for (i, b) in slots.iter_mut().enumerate() {
            *b = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        }
        Self { slots }
    }
}
