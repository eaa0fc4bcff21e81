//! # 日志层
//!
//! 驻留在保留的日志区内的 redo 日志。一个事务是一段连续的记录：
//! `BEGIN` 头、若干 `METADATA`/`DATA`（各自跟随一个完整块的负载）、`COMMIT` 头。
//!
//! 提交语义：写下 `COMMIT` 头之后立刻做检查点——按记录顺序把全部负载
//! 落到目标块，然后清零日志区。只重做、不撤销：
//! - 崩溃发生在 `COMMIT` 之前，事务丢失；
//! - 崩溃发生在 `COMMIT` 之后、检查点之前，挂载时的恢复补完检查点。
//!
//! 同一事务内负载按记录顺序应用，所以先记录的间接块更新
//! 一定先于 inode 表块落盘。

use log::warn;

use crate::block_dev::BlockDevice;
use crate::{DataBlock, FsError, FsResult, BLOCK_SIZE, JOURNAL_MAGIC};

/// 日志记录的种类，对应磁盘上的类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Begin = 0,
    Metadata = 1,
    Data = 2,
    Commit = 3,
}

/// 日志记录头，独占一个日志块：
/// `{magic, type, block_num, size}` 四个小端32位整数
#[derive(Debug, Clone)]
pub struct RecordHeader {
    pub kind: RecordKind,
    /// 负载的归属块号；`BEGIN`/`COMMIT` 记录里存放事务ID
    pub block_num: i32,
    pub size: i32,
}

impl RecordHeader {
    pub fn new(kind: RecordKind, block_num: i32, size: i32) -> Self {
        Self {
            kind,
            block_num,
            size,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&JOURNAL_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&(self.kind as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&self.block_num.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
    }

    /// 魔数或类型标签不合法则视为损坏
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if u32::from_le_bytes(buf[0..4].try_into().unwrap()) != JOURNAL_MAGIC {
            return None;
        }
        let kind = match i32::from_le_bytes(buf[4..8].try_into().unwrap()) {
            0 => RecordKind::Begin,
            1 => RecordKind::Metadata,
            2 => RecordKind::Data,
            3 => RecordKind::Commit,
            _ => return None,
        };
        Some(Self {
            kind,
            block_num: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            size: i32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

/// 每个挂载实例持有一个日志对象；
/// 它只记住日志区的位置和事务状态，块设备由调用方传入。
#[derive(Debug)]
pub struct Journal {
    start_block: usize,
    num_blocks: usize,
    /// 日志区内的下一个写入位置
    current_block: usize,
    next_transaction_id: i32,
    active: bool,
}

impl Journal {
    pub fn new(start_block: usize, num_blocks: usize) -> Self {
        Self {
            start_block,
            num_blocks,
            current_block: 0,
            next_transaction_id: 1,
            active: false,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 开始一个事务。事务进行中再次调用只告警、不生效。
    pub fn begin(&mut self, dev: &dyn BlockDevice) -> FsResult<()> {
        if self.active {
            warn!("journal: transaction already active");
            return Ok(());
        }

        let header = RecordHeader::new(RecordKind::Begin, self.next_transaction_id, 0);
        self.append_header(dev, &header)?;
        self.active = true;
        Ok(())
    }

    /// 记录一个 inode 表或超级块等元数据块的新内容；
    /// 事务未开启时是空操作。
    pub fn log_metadata(
        &mut self,
        dev: &dyn BlockDevice,
        block_num: u32,
        payload: &DataBlock,
    ) -> FsResult<()> {
        self.log_block(dev, RecordKind::Metadata, block_num, payload)
    }

    /// 记录一个数据块（如间接块）的新内容；事务未开启时是空操作。
    pub fn log_data(
        &mut self,
        dev: &dyn BlockDevice,
        block_num: u32,
        payload: &DataBlock,
    ) -> FsResult<()> {
        self.log_block(dev, RecordKind::Data, block_num, payload)
    }

    /// 提交：写 `COMMIT` 头，重放负载做检查点，然后清零日志区。
    /// 事务未开启时是空操作。
    pub fn commit(&mut self, dev: &dyn BlockDevice) -> FsResult<()> {
        if !self.active {
            return Ok(());
        }

        let header = RecordHeader::new(RecordKind::Commit, self.next_transaction_id, 0);
        self.append_header(dev, &header)?;

        self.replay(dev)?;

        self.current_block = 0;
        self.next_transaction_id += 1;
        self.active = false;
        Ok(())
    }

    /// 挂载时调用：若日志区里躺着一个已提交却未检查点的事务，补完它；
    /// 不完整的事务被整体丢弃。无论哪种情况，之后日志区都被清零。
    pub fn recover(&mut self, dev: &dyn BlockDevice) -> FsResult<()> {
        self.replay(dev)
    }

    fn log_block(
        &mut self,
        dev: &dyn BlockDevice,
        kind: RecordKind,
        block_num: u32,
        payload: &DataBlock,
    ) -> FsResult<()> {
        if !self.active {
            return Ok(());
        }
        // 头 + 负载 + 将来的COMMIT头都要放得下
        if self.current_block + 3 > self.num_blocks {
            return Err(FsError::JournalCorrupt("journal region exhausted"));
        }

        let header = RecordHeader::new(kind, block_num as i32, BLOCK_SIZE as i32);
        self.append_header(dev, &header)?;
        dev.write_block(self.start_block + self.current_block, payload)?;
        self.current_block += 1;
        Ok(())
    }

    fn append_header(&mut self, dev: &dyn BlockDevice, header: &RecordHeader) -> FsResult<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        header.encode(&mut buf);
        dev.write_block(self.start_block + self.current_block, &buf)?;
        self.current_block += 1;
        Ok(())
    }

    /// redo 扫描：第一个记录不是合法的 `BEGIN` 即认定没有待定事务；
    /// 依次收集负载直到 `COMMIT`，见到它才按顺序应用。
    fn replay(&mut self, dev: &dyn BlockDevice) -> FsResult<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(self.start_block, &mut buf)?;

        if !matches!(RecordHeader::decode(&buf), Some(h) if h.kind == RecordKind::Begin) {
            return self.wipe(dev);
        }

        let mut pending: Vec<(u32, DataBlock)> = Vec::new();
        let mut offset = 1;
        while offset < self.num_blocks {
            dev.read_block(self.start_block + offset, &mut buf)?;
            offset += 1;

            match RecordHeader::decode(&buf) {
                Some(h) if h.kind == RecordKind::Commit => {
                    for (block_num, payload) in &pending {
                        dev.write_block(*block_num as usize, payload)?;
                    }
                    break;
                }
                Some(h)
                    if matches!(h.kind, RecordKind::Metadata | RecordKind::Data)
                        && offset < self.num_blocks =>
                {
                    let mut payload = [0u8; BLOCK_SIZE];
                    dev.read_block(self.start_block + offset, &mut payload)?;
                    offset += 1;
                    pending.push((h.block_num as u32, payload));
                }
                // 到达COMMIT前就残缺：丢弃整个事务
                _ => {
                    warn!("journal: malformed record before commit, discarding transaction");
                    break;
                }
            }
        }

        self.wipe(dev)
    }

    fn wipe(&self, dev: &dyn BlockDevice) -> FsResult<()> {
        let zero = [0u8; BLOCK_SIZE];
        for i in 0..self.num_blocks {
            dev.write_block(self.start_block + i, &zero)?;
        }
        Ok(())
    }
}
