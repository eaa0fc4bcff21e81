//! # 一致性检查层
//!
//! 扫描已挂载的文件系统，产出一组结构性缺陷并修复其中可修复者。
//!
//! 算法：
//! 1. 标记超级块、inode表与日志区为占用；
//! 2. 遍历所有现存inode，标记其引用的每个数据块并深入间接块，
//!    越界指针与二次引用分别记为坏指针与重复块；
//! 3. 从根目录BFS整个命名空间，访问集检测目录环；
//!    链接数盘点覆盖**所有**现存目录的**全部**现存项（含 `.` 与 `..`），
//!    这样孤儿目录入 lost+found 之后重查的结果依然自洽；
//! 4. 清点孤儿inode与链接数不符者；
//! 5. 沿空闲链表行走（带环护卫），数据区内既不空闲也未被引用的块
//!    报告为失联块。
//!
//! 修复一律走核心的常规API（目录项追加、inode表写回），
//! 因此修复结果沿正常路径持久化。

use std::collections::VecDeque;

use log::{info, warn};

use crate::layout::{InodeKind, PTRS_PER_BLOCK};
use crate::tfs::TinyFileSystem;
use crate::{FsResult, DATA_START, NUM_BLOCKS, NUM_INODES, ROOT_INODE};

/// 缺陷种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    InvalidInode,
    InvalidBlockPointer,
    DuplicateBlock,
    UnreferencedBlock,
    DirectoryLoop,
    OrphanedInode,
    IncorrectLinkCount,
}

/// 一条被检出的缺陷
#[derive(Debug, Clone)]
pub struct Issue {
    pub kind: IssueKind,
    pub inode_num: Option<u32>,
    pub block_num: Option<u32>,
    pub description: String,
    pub can_fix: bool,
}

pub struct FileSystemCheck<'fs> {
    fs: &'fs mut TinyFileSystem,
    issues: Vec<Issue>,
    block_used: Vec<bool>,
    inode_reachable: Vec<bool>,
    link_tally: Vec<u32>,
}

impl<'fs> FileSystemCheck<'fs> {
    pub fn new(fs: &'fs mut TinyFileSystem) -> Self {
        Self {
            fs,
            issues: Vec::new(),
            block_used: vec![false; NUM_BLOCKS],
            inode_reachable: vec![false; NUM_INODES],
            link_tally: vec![0; NUM_INODES],
        }
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// 全量检查，返回检出的缺陷列表
    pub fn check(&mut self) -> FsResult<Vec<Issue>> {
        self.issues.clear();
        self.block_used = vec![false; NUM_BLOCKS];
        self.inode_reachable = vec![false; NUM_INODES];
        self.link_tally = vec![0; NUM_INODES];

        // 元数据区域天然占用
        for b in 0..DATA_START {
            self.block_used[b] = true;
        }

        self.check_inodes()?;
        self.check_directory_structure()?;
        self.check_free_list()?;

        Ok(self.issues.clone())
    }

    /// 依次修复所有可修复的缺陷
    pub fn fix_all_issues(&mut self) -> FsResult<()> {
        for i in 0..self.issues.len() {
            if self.issues[i].can_fix {
                self.fix_issue(i)?;
            }
        }
        Ok(())
    }

    pub fn fix_issue(&mut self, index: usize) -> FsResult<()> {
        let Some(issue) = self.issues.get(index).cloned() else {
            return Ok(());
        };
        if !issue.can_fix {
            warn!("fsck: cannot fix: {}", issue.description);
            return Ok(());
        }

        match issue.kind {
            IssueKind::InvalidInode => {
                if let Some(inode_num) = issue.inode_num {
                    self.fs.fix_invalid_inode(inode_num)?;
                    info!("fsck: freed invalid inode {inode_num}");
                }
            }
            IssueKind::InvalidBlockPointer => {
                if let Some(inode_num) = issue.inode_num {
                    self.fix_bad_pointers(inode_num)?;
                    info!("fsck: zeroed invalid block pointers of inode {inode_num}");
                }
            }
            IssueKind::OrphanedInode => {
                // 前面的修复可能已经把它收回了
                if let Some(inode_num) = issue
                    .inode_num
                    .filter(|&i| self.fs.get_inode(i).is_some_and(|inode| !inode.is_free()))
                {
                    let existed = self.fs.find_inode_by_path("/lost+found").is_some();
                    let lost_found = self.fs.create_lost_found()?;
                    // 盘点也跟着修复走，后续的链接数修复才会收敛
                    if !existed {
                        self.link_tally[ROOT_INODE as usize] += 1;
                        self.link_tally[lost_found as usize] = 2;
                    }
                    self.fs.fix_orphaned_inode(inode_num, lost_found)?;
                    self.link_tally[inode_num as usize] += 1;
                    info!("fsck: moved orphaned inode {inode_num} into /lost+found");
                }
            }
            IssueKind::IncorrectLinkCount => {
                if let Some(inode_num) = issue.inode_num {
                    let observed = self.link_tally[inode_num as usize];
                    self.fs.fix_inode_link_count(inode_num, observed)?;
                    info!("fsck: reset link count of inode {inode_num} to {observed}");
                }
            }
            // 重复块、失联块与目录环只报告
            IssueKind::DuplicateBlock | IssueKind::UnreferencedBlock | IssueKind::DirectoryLoop => {}
        }

        let issue = &mut self.issues[index];
        issue.can_fix = false;
        issue.description.push_str(" (fixed)");
        Ok(())
    }
}

/* 检测 */
impl FileSystemCheck<'_> {
    /// 逐inode标记引用块；坏指针与重复引用就地报告
    fn check_inodes(&mut self) -> FsResult<()> {
        for inode_num in 0..NUM_INODES as u32 {
            let inode = self.fs.inodes[inode_num as usize].clone();
            if inode.is_free() {
                continue;
            }

            if !matches!(
                inode.kind(),
                Some(InodeKind::File | InodeKind::Directory | InodeKind::Symlink)
            ) {
                self.push_issue(
                    IssueKind::InvalidInode,
                    Some(inode_num),
                    None,
                    format!("inode {} has invalid mode {:#o}", inode_num, inode.mode),
                    true,
                );
                continue;
            }

            for &block_num in &inode.direct_blocks {
                if block_num != 0 {
                    self.mark_block(inode_num, block_num);
                }
            }

            if inode.indirect_block == 0 {
                continue;
            }
            if inode.indirect_block as usize >= NUM_BLOCKS {
                self.push_issue(
                    IssueKind::InvalidBlockPointer,
                    Some(inode_num),
                    Some(inode.indirect_block),
                    format!(
                        "inode {} has invalid indirect block pointer {}",
                        inode_num, inode.indirect_block
                    ),
                    true,
                );
                continue;
            }
            self.mark_block(inode_num, inode.indirect_block);

            let buf = self.fs.read_block(inode.indirect_block)?;
            for slot in 0..PTRS_PER_BLOCK {
                let block_num =
                    u32::from_le_bytes(buf[slot * 4..slot * 4 + 4].try_into().unwrap());
                if block_num != 0 {
                    self.mark_block(inode_num, block_num);
                }
            }
        }
        Ok(())
    }

    /// 单个块引用的登记；越界与重复都在这里检出
    fn mark_block(&mut self, inode_num: u32, block_num: u32) {
        if block_num as usize >= NUM_BLOCKS {
            self.push_issue(
                IssueKind::InvalidBlockPointer,
                Some(inode_num),
                Some(block_num),
                format!("inode {inode_num} has invalid block pointer {block_num}"),
                true,
            );
            return;
        }
        if self.block_used[block_num as usize] {
            self.push_issue(
                IssueKind::DuplicateBlock,
                Some(inode_num),
                Some(block_num),
                format!("block {block_num} is referenced more than once"),
                false,
            );
            return;
        }
        self.block_used[block_num as usize] = true;
    }

    /// 可达性BFS加全量链接数盘点
    fn check_directory_structure(&mut self) -> FsResult<()> {
        // 盘点覆盖所有现存目录，与可达性无关；
        // 目录块读不出来（例如指针越界）不终止检查，坏指针另行报告
        for dir in 0..NUM_INODES as u32 {
            if !self.fs.inodes[dir as usize].is_dir() {
                continue;
            }
            let Ok(entries) = self.fs.get_dir_entries(dir) else {
                continue;
            };
            for entry in entries {
                let target = entry.inode_num();
                if !(0..NUM_INODES as i32).contains(&target) {
                    self.push_issue(
                        IssueKind::InvalidInode,
                        None,
                        None,
                        format!(
                            "directory entry '{}' in inode {} references invalid inode {}",
                            entry.name(),
                            dir,
                            target
                        ),
                        false,
                    );
                    continue;
                }
                self.link_tally[target as usize] += 1;
            }
        }

        // 从根出发的可达性与目录环
        self.inode_reachable[ROOT_INODE as usize] = true;
        let mut visited = vec![false; NUM_INODES];
        visited[ROOT_INODE as usize] = true;
        let mut queue = VecDeque::from([ROOT_INODE]);

        while let Some(dir) = queue.pop_front() {
            let entries = match self.fs.get_dir_entries(dir) {
                Ok(entries) => entries,
                Err(_) => {
                    self.push_issue(
                        IssueKind::InvalidInode,
                        Some(dir),
                        None,
                        format!("inode {dir} is referenced as a directory but is not one"),
                        false,
                    );
                    continue;
                }
            };

            for entry in entries {
                if entry.name_bytes() == b"." || entry.name_bytes() == b".." {
                    continue;
                }
                let target = entry.inode_num();
                if !(0..NUM_INODES as i32).contains(&target) {
                    continue; // 已在盘点阶段报告
                }
                let target = target as u32;
                self.inode_reachable[target as usize] = true;

                if self.fs.inodes[target as usize].is_dir() {
                    if visited[target as usize] {
                        self.push_issue(
                            IssueKind::DirectoryLoop,
                            Some(target),
                            None,
                            format!("directory loop detected involving inode {target}"),
                            false,
                        );
                    } else {
                        visited[target as usize] = true;
                        queue.push_back(target);
                    }
                }
            }
        }

        // 孤儿在前、链接数在后：孤儿的修复会改变它自己的链接数
        for inode_num in 0..NUM_INODES as u32 {
            let inode = &self.fs.inodes[inode_num as usize];
            if !inode.is_free() && !self.inode_reachable[inode_num as usize] {
                self.push_issue(
                    IssueKind::OrphanedInode,
                    Some(inode_num),
                    None,
                    format!("inode {inode_num} is not reachable from the root directory"),
                    true,
                );
            }
        }

        for inode_num in 0..NUM_INODES as u32 {
            let inode = &self.fs.inodes[inode_num as usize];
            let observed = self.link_tally[inode_num as usize];
            if !inode.is_free() && inode.link_count != observed {
                self.push_issue(
                    IssueKind::IncorrectLinkCount,
                    Some(inode_num),
                    None,
                    format!(
                        "inode {} has link count {} (observed {})",
                        inode_num, inode.link_count, observed
                    ),
                    true,
                );
            }
        }
        Ok(())
    }

    /// 空闲链表与占用集必须两分数据区；二者之外即失联块
    fn check_free_list(&mut self) -> FsResult<()> {
        let mut free = vec![false; NUM_BLOCKS];
        let mut head = self.fs.sb.free_block_list_head;

        while head >= 0 {
            let block_num = head as usize;
            if block_num < DATA_START || block_num >= NUM_BLOCKS {
                warn!("fsck: free list points outside the data region at {block_num}");
                break;
            }
            if free[block_num] {
                warn!("fsck: free list loops at block {block_num}");
                break;
            }
            free[block_num] = true;

            let buf = self.fs.read_block(head as u32)?;
            head = i32::from_le_bytes(buf[..4].try_into().unwrap());
        }

        for block_num in DATA_START..NUM_BLOCKS {
            if !self.block_used[block_num] && !free[block_num] {
                self.push_issue(
                    IssueKind::UnreferencedBlock,
                    None,
                    Some(block_num as u32),
                    format!(
                        "block {block_num} is neither on the free list nor referenced; \
                         adding it to the free list is recommended"
                    ),
                    false,
                );
            }
        }
        Ok(())
    }

    fn push_issue(
        &mut self,
        kind: IssueKind,
        inode_num: Option<u32>,
        block_num: Option<u32>,
        description: String,
        can_fix: bool,
    ) {
        self.issues.push(Issue {
            kind,
            inode_num,
            block_num,
            description,
            can_fix,
        });
    }

    /// 清扫该inode的全部越界指针：直接槽、间接指针、间接块内部
    fn fix_bad_pointers(&mut self, inode_num: u32) -> FsResult<()> {
        for idx in 0..self.fs.inodes[inode_num as usize].direct_blocks.len() {
            let block_num = self.fs.inodes[inode_num as usize].direct_blocks[idx];
            if block_num != 0 && block_num as usize >= NUM_BLOCKS {
                self.fs.fix_invalid_block_pointer(inode_num, idx)?;
            }
        }

        let indirect_num = self.fs.inodes[inode_num as usize].indirect_block;
        if indirect_num != 0 {
            if indirect_num as usize >= NUM_BLOCKS {
                self.fs.fix_invalid_block_pointer(inode_num, INDIRECT_SLOT)?;
            } else {
                self.fs.fix_invalid_indirect_entries(inode_num)?;
            }
        }
        Ok(())
    }
}

/// `fix_invalid_block_pointer` 里代表间接块指针的槽位号
pub const INDIRECT_SLOT: usize = 10;

/* 修复的落地；全部经由常规的inode表写回路径 */
impl TinyFileSystem {
    /// 按需建立 `/lost+found`，返回其inode号
    pub fn create_lost_found(&mut self) -> FsResult<u32> {
        if let Some(inode_num) = self.find_inode_by_path("/lost+found") {
            return Ok(inode_num);
        }
        self.mkdir_in(ROOT_INODE, "lost+found")
    }

    /// 非法mode的inode直接标记为空闲并写回
    pub fn fix_invalid_inode(&mut self, inode_num: u32) -> FsResult<()> {
        self.inode(inode_num)?;
        self.inodes[inode_num as usize].mode = 0;
        self.write_inode_block(inode_num)
    }

    /// 清零一个坏指针；槽位0..=9是直接块，槽位10是间接块指针。
    /// 0号直接块被清时 `size` 一并归零。
    pub fn fix_invalid_block_pointer(&mut self, inode_num: u32, slot: usize) -> FsResult<()> {
        self.inode(inode_num)?;
        let inode = &mut self.inodes[inode_num as usize];
        match slot {
            0 => {
                inode.direct_blocks[0] = 0;
                inode.size = 0;
            }
            1..=9 => inode.direct_blocks[slot] = 0,
            INDIRECT_SLOT => inode.indirect_block = 0,
            _ => return Ok(()),
        }
        self.touch(inode_num, false, true, false);
        self.write_inode_block(inode_num)
    }

    /// 清零间接块内部的越界指针并写回间接块本身
    pub(crate) fn fix_invalid_indirect_entries(&mut self, inode_num: u32) -> FsResult<()> {
        let indirect_num = self.inodes[inode_num as usize].indirect_block;
        if indirect_num == 0 {
            return Ok(());
        }

        let mut buf = self.read_block(indirect_num)?;
        let mut dirty = false;
        for slot in 0..PTRS_PER_BLOCK {
            let range = slot * 4..slot * 4 + 4;
            let block_num = u32::from_le_bytes(buf[range.clone()].try_into().unwrap());
            if block_num as usize >= NUM_BLOCKS {
                buf[range].fill(0);
                dirty = true;
            }
        }
        if dirty {
            self.write_block(indirect_num, &buf)?;
        }
        Ok(())
    }

    /// 孤儿入 `/lost+found`，合成名 `#<inode_num>`，链接数随新目录项递增
    pub fn fix_orphaned_inode(&mut self, inode_num: u32, lost_found: u32) -> FsResult<()> {
        self.inode(inode_num)?;
        let name = format!("#{inode_num}");
        self.add_dir_entry(lost_found, &name, inode_num)?;
        self.inodes[inode_num as usize].link_count += 1;
        self.touch(inode_num, false, true, false);
        self.touch(lost_found, false, true, false);
        self.write_inode_block(inode_num)?;
        self.write_inode_block(lost_found)
    }

    /// 存储的链接数改写为盘点所得
    pub fn fix_inode_link_count(&mut self, inode_num: u32, count: u32) -> FsResult<()> {
        self.inode(inode_num)?;
        self.inodes[inode_num as usize].link_count = count;
        self.touch(inode_num, false, true, false);
        self.write_inode_block(inode_num)
    }
}
