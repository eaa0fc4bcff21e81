//! # 索引节点层
//!
//! 确立文件系统的操作逻辑：路径解析、目录项管理，以及
//! `mkdir`/`create`/`read`/`write`/`link`/`symlink`/`unlink`/`chmod`/`chown`。
//!
//! 改动持久存储之前，操作会把意图记入日志；
//! 目录数据块本身按源格式直接写入，不走日志。

use std::sync::Arc;

use crate::layout::{DirEntry, IndirectBlock, Inode, InodeKind, DIRECT_PTRS, PTRS_PER_BLOCK};
use crate::tfs::TinyFileSystem;
use crate::{unix_now, FsError, FsResult, BLOCK_SIZE, NUM_INODES, ROOT_INODE};

/* 路径解析与目录读取 */
impl TinyFileSystem {
    /// 路径解析：空路径失败；`/` 即根；以 `/` 开头从根出发，否则从当前目录；
    /// 逐段匹配现存目录项，按字节精确、大小写敏感。
    pub fn find_inode_by_path(&self, path: &str) -> Option<u32> {
        if path.is_empty() {
            return None;
        }
        if path == "/" {
            return Some(ROOT_INODE);
        }

        let mut cur = if path.starts_with('/') {
            ROOT_INODE
        } else {
            self.cwd
        };

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let entries = self.get_dir_entries(cur).ok()?;
            let next = entries
                .iter()
                .find(|e| e.name_bytes() == segment.as_bytes())
                .map(|e| e.inode_num())?;
            if !(0..NUM_INODES as i32).contains(&next) {
                return None;
            }
            cur = next as u32;
        }
        Some(cur)
    }

    /// 目录的全部现存项（墓碑被滤除），含 `.` 与 `..`
    pub fn get_dir_entries(&self, dir: u32) -> FsResult<Vec<DirEntry>> {
        self.require_dir(dir)?;

        let blocks = self.inode(dir)?.direct_blocks;
        let mut entries = Vec::new();
        for &block_num in blocks.iter().take_while(|&&b| b != 0) {
            let buf = self.read_block(block_num)?;
            for chunk in buf.chunks_exact(DirEntry::SIZE) {
                let entry = DirEntry::decode(chunk);
                if !entry.is_empty() {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// 当前目录下的全部项
    #[inline]
    pub fn ls(&self) -> FsResult<Vec<DirEntry>> {
        self.get_dir_entries(self.cwd)
    }

    pub fn cd(&mut self, path: &str) -> FsResult<()> {
        let inode_num = self.find_inode_by_path(path).ok_or(FsError::NotFound)?;
        self.require_dir(inode_num)?;
        self.cwd = inode_num;
        Ok(())
    }

    /// 把 `path` 拆成（父目录inode，末段名字）
    fn resolve_parent<'p>(&self, path: &'p str) -> FsResult<(u32, &'p str)> {
        let (parent, name) = match path.rfind('/') {
            None => (self.cwd, path),
            Some(0) => (ROOT_INODE, &path[1..]),
            Some(i) => {
                let parent = self
                    .find_inode_by_path(&path[..i])
                    .ok_or(FsError::NotFound)?;
                (parent, &path[i + 1..])
            }
        };
        if name.is_empty() {
            return Err(FsError::NotFound);
        }
        Ok((parent, name))
    }
}

/* 目录项管理 */
impl TinyFileSystem {
    /// 目录项追加：先在现存块里找墓碑复用；全满则分配新块，
    /// 整块初始化为墓碑后把新项放进0号槽，挂到第一个空的直接块指针上。
    /// 目录不使用间接块，十个直接块即是上限。
    pub(crate) fn add_dir_entry(&mut self, dir: u32, name: &str, inode_num: u32) -> FsResult<()> {
        self.require_dir(dir)?;
        if name.len() > DirEntry::NAME_MAX {
            return Err(FsError::NameTooLong(name.into()));
        }

        let entry = DirEntry::new(name, inode_num);
        let blocks = self.inode(dir)?.direct_blocks;

        for &block_num in blocks.iter().take_while(|&&b| b != 0) {
            let mut buf = self.read_block(block_num)?;
            for chunk in buf.chunks_exact_mut(DirEntry::SIZE) {
                if DirEntry::decode(chunk).is_empty() {
                    entry.encode(chunk);
                    self.write_block(block_num, &buf)?;
                    self.inodes[dir as usize].size += DirEntry::SIZE as u32;
                    return Ok(());
                }
            }
        }

        // 现存块全满，续一个新块
        let slot = blocks
            .iter()
            .position(|&b| b == 0)
            .ok_or(FsError::NoSpaceInDirectory)?;
        let block_num = self.allocate_block()?;

        let mut buf = [0u8; BLOCK_SIZE];
        for chunk in buf.chunks_exact_mut(DirEntry::SIZE) {
            DirEntry::tombstone().encode(chunk);
        }
        entry.encode(&mut buf[..DirEntry::SIZE]);
        self.write_block(block_num, &buf)?;

        let inode = &mut self.inodes[dir as usize];
        inode.direct_blocks[slot] = block_num;
        inode.size += DirEntry::SIZE as u32;
        Ok(())
    }

    /// 把名字对应的目录项置为墓碑，返回其原先指向的inode号
    pub(crate) fn remove_dir_entry(&mut self, dir: u32, name: &str) -> FsResult<u32> {
        self.require_dir(dir)?;

        let blocks = self.inode(dir)?.direct_blocks;
        for &block_num in blocks.iter().take_while(|&&b| b != 0) {
            let mut buf = self.read_block(block_num)?;
            for chunk in buf.chunks_exact_mut(DirEntry::SIZE) {
                let entry = DirEntry::decode(chunk);
                if !entry.is_empty() && entry.name_bytes() == name.as_bytes() {
                    let target = entry.inode_num() as u32;
                    DirEntry::tombstone().encode(chunk);
                    self.write_block(block_num, &buf)?;
                    let inode = &mut self.inodes[dir as usize];
                    inode.size = inode.size.saturating_sub(DirEntry::SIZE as u32);
                    return Ok(target);
                }
            }
        }
        Err(FsError::NotFound)
    }
}

/* 文件与目录操作 */
impl TinyFileSystem {
    /// 在当前目录创建子目录
    pub fn mkdir(&mut self, name: &str) -> FsResult<u32> {
        let parent = self.cwd;
        self.mkdir_in(parent, name)
    }

    pub(crate) fn mkdir_in(&mut self, parent: u32, name: &str) -> FsResult<u32> {
        let dev = Arc::clone(&self.dev);
        self.journal.begin(dev.as_ref())?;
        let res = self.mkdir_inner(parent, name);
        // 失败路径上提交的是空事务，不产生任何效果
        self.journal.commit(dev.as_ref())?;
        res
    }

    fn mkdir_inner(&mut self, parent: u32, name: &str) -> FsResult<u32> {
        self.require_dir(parent)?;
        let inode_num = self.find_free_inode()?;

        let now = unix_now();
        self.inodes[inode_num as usize].init(InodeKind::Directory, 0o755, now);
        // 自身的 `.` 加上父目录里的名字项
        self.inodes[inode_num as usize].link_count = 2;

        if let Err(e) = self.fill_new_dir(inode_num, parent, name) {
            let _ = self.clear_inode_blocks(inode_num);
            self.inodes[inode_num as usize] = Inode::default();
            return Err(e);
        }

        // 新目录的 `..` 指向父目录
        self.inodes[parent as usize].link_count += 1;
        self.touch(parent, false, true, false);

        self.log_inode_block(inode_num)?;
        self.log_inode_block(parent)?;
        self.log_superblock()?;
        Ok(inode_num)
    }

    fn fill_new_dir(&mut self, inode_num: u32, parent: u32, name: &str) -> FsResult<()> {
        self.add_dir_entry(inode_num, ".", inode_num)?;
        self.add_dir_entry(inode_num, "..", parent)?;
        self.add_dir_entry(parent, name, inode_num)
    }

    /// 在当前目录创建空文件
    pub fn create(&mut self, name: &str) -> FsResult<u32> {
        let parent = self.cwd;
        self.create_in(parent, name)
    }

    pub(crate) fn create_in(&mut self, parent: u32, name: &str) -> FsResult<u32> {
        self.require_dir(parent)?;
        let inode_num = self.find_free_inode()?;
        // 目录项先行：失败时inode未被动过，整个操作无效果
        self.add_dir_entry(parent, name, inode_num)?;
        self.inodes[inode_num as usize].init(InodeKind::File, 0o644, unix_now());
        Ok(inode_num)
    }

    /// 覆盖写：先释放旧块，再顺序灌入新数据。
    /// 途中分配失败时，已到达的部分状态照常提交，错误上浮给调用者。
    pub fn write(&mut self, path: &str, data: &[u8]) -> FsResult<()> {
        let dev = Arc::clone(&self.dev);
        self.journal.begin(dev.as_ref())?;
        let res = self.write_inner(path, data);
        self.journal.commit(dev.as_ref())?;
        res
    }

    fn write_inner(&mut self, path: &str, data: &[u8]) -> FsResult<()> {
        let inode_num = self.find_inode_by_path(path).ok_or(FsError::NotFound)?;
        match self.inode(inode_num)?.kind() {
            Some(InodeKind::File) => {}
            Some(InodeKind::Directory) => return Err(FsError::IsDirectory),
            _ => return Err(FsError::NotAFile),
        }

        let res = self.write_inode_data(inode_num, data);
        self.touch(inode_num, false, true, false);
        self.log_inode_block(inode_num)?;
        self.log_superblock()?;
        res
    }

    /// 顺序读出直接块与间接块的内容，按 `size` 截断
    pub fn read(&mut self, path: &str) -> FsResult<Vec<u8>> {
        let inode_num = self.find_inode_by_path(path).ok_or(FsError::NotFound)?;
        match self.inode(inode_num)?.kind() {
            Some(InodeKind::File) => {}
            Some(InodeKind::Directory) => return Err(FsError::IsDirectory),
            _ => return Err(FsError::NotAFile),
        }

        let data = self.read_inode_data(inode_num)?;
        // 访问时间只改内存，随卸载写回
        self.touch(inode_num, true, false, false);
        Ok(data)
    }

    /// 解除一个名字：目录项置墓碑、链接数递减；
    /// 减到零时释放全部直接块、间接块图及inode本身。
    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        let dev = Arc::clone(&self.dev);
        self.journal.begin(dev.as_ref())?;
        let res = self.unlink_inner(path);
        self.journal.commit(dev.as_ref())?;
        res
    }

    fn unlink_inner(&mut self, path: &str) -> FsResult<()> {
        let (parent, name) = self.resolve_parent(path)?;
        let inode_num = self.lookup(parent, name)?;
        if self.inode(inode_num)?.is_dir() {
            return Err(FsError::IsDirectory);
        }

        self.remove_dir_entry(parent, name)?;
        self.drop_link(inode_num)?;
        self.touch(parent, false, true, false);

        self.log_inode_block(inode_num)?;
        self.log_inode_block(parent)?;
        self.log_superblock()?;
        Ok(())
    }

    /// 硬链接；目录不可硬链接
    pub fn link(&mut self, old: &str, new_name: &str) -> FsResult<()> {
        let dev = Arc::clone(&self.dev);
        self.journal.begin(dev.as_ref())?;
        let res = self.link_inner(old, new_name);
        self.journal.commit(dev.as_ref())?;
        res
    }

    fn link_inner(&mut self, old: &str, new_name: &str) -> FsResult<()> {
        let inode_num = self.find_inode_by_path(old).ok_or(FsError::NotFound)?;
        if self.inode(inode_num)?.is_dir() {
            return Err(FsError::IsDirectory);
        }

        let parent = self.cwd;
        self.add_dir_entry(parent, new_name, inode_num)?;
        self.inodes[inode_num as usize].link_count += 1;
        self.touch(inode_num, false, true, false);

        self.log_inode_block(inode_num)?;
        self.log_superblock()?;
        Ok(())
    }

    /// 符号链接：新inode的数据块里存放 \0 填充的目标路径
    pub fn symlink(&mut self, target: &str, name: &str) -> FsResult<u32> {
        let parent = self.cwd;
        let dev = Arc::clone(&self.dev);
        self.journal.begin(dev.as_ref())?;
        let res = self.symlink_in(parent, target, name);
        self.journal.commit(dev.as_ref())?;
        res
    }

    pub(crate) fn symlink_in(&mut self, parent: u32, target: &str, name: &str) -> FsResult<u32> {
        self.require_dir(parent)?;
        if target.len() >= BLOCK_SIZE {
            return Err(FsError::NameTooLong(target.into()));
        }
        let inode_num = self.find_free_inode()?;

        let block_num = if target.is_empty() {
            0
        } else {
            let block_num = self.allocate_block()?;
            let mut buf = [0u8; BLOCK_SIZE];
            buf[..target.len()].copy_from_slice(target.as_bytes());
            self.write_block(block_num, &buf)?;
            let dev = Arc::clone(&self.dev);
            self.journal.log_data(dev.as_ref(), block_num, &buf)?;
            block_num
        };

        if let Err(e) = self.add_dir_entry(parent, name, inode_num) {
            if block_num != 0 {
                self.free_block(block_num)?;
            }
            return Err(e);
        }

        let inode = &mut self.inodes[inode_num as usize];
        inode.init(InodeKind::Symlink, 0o777, unix_now());
        inode.size = target.len() as u32;
        inode.direct_blocks[0] = block_num;

        self.log_inode_block(inode_num)?;
        self.log_superblock()?;
        Ok(inode_num)
    }

    /// 符号链接指向的目标路径
    pub fn read_link(&mut self, path: &str) -> FsResult<String> {
        let inode_num = self.find_inode_by_path(path).ok_or(FsError::NotFound)?;
        if !self.inode(inode_num)?.is_symlink() {
            return Err(FsError::NotAFile);
        }
        let target = self.symlink_target(inode_num)?;
        self.touch(inode_num, true, false, false);
        Ok(target)
    }

    pub fn chmod(&mut self, path: &str, perm: u32) -> FsResult<()> {
        let dev = Arc::clone(&self.dev);
        self.journal.begin(dev.as_ref())?;
        let res = self.chmod_inner(path, perm);
        self.journal.commit(dev.as_ref())?;
        res
    }

    fn chmod_inner(&mut self, path: &str, perm: u32) -> FsResult<()> {
        let inode_num = self.find_inode_by_path(path).ok_or(FsError::NotFound)?;
        self.inodes[inode_num as usize].set_perm(perm);
        self.touch(inode_num, false, true, false);
        self.log_inode_block(inode_num)
    }

    pub fn chown(&mut self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let dev = Arc::clone(&self.dev);
        self.journal.begin(dev.as_ref())?;
        let res = self.chown_inner(path, uid, gid);
        self.journal.commit(dev.as_ref())?;
        res
    }

    fn chown_inner(&mut self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let inode_num = self.find_inode_by_path(path).ok_or(FsError::NotFound)?;
        let inode = &mut self.inodes[inode_num as usize];
        inode.uid = uid;
        inode.gid = gid;
        self.touch(inode_num, false, true, false);
        self.log_inode_block(inode_num)
    }
}

/* inode 数据的整体读写与回收 */
impl TinyFileSystem {
    /// 目录 `dir` 下名为 `name` 的项指向的inode
    pub(crate) fn lookup(&self, dir: u32, name: &str) -> FsResult<u32> {
        let inode_num = self.dir_entry_of(dir, name)?.inode_num();
        if !(0..NUM_INODES as i32).contains(&inode_num) {
            return Err(FsError::NotFound);
        }
        Ok(inode_num as u32)
    }

    /// 链接数递减；减到零时回收数据与inode
    pub(crate) fn drop_link(&mut self, inode_num: u32) -> FsResult<()> {
        let left = {
            let inode = &mut self.inodes[inode_num as usize];
            inode.link_count = inode.link_count.saturating_sub(1);
            inode.link_count
        };
        if left == 0 {
            self.clear_inode_blocks(inode_num)?;
            self.inodes[inode_num as usize].mode = 0;
        } else {
            self.touch(inode_num, false, true, false);
        }
        Ok(())
    }

    /// 释放一个inode当前持有的全部块：直接块、间接块引用的每个数据块，
    /// 以及间接块自身；`size` 归零
    pub(crate) fn clear_inode_blocks(&mut self, inode_num: u32) -> FsResult<()> {
        for i in 0..DIRECT_PTRS {
            let block_num = self.inodes[inode_num as usize].direct_blocks[i];
            if block_num != 0 {
                self.free_block(block_num)?;
                self.inodes[inode_num as usize].direct_blocks[i] = 0;
            }
        }

        let indirect_num = self.inodes[inode_num as usize].indirect_block;
        if indirect_num != 0 {
            let indirect = IndirectBlock::decode(&self.read_block(indirect_num)?);
            for block_num in indirect.live() {
                self.free_block(block_num)?;
            }
            self.free_block(indirect_num)?;
            self.inodes[inode_num as usize].indirect_block = 0;
        }

        self.inodes[inode_num as usize].size = 0;
        Ok(())
    }

    /// 顺序灌入数据：直接块0..9，余量进间接块。
    /// 分配失败即停，`size` 始终反映已持久化的字节数。
    pub(crate) fn write_inode_data(&mut self, inode_num: u32, data: &[u8]) -> FsResult<()> {
        self.clear_inode_blocks(inode_num)?;

        let mut chunks = data.chunks(BLOCK_SIZE).peekable();

        for i in 0..DIRECT_PTRS {
            let Some(chunk) = chunks.next() else {
                return Ok(());
            };
            let block_num = self.allocate_block()?;
            let mut buf = [0u8; BLOCK_SIZE];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.write_block(block_num, &buf)?;

            let inode = &mut self.inodes[inode_num as usize];
            inode.direct_blocks[i] = block_num;
            inode.size += chunk.len() as u32;
        }

        if chunks.peek().is_none() {
            return Ok(());
        }

        let indirect_num = self.allocate_block()?;
        self.inodes[inode_num as usize].indirect_block = indirect_num;
        let mut indirect = IndirectBlock::default();

        for slot in 0..PTRS_PER_BLOCK {
            let Some(chunk) = chunks.next() else {
                break;
            };
            let block_num = match self.allocate_block() {
                Ok(b) => b,
                Err(e) => {
                    // 半满的间接块照常持久化，部分状态交由调用者提交
                    self.persist_indirect(indirect_num, &indirect)?;
                    return Err(e);
                }
            };
            let mut buf = [0u8; BLOCK_SIZE];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.write_block(block_num, &buf)?;

            indirect.slots[slot] = block_num;
            let inode = &mut self.inodes[inode_num as usize];
            inode.size += chunk.len() as u32;
        }

        self.persist_indirect(indirect_num, &indirect)?;

        // 超出直接+间接预算的余量视同空间耗尽
        if chunks.peek().is_some() {
            return Err(FsError::OutOfSpace);
        }
        Ok(())
    }

    /// 间接块先直接落盘，再作为数据记录进当前事务，
    /// 保证重放时它先于inode表块到位
    fn persist_indirect(&mut self, block_num: u32, indirect: &IndirectBlock) -> FsResult<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        indirect.encode(&mut buf);
        self.write_block(block_num, &buf)?;
        let dev = Arc::clone(&self.dev);
        self.journal.log_data(dev.as_ref(), block_num, &buf)
    }

    pub(crate) fn read_inode_data(&self, inode_num: u32) -> FsResult<Vec<u8>> {
        let inode = self.inode(inode_num)?.clone();
        let mut data = Vec::with_capacity(inode.size as usize);
        let mut left = inode.size as usize;

        for &block_num in inode.direct_blocks.iter().take_while(|&&b| b != 0) {
            if left == 0 {
                break;
            }
            let buf = self.read_block(block_num)?;
            let take = left.min(BLOCK_SIZE);
            data.extend_from_slice(&buf[..take]);
            left -= take;
        }

        if left > 0 && inode.indirect_block != 0 {
            let indirect = IndirectBlock::decode(&self.read_block(inode.indirect_block)?);
            for block_num in indirect.live() {
                if left == 0 {
                    break;
                }
                let buf = self.read_block(block_num)?;
                let take = left.min(BLOCK_SIZE);
                data.extend_from_slice(&buf[..take]);
                left -= take;
            }
        }

        Ok(data)
    }

    pub(crate) fn symlink_target(&self, inode_num: u32) -> FsResult<String> {
        let inode = self.inode(inode_num)?;
        let size = (inode.size as usize).min(BLOCK_SIZE);
        if size == 0 || inode.direct_blocks[0] == 0 {
            return Ok(String::new());
        }
        let buf = self.read_block(inode.direct_blocks[0])?;
        Ok(String::from_utf8_lossy(&buf[..size]).into_owned())
    }

    /// 递归摘除整棵子树；文件按 `unlink` 语义处理，
    /// 子目录深度优先清空后连同名字一起移除
    pub(crate) fn remove_tree_entry(&mut self, parent: u32, name: &str) -> FsResult<()> {
        let inode_num = self.lookup(parent, name)?;

        if self.inode(inode_num)?.is_dir() {
            let children: Vec<String> = self
                .get_dir_entries(inode_num)?
                .iter()
                .filter(|e| e.name_bytes() != b"." && e.name_bytes() != b"..")
                .map(|e| e.name())
                .collect();
            for child in &children {
                self.remove_tree_entry(inode_num, child)?;
            }

            self.remove_dir_entry(parent, name)?;
            // 子目录的 `..` 不再指向父目录
            self.inodes[parent as usize].link_count =
                self.inodes[parent as usize].link_count.saturating_sub(1);
            self.clear_inode_blocks(inode_num)?;
            self.inodes[inode_num as usize].mode = 0;
        } else {
            self.remove_dir_entry(parent, name)?;
            self.drop_link(inode_num)?;
        }

        self.touch(parent, false, true, false);
        Ok(())
    }
}
