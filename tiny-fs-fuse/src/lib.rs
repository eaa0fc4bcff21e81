#[cfg(test)]
mod tests;

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tiny_fs::BlockDevice;
use tiny_fs::{BLOCK_SIZE, NUM_BLOCKS};

/// 把一个普通文件当作块设备使用
pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))?;
        file.read_exact(buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))?;
        file.write_all(buf)
    }
}

impl BlockFile {
    /// 新建（或截断）镜像文件并预留满额长度
    pub fn create(path: impl AsRef<Path>) -> io::Result<Arc<Self>> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len((NUM_BLOCKS * BLOCK_SIZE) as u64)?;

        Ok(Arc::new(Self(Mutex::new(fd))))
    }

    /// 打开既有镜像
    pub fn open(path: impl AsRef<Path>) -> io::Result<Arc<Self>> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Arc::new(Self(Mutex::new(fd))))
    }
}
