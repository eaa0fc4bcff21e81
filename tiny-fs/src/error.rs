use std::io;

use thiserror::Error;

/// 核心向调用者暴露的全部错误种类；
/// 诊断信息供人阅读，调用者只按种类分派。
#[derive(Debug, Error)]
pub enum FsError {
    /// 镜像文件读写失败，当前操作中止
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// 空闲链表耗尽；`write` 可能留下部分效果
    #[error("out of space")]
    OutOfSpace,

    /// inode表已满，无任何效果
    #[error("no free inode")]
    NoFreeInode,

    #[error("path not found")]
    NotFound,

    #[error("not a regular file")]
    NotAFile,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsDirectory,

    /// 目标目录的十个直接块全部占满
    #[error("no space left in directory")]
    NoSpaceInDirectory,

    #[error("journal corrupt: {0}")]
    JournalCorrupt(&'static str),

    /// 快照重名
    #[error("snapshot already exists: {0}")]
    AlreadyExists(String),

    #[error("name too long: {0}")]
    NameTooLong(String),

    /// 超级块与配置的几何参数不符
    #[error("invalid filesystem image")]
    InvalidImage,
}

pub type FsResult<T> = Result<T, FsError>;
