mod cli;

use std::error::Error;
use std::fs;
use std::path::Path;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command, SnapshotOp};
use tiny_fs::{BlockDevice, FileSystemCheck, SnapshotManager, TinyFileSystem};
use tiny_fs_fuse::BlockFile;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    if let Command::Format = cli.command {
        let dev: Arc<dyn BlockDevice> = BlockFile::create(&cli.image)?;
        TinyFileSystem::format(&dev)?;
        println!("formatted {:?}", cli.image);
        return Ok(());
    }

    let dev: Arc<dyn BlockDevice> = BlockFile::open(&cli.image)?;
    let mut fs = TinyFileSystem::mount(dev)?;

    match cli.command {
        Command::Format => unreachable!(),
        Command::Pack { source } => {
            pack_directory(&mut fs, &source)?;
            println!("packed {source:?} into {:?}", cli.image);
        }
        Command::Ls { path } => {
            if let Some(path) = path {
                fs.cd(&path)?;
            }
            for entry in fs.ls()? {
                let inode_num = entry.inode_num();
                let mode = fs
                    .get_inode(inode_num as u32)
                    .map(|inode| inode.mode)
                    .unwrap_or(0);
                println!("{:>4}  {:>#8o}  {}", inode_num, mode, entry.name());
            }
        }
        Command::Cat { path } => {
            let data = fs.read(&path)?;
            let mut out = std::io::stdout().lock();
            std::io::Write::write_all(&mut out, &data)?;
        }
        Command::Fsck { fix } => {
            let mut fsck = FileSystemCheck::new(&mut fs);
            let issues = fsck.check()?;
            if issues.is_empty() {
                println!("clean");
            }
            for issue in &issues {
                println!(
                    "[{}] {}",
                    if issue.can_fix { "fixable" } else { "report" },
                    issue.description
                );
            }
            if fix {
                fsck.fix_all_issues()?;
                println!("repairs applied");
            }
        }
        Command::Snapshot { op } => {
            let mut snapshots = SnapshotManager::new(&mut fs);
            match op {
                SnapshotOp::Create { name } => {
                    snapshots.create_snapshot(&name)?;
                    println!("snapshot '{name}' created");
                }
                SnapshotOp::List => {
                    for info in snapshots.list_snapshots()? {
                        println!(
                            "{}  created={}  blocks={}",
                            info.name, info.creation_time, info.blocks_used
                        );
                    }
                }
                SnapshotOp::Delete { name } => {
                    snapshots.delete_snapshot(&name)?;
                    println!("snapshot '{name}' deleted");
                }
                SnapshotOp::Restore { name } => {
                    snapshots.restore_snapshot(&name)?;
                    println!("snapshot '{name}' restored");
                }
            }
        }
    }

    fs.unmount()?;
    Ok(())
}

/// 逐项把宿主机目录树灌进镜像的当前目录
fn pack_directory(fs: &mut TinyFileSystem, dir: &Path) -> Result<(), Box<dyn Error>> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let path = entry.path();

        if path.is_dir() {
            println!("dir:  {name}");
            fs.mkdir(&name)?;
            fs.cd(&name)?;
            pack_directory(fs, &path)?;
            fs.cd("..")?;
        } else if path.is_file() {
            println!("file: {name}");
            let data = fs::read(&path)?;
            fs.create(&name)?;
            fs.write(&name, &data)?;
        }
    }
    Ok(())
}
