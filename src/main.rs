// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `cramfs` command-line driver: `list`, `info`, `extract`, `check`.

use std::ffi::CString;
use std::fs;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cramfs::file::Node;
use cramfs::result::{CramfsError, Result};
use cramfs::structure::PAGE_SIZE;
use cramfs::{find_superblocks, Image};

#[derive(Parser)]
#[command(name = "cramfs", version, about = "Inspect and extract Cramfs images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the contents of the file system
    List {
        file: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        offset: i64,
        /// Filter by file name pattern with fnmatch
        #[arg(short, long)]
        pattern: Option<String>,
        /// Filter by file type (one or more of d l p s b c f)
        #[arg(short = 't', long = "type", num_args = 1..)]
        file_type: Option<Vec<String>>,
    },
    /// Show information about all the superblocks that can be found in a file
    Info { file: PathBuf },
    /// Extract files from the file system
    Extract {
        file: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        offset: i64,
        /// Destination directory. Default: next to file
        #[arg(short, long)]
        dest: Option<PathBuf>,
        /// Absolute path of directory or file to extract
        #[arg(short, long, default_value = "/")]
        path: String,
        /// Overwrite files that already exist
        #[arg(short, long)]
        force: bool,
        /// Don't print extraction status
        #[arg(short, long)]
        quiet: bool,
    },
    /// Make a few superficial checks of the file system
    Check {
        file: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        offset: i64,
    },
}

fn check_offset(file: &Path, offset: i64) -> Result<u64> {
    if offset < 0 {
        return Err(CramfsError::Io(io::Error::new(io::ErrorKind::InvalidInput, "offset cannot be negative")));
    }
    let size = fs::metadata(file)?.len();
    if size.saturating_sub(offset as u64) < PAGE_SIZE {
        return Err(CramfsError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "a cramfs image can't fit at this offset",
        )));
    }
    Ok(offset as u64)
}

fn print_node(node: &Node) {
    let link = if node.is_symlink() {
        node.readlink().map(|t| format!(" -> {t}")).unwrap_or_default()
    } else {
        String::new()
    };
    println!(
        "{} {:8} {:5}:{:<3} {}{}",
        node.filemode(),
        node.size(),
        node.uid(),
        node.gid(),
        node.path(),
        link
    );
}

fn cmd_list(file: PathBuf, offset: i64, pattern: Option<String>, file_type: Option<Vec<String>>) -> Result<()> {
    let offset = check_offset(&file, offset)?;
    let image = Image::open(&file, offset)?;
    let types: Option<Vec<char>> =
        file_type.map(|v| v.join("").chars().map(|c| if c == 'f' { '-' } else { c }).collect());

    let nodes = match &pattern {
        Some(p) => image.itermatch(p),
        None => image.iter(),
    };

    let mut count = 0;
    for node in &nodes {
        let keep = match &types {
            None => true,
            Some(types) => node.filemode().chars().next().is_some_and(|c| types.contains(&c)),
        };
        if keep {
            print_node(node);
            count += 1;
        }
    }
    println!("{count} file(s) found");
    Ok(())
}

fn cmd_info(file: PathBuf) -> Result<()> {
    let f = fs::File::open(&file)?;
    let hits = find_superblocks(f, 1024 * 1024)?;
    if hits.is_empty() {
        println!("No superblock found");
        return Ok(());
    }
    let width = 10;
    for (idx, hit) in hits.iter().enumerate() {
        let sb = &hit.superblock;
        println!("Superblock #{}", idx + 1);
        println!("{:width$} 0x{:X}", "Magic:", sb.magic);
        println!("{:width$} {}", "Size:", sb.size);
        println!("{:width$} {:?}", "Flags:", sb.flags);
        println!("{:width$} {}", "Future:", sb.future);
        println!("{:width$} {}", "Signature:", sb.signature_str());
        println!("{:width$} {}", "Name:", sb.name_str());
        println!("{:width$} 0x{:08X}", "CRC:", sb.fsid.crc);
        println!("{:width$} {}", "Edition:", sb.fsid.edition);
        println!("{:width$} {}", "Blocks:", sb.fsid.blocks);
        println!("{:width$} {}", "Files:", sb.fsid.files);
        println!("{:width$} {}", "Offset:", hit.offset);
        if idx + 1 != hits.len() {
            println!();
        }
    }
    Ok(())
}

fn mode_bits(node: &Node) -> u32 {
    node.mode() & 0o7777
}

fn lchown_best_effort(path: &Path, uid: u16, gid: u8) -> bool {
    let c = CString::new(path.as_os_str().as_bytes()).expect("path has no interior NUL");
    // SAFETY: `c` is a valid NUL-terminated path; `lchown` only inspects it.
    let rc = unsafe { libc::lchown(c.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };
    rc == 0
}

fn set_epoch_mtime(path: &Path) -> io::Result<()> {
    let c = CString::new(path.as_os_str().as_bytes()).expect("path has no interior NUL");
    let times = [libc::timeval { tv_sec: 0, tv_usec: 0 }; 2];
    // SAFETY: `c` is valid and `times` has the two entries `utimes` expects.
    let rc = unsafe { libc::utimes(c.as_ptr(), times.as_ptr()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn mknod_raw(path: &Path, mode: u32, dev: u64) -> io::Result<()> {
    let c = CString::new(path.as_os_str().as_bytes()).expect("path has no interior NUL");
    // SAFETY: `c` is a valid NUL-terminated destination path.
    let rc = unsafe { libc::mknod(c.as_ptr(), mode as libc::mode_t, dev as libc::dev_t) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Applies ownership, the setuid/setgid bits, and the epoch mtime to an
/// already-created filesystem entry, per the extraction semantics.
fn change_file_status(path: &Path, node: &Node) -> io::Result<()> {
    if lchown_best_effort(path, node.uid(), node.gid()) {
        if node.is_symlink() {
            return Ok(());
        }
        if node.mode() & (libc::S_ISUID | libc::S_ISGID) != 0 {
            fs::set_permissions(path, fs::Permissions::from_mode(mode_bits(node)))?;
        }
    }
    if node.is_symlink() {
        return Ok(());
    }
    set_epoch_mtime(path)
}

fn write_regular(path: &Path, content: &[u8], force: bool) -> io::Result<()> {
    if force || !path.exists() {
        fs::write(path, content)
    } else {
        Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("{} already exists", path.display())))
    }
}

fn create_dir_checked(path: &Path, force: bool) -> io::Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && force => Ok(()),
        Err(e) => Err(e),
    }
}

/// Extracts a single non-directory node, returning whether it was created.
fn extract_node(node: &Node, dest: &Path, force: bool, quiet: bool) -> Result<bool> {
    if node.is_file() {
        let data = node.read_bytes()?;
        write_regular(dest, &data, force)?;
        fs::set_permissions(dest, fs::Permissions::from_mode(mode_bits(node)))?;
    } else if node.is_symlink() {
        let target = node.readlink()?;
        match symlink(&target, dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if force {
                    fs::remove_file(dest)?;
                    return extract_node(node, dest, force, quiet);
                }
                return Err(e.into());
            }
            Err(_) => {
                // Host doesn't support symlinks (or lacks privilege): fall
                // back to writing the link target as a regular file.
                write_regular(dest, target.as_bytes(), force)?;
            }
        }
    } else {
        let dev = if node.is_char_device() || node.is_block_device() {
            node.size()
        } else if node.is_fifo() || node.is_socket() {
            0
        } else {
            if !quiet {
                eprintln!("bogus mode: {} ({:o})", node.path(), node.mode());
            }
            return Ok(false);
        };
        mknod_raw(dest, node.mode(), dev)?;
    }
    change_file_status(dest, node)?;
    Ok(true)
}

/// Extracts a directory subtree, returning the number of entries created.
fn extract_dir(dir: &Node, dest: &Path, force: bool, quiet: bool) -> Result<i64> {
    let total = dir.total();
    let mut created: i64 = -1;
    let mut count: i64 = -1;
    let base = dir.path();
    for node in dir.riter() {
        let rel = node.path().strip_prefix(&base).unwrap_or(&node.path()).trim_start_matches('/').to_string();
        let path = if rel.is_empty() { dest.to_path_buf() } else { dest.join(&rel) };
        if node.is_dir() {
            create_dir_checked(&path, force)?;
            fs::set_permissions(&path, fs::Permissions::from_mode(mode_bits(&node)))?;
            change_file_status(&path, &node)?;
            created += 1;
        } else {
            created += extract_node(&node, &path, force, quiet)? as i64;
        }
        count += 1;
        if !quiet {
            print!("{count}/{total} {}\r", node.name());
            io::stdout().flush().ok();
        }
    }
    if !quiet {
        println!();
    }
    Ok(created)
}

fn cmd_extract(file: PathBuf, offset: i64, dest: Option<PathBuf>, path: String, force: bool, quiet: bool) -> Result<()> {
    let offset = check_offset(&file, offset)?;
    let image = Image::open(&file, offset)?;
    let node = image.select(&path).ok_or_else(|| CramfsError::NotFound(path.clone()))?;

    let (dest, amount) = if node.is_dir() {
        let dest = dest.unwrap_or_else(|| file.with_extension(""));
        let amount = extract_dir(&node, &dest, force, quiet)?;
        (dest, amount)
    } else {
        let dest = dest.unwrap_or_else(|| file.parent().unwrap_or(Path::new(".")).join(node.name()));
        let amount = extract_node(&node, &dest, force, quiet)? as i64;
        (dest, amount)
    };

    if !quiet {
        println!("{amount} file(s) extracted to {}", fs::canonicalize(&dest).unwrap_or(dest).display());
    }
    Ok(())
}

fn cmd_check(file: PathBuf, offset: i64) -> Result<()> {
    let offset = check_offset(&file, offset)?;
    let image = Image::open(&file, offset)?;
    for node in image.iter() {
        if node.inode().namelen() == 0 && node.path() != "/" {
            println!("filename length is zero {}", node.path());
        }
        let inode_offset = node.inode().offset();
        if node.is_dir() {
            if inode_offset == 0 && node.size() != 0 {
                println!("directory inode has zero offset and non-zero size: {}", node.path());
            }
        } else if node.is_file() {
            if inode_offset == 0 && node.size() != 0 {
                println!("file inode has zero offset and non-zero size {}", node.path());
            }
            if node.size() == 0 && inode_offset != 0 {
                println!("file inode has zero size and non-zero offset {}", node.path());
            }
        } else if node.is_symlink() {
            if inode_offset == 0 {
                println!("symbolic link has zero offset {}", node.path());
            }
            if node.size() == 0 {
                println!("symbolic link has zero size {}", node.path());
            }
        } else if inode_offset != 0 {
            println!("special file has non-zero offset: {}", node.path());
        } else if node.is_char_device() || node.is_block_device() {
            // nothing further to check
        } else if node.is_fifo() || node.is_socket() {
            let kind = if node.is_fifo() { "fifo" } else { "socket" };
            if node.size() != 0 {
                println!("{kind} has non-zero size: {}", node.path());
            }
        } else {
            println!("bogus mode: {} ({:o})", node.path(), node.mode());
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::List { file, offset, pattern, file_type } => cmd_list(file, offset, pattern, file_type),
        Command::Info { file } => cmd_info(file),
        Command::Extract { file, offset, dest, path, force, quiet } => {
            cmd_extract(file, offset, dest, path, force, quiet)
        }
        Command::Check { file, offset } => cmd_check(file, offset),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cramfs: {e}");
            ExitCode::FAILURE
        }
    }
}
