//! `fsp-srv`: filesystem proxy.
//!
//! ```text
//!   FspSrv (domain)
//!     ├── open_sd_card_fs / open_bis_fs ──▶ FileSystem
//!     │                                       ├── open_file ──▶ File
//!     │                                       └── open_dir  ──▶ Directory
//! ```
//!
//! Every object below `FspSrv` is a derived service: closing the
//! filesystem invalidates the files and directories opened through it.

use std::io;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::rpc::dispatch::BufferEntry;
use crate::rpc::transport::Transport;
use crate::rpc::types::{BufferAttr, Version};
use crate::rpc::wire::{Reader, Wire, cstr, fixed_str, pad};
use crate::session::{Client, Reply, Service};
use crate::util::bit;

pub const SERVICE_NAME: &str = "fsp-srv";

/// Size of a path field, terminator included.
pub const PATH_LEN: usize = 0x301;

/// Attributes for bulk file data.
const DATA_ATTR: BufferAttr =
    BufferAttr::HIPC_MAP_ALIAS.union(BufferAttr::HIPC_MAP_TRANSFER_ALLOWS_NON_SECURE);

fn path_buffer(path: &str) -> Result<BufferEntry> {
    let field = fixed_str::<PATH_LEN>(path)?;
    Ok(BufferEntry::raw_in(field.to_vec(), BufferAttr::HIPC_POINTER))
}

// ── Value types ──────────────────────────────────────────────

/// Built-in storage partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BisPartitionId {
    BootPartition1Root = 0,
    BootPartition2Root = 10,
    UserDataRoot = 20,
    BootConfigAndPackage2Part1 = 21,
    BootConfigAndPackage2Part2 = 22,
    BootConfigAndPackage2Part3 = 23,
    BootConfigAndPackage2Part4 = 24,
    BootConfigAndPackage2Part5 = 25,
    BootConfigAndPackage2Part6 = 26,
    CalibrationBinary = 27,
    CalibrationFile = 28,
    SafeMode = 29,
    User = 30,
    System = 31,
    SystemProperEncryption = 32,
    SystemProperPartition = 33,
    SignedSystemPartitionOnSafeMode = 34,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Directory,
    File,
}

impl EntryType {
    fn from_raw(raw: i64) -> Self {
        if raw == 1 { Self::File } else { Self::Directory }
    }
}

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    /// Writable, starting at the current end of the file.
    pub append: bool,
}

impl OpenMode {
    pub const READ: Self = Self {
        read: true,
        write: false,
        append: false,
    };
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        append: false,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        append: false,
    };
    pub const APPEND: Self = Self {
        read: false,
        write: false,
        append: true,
    };

    /// Parse a mode string made of `r`, `w` and `a`.
    pub fn parse(mode: &str) -> Result<Self> {
        let mut out = Self::default();
        for c in mode.chars() {
            match c {
                'r' => out.read = true,
                'w' => out.write = true,
                'a' => out.append = true,
                _ => return Err(Error::ProtocolViolation("open mode accepts only r, w and a")),
            }
        }
        Ok(out)
    }

    pub fn bits(self) -> u32 {
        let mut mode = 0;
        if self.read {
            mode |= bit(&[0]);
        }
        if self.write || self.append {
            mode |= bit(&[1, 2]);
        }
        mode
    }
}

/// Timestamps of a file, seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileTimestamp {
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
    pub is_valid: bool,
}

impl Wire for FileTimestamp {
    const SIZE: usize = 32;

    fn encode(&self, out: &mut Vec<u8>) {
        self.created.encode(out);
        self.modified.encode(out);
        self.accessed.encode(out);
        self.is_valid.encode(out);
        pad(out, 7);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        let created = r.u64()?;
        let modified = r.u64()?;
        let accessed = r.u64()?;
        let is_valid = r.bool()?;
        r.skip(7)?;
        Ok(Self {
            created,
            modified,
            accessed,
            is_valid,
        })
    }
}

/// One record returned by [`Directory::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub size: i64,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }
}

impl Wire for DirEntry {
    const SIZE: usize = 0x310;

    fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        let name = self.name.as_bytes();
        let len = name.len().min(PATH_LEN - 1);
        out.extend_from_slice(&name[..len]);
        pad(out, PATH_LEN - len + 3);
        let raw_type: i8 = match self.entry_type {
            EntryType::Directory => 0,
            EntryType::File => 1,
        };
        raw_type.encode(out);
        pad(out, 3);
        self.size.encode(out);
        debug_assert_eq!(out.len() - start, Self::SIZE);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        let name = cstr(r.bytes(PATH_LEN)?);
        r.skip(3)?;
        let entry_type = EntryType::from_raw(i64::from(r.i8()?));
        r.skip(3)?;
        let size = r.i64()?;
        Ok(Self {
            name,
            entry_type,
            size,
        })
    }
}

/// `{ u32 option; i64 size; }`
struct CreateFileIn {
    option: u32,
    size: i64,
}

impl Wire for CreateFileIn {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        self.option.encode(out);
        pad(out, 4);
        self.size.encode(out);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        let option = r.u32()?;
        r.skip(4)?;
        Ok(Self {
            option,
            size: r.i64()?,
        })
    }
}

/// `{ u32 option; u32 pad; i64 offset; u64 size; }`
struct TransferIn {
    option: u32,
    offset: i64,
    size: u64,
}

impl Wire for TransferIn {
    const SIZE: usize = 24;

    fn encode(&self, out: &mut Vec<u8>) {
        self.option.encode(out);
        pad(out, 4);
        self.offset.encode(out);
        self.size.encode(out);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        let option = r.u32()?;
        r.skip(4)?;
        Ok(Self {
            option,
            offset: r.i64()?,
            size: r.u64()?,
        })
    }
}

fn to_offset(pos: u64) -> Result<i64> {
    i64::try_from(pos).map_err(|_| Error::ProtocolViolation("file offset exceeds i64"))
}

fn to_len(count: i64) -> Result<u64> {
    u64::try_from(count).map_err(|_| Error::ProtocolViolation("target reported a negative size"))
}

// ── FspSrv ───────────────────────────────────────────────────

pub struct FspSrv<T: Transport> {
    service: Service<T>,
}

impl<T: Transport> FspSrv<T> {
    /// Open the service as a domain and register the current process.
    pub fn open(client: &Client<T>, version: Version) -> Result<Self> {
        let service = client.open_service(SERVICE_NAME, true, version)?;
        service.dispatch(service.request(1).input(&0u64).send_pid())?;
        Ok(Self { service })
    }

    pub fn service(&self) -> &Service<T> {
        &self.service
    }

    pub fn open_sd_card_fs(&self) -> Result<FileSystem<T>> {
        let reply = self.service.dispatch(self.service.request(18).out_objects(1))?;
        info!("opened sd card filesystem");
        Ok(FileSystem {
            service: reply.into_object()?,
        })
    }

    pub fn open_bis_fs(&self, partition: BisPartitionId, path: &str) -> Result<FileSystem<T>> {
        let request = self
            .service
            .request(11)
            .input(&(partition as u32))
            .buffer(path_buffer(path)?)
            .out_objects(1);
        let reply = self.service.dispatch(request)?;
        info!("opened bis partition {partition:?}");
        Ok(FileSystem {
            service: reply.into_object()?,
        })
    }

    /// Always `false` on firmware older than 2.0.0.
    pub fn is_exfat_supported(&self) -> Result<bool> {
        if self.service.version() < Version::new(2, 0, 0) {
            return Ok(false);
        }
        self.service
            .dispatch(self.service.request(27).output::<bool>())?
            .out()
    }

    pub fn close(&mut self) -> Result<()> {
        self.service.close()
    }
}

// ── FileSystem ───────────────────────────────────────────────

pub struct FileSystem<T: Transport> {
    service: Service<T>,
}

impl<T: Transport> FileSystem<T> {
    pub fn service(&self) -> &Service<T> {
        &self.service
    }

    pub fn is_closed(&self) -> bool {
        self.service.is_closed()
    }

    fn with_paths(&self, request_id: u32, paths: &[&str]) -> Result<Reply<T>> {
        let mut request = self.service.request(request_id);
        for path in paths {
            request = request.buffer(path_buffer(path)?);
        }
        self.service.dispatch(request)
    }

    /// `big` sets the concatenation-file option.
    pub fn create_file(&self, path: &str, size: i64, big: bool) -> Result<()> {
        let option = if big { bit(&[0]) } else { 0 };
        let request = self
            .service
            .request(0)
            .input(&CreateFileIn { option, size })
            .buffer(path_buffer(path)?);
        self.service.dispatch(request)?;
        debug!("created {path} ({size} bytes)");
        Ok(())
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        self.with_paths(1, &[path]).map(|_| ())
    }

    pub fn create_dir(&self, path: &str) -> Result<()> {
        self.with_paths(2, &[path]).map(|_| ())
    }

    /// Delete an empty directory.
    pub fn delete_dir(&self, path: &str) -> Result<()> {
        self.with_paths(3, &[path]).map(|_| ())
    }

    pub fn delete_dir_recursively(&self, path: &str) -> Result<()> {
        self.with_paths(4, &[path]).map(|_| ())
    }

    pub fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        self.with_paths(5, &[from, to]).map(|_| ())
    }

    pub fn rename_dir(&self, from: &str, to: &str) -> Result<()> {
        self.with_paths(6, &[from, to]).map(|_| ())
    }

    pub fn entry_type(&self, path: &str) -> Result<EntryType> {
        let request = self
            .service
            .request(7)
            .output::<u32>()
            .buffer(path_buffer(path)?);
        let raw: u32 = self.service.dispatch(request)?.out()?;
        Ok(EntryType::from_raw(i64::from(raw)))
    }

    pub fn is_file(&self, path: &str) -> Result<bool> {
        Ok(self.entry_type(path)? == EntryType::File)
    }

    pub fn open_file(&self, path: &str, mode: OpenMode) -> Result<File<T>> {
        let request = self
            .service
            .request(8)
            .input(&mode.bits())
            .buffer(path_buffer(path)?)
            .out_objects(1);
        let service = self.service.dispatch(request)?.into_object()?;
        let mut file = File {
            service,
            mode,
            pos: 0,
        };
        if mode.append {
            file.pos = to_len(file.size()?)?;
        }
        debug!("opened {path} ({:#x})", mode.bits());
        Ok(file)
    }

    /// Open a directory listing both files and subdirectories.
    pub fn open_dir(&self, path: &str) -> Result<Directory<T>> {
        self.open_dir_with(path, bit(&[0, 1]))
    }

    /// Open a directory with an explicit filter mask.
    pub fn open_dir_with(&self, path: &str, mode: u32) -> Result<Directory<T>> {
        let request = self
            .service
            .request(9)
            .input(&mode)
            .buffer(path_buffer(path)?)
            .out_objects(1);
        Ok(Directory {
            service: self.service.dispatch(request)?.into_object()?,
        })
    }

    pub fn commit(&self) -> Result<()> {
        self.service.call(10).map(|_| ())
    }

    pub fn free_space(&self, path: &str) -> Result<i64> {
        self.space(11, path)
    }

    pub fn total_space(&self, path: &str) -> Result<i64> {
        self.space(12, path)
    }

    fn space(&self, request_id: u32, path: &str) -> Result<i64> {
        let request = self
            .service
            .request(request_id)
            .output::<i64>()
            .buffer(path_buffer(path)?);
        self.service.dispatch(request)?.out()
    }

    /// Delete everything inside `path`, keeping the directory. 3.0.0+.
    pub fn clean_dir(&self, path: &str) -> Result<()> {
        self.service.version().require(Version::new(3, 0, 0))?;
        self.with_paths(13, &[path]).map(|_| ())
    }

    /// 3.0.0+.
    pub fn file_timestamp(&self, path: &str) -> Result<FileTimestamp> {
        self.service.version().require(Version::new(3, 0, 0))?;
        let request = self
            .service
            .request(14)
            .output::<FileTimestamp>()
            .buffer(path_buffer(path)?);
        self.service.dispatch(request)?.out()
    }

    pub fn close(&mut self) -> Result<()> {
        self.service.close()
    }
}

// ── File ─────────────────────────────────────────────────────

/// An open file with a local cursor.
pub struct File<T: Transport> {
    service: Service<T>,
    mode: OpenMode,
    pos: u64,
}

impl<T: Transport> File<T> {
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn is_closed(&self) -> bool {
        self.service.is_closed()
    }

    /// Read up to `size` bytes at `offset`. The result is cut to the
    /// length the target reports.
    pub fn read_at(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let input = TransferIn {
            option: 0,
            offset: to_offset(offset)?,
            size,
        };
        let request = self
            .service
            .request(0)
            .input(&input)
            .output::<u64>()
            .buffer(BufferEntry::sized_out(size, DATA_ATTR));
        let reply = self.service.dispatch(request)?;
        let read: u64 = reply.out()?;
        let mut data = reply.buffer(0)?.to_vec();
        data.truncate(usize::try_from(read).unwrap_or(usize::MAX));
        Ok(data)
    }

    /// Write `data` at `offset`, asking the target to flush when `flush`.
    pub fn write_at(&self, offset: u64, data: &[u8], flush: bool) -> Result<()> {
        let input = TransferIn {
            option: u32::from(flush),
            offset: to_offset(offset)?,
            size: data.len() as u64,
        };
        let request = self
            .service
            .request(1)
            .input(&input)
            .buffer(BufferEntry::raw_in(data, DATA_ATTR));
        self.service.dispatch(request).map(|_| ())
    }

    /// Read from the cursor; `None` reads to the end of the file.
    pub fn read_bytes(&mut self, size: Option<u64>) -> Result<Vec<u8>> {
        let size = match size {
            Some(size) => size,
            None => to_len(self.size()?)?.saturating_sub(self.pos),
        };
        let data = self.read_at(self.pos, size)?;
        self.pos += data.len() as u64;
        Ok(data)
    }

    /// Write at the cursor and advance it.
    pub fn write_bytes(&mut self, data: &[u8], flush: bool) -> Result<()> {
        self.write_at(self.pos, data, flush)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.service.call(2).map(|_| ())
    }

    pub fn set_size(&self, size: i64) -> Result<()> {
        self.service
            .dispatch(self.service.request(3).input(&size))
            .map(|_| ())
    }

    pub fn size(&self) -> Result<i64> {
        self.service
            .dispatch(self.service.request(4).output::<i64>())?
            .out()
    }

    /// Resize the file to the cursor position.
    pub fn truncate(&self) -> Result<u64> {
        self.set_size(to_offset(self.pos)?)?;
        Ok(self.pos)
    }

    pub fn close(&mut self) -> Result<()> {
        self.service.close()
    }
}

impl<T: Transport> io::Read for File<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.read_at(self.pos, buf.len() as u64)?;
        buf[..data.len()].copy_from_slice(&data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }
}

impl<T: Transport> io::Write for File<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf, false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        File::flush(self)?;
        Ok(())
    }
}

impl<T: Transport> io::Seek for File<T> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            io::SeekFrom::Start(at) => {
                self.pos = at;
                return Ok(at);
            }
            io::SeekFrom::Current(delta) => (self.pos, delta),
            io::SeekFrom::End(delta) => (to_len(self.size()?)?, delta),
        };
        self.pos = base.checked_add_signed(delta).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        Ok(self.pos)
    }
}

// ── Directory ────────────────────────────────────────────────

pub struct Directory<T: Transport> {
    service: Service<T>,
}

impl<T: Transport> Directory<T> {
    pub fn is_closed(&self) -> bool {
        self.service.is_closed()
    }

    /// Read up to `max_entries` records; `None` asks for all of them.
    pub fn read(&self, max_entries: Option<u64>) -> Result<Vec<DirEntry>> {
        let max = match max_entries {
            Some(max) => max,
            None => self.entry_count()?,
        };
        if max == 0 {
            return Ok(Vec::new());
        }
        let count = usize::try_from(max)
            .map_err(|_| Error::ProtocolViolation("entry count exceeds host address space"))?;
        let request = self
            .service
            .request(0)
            .output::<i64>()
            .buffer(BufferEntry::array_out::<DirEntry>(count, BufferAttr::HIPC_MAP_ALIAS));
        let reply = self.service.dispatch(request)?;
        let read = to_len(reply.out::<i64>()?)?;
        let mut entries = reply.buffer_array::<DirEntry>(0)?;
        entries.truncate(usize::try_from(read).unwrap_or(usize::MAX));
        Ok(entries)
    }

    pub fn entry_count(&self) -> Result<u64> {
        let count: i64 = self
            .service
            .dispatch(self.service.request(1).output::<i64>())?
            .out()?;
        to_len(count)
    }

    pub fn close(&mut self) -> Result<()> {
        self.service.close()
    }
}
