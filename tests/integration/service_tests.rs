//! set:sys and fsp-srv stubs against a simulated target with an
//! in-memory filesystem.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use nxipc::services::fs::{BisPartitionId, DirEntry, EntryType, FspSrv, OpenMode};
use nxipc::services::set::{self, FirmwareVersion};
use nxipc::{Error, Version, Wire};

use crate::mock_device::{Call, Event, MockDevice, ObjectInfo};

const NOT_FOUND: u32 = 0x202;
const ALREADY_EXISTS: u32 = 0x402;

// ── set:sys ───────────────────────────────────────────────────

fn firmware(major: u8, minor: u8, micro: u8) -> FirmwareVersion {
    let mut display_version = [0; 0x18];
    let text = format!("{major}.{minor}.{micro}");
    display_version[..text.len()].copy_from_slice(text.as_bytes());
    let mut platform = [0; 0x20];
    platform[..4].copy_from_slice(b"NX\0\0");
    FirmwareVersion {
        major,
        minor,
        micro,
        revision_major: 0,
        revision_minor: 0,
        platform,
        version_hash: [b'a'; 0x40],
        display_version,
        display_title: [0; 0x80],
    }
}

#[test]
fn firmware_version_feeds_later_services() {
    let device = MockDevice::new();
    device.register("set:sys", |_: &ObjectInfo, call: &mut Call| {
        assert_eq!(call.request_id, 3);
        call.buffers[0].data = firmware(4, 1, 0).to_bytes();
        Ok(())
    });
    let client = device.client();

    let version = set::query_version(&client).unwrap();
    assert_eq!(version, Version::new(4, 1, 0));
    assert_eq!(version.to_string(), "4.1.0");
    assert_eq!(device.close_count(), 1);
}

// ── fsp-srv ───────────────────────────────────────────────────

#[derive(Default)]
struct FakeFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl FakeFs {
    fn children(&self, dir: &str) -> Vec<DirEntry> {
        let dirs = self.dirs.iter().filter(|d| parent_of(d) == dir).map(|d| DirEntry {
            name: name_of(d).into(),
            entry_type: EntryType::Directory,
            size: 0,
        });
        let files = self.files.iter().filter(|(f, _)| parent_of(f) == dir).map(|(f, data)| {
            DirEntry {
                name: name_of(f).into(),
                entry_type: EntryType::File,
                size: data.len() as i64,
            }
        });
        dirs.chain(files).collect()
    }

    fn exists(&self, path: &str) -> bool {
        path == "/" || self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn filesystem(&mut self, call: &mut Call) -> Result<(), u32> {
        let path = if call.buffers.is_empty() {
            String::new()
        } else {
            call.path(0)
        };
        match call.request_id {
            0 => {
                if self.exists(&path) {
                    return Err(ALREADY_EXISTS);
                }
                let size = call.input_u64(8) as usize;
                self.files.insert(path, vec![0; size]);
            }
            1 => {
                self.files.remove(&path).ok_or(NOT_FOUND)?;
            }
            2 => {
                if self.exists(&path) {
                    return Err(ALREADY_EXISTS);
                }
                self.dirs.insert(path);
            }
            3 | 4 => {
                if !self.dirs.contains(&path) {
                    return Err(NOT_FOUND);
                }
                if call.request_id == 3 && !self.children(&path).is_empty() {
                    return Err(0x3_0000);
                }
                let prefix = format!("{path}/");
                self.files.retain(|f, _| !f.starts_with(&prefix));
                self.dirs.retain(|d| !d.starts_with(&prefix) && *d != path);
            }
            5 => {
                let data = self.files.remove(&path).ok_or(NOT_FOUND)?;
                self.files.insert(call.path(1), data);
            }
            6 => {
                if !self.dirs.remove(&path) {
                    return Err(NOT_FOUND);
                }
                self.dirs.insert(call.path(1));
            }
            7 => {
                let kind: u32 = if self.files.contains_key(&path) {
                    1
                } else if self.exists(&path) {
                    0
                } else {
                    return Err(NOT_FOUND);
                };
                call.set_out(&kind.to_le_bytes());
            }
            8 => {
                if !self.files.contains_key(&path) {
                    return Err(NOT_FOUND);
                }
                call.spawn("file", &path);
            }
            9 => {
                if !self.exists(&path) || self.files.contains_key(&path) {
                    return Err(NOT_FOUND);
                }
                call.spawn("dir", &path);
            }
            10 => {}
            11 => call.set_out(&1000i64.to_le_bytes()),
            12 => call.set_out(&4000i64.to_le_bytes()),
            13 => {
                let prefix = format!("{path}/");
                self.files.retain(|f, _| !f.starts_with(&prefix));
                self.dirs.retain(|d| !d.starts_with(&prefix));
            }
            14 => {
                let mut ts = Vec::new();
                for v in [1u64, 2, 3] {
                    ts.extend_from_slice(&v.to_le_bytes());
                }
                ts.push(1);
                ts.resize(32, 0);
                call.set_out(&ts);
            }
            _ => return Err(0x1_0000),
        }
        Ok(())
    }

    fn file(&mut self, path: &str, call: &mut Call) -> Result<(), u32> {
        let data = self.files.get_mut(path).ok_or(NOT_FOUND)?;
        match call.request_id {
            0 => {
                let offset = (call.input_u64(8) as usize).min(data.len());
                let size = call.input_u64(16) as usize;
                let end = (offset + size).min(data.len());
                let n = end - offset;
                call.buffers[0].data[..n].copy_from_slice(&data[offset..end]);
                call.set_out(&(n as u64).to_le_bytes());
            }
            1 => {
                let offset = call.input_u64(8) as usize;
                let incoming = &call.buffers[0].data;
                if data.len() < offset + incoming.len() {
                    data.resize(offset + incoming.len(), 0);
                }
                data[offset..offset + incoming.len()].copy_from_slice(incoming);
            }
            2 => {}
            3 => data.resize(call.input_u64(0) as usize, 0),
            4 => call.set_out(&(data.len() as i64).to_le_bytes()),
            _ => return Err(0x1_0000),
        }
        Ok(())
    }

    fn directory(&self, path: &str, call: &mut Call) -> Result<(), u32> {
        let children = self.children(path);
        match call.request_id {
            0 => {
                let capacity = call.buffers[0].data.len() / DirEntry::SIZE;
                let n = children.len().min(capacity);
                for (i, entry) in children.iter().take(n).enumerate() {
                    let at = i * DirEntry::SIZE;
                    call.buffers[0].data[at..at + DirEntry::SIZE]
                        .copy_from_slice(&entry.to_bytes());
                }
                call.set_out(&(n as i64).to_le_bytes());
            }
            1 => call.set_out(&(children.len() as i64).to_le_bytes()),
            _ => return Err(0x1_0000),
        }
        Ok(())
    }
}

fn fs_device() -> (MockDevice, Rc<RefCell<FakeFs>>) {
    let device = MockDevice::new();
    let fs = Rc::new(RefCell::new(FakeFs::default()));

    device.register("fsp-srv", |_: &ObjectInfo, call: &mut Call| {
        match call.request_id {
            1 => {
                assert!(call.send_pid);
                assert_eq!(call.input_u64(0), 0);
            }
            11 => {
                let partition = call.input_u32(0);
                call.spawn("fs", &format!("bis{partition}"));
            }
            18 => call.spawn("fs", "sd"),
            27 => call.out[0] = 1,
            _ => return Err(0x1_0000),
        }
        Ok(())
    });

    let state = Rc::clone(&fs);
    device.register_kind("fs", move |_: &ObjectInfo, call: &mut Call| {
        state.borrow_mut().filesystem(call)
    });
    let state = Rc::clone(&fs);
    device.register_kind("file", move |info: &ObjectInfo, call: &mut Call| {
        state.borrow_mut().file(&info.tag, call)
    });
    let state = Rc::clone(&fs);
    device.register_kind("dir", move |info: &ObjectInfo, call: &mut Call| {
        state.borrow().directory(&info.tag, call)
    });

    (device, fs)
}

#[test]
fn open_registers_process_over_domain() {
    let (device, _) = fs_device();
    let client = device.client();
    let fsp = FspSrv::open(&client, Version::default()).unwrap();
    assert!(fsp.service().reference().is_domain());
    assert!(device.events().iter().any(|e| matches!(e, Event::Convert(_))));
    assert_eq!(device.dispatches(), vec![1]);
}

#[test]
fn exfat_query_is_version_gated() {
    let (device, _) = fs_device();
    let client = device.client();

    let old = FspSrv::open(&client, Version::new(1, 0, 0)).unwrap();
    assert!(!old.is_exfat_supported().unwrap());
    assert_eq!(device.dispatches(), vec![1]);

    let new = FspSrv::open(&client, Version::new(2, 0, 0)).unwrap();
    assert!(new.is_exfat_supported().unwrap());
    assert_eq!(device.dispatches(), vec![1, 1, 27]);
}

#[test]
fn file_roundtrip_on_sd_card() {
    let (device, fake) = fs_device();
    let client = device.client();
    let fsp = FspSrv::open(&client, Version::new(9, 0, 0)).unwrap();
    let sd = fsp.open_sd_card_fs().unwrap();
    assert!(sd.service().reference().is_domain_subobject());

    sd.create_dir("/logs").unwrap();
    sd.create_file("/logs/a.txt", 0, false).unwrap();
    assert_eq!(
        sd.create_file("/logs/a.txt", 0, false).unwrap_err().result().map(|rc| rc.value()),
        Some(ALREADY_EXISTS)
    );

    let mut file = sd.open_file("/logs/a.txt", OpenMode::READ_WRITE).unwrap();
    file.write_bytes(b"hello ", false).unwrap();
    file.write_bytes(b"world", true).unwrap();
    assert_eq!(file.position(), 11);
    assert_eq!(file.size().unwrap(), 11);
    assert_eq!(file.read_at(6, 100).unwrap(), b"world");
    file.close().unwrap();

    assert_eq!(fake.borrow().files["/logs/a.txt"], b"hello world");
    assert_eq!(sd.entry_type("/logs").unwrap(), EntryType::Directory);
    assert!(sd.is_file("/logs/a.txt").unwrap());
    assert_eq!(sd.free_space("/").unwrap(), 1000);
    assert_eq!(sd.total_space("/").unwrap(), 4000);
    sd.commit().unwrap();
}

#[test]
fn append_mode_starts_at_end() {
    let (device, fake) = fs_device();
    fake.borrow_mut().files.insert("/f".into(), b"abc".to_vec());
    let client = device.client();
    let fsp = FspSrv::open(&client, Version::default()).unwrap();
    let sd = fsp.open_sd_card_fs().unwrap();

    let mut file = sd.open_file("/f", OpenMode::parse("a").unwrap()).unwrap();
    assert_eq!(file.position(), 3);
    file.write_bytes(b"def", false).unwrap();
    assert_eq!(fake.borrow().files["/f"], b"abcdef");
}

#[test]
fn file_implements_std_io() {
    let (device, fake) = fs_device();
    fake.borrow_mut().files.insert("/io".into(), Vec::new());
    let client = device.client();
    let fsp = FspSrv::open(&client, Version::default()).unwrap();
    let sd = fsp.open_sd_card_fs().unwrap();

    let mut file = sd.open_file("/io", OpenMode::READ_WRITE).unwrap();
    file.write_all(b"0123456789").unwrap();
    file.flush().unwrap();
    assert_eq!(file.seek(SeekFrom::End(-4)).unwrap(), 6);
    let mut tail = String::new();
    file.read_to_string(&mut tail).unwrap();
    assert_eq!(tail, "6789");

    file.seek(SeekFrom::Start(2)).unwrap();
    assert_eq!(file.truncate().unwrap(), 2);
    assert_eq!(fake.borrow().files["/io"], b"01");
    assert!(file.seek(SeekFrom::Current(-5)).is_err());
}

#[test]
fn directory_listing_and_removal() {
    let (device, fake) = fs_device();
    {
        let mut f = fake.borrow_mut();
        f.dirs.insert("/d".into());
        f.dirs.insert("/d/sub".into());
        f.files.insert("/d/x.bin".into(), vec![0; 12]);
    }
    let client = device.client();
    let fsp = FspSrv::open(&client, Version::new(3, 0, 0)).unwrap();
    let sd = fsp.open_sd_card_fs().unwrap();

    let dir = sd.open_dir("/d").unwrap();
    assert_eq!(dir.entry_count().unwrap(), 2);
    let entries = dir.read(None).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "sub");
    assert!(!entries[0].is_file());
    assert_eq!(entries[1].name, "x.bin");
    assert_eq!(entries[1].size, 12);
    assert_eq!(dir.read(Some(1)).unwrap().len(), 1);

    let ts = sd.file_timestamp("/d/x.bin").unwrap();
    assert_eq!((ts.created, ts.modified, ts.accessed, ts.is_valid), (1, 2, 3, true));

    assert!(sd.delete_dir("/d").is_err());
    sd.rename_file("/d/x.bin", "/d/y.bin").unwrap();
    sd.clean_dir("/d").unwrap();
    assert_eq!(dir.entry_count().unwrap(), 0);
    sd.delete_dir("/d").unwrap();
    assert!(fake.borrow().dirs.is_empty());
}

#[test]
fn newer_commands_rejected_on_old_firmware() {
    let (device, _) = fs_device();
    let client = device.client();
    let fsp = FspSrv::open(&client, Version::new(2, 0, 0)).unwrap();
    let sd = fsp.open_sd_card_fs().unwrap();
    let before = device.dispatches().len();

    assert_eq!(
        sd.clean_dir("/").unwrap_err(),
        Error::Unsupported {
            required: Version::new(3, 0, 0),
            actual: Version::new(2, 0, 0),
        }
    );
    assert!(sd.file_timestamp("/x").is_err());
    assert_eq!(device.dispatches().len(), before);
}

#[test]
fn closing_filesystem_invalidates_open_files() {
    let (device, fake) = fs_device();
    fake.borrow_mut().files.insert("/f".into(), vec![1, 2, 3]);
    let client = device.client();
    let fsp = FspSrv::open(&client, Version::default()).unwrap();
    let mut sd = fsp.open_sd_card_fs().unwrap();
    let mut file = sd.open_file("/f", OpenMode::READ).unwrap();
    let mut dir = sd.open_dir("/").unwrap();

    sd.close().unwrap();
    assert!(file.is_closed());
    assert!(dir.is_closed());
    file.close().unwrap();
    dir.close().unwrap();
    drop(file);
    drop(dir);
    assert_eq!(device.close_count(), 1);
    assert!(matches!(sd.is_file("/f"), Err(Error::ProtocolViolation(_))));
}

#[test]
fn bis_partition_id_travels_as_input() {
    let (device, _) = fs_device();
    let client = device.client();
    let fsp = FspSrv::open(&client, Version::default()).unwrap();
    let _system = fsp.open_bis_fs(BisPartitionId::System, "").unwrap();
    assert_eq!(device.dispatches(), vec![1, 11]);
    assert_eq!(BisPartitionId::User as u32, 30);
}
