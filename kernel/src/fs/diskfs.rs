// =============================================================================
// Skylark — Block-Backed Snapshot
// =============================================================================
//
// Persists ramfs contents to a sector device and hydrates them back at
// boot. The drive itself is out of scope: anything implementing
// read/write-sector works.
//
// On-disk layout:
//   sector 0        untouched (boot block)
//   sectors 1..k    directory table: 128 packed entries of
//                   { name: [u8; 64], size: u32 LE, start_sector: u32 LE }
//   sector 128..    file data, each file starting on a fresh sector
//
// A zero-length name marks a free directory slot. Directory nodes are
// stored as entries with a trailing-slash name and size 0 so empty
// directories survive the round trip.
// =============================================================================

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::fs::{path, ramfs, FsError};

pub const SECTOR_SIZE: usize = 512;
/// Directory table capacity.
pub const MAX_FILES: usize = 128;
/// First directory sector.
pub const DIR_START_SECTOR: u32 = 1;
/// First data sector; files are packed linearly from here.
pub const DATA_START_SECTOR: u32 = 128;

const NAME_LEN: usize = 64;
const ENTRY_SIZE: usize = NAME_LEN + 4 + 4;
const DIR_BYTES: usize = MAX_FILES * ENTRY_SIZE;
const DIR_SECTORS: u32 = DIR_BYTES.div_ceil(SECTOR_SIZE) as u32;

/// Contract with the out-of-scope block driver.
pub trait BlockDevice {
    fn read_sector(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FsError>;
    fn write_sector(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), FsError>;
}

/// One directory slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
    pub start_sector: u32,
}

fn encode_entry(entry: &DirEntry, out: &mut [u8]) {
    out[..ENTRY_SIZE].fill(0);
    let name = entry.name.as_bytes();
    let n = name.len().min(NAME_LEN - 1);
    out[..n].copy_from_slice(&name[..n]);
    out[NAME_LEN..NAME_LEN + 4].copy_from_slice(&entry.size.to_le_bytes());
    out[NAME_LEN + 4..NAME_LEN + 8].copy_from_slice(&entry.start_sector.to_le_bytes());
}

fn decode_entry(raw: &[u8]) -> Option<DirEntry> {
    let name_end = raw[..NAME_LEN].iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    if name_end == 0 {
        return None;
    }
    let name = core::str::from_utf8(&raw[..name_end]).ok()?;
    let size = u32::from_le_bytes([raw[64], raw[65], raw[66], raw[67]]);
    let start_sector = u32::from_le_bytes([raw[68], raw[69], raw[70], raw[71]]);
    Some(DirEntry {
        name: String::from(name),
        size,
        start_sector,
    })
}

/// Read the full directory region as one byte buffer.
fn read_directory_bytes<D: BlockDevice>(dev: &mut D) -> Result<Vec<u8>, FsError> {
    let mut bytes = vec![0u8; DIR_SECTORS as usize * SECTOR_SIZE];
    let mut sector = [0u8; SECTOR_SIZE];
    for i in 0..DIR_SECTORS {
        dev.read_sector(DIR_START_SECTOR + i, &mut sector)?;
        let off = i as usize * SECTOR_SIZE;
        bytes[off..off + SECTOR_SIZE].copy_from_slice(&sector);
    }
    Ok(bytes)
}

fn write_directory_bytes<D: BlockDevice>(dev: &mut D, bytes: &[u8]) -> Result<(), FsError> {
    let mut sector = [0u8; SECTOR_SIZE];
    for i in 0..DIR_SECTORS {
        let off = i as usize * SECTOR_SIZE;
        sector.copy_from_slice(&bytes[off..off + SECTOR_SIZE]);
        dev.write_sector(DIR_START_SECTOR + i, &sector)?;
    }
    Ok(())
}

/// Parse every occupied directory slot.
pub fn read_directory<D: BlockDevice>(dev: &mut D) -> Result<Vec<DirEntry>, FsError> {
    let bytes = read_directory_bytes(dev)?;
    let mut entries = Vec::new();
    for slot in 0..MAX_FILES {
        let raw = &bytes[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE];
        if let Some(entry) = decode_entry(raw) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Blank the directory table.
pub fn format<D: BlockDevice>(dev: &mut D) -> Result<(), FsError> {
    write_directory_bytes(dev, &vec![0u8; DIR_SECTORS as usize * SECTOR_SIZE])
}

/// Write `(name, data)` pairs to the device, replacing its contents.
/// Returns the number of entries written; fails with `NoSpace` past
/// 128 entries.
pub fn save<D: BlockDevice>(
    dev: &mut D,
    entries: &[(String, Vec<u8>)],
) -> Result<usize, FsError> {
    if entries.len() > MAX_FILES {
        return Err(FsError::NoSpace);
    }

    let mut dir_bytes = vec![0u8; DIR_SECTORS as usize * SECTOR_SIZE];
    let mut next_data_sector = DATA_START_SECTOR;
    let mut sector = [0u8; SECTOR_SIZE];

    for (slot, (name, data)) in entries.iter().enumerate() {
        let start_sector = if data.is_empty() { 0 } else { next_data_sector };
        let entry = DirEntry {
            name: name.clone(),
            size: data.len() as u32,
            start_sector,
        };
        encode_entry(&entry, &mut dir_bytes[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE]);

        // Data region: each file starts on a fresh sector.
        let mut written = 0;
        while written < data.len() {
            let chunk = (data.len() - written).min(SECTOR_SIZE);
            sector.fill(0);
            sector[..chunk].copy_from_slice(&data[written..written + chunk]);
            dev.write_sector(next_data_sector, &sector)?;
            next_data_sector += 1;
            written += chunk;
        }
    }

    write_directory_bytes(dev, &dir_bytes)?;
    Ok(entries.len())
}

/// Read one file's data given its directory entry.
pub fn read_file_data<D: BlockDevice>(
    dev: &mut D,
    entry: &DirEntry,
) -> Result<Vec<u8>, FsError> {
    let mut data = Vec::with_capacity(entry.size as usize);
    let mut sector = [0u8; SECTOR_SIZE];
    let mut remaining = entry.size as usize;
    let mut lba = entry.start_sector;
    while remaining > 0 {
        dev.read_sector(lba, &mut sector)?;
        let chunk = remaining.min(SECTOR_SIZE);
        data.extend_from_slice(&sector[..chunk]);
        remaining -= chunk;
        lba += 1;
    }
    Ok(data)
}

const CACHE_SLOTS: usize = 16;

/// A mounted snapshot device with a small direct-mapped name cache
/// mirroring the one in ramfs.
pub struct DiskFs<D: BlockDevice> {
    dev: D,
    cache: [Option<(String, DirEntry)>; CACHE_SLOTS],
}

impl<D: BlockDevice> DiskFs<D> {
    pub fn new(dev: D) -> Self {
        const EMPTY: Option<(String, DirEntry)> = None;
        Self {
            dev,
            cache: [EMPTY; CACHE_SLOTS],
        }
    }

    fn cache_slot(name: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in name.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100_0000_01b3);
        }
        (hash % CACHE_SLOTS as u64) as usize
    }

    /// Look a file up by name, via the cache when warm.
    pub fn find(&mut self, name: &str) -> Result<Option<DirEntry>, FsError> {
        if let Some((cached, entry)) = &self.cache[Self::cache_slot(name)] {
            if cached == name {
                return Ok(Some(entry.clone()));
            }
        }
        let entries = read_directory(&mut self.dev)?;
        for entry in entries {
            if entry.name == name {
                self.cache[Self::cache_slot(name)] = Some((String::from(name), entry.clone()));
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Read a whole file by name.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, FsError> {
        let entry = self.find(name)?.ok_or(FsError::NotFound)?;
        read_file_data(&mut self.dev, &entry)
    }

    /// Replace device contents from `(name, data)` pairs; drops the cache.
    pub fn save(&mut self, entries: &[(String, Vec<u8>)]) -> Result<usize, FsError> {
        const EMPTY: Option<(String, DirEntry)> = None;
        self.cache = [EMPTY; CACHE_SLOTS];
        save(&mut self.dev, entries)
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }
}

/// Materialize every directory entry into the global ramfs, creating
/// parent directories along the way. Returns the number of nodes
/// hydrated.
pub fn load_into_ramfs<D: BlockDevice>(dev: &mut D) -> Result<usize, FsError> {
    let entries = read_directory(dev)?;
    let mut loaded = 0;
    for entry in &entries {
        ensure_parents(&entry.name);
        if path::is_dir_name(&entry.name) {
            match ramfs::mkdir(&entry.name) {
                Ok(()) | Err(FsError::Exists) => {}
                Err(e) => return Err(e),
            }
        } else {
            let data = read_file_data(dev, entry)?;
            ramfs::write_or_create(&entry.name, &data)?;
        }
        loaded += 1;
    }
    Ok(loaded)
}

/// Write the global ramfs back to the device.
pub fn sync_from_ramfs<D: BlockDevice>(dev: &mut D) -> Result<usize, FsError> {
    save(dev, &ramfs::entries())
}

fn ensure_parents(name: &str) {
    // Walk from the root down, creating each missing ancestor.
    let mut missing: Vec<String> = Vec::new();
    let mut parent = path::parent_of(name);
    while parent != "/" && !ramfs::exists(&parent) {
        missing.push(parent.clone());
        parent = path::parent_of(&parent);
    }
    for dir in missing.iter().rev() {
        let _ = ramfs::mkdir(dir);
    }
}

/// RAM-backed block device: the default snapshot target when no real
/// drive is attached, and the test double for one.
pub struct MemDisk {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

impl MemDisk {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: vec![[0; SECTOR_SIZE]; sector_count],
        }
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FsError> {
        match self.sectors.get(lba as usize) {
            Some(sector) => {
                buf.copy_from_slice(sector);
                Ok(())
            }
            None => Err(FsError::Device),
        }
    }

    fn write_sector(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), FsError> {
        match self.sectors.get_mut(lba as usize) {
            Some(sector) => {
                sector.copy_from_slice(buf);
                Ok(())
            }
            None => Err(FsError::Device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<(String, Vec<u8>)> {
        vec![
            (String::from("/docs/"), Vec::new()),
            (String::from("/docs/readme"), b"hello disk".to_vec()),
            (String::from("/big"), vec![0xAB; SECTOR_SIZE + 100]),
            (String::from("/empty"), Vec::new()),
        ]
    }

    #[test]
    fn directory_entry_roundtrip() {
        let entry = DirEntry {
            name: String::from("/docs/readme"),
            size: 10,
            start_sector: 128,
        };
        let mut raw = [0u8; ENTRY_SIZE];
        encode_entry(&entry, &mut raw);
        assert_eq!(decode_entry(&raw), Some(entry));
        // A zeroed slot decodes to nothing.
        assert_eq!(decode_entry(&[0u8; ENTRY_SIZE]), None);
    }

    #[test]
    fn save_and_read_directory() {
        let mut disk = MemDisk::new(1024);
        save(&mut disk, &sample_entries()).unwrap();
        let dir = read_directory(&mut disk).unwrap();
        assert_eq!(dir.len(), 4);
        assert_eq!(dir[1].name, "/docs/readme");
        assert_eq!(dir[1].size, 10);
        assert_eq!(dir[1].start_sector, DATA_START_SECTOR);
        // The multi-sector file starts right after readme's sector.
        assert_eq!(dir[2].start_sector, DATA_START_SECTOR + 1);
    }

    #[test]
    fn file_data_survives_multi_sector_files() {
        let mut disk = MemDisk::new(1024);
        save(&mut disk, &sample_entries()).unwrap();
        let dir = read_directory(&mut disk).unwrap();
        let big = read_file_data(&mut disk, &dir[2]).unwrap();
        assert_eq!(big.len(), SECTOR_SIZE + 100);
        assert!(big.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn diskfs_find_uses_the_cache() {
        let mut disk = MemDisk::new(1024);
        save(&mut disk, &sample_entries()).unwrap();
        let mut fs = DiskFs::new(disk);
        let first = fs.find("/docs/readme").unwrap().unwrap();
        let second = fs.find("/docs/readme").unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(fs.read("/docs/readme").unwrap(), b"hello disk".to_vec());
        assert_eq!(fs.read("/missing"), Err(FsError::NotFound));
    }

    #[test]
    fn format_clears_the_directory() {
        let mut disk = MemDisk::new(1024);
        save(&mut disk, &sample_entries()).unwrap();
        format(&mut disk).unwrap();
        assert!(read_directory(&mut disk).unwrap().is_empty());
    }

    #[test]
    fn too_many_entries_is_no_space() {
        let mut disk = MemDisk::new(1024);
        let entries: Vec<_> = (0..MAX_FILES + 1)
            .map(|i| (alloc::format!("/f{}", i), Vec::new()))
            .collect();
        assert_eq!(save(&mut disk, &entries), Err(FsError::NoSpace));
    }

    #[test]
    fn out_of_range_sector_is_a_device_error() {
        let mut disk = MemDisk::new(2);
        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(disk.read_sector(5, &mut buf), Err(FsError::Device));
    }
}
