use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
    sync::Arc,
};

use tracing::{info, warn};

use crate::{entry::RdbEntry, events::EventEmitter, store::RdbStore, types::RdbValueType};

const MAGIC: u32 = 0x4252_4442; // b"BRDB", little-endian
const VERSION: u16 = 1;

/// Writes `store` to `path`: `{Magic:u32, Version:u16, MapSize:u64,
/// ArenaUsed:u64, MapBytes[MapSize], ArenaBytes[ArenaUsed]}`, matching the
/// source's save/load shape with a magic/version prefix ahead of it
/// (absent from the source, which trusted the caller to know the layout).
/// Each `MapBytes` record is a NUL-terminated key followed by a 41-byte
/// header (`created:i64, flags:u64, type:u8, elem_size:u64, count:u64,
/// offset:u64`); `ArenaBytes` is the entries' raw value bytes laid out at
/// their tracked offsets, with any fragmentation holes left zeroed —
/// the source never compacts either.
pub fn save(store: &RdbStore, path: impl AsRef<Path>) -> io::Result<()> {
    let entries = store.entries_for_snapshot();
    let arena_used = store.arena_used();

    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(&MAGIC.to_le_bytes())?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&(entries.len() as u64).to_le_bytes())?;
    w.write_all(&arena_used.to_le_bytes())?;

    for (key, entry) in &entries {
        w.write_all(key.as_bytes())?;
        w.write_all(&[0u8])?;
        w.write_all(&entry.created.0.to_le_bytes())?;
        w.write_all(&entry.flags.to_le_bytes())?;
        w.write_all(&[entry.value_type as u8])?;
        w.write_all(&entry.elem_size.to_le_bytes())?;
        w.write_all(&entry.count.to_le_bytes())?;
        w.write_all(&entry.offset.to_le_bytes())?;
    }

    let mut arena_buf = vec![0u8; arena_used as usize];
    for (_, entry) in &entries {
        let data = entry.read();
        let start = entry.offset as usize;
        if start + data.len() <= arena_buf.len() {
            arena_buf[start..start + data.len()].copy_from_slice(&data);
        }
    }
    w.write_all(&arena_buf)?;
    w.flush()?;
    info!(keys = entries.len(), arena_used, "rdb: snapshot written");
    Ok(())
}

/// Loads a snapshot written by [`save`] into a freshly constructed store.
/// Entries whose stored value type byte is unrecognized are dropped with a
/// warning rather than failing the whole load.
pub fn load(path: impl AsRef<Path>, emitter: Arc<dyn EventEmitter>) -> io::Result<RdbStore> {
    let mut r = BufReader::new(File::open(path)?);

    let mut magic_buf = [0u8; 4];
    r.read_exact(&mut magic_buf)?;
    if u32::from_le_bytes(magic_buf) != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad rdb snapshot magic"));
    }
    let mut version_buf = [0u8; 2];
    r.read_exact(&mut version_buf)?;
    let version = u16::from_le_bytes(version_buf);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported rdb snapshot version {version}"),
        ));
    }

    let map_size = read_u64(&mut r)?;
    let arena_used = read_u64(&mut r)?;

    struct Record {
        key: String,
        created: u64,
        flags: u64,
        value_type: u8,
        count: u64,
        offset: u64,
    }

    let mut records = Vec::with_capacity(map_size as usize);
    for _ in 0..map_size {
        let key = read_cstr(&mut r)?;
        let created = read_u64(&mut r)?;
        let flags = read_u64(&mut r)?;
        let mut ty_buf = [0u8; 1];
        r.read_exact(&mut ty_buf)?;
        let _elem_size = read_u64(&mut r)?; // derivable from value_type, kept for layout fidelity
        let count = read_u64(&mut r)?;
        let offset = read_u64(&mut r)?;
        records.push(Record { key, created, flags, value_type: ty_buf[0], count, offset });
    }

    let mut arena_buf = vec![0u8; arena_used as usize];
    r.read_exact(&mut arena_buf)?;

    let store = RdbStore::new(arena_used.max(1), emitter);
    for rec in records {
        let Some(value_type) = RdbValueType::from_u8(rec.value_type) else {
            warn!(key = rec.key, raw = rec.value_type, "rdb snapshot: unknown value type, skipping entry");
            continue;
        };
        let size = RdbEntry::data_size(value_type, rec.count) as usize;
        let start = rec.offset as usize;
        let data = arena_buf.get(start..start + size).unwrap_or(&[]);
        let mut entry = RdbEntry::new(rec.offset, value_type, rec.count, Some(data));
        entry.created = bp_timing::Nanos(rec.created);
        entry.flags = rec.flags;
        store.restore_entry(rec.key, entry);
    }

    info!(keys = map_size, arena_used, "rdb: snapshot loaded");
    Ok(store)
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_cstr(r: &mut impl Read) -> io::Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
