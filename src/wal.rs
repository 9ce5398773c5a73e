use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_RECORD_BYTES;
use crate::model::Event;

/// Frame a single event as `[len][bincode][crc32]`. Returns the framed size.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_BYTES)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + u64::from(len))
}

/// Fill `buf` completely. `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next framed event with its framed size. `Ok(None)` at end of log,
/// on a torn tail, on an oversized length header, or at the first record whose
/// checksum or payload does not verify.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_RECORD_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, 8 + u64::from(len))))
}

/// Verified events and the byte length of the prefix they occupy.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;
    while let Some((event, size)) = decode_event(&mut reader)? {
        events.push(event);
        valid_len += size;
    }
    Ok((events, valid_len))
}

/// Append-only write-ahead log of reservation events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`.
/// A torn last entry (crash mid-write) is cut off by `recover`, so a
/// reservation is either fully in the log or absent, and later appends
/// always follow the last verified record.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Bytes known durable: everything up to the last successful `flush_sync`.
    committed_len: u64,
    /// Bytes and events buffered or written since then.
    pending_len: u64,
    pending_events: u64,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            pending_len: 0,
            pending_events: 0,
            appends_since_compact: 0,
        })
    }

    /// Replay the log and cut it back to its last verified record, so the
    /// next append cannot land behind unreadable bytes.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid_len) = scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > valid_len
        {
            tracing::warn!(
                "WAL {}: discarding {} unverified trailing bytes",
                path.display(),
                meta.len() - valid_len
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing. `flush_sync` commits the batch,
    /// `rollback` discards it.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_len += encode_event(&mut self.writer, event)?;
        self.pending_events += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_len;
        self.pending_len = 0;
        self.pending_events = 0;
        Ok(())
    }

    /// Drop everything appended since the last successful `flush_sync`,
    /// both still-buffered bytes and bytes that reached the file unsynced.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the file without flushing the buffer.
        let (stale_file, _unflushed) = stale.into_parts();
        stale_file.set_len(self.committed_len)?;
        stale_file.sync_all()?;
        self.appends_since_compact -= self.pending_events;
        self.pending_len = 0;
        self.pending_events = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot of events to the sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp snapshot over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_len = 0;
        self.pending_events = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay every verifiable event without modifying the file.
    /// A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}
