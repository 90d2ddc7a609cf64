use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// File magic + format version, written once at the head of every log.
const HEADER: [u8; 8] = *b"TSHDWAL1";

/// Append-only write-ahead log of reservation events.
///
/// Layout: `HEADER` then frames of `[u32 LE: len][bincode: Event][u32 LE: crc32]`.
/// A frame cut short by a crash, or whose checksum or payload does not
/// verify, ends replay; everything before it is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Bytes written so far, buffered ones included.
    len: u64,
    appends_since_compact: u64,
    scratch: Vec<u8>,
}

/// Frames claiming more than this are treated as damage, not allocated.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Returns the number of bytes written.
fn encode_frame(out: &mut impl Write, scratch: &mut Vec<u8>, event: &Event) -> io::Result<u64> {
    scratch.clear();
    bincode::serialize_into(&mut *scratch, event)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(scratch.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(scratch)?;
    out.write_all(&crc32fast::hash(scratch).to_le_bytes())?;
    Ok(8 + u64::from(len))
}

enum Frame {
    /// An intact event and the size of its frame on disk.
    Event(Event, u64),
    /// Clean end of file, or a damaged tail.
    End,
}

/// `Ok(false)` on a clean EOF or a short read, so a torn tail reads as end-of-log.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(Frame::End);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(Frame::End);
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(Frame::End);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(Frame::End);
    }
    Ok(bincode::deserialize(&payload)
        .map(|event| Frame::Event(event, 8 + len as u64))
        .unwrap_or(Frame::End))
}

/// Intact events and the byte length of the intact prefix. A missing or
/// headerless file has an empty prefix.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER.len()];
    if !fill(&mut reader, &mut header)? {
        return Ok((Vec::new(), 0));
    }
    if header != HEADER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not a toolshed WAL", path.display()),
        ));
    }

    let mut events = Vec::new();
    let mut valid = HEADER.len() as u64;
    while let Frame::Event(event, size) = read_frame(&mut reader)? {
        events.push(event);
        valid += size;
    }
    Ok((events, valid))
}

/// Open for appending, writing the header into an empty file. Returns the
/// writer and the current file length.
fn open_for_append(path: &Path) -> io::Result<(BufWriter<File>, u64)> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut len = file.metadata()?.len();
    if len == 0 {
        file.write_all(&HEADER)?;
        file.sync_all()?;
        len = HEADER.len() as u64;
    }
    Ok((BufWriter::new(file), len))
}

impl Wal {
    /// Open (or create) the log at `path`, cutting off any damaged tail.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Replay the intact prefix of the log, truncate whatever follows it, and
    /// open the log for appending right after the last good frame.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid) = scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > valid
        {
            warn!(
                path = %path.display(),
                discarded = meta.len() - valid,
                "WAL: truncating damaged tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid)?;
            file.sync_all()?;
        }

        let (writer, len) = open_for_append(path)?;
        let wal = Self {
            writer,
            path: path.to_path_buf(),
            len,
            appends_since_compact: 0,
            scratch: Vec::with_capacity(256),
        };
        Ok((wal, events))
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.len += encode_frame(&mut self.writer, &mut self.scratch, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Log length including buffered frames. Pass to `rollback_to`.
    pub fn mark(&self) -> u64 {
        self.len
    }

    /// Drop everything written or buffered after `mark`.
    pub fn rollback_to(&mut self, mark: u64) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(mark)?;
        file.sync_all()?;
        // into_parts hands back the buffer without flushing it.
        let (_, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        self.len = mark;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted log next to the live one and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        writer.write_all(&HEADER)?;
        let mut scratch = Vec::new();
        for event in events {
            encode_frame(&mut writer, &mut scratch, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the live log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let (writer, len) = open_for_append(&self.path)?;
        self.writer = writer;
        self.len = len;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every intact event. A missing file is an empty log; a file with
    /// a foreign header is an error.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}
