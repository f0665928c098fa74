use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const FRAME_HEADER: usize = 8;
const RECORD_HEADER: usize = 9;

const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

/// One mutation as stored in the journal
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Record {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Append-only mutation log.
///
/// Frame layout: `[len u32][crc32 u32][payload]`, payload is a run of
/// `[op u8][klen u32][vlen u32][key][value]` records. All integers are
/// little endian. One frame is one atomic batch; replay stops at the
/// first torn or corrupt frame.
pub(super) struct Journal {
    path: PathBuf,
    /// `None` for read-only databases
    file: Option<File>,
    buffer: Vec<u8>,
    grow_factor: f64,
    len: u64,
}

impl Journal {
    /// Opens the journal and returns it with the batches recovered from
    /// disk. A damaged tail is cut off when the journal is writable.
    pub(super) fn open(
        path: &Path,
        read_only: bool,
        capacity: usize,
        grow_factor: f64,
    ) -> io::Result<(Journal, Vec<Vec<Record>>)> {
        let mut journal = Journal {
            path: path.to_path_buf(),
            file: None,
            buffer: Vec::with_capacity(capacity),
            grow_factor,
            len: 0,
        };

        if read_only && !path.exists() {
            return Ok((journal, Vec::new()));
        }

        let file = if read_only {
            File::open(path)?
        } else {
            OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(path)?
        };

        let size = file.metadata()?.len();
        let (batches, valid) = if size == 0 {
            (Vec::new(), 0)
        } else {
            let map = unsafe { Mmap::map(&file)? };
            decode_frames(&map)
        };

        if valid < size {
            log::warn!(
                "journal {} has {} damaged trailing bytes",
                path.display(),
                size - valid
            );
            if !read_only {
                file.set_len(valid)?;
            }
        }

        journal.len = valid;
        if !read_only {
            journal.file = Some(file);
        }
        Ok((journal, batches))
    }

    pub(super) fn len(&self) -> u64 {
        self.len
    }

    pub(super) fn append(&mut self, batch: &[Record]) -> io::Result<()> {
        let needed = FRAME_HEADER
            + batch
                .iter()
                .map(|record| match record {
                    Record::Set(key, value) => RECORD_HEADER + key.len() + value.len(),
                    Record::Delete(key) => RECORD_HEADER + key.len(),
                })
                .sum::<usize>();
        self.reserve(needed);

        self.buffer.clear();
        encode_frame(&mut self.buffer, batch.iter().map(Record::parts))?;

        self.repair()?;
        let file = self.file.as_mut().ok_or_else(read_only_error)?;
        if let Err(e) = file.write_all(&self.buffer) {
            // A partial frame must not sit in front of later appends
            if let Err(undo) = file.set_len(self.len) {
                log::warn!("failed to cut partial journal frame: {}", undo);
            }
            return Err(e);
        }
        self.len += self.buffer.len() as u64;
        Ok(())
    }

    /// Cuts the file back to `len`, dropping every frame after it.
    pub(super) fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.len = len.min(self.len);
        self.repair()
    }

    /// Drops bytes past the last complete frame, left behind by a failed
    /// write or a failed truncate.
    pub(super) fn repair(&mut self) -> io::Result<()> {
        let file = match &self.file {
            Some(file) => file,
            None => return Ok(()),
        };
        let size = file.metadata()?.len();
        if size != self.len {
            log::warn!(
                "journal {} has {} bytes past its last frame, cutting",
                self.path.display(),
                size.saturating_sub(self.len)
            );
            file.set_len(self.len)?;
        }
        Ok(())
    }

    pub(super) fn sync(&self) -> io::Result<()> {
        match &self.file {
            Some(file) => file.sync_data(),
            None => Ok(()),
        }
    }

    /// Replaces the journal with a single frame holding `rows`.
    pub(super) fn rewrite<'a>(
        &mut self,
        rows: impl Iterator<Item = (&'a [u8], &'a [u8])>,
    ) -> io::Result<()> {
        if self.file.is_none() {
            return Err(read_only_error());
        }

        let mut frame = Vec::new();
        let mut rows = rows.peekable();
        if rows.peek().is_some() {
            encode_frame(&mut frame, rows.map(|(key, value)| (OP_SET, key, value)))?;
        }

        let tmp = self.path.with_extension("compact");
        {
            let mut out = File::create(&tmp)?;
            out.write_all(&frame)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        self.file = Some(OpenOptions::new().read(true).append(true).open(&self.path)?);
        self.len = frame.len() as u64;
        Ok(())
    }

    /// Swaps the descriptor for one that can neither write nor truncate.
    #[cfg(test)]
    pub(super) fn pin_read_only(&mut self) -> io::Result<()> {
        self.file = Some(File::open(&self.path)?);
        Ok(())
    }

    fn reserve(&mut self, needed: usize) {
        let capacity = self.buffer.capacity();
        if needed > capacity {
            let grown = (capacity as f64 * self.grow_factor) as usize;
            self.buffer.reserve(needed.max(grown));
        }
    }
}

impl Record {
    fn parts(&self) -> (u8, &[u8], &[u8]) {
        match self {
            Record::Set(key, value) => (OP_SET, key.as_slice(), value.as_slice()),
            Record::Delete(key) => (OP_DELETE, key.as_slice(), &[]),
        }
    }
}

/// Size a row takes in a compacted journal.
pub(super) fn encoded_len(key: &[u8], value: &[u8]) -> u64 {
    (RECORD_HEADER + key.len() + value.len()) as u64
}

fn read_only_error() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "journal is read-only")
}

fn too_large() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "journal frame too large")
}

fn encode_frame<'a>(
    out: &mut Vec<u8>,
    records: impl Iterator<Item = (u8, &'a [u8], &'a [u8])>,
) -> io::Result<()> {
    let start = out.len();
    out.extend_from_slice(&[0; FRAME_HEADER]);
    for (op, key, value) in records {
        let klen = u32::try_from(key.len()).map_err(|_| too_large())?;
        let vlen = u32::try_from(value.len()).map_err(|_| too_large())?;
        out.push(op);
        out.extend_from_slice(&klen.to_le_bytes());
        out.extend_from_slice(&vlen.to_le_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(value);
    }

    let payload = &out[start + FRAME_HEADER..];
    let len = u32::try_from(payload.len()).map_err(|_| too_large())?;
    let crc = crc32fast::hash(payload);
    out[start..start + 4].copy_from_slice(&len.to_le_bytes());
    out[start + 4..start + FRAME_HEADER].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decodes whole frames and returns them with the length of the valid
/// prefix.
fn decode_frames(buf: &[u8]) -> (Vec<Vec<Record>>, u64) {
    let mut batches = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let (len, crc) = match (read_u32(buf, offset), read_u32(buf, offset + 4)) {
            (Some(len), Some(crc)) => (len as usize, crc),
            _ => break,
        };
        let body = offset + FRAME_HEADER;
        let payload = match buf.get(body..body + len) {
            Some(payload) => payload,
            None => break,
        };
        if crc32fast::hash(payload) != crc {
            log::warn!("journal frame at offset {} failed its checksum", offset);
            break;
        }
        match decode_records(payload) {
            Some(batch) => batches.push(batch),
            None => break,
        }
        offset = body + len;
    }

    (batches, offset as u64)
}

fn decode_records(mut payload: &[u8]) -> Option<Vec<Record>> {
    let mut records = Vec::new();
    while !payload.is_empty() {
        let op = *payload.first()?;
        let klen = read_u32(payload, 1)? as usize;
        let vlen = read_u32(payload, 5)? as usize;
        let key = payload.get(RECORD_HEADER..RECORD_HEADER + klen)?.to_vec();
        let value = payload.get(RECORD_HEADER + klen..RECORD_HEADER + klen + vlen)?;
        records.push(match op {
            OP_SET => Record::Set(key, value.to_vec()),
            OP_DELETE => Record::Delete(key),
            _ => return None,
        });
        payload = &payload[RECORD_HEADER + klen + vlen..];
    }
    Some(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set(key: &str, value: &str) -> Record {
        Record::Set(key.as_bytes().to_vec(), value.as_bytes().to_vec())
    }

    #[test]
    fn test_replay_batches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        {
            let (mut journal, batches) = Journal::open(&path, false, 64, 2.0).unwrap();
            assert!(batches.is_empty());
            journal.append(&[set("a", "1")]).unwrap();
            journal
                .append(&[set("b", "2"), Record::Delete(b"a".to_vec()), set("", "")])
                .unwrap();
        }

        let (journal, batches) = Journal::open(&path, true, 64, 2.0).unwrap();
        assert_eq!(journal.len(), fs::metadata(&path).unwrap().len());
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![set("a", "1")]);
        assert_eq!(batches[1][1], Record::Delete(b"a".to_vec()));
        assert_eq!(batches[1][2], set("", ""));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        {
            let (mut journal, _) = Journal::open(&path, false, 64, 2.0).unwrap();
            journal.append(&[set("a", "1")]).unwrap();
        }
        let good = fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        }

        let (mut journal, batches) = Journal::open(&path, false, 64, 2.0).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), good);

        journal.append(&[set("b", "2")]).unwrap();
        drop(journal);
        let (_, batches) = Journal::open(&path, true, 64, 2.0).unwrap();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_corrupt_frame_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        {
            let (mut journal, _) = Journal::open(&path, false, 64, 2.0).unwrap();
            journal.append(&[set("a", "1")]).unwrap();
            journal.append(&[set("b", "2")]).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let (_, batches) = Journal::open(&path, true, 64, 2.0).unwrap();
        assert_eq!(batches, vec![vec![set("a", "1")]]);
    }

    #[test]
    fn test_stray_bytes_do_not_hide_later_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        {
            let (mut journal, _) = Journal::open(&path, false, 64, 2.0).unwrap();
            journal.append(&[set("a", "1")]).unwrap();
            // Leftover of a write that failed halfway
            journal
                .file
                .as_mut()
                .unwrap()
                .write_all(&[42, 0, 0, 0, 1, 2])
                .unwrap();
            journal.append(&[set("b", "2")]).unwrap();
            assert_eq!(journal.len(), fs::metadata(&path).unwrap().len());
        }

        let (_, batches) = Journal::open(&path, true, 64, 2.0).unwrap();
        assert_eq!(batches, vec![vec![set("a", "1")], vec![set("b", "2")]]);
    }

    #[test]
    fn test_truncate_undoes_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        {
            let (mut journal, _) = Journal::open(&path, false, 64, 2.0).unwrap();
            journal.append(&[set("a", "1")]).unwrap();
            let mark = journal.len();
            journal.append(&[set("b", "2"), set("c", "3")]).unwrap();
            journal.truncate(mark).unwrap();
            assert_eq!(journal.len(), mark);
            assert_eq!(fs::metadata(&path).unwrap().len(), mark);
        }

        let (_, batches) = Journal::open(&path, true, 64, 2.0).unwrap();
        assert_eq!(batches, vec![vec![set("a", "1")]]);
    }

    #[test]
    fn test_repair_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        let (mut journal, _) = Journal::open(&path, false, 64, 2.0).unwrap();
        journal.append(&[set("a", "1")]).unwrap();
        journal
            .file
            .as_mut()
            .unwrap()
            .write_all(&[1, 2, 3])
            .unwrap();

        journal.pin_read_only().unwrap();
        assert!(journal.repair().is_err());
        assert!(journal.append(&[set("b", "2")]).is_err());
    }

    #[test]
    fn test_rewrite_compacts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        let (mut journal, _) = Journal::open(&path, false, 64, 2.0).unwrap();
        for i in 0..10 {
            journal.append(&[set("k", &i.to_string())]).unwrap();
        }
        let before = journal.len();

        let rows = [(&b"k"[..], &b"9"[..])];
        journal.rewrite(rows.iter().copied()).unwrap();
        assert!(journal.len() < before);
        journal.append(&[set("z", "26")]).unwrap();
        drop(journal);

        let (_, batches) = Journal::open(&path, true, 64, 2.0).unwrap();
        assert_eq!(batches, vec![vec![set("k", "9")], vec![set("z", "26")]]);
    }
}
