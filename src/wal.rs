use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next valid event and its framed size, or `None` once the log ends or a
/// torn/corrupt frame is hit. `remaining` bounds the declared payload length.
fn read_frame(reader: &mut impl Read, remaining: u64) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u64::from(u32::from_le_bytes(word));
    if len + 8 > remaining {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len + 8)))
}

/// Intact events of the log at `path`, the byte length they span, and the file length.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0, 0)),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid = 0u64;
    while let Some((event, size)) = read_frame(&mut reader, file_len - valid)? {
        events.push(event);
        valid += size;
    }
    Ok((events, valid, file_len))
}

/// End of the log at some point, restored by `Wal::rollback`.
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    len: u64,
    appends: u64,
}

/// Append-only write-ahead log of store events.
///
/// A crash can leave a torn final frame; replay stops at the first frame whose
/// length, payload or checksum cannot be read back intact, and `recover` cuts
/// the log back to that point before appending again.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Replay the log at `path` and open it for appending. A torn or corrupt tail is
    /// cut off first so later frames are not hidden behind it on the next replay.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid, file_len) = scan(path)?;
        let file = Self::open_append(path)?;
        if valid < file_len {
            tracing::warn!(
                "WAL {}: dropping {} bytes of torn or corrupt tail after {} events",
                path.display(),
                file_len - valid,
                events.len()
            );
            file.set_len(valid)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn compact_path(&self) -> PathBuf {
        self.path.with_extension("wal.tmp")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer an event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered frames and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Flush what is buffered and remember the end of the log.
    pub fn mark(&mut self) -> io::Result<Mark> {
        self.writer.flush()?;
        Ok(Mark {
            len: self.writer.get_ref().metadata()?.len(),
            appends: self.appends_since_compact,
        })
    }

    /// Discard everything appended since `mark`, whether still buffered or already on disk.
    pub fn rollback(&mut self, mark: Mark) -> io::Result<()> {
        let fresh = BufWriter::new(Self::open_append(&self.path)?);
        // into_parts hands back the unwritten buffer instead of flushing it
        let (file, _unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        file.set_len(mark.len)?;
        file.sync_all()?;
        self.appends_since_compact = mark.appends;
        Ok(())
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `snapshot`: write a temp file, fsync, then rename it over the log.
    pub fn compact(&mut self, snapshot: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp = self.compact_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for event in snapshot {
                write_frame(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.writer = BufWriter::new(Self::open_append(&self.path)?);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// All intact events in the log at `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _, _)| events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("silbo_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn patient_created() -> Event {
        Event::Created(Record::Patient(Patient::sample()))
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let service_id = Ulid::new();
        let events = vec![
            patient_created(),
            Event::Created(Record::Bed(Bed::sample(service_id))),
            Event::Deleted {
                kind: EntityKind::Bed,
                id: Ulid::new(),
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = patient_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_cuts_torn_tail_before_appending() {
        let path = tmp_path("recover_torn.wal");
        let first = patient_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xff, 0, 0, 0, 1, 2]).unwrap();
        }

        let second = patient_created();
        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
            wal.append(&second).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn oversized_length_prefix_is_a_torn_tail() {
        let path = tmp_path("huge_len.wal");
        let first = patient_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }

        let (_wal, events) = Wal::recover(&path).unwrap();
        assert_eq!(events, vec![first]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_discards_flushed_and_buffered_frames() {
        let path = tmp_path("rollback.wal");
        let kept = patient_created();
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        let mark = wal.mark().unwrap();
        wal.append_buffered(&patient_created()).unwrap();
        wal.flush_sync().unwrap();
        wal.append_buffered(&patient_created()).unwrap();
        assert_eq!(wal.appends_since_compact(), 3);

        wal.rollback(mark).unwrap();
        assert_eq!(wal.appends_since_compact(), 1);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept.clone()]);

        let later = patient_created();
        wal.append(&later).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("bad_crc.wal");
        let good = patient_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&patient_created()).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_and_keeps_appending() {
        let path = tmp_path("compact.wal");
        let patient = Patient::sample();
        let snapshot = vec![Event::Created(Record::Patient(patient.clone()))];

        let mut wal = Wal::open(&path).unwrap();
        for _ in 0..20 {
            let p = Patient::sample();
            wal.append(&Event::Created(Record::Patient(p.clone()))).unwrap();
            wal.append(&Event::Deleted {
                kind: EntityKind::Patient,
                id: p.id,
            })
            .unwrap();
        }
        wal.append(&snapshot[0]).unwrap();
        assert_eq!(wal.appends_since_compact(), 41);
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(&snapshot).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");

        let later = Event::Deleted {
            kind: EntityKind::Patient,
            id: patient.id,
        };
        wal.append(&later).unwrap();
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot[0].clone(), later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_need_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|_| patient_created()).collect();

        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.append_buffered(e).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 5);
        wal.flush_sync().unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
