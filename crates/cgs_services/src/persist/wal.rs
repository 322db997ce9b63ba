//! Write-ahead log for game state mutations.
//!
//! Frame layout, all little-endian:
//!
//! ```text
//! [len: u32][crc32: u32][payload]
//! payload = sequence: u64 | timestamp_us: u64 | player_id: u64
//!         | op: u8 | data_len: u32 | data
//! ```
//!
//! The CRC covers the payload. Replay reads frames until end of file or
//! the first corrupt frame; everything before the corruption is returned,
//! matching the torn-write-at-crash case.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tracing::warn;

use cgs_foundation::error::{CgsError, CgsResult};
use cgs_foundation::types::PlayerId;

/// Fixed payload bytes before the variable-length data.
const PAYLOAD_HEADER: usize = 8 + 8 + 8 + 1 + 4;
const FRAME_HEADER: usize = 4 + 4;

static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
        *entry = crc;
    }
    table
});

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = (crc >> 8) ^ CRC_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub player: PlayerId,
    pub op: u8,
    pub data: Vec<u8>,
}

/// Append-only log backed by a single segment file.
pub struct WriteAheadLog {
    file: File,
    path: PathBuf,
    next_sequence: u64,
    bytes_written: u64,
    max_file_size: u64,
}

impl WriteAheadLog {
    /// Opens (or creates) the log at `path`. Existing records are scanned
    /// to recover the next sequence number.
    pub fn open(path: &Path, max_file_size: u64) -> CgsResult<Self> {
        let existing = if path.exists() {
            Self::replay(path)?
        } else {
            Vec::new()
        };
        let next_sequence = existing.last().map(|r| r.sequence + 1).unwrap_or(1);
        let bytes_written = existing
            .iter()
            .map(|r| (FRAME_HEADER + PAYLOAD_HEADER + r.data.len()) as u64)
            .sum();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            next_sequence,
            bytes_written,
            max_file_size,
        })
    }

    /// Appends a record, returning its sequence number.
    ///
    /// # Errors
    /// Returns [`CgsError::Io`] when the segment would exceed its size
    /// limit or the write fails.
    pub fn append(&mut self, player: PlayerId, op: u8, data: &[u8]) -> CgsResult<u64> {
        let frame_len = (FRAME_HEADER + PAYLOAD_HEADER + data.len()) as u64;
        if self.bytes_written + frame_len > self.max_file_size {
            return Err(CgsError::Io(format!(
                "WAL segment {} full ({} bytes)",
                self.path.display(),
                self.bytes_written
            )));
        }

        let sequence = self.next_sequence;
        let timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let mut payload = Vec::with_capacity(PAYLOAD_HEADER + data.len());
        payload.extend_from_slice(&sequence.to_le_bytes());
        payload.extend_from_slice(&timestamp_us.to_le_bytes());
        payload.extend_from_slice(&player.value().to_le_bytes());
        payload.push(op);
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
        payload.extend_from_slice(data);

        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame)?;
        self.next_sequence += 1;
        self.bytes_written += frame_len;
        Ok(sequence)
    }

    /// Forces buffered records to stable storage.
    pub fn sync(&mut self) -> CgsResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Reads all intact records from a log file. Stops at the first
    /// corrupt or truncated frame and returns the records before it.
    pub fn replay(path: &Path) -> CgsResult<Vec<WalRecord>> {
        let file = File::open(path)?;
        let mut remaining = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut header = [0u8; FRAME_HEADER];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            remaining = remaining.saturating_sub(FRAME_HEADER as u64);
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if len < PAYLOAD_HEADER {
                warn!(path = %path.display(), "WAL frame shorter than payload header, stopping replay");
                break;
            }
            // A corrupt length header must not drive the allocation below.
            if len as u64 > remaining {
                warn!(path = %path.display(), "WAL frame length exceeds file size, stopping replay");
                break;
            }
            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).is_err() {
                warn!(path = %path.display(), "truncated WAL frame, stopping replay");
                break;
            }
            remaining = remaining.saturating_sub(len as u64);
            if crc32(&payload) != expected_crc {
                warn!(path = %path.display(), "WAL frame failed CRC, stopping replay");
                break;
            }

            let sequence = u64::from_le_bytes(payload[0..8].try_into().unwrap_or_default());
            let timestamp_us = u64::from_le_bytes(payload[8..16].try_into().unwrap_or_default());
            let player = u64::from_le_bytes(payload[16..24].try_into().unwrap_or_default());
            let op = payload[24];
            let data_len =
                u32::from_le_bytes(payload[25..29].try_into().unwrap_or_default()) as usize;
            if PAYLOAD_HEADER + data_len != len {
                warn!(path = %path.display(), "WAL frame data length mismatch, stopping replay");
                break;
            }
            records.push(WalRecord {
                sequence,
                timestamp_us,
                player: PlayerId::new(player),
                op,
                data: payload[PAYLOAD_HEADER..].to_vec(),
            });
        }
        Ok(records)
    }

    /// Drops records with `sequence <= through` by rewriting the segment,
    /// as after a snapshot covers them. Returns how many were dropped.
    pub fn truncate_through(&mut self, through: u64) -> CgsResult<usize> {
        self.sync()?;
        let records = Self::replay(&self.path)?;
        let (dropped, kept): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| r.sequence <= through);

        let tmp = self.path.with_extension("tmp");
        {
            let mut out = File::create(&tmp)?;
            let mut bytes = 0u64;
            for record in &kept {
                let mut payload =
                    Vec::with_capacity(PAYLOAD_HEADER + record.data.len());
                payload.extend_from_slice(&record.sequence.to_le_bytes());
                payload.extend_from_slice(&record.timestamp_us.to_le_bytes());
                payload.extend_from_slice(&record.player.value().to_le_bytes());
                payload.push(record.op);
                payload.extend_from_slice(&(record.data.len() as u32).to_le_bytes());
                payload.extend_from_slice(&record.data);

                out.write_all(&(payload.len() as u32).to_le_bytes())?;
                out.write_all(&crc32(&payload).to_le_bytes())?;
                out.write_all(&payload)?;
                bytes += (FRAME_HEADER + payload.len()) as u64;
            }
            out.sync_all()?;
            self.bytes_written = bytes;
        }
        std::fs::rename(&tmp, &self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(dropped.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wal(max: u64) -> (tempfile::TempDir, WriteAheadLog) {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("game.wal"), max).unwrap();
        (dir, wal)
    }

    #[test]
    fn append_and_replay() {
        let (dir, mut wal) = temp_wal(1 << 20);
        let s1 = wal.append(PlayerId::new(1), 0x01, b"spawn").unwrap();
        let s2 = wal.append(PlayerId::new(2), 0x02, b"move").unwrap();
        assert_eq!((s1, s2), (1, 2));
        wal.sync().unwrap();

        let records = WriteAheadLog::replay(&dir.path().join("game.wal")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[0].player, PlayerId::new(1));
        assert_eq!(records[0].op, 0x01);
        assert_eq!(records[0].data, b"spawn");
        assert_eq!(records[1].data, b"move");
        assert!(records[1].timestamp_us >= records[0].timestamp_us);
    }

    #[test]
    fn reopen_continues_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.wal");
        {
            let mut wal = WriteAheadLog::open(&path, 1 << 20).unwrap();
            wal.append(PlayerId::new(1), 0, b"a").unwrap();
            wal.append(PlayerId::new(1), 0, b"b").unwrap();
            wal.sync().unwrap();
        }
        let mut wal = WriteAheadLog::open(&path, 1 << 20).unwrap();
        assert_eq!(wal.next_sequence(), 3);
        assert_eq!(wal.append(PlayerId::new(1), 0, b"c").unwrap(), 3);
    }

    #[test]
    fn replay_stops_at_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.wal");
        {
            let mut wal = WriteAheadLog::open(&path, 1 << 20).unwrap();
            wal.append(PlayerId::new(1), 0, b"good").unwrap();
            wal.append(PlayerId::new(1), 0, b"doomed").unwrap();
            wal.sync().unwrap();
        }
        // Flip a byte inside the second frame's payload.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let records = WriteAheadLog::replay(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, b"good");
    }

    #[test]
    fn replay_tolerates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.wal");
        {
            let mut wal = WriteAheadLog::open(&path, 1 << 20).unwrap();
            wal.append(PlayerId::new(1), 0, b"kept").unwrap();
            wal.sync().unwrap();
        }
        // Simulate a torn write: half a frame header at the tail.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0x10, 0x00]);
        std::fs::write(&path, &bytes).unwrap();

        let records = WriteAheadLog::replay(&path).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn oversized_length_header_stops_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.wal");
        {
            let mut wal = WriteAheadLog::open(&path, 1 << 20).unwrap();
            wal.append(PlayerId::new(1), 0, b"kept").unwrap();
            wal.sync().unwrap();
        }
        // A frame header claiming a payload far beyond the file's end.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(b"short");
        std::fs::write(&path, &bytes).unwrap();

        let records = WriteAheadLog::replay(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, b"kept");
    }

    #[test]
    fn full_segment_refuses_appends() {
        let (_dir, mut wal) = temp_wal(64);
        wal.append(PlayerId::new(1), 0, b"x").unwrap();
        let err = wal.append(PlayerId::new(1), 0, b"y").unwrap_err();
        assert!(matches!(err, CgsError::Io(_)));
        // The first record is still intact.
        assert_eq!(wal.next_sequence(), 2);
    }

    #[test]
    fn truncate_through_compacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.wal");
        let mut wal = WriteAheadLog::open(&path, 1 << 20).unwrap();
        for i in 0..5u8 {
            wal.append(PlayerId::new(1), i, &[i]).unwrap();
        }

        assert_eq!(wal.truncate_through(3).unwrap(), 3);
        let records = WriteAheadLog::replay(&path).unwrap();
        let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![4, 5]);

        // Appends continue after compaction.
        assert_eq!(wal.append(PlayerId::new(1), 9, b"next").unwrap(), 6);
        wal.sync().unwrap();
        assert_eq!(WriteAheadLog::replay(&path).unwrap().len(), 3);
    }

    #[test]
    fn empty_log_replays_empty() {
        let (dir, _wal) = temp_wal(1 << 20);
        let records = WriteAheadLog::replay(&dir.path().join("game.wal")).unwrap();
        assert!(records.is_empty());
    }
}
