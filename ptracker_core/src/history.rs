//! Bounded history log
//!
//! Fixed-capacity circular store of fixed-size records. Every slot starts with
//! a common header (discriminant + timestamp); the remaining bytes are an
//! opaque payload owned by whichever consumer created the log. Reading walks
//! the valid records oldest to newest and hands each record to a formatter
//! together with its successor, so per-type formatters can print period deltas
//! next to cumulative values.

use crate::error::{PtrackerError, PtrackerResult};
use bytemuck::{Pod, Zeroable};
use log::debug;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// On-arena header layout shared by every record type.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    discriminant: u32,
    _reserved: u32,
    timestamp_us: u64,
}

/// Bytes taken by the common header at the start of every slot
pub const HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

/// Formats one record, given the record that follows it (if any).
pub type FormatFn =
    Box<dyn Fn(&HistoryRecord<'_>, Option<&HistoryRecord<'_>>, &mut String) + Send + Sync>;

/// Read-only view of one record.
///
/// Readers only yield slots whose writer handle has been dropped; slots never
/// written or still being written are skipped.
#[derive(Debug, Clone, Copy)]
pub struct HistoryRecord<'a> {
    index: usize,
    header: RawHeader,
    payload: &'a [u8],
}

impl<'a> HistoryRecord<'a> {
    /// Slot index inside the ring
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn discriminant(&self) -> u32 {
        self.header.discriminant
    }

    pub fn timestamp_us(&self) -> u64 {
        self.header.timestamp_us
    }

    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(self.header.timestamp_us)
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Decode the payload prefix as `T`. `None` if the slot is too small.
    pub fn payload_as<T: Pod>(&self) -> Option<T> {
        let size = std::mem::size_of::<T>();
        if self.payload.len() < size {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.payload[..size]))
    }
}

struct Ring {
    /// Next write index
    cursor: usize,
    /// Number of full wraps
    generation: u64,
    arena: Vec<u8>,
}

/// Fixed-capacity circular record store.
pub struct HistoryLog {
    name: String,
    capacity: usize,
    slot_size: usize,
    ring: Mutex<Ring>,
    /// Per-slot completion flag, released when the writer's slot handle drops.
    published: Box<[AtomicBool]>,
    formatter: Option<FormatFn>,
}

impl HistoryLog {
    /// Create a log of `capacity` slots of `slot_size` bytes each (header included).
    pub fn create(name: &str, capacity: usize, slot_size: usize) -> PtrackerResult<Self> {
        if capacity == 0 {
            return Err(PtrackerError::invalid_argument(format!(
                "history '{}': capacity must be at least 1",
                name
            )));
        }
        if slot_size < HEADER_SIZE {
            return Err(PtrackerError::invalid_argument(format!(
                "history '{}': slot size {} is smaller than the {}-byte header",
                name, slot_size, HEADER_SIZE
            )));
        }

        let total = capacity.checked_mul(slot_size).ok_or_else(|| {
            PtrackerError::OutOfMemory(format!(
                "history '{}': {} x {} bytes overflows",
                name, capacity, slot_size
            ))
        })?;
        let mut arena = Vec::new();
        arena.try_reserve_exact(total).map_err(|e| {
            PtrackerError::OutOfMemory(format!("history '{}': {}", name, e))
        })?;
        arena.resize(total, 0);

        let published = (0..capacity).map(|_| AtomicBool::new(false)).collect();

        debug!(
            "[History] Created '{}' ({} entries x {} bytes)",
            name, capacity, slot_size
        );

        Ok(Self {
            name: name.to_string(),
            capacity,
            slot_size,
            ring: Mutex::new(Ring {
                cursor: 0,
                generation: 0,
                arena,
            }),
            published,
            formatter: None,
        })
    }

    /// Install the formatter used by [`read`](Self::read).
    pub fn with_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&HistoryRecord<'_>, Option<&HistoryRecord<'_>>, &mut String) + Send + Sync + 'static,
    {
        self.formatter = Some(Box::new(formatter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Bytes available to the caller after the header
    pub fn payload_size(&self) -> usize {
        self.slot_size - HEADER_SIZE
    }

    pub fn cursor(&self) -> usize {
        self.ring.lock().cursor
    }

    pub fn generation(&self) -> u64 {
        self.ring.lock().generation
    }

    /// Number of valid entries
    pub fn len(&self) -> usize {
        let ring = self.ring.lock();
        self.valid_count(&ring)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn valid_count(&self, ring: &Ring) -> usize {
        if ring.generation > 0 {
            self.capacity
        } else {
            ring.cursor
        }
    }

    /// Write a header for the next slot and hand the slot to the caller.
    ///
    /// The slot stays locked, and unpublished, until the returned handle is
    /// dropped, so readers only ever see fully written records.
    ///
    /// The handle holds the log's lock. Drop it before calling any other
    /// method on the same log from the same thread, or that call deadlocks.
    pub fn store(&self, discriminant: u32) -> HistorySlot<'_> {
        let mut ring = self.ring.lock();
        let index = ring.cursor;
        self.published[index].store(false, Ordering::Release);

        let header = RawHeader {
            discriminant,
            _reserved: 0,
            timestamp_us: now_us(),
        };
        let offset = index * self.slot_size;
        ring.arena[offset..offset + HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        ring.arena[offset + HEADER_SIZE..offset + self.slot_size].fill(0);

        ring.cursor += 1;
        if ring.cursor == self.capacity {
            ring.cursor = 0;
            ring.generation += 1;
        }

        HistorySlot {
            ring,
            published: &self.published[index],
            index,
            payload_start: offset + HEADER_SIZE,
            payload_end: offset + self.slot_size,
        }
    }

    /// Format all records into `buf` using the installed formatter.
    ///
    /// Returns the number of bytes written; output is truncated once `buf`
    /// is full.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut written = 0;
        self.visit(&mut |line| {
            let room = buf.len() - written;
            let n = line.len().min(room);
            buf[written..written + n].copy_from_slice(&line.as_bytes()[..n]);
            written += n;
            n == line.len()
        });
        written
    }

    /// Same as [`read`](Self::read) but into a `String` capped at `limit` bytes.
    pub fn read_to_string(&self, limit: usize) -> String {
        let mut out = String::new();
        self.visit(&mut |line| {
            let room = limit - out.len();
            push_truncated(&mut out, line, room)
        });
        out
    }

    /// Walk valid records with an explicit formatter instead of the installed
    /// one, appending at most `limit` bytes to `buf`.
    pub fn read_with<F>(&self, buf: &mut String, limit: usize, mut formatter: F) -> usize
    where
        F: FnMut(&HistoryRecord<'_>, Option<&HistoryRecord<'_>>, &mut String),
    {
        let start = buf.len();
        self.walk(&mut formatter, &mut |line| {
            let room = limit - (buf.len() - start);
            push_truncated(buf, line, room)
        });
        buf.len() - start
    }

    fn visit(&self, sink: &mut dyn FnMut(&str) -> bool) {
        match &self.formatter {
            Some(formatter) => self.walk(&mut |cur, next, out| formatter(cur, next, out), sink),
            None => self.walk(&mut default_format, sink),
        }
    }

    /// Pair each valid record with its successor, oldest first. `sink`
    /// returns false once the output is exhausted.
    fn walk(
        &self,
        formatter: &mut dyn FnMut(&HistoryRecord<'_>, Option<&HistoryRecord<'_>>, &mut String),
        sink: &mut dyn FnMut(&str) -> bool,
    ) {
        let ring = self.ring.lock();
        let count = self.valid_count(&ring);
        let oldest = if ring.generation > 0 { ring.cursor } else { 0 };

        let records: Vec<HistoryRecord<'_>> = (0..count)
            .map(|i| (oldest + i) % self.capacity)
            .filter(|&index| self.published[index].load(Ordering::Acquire))
            .map(|index| self.record_at(&ring.arena, index))
            .collect();

        let mut line = String::new();
        for (i, current) in records.iter().enumerate() {
            line.clear();
            formatter(current, records.get(i + 1), &mut line);
            if !sink(&line) {
                break;
            }
        }
    }

    fn record_at<'a>(&self, arena: &'a [u8], index: usize) -> HistoryRecord<'a> {
        let offset = index * self.slot_size;
        let header: RawHeader =
            bytemuck::pod_read_unaligned(&arena[offset..offset + HEADER_SIZE]);
        HistoryRecord {
            index,
            header,
            payload: &arena[offset + HEADER_SIZE..offset + self.slot_size],
        }
    }

    /// Release the backing storage.
    pub fn destroy(self) {
        debug!("[History] Destroyed '{}'", self.name);
    }
}

impl std::fmt::Debug for HistoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("HistoryLog")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("slot_size", &self.slot_size)
            .field("cursor", &ring.cursor)
            .field("generation", &ring.generation)
            .finish()
    }
}

/// Writer handle for the slot returned by [`HistoryLog::store`].
///
/// Dropping it publishes the record.
pub struct HistorySlot<'a> {
    ring: MutexGuard<'a, Ring>,
    published: &'a AtomicBool,
    index: usize,
    payload_start: usize,
    payload_end: usize,
}

impl HistorySlot<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.ring.arena[self.payload_start..self.payload_end]
    }

    /// Copy a typed payload into the slot.
    pub fn write<T: Pod>(&mut self, value: &T) -> PtrackerResult<()> {
        let bytes = bytemuck::bytes_of(value);
        let payload = self.payload_mut();
        if bytes.len() > payload.len() {
            return Err(PtrackerError::invalid_argument(format!(
                "payload of {} bytes does not fit a {}-byte slot",
                bytes.len(),
                payload.len()
            )));
        }
        payload[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for HistorySlot<'_> {
    fn drop(&mut self) {
        self.published.store(true, Ordering::Release);
    }
}

/// Append `line`, cut at a char boundary if it exceeds `room`. Returns
/// whether the whole line fit.
fn push_truncated(out: &mut String, line: &str, room: usize) -> bool {
    if line.len() <= room {
        out.push_str(line);
        return true;
    }
    let mut end = room;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    out.push_str(&line[..end]);
    false
}

fn default_format(current: &HistoryRecord<'_>, _next: Option<&HistoryRecord<'_>>, out: &mut String) {
    use std::fmt::Write;
    let _ = writeln!(
        out,
        "[{}] state: {}, time: {} us",
        current.index(),
        current.discriminant(),
        current.timestamp_us()
    );
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
