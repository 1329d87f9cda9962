//! Ring-buffer FIFO storage backing a channel, implementing the four
//! buffering disciplines: FIFO, FIFO_D (decoupled read), D_FIFO (decoupled
//! write) and D_FIFO_D (both). This module only owns the ring and the
//! backup slot; blocking, end-of-stream and guard semantics live one layer
//! up in `channel`.

use crate::message::Message;

/// Which buffering discipline a channel's FIFO uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Plain bounded FIFO: writes block when full, reads block when empty.
    Fifo,
    /// Decoupled read: a read with no new data replaces nothing and
    /// returns a fresh copy of the last value delivered (the "backup").
    FifoD,
    /// Decoupled write: a write to a full ring overwrites the oldest
    /// entry instead of blocking.
    DFifo,
    /// Both decoupled read and decoupled write.
    DFifoD,
}

impl Discipline {
    pub fn decouples_write(self) -> bool {
        matches!(self, Discipline::DFifo | Discipline::DFifoD)
    }

    pub fn decouples_read(self) -> bool {
        matches!(self, Discipline::FifoD | Discipline::DFifoD)
    }
}

/// A bounded ring buffer of messages plus the single backup slot used by
/// the decoupled-read disciplines.
pub struct Fifo {
    discipline: Discipline,
    slots: Vec<Option<Message>>,
    capacity: usize,
    head: usize,
    len: usize,
    backup: Option<Message>,
    overwrite_count: u64,
    copy_count: u64,
}

impl Fifo {
    pub fn new(discipline: Discipline, capacity: usize) -> Self {
        assert!(capacity > 0, "FIFO capacity must be non-zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            discipline,
            slots,
            capacity,
            head: 0,
            len: 0,
            backup: None,
            overwrite_count: 0,
            copy_count: 0,
        }
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Has a backup value a decoupled read could serve.
    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    pub fn overwrite_count(&self) -> u64 {
        self.overwrite_count
    }

    pub fn copy_count(&self) -> u64 {
        self.copy_count
    }

    /// Clear the duplication counter. Used by the temporal firewall after
    /// it has inspected a non-zero count to log a missed deadline, so the
    /// next tick starts from a clean slate (§4.6 step 5).
    pub fn reset_copy_count(&mut self) {
        self.copy_count = 0;
    }

    fn tail_index(&self) -> usize {
        (self.head + self.len) % self.capacity
    }

    /// Push onto the ring without overwriting. Returns the message back
    /// if the ring is full, so the caller (the blocking write path) can
    /// decide whether to wait and retry.
    pub fn try_push(&mut self, msg: Message) -> Result<(), Message> {
        if self.is_full() {
            return Err(msg);
        }
        let idx = self.tail_index();
        self.slots[idx] = Some(msg);
        self.len += 1;
        Ok(())
    }

    /// Push onto the ring, overwriting the oldest entry if full. Used by
    /// the D_FIFO/D_FIFO_D write paths; never blocks.
    pub fn push_overwrite(&mut self, msg: Message) {
        if self.is_full() {
            self.head = (self.head + 1) % self.capacity;
            self.len -= 1;
            self.overwrite_count += 1;
        }
        let idx = self.tail_index();
        self.slots[idx] = Some(msg);
        self.len += 1;
    }

    /// Pop the oldest message, consuming it. Used by the FIFO/D_FIFO read
    /// paths.
    pub fn try_pop(&mut self) -> Option<Message> {
        if self.len == 0 {
            return None;
        }
        let msg = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity;
        self.len -= 1;
        msg
    }

    /// Peek the message the next `try_pop`/`pop_decoupled` would return,
    /// without consuming it. Used by the oldest-timestamp collector to
    /// compare candidates across several channels before committing to
    /// one.
    pub fn peek_front(&self) -> Option<&Message> {
        if self.len > 0 {
            self.slots[self.head].as_ref()
        } else {
            self.backup.as_ref()
        }
    }

    /// Pop for the decoupled-read disciplines: if the ring holds a new
    /// message it becomes the backup and is handed to the caller directly
    /// (no duplication, so the copy counter is untouched); otherwise, a
    /// deep copy of the existing backup is returned (or `None` if nothing
    /// has ever been written), and the copy counter records the
    /// duplication, per the "increment copy counter on duplication" rule.
    pub fn pop_decoupled(&mut self) -> Option<Message> {
        if self.len > 0 {
            let msg = self.slots[self.head].take().expect("len > 0 implies Some");
            self.head = (self.head + 1) % self.capacity;
            self.len -= 1;
            self.backup = Some(msg.deep_copy());
            Some(msg)
        } else {
            let out = self.backup.as_ref().map(Message::deep_copy);
            if out.is_some() {
                self.copy_count += 1;
            }
            out
        }
    }
}
