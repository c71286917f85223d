/// Last block number handed to the persistence stage.
///
/// The cursor is owned by whichever producer phase is currently advancing the
/// sequence and is moved by value between phases, so it never needs a lock.
/// It only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    last_processed: Option<u64>,
}

impl Cursor {
    /// Creates a cursor positioned just before `start`.
    pub fn before(start: u64) -> Self {
        Self {
            last_processed: start.checked_sub(1),
        }
    }

    /// Last number queued for persistence, or `None` when nothing precedes the start.
    pub fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    /// Number the sequence expects next.
    pub fn next(&self) -> u64 {
        self.last_processed.map_or(0, |last| last.saturating_add(1))
    }

    /// Returns `true` once the cursor has reached or passed `boundary`.
    pub fn reached(&self, boundary: u64) -> bool {
        self.last_processed.is_some_and(|last| last >= boundary)
    }

    /// Returns `true` when a block numbered `number` would not move the cursor forward.
    pub fn is_stale(&self, number: u64) -> bool {
        self.last_processed.is_some_and(|last| number <= last)
    }

    /// Records that `number` was queued.
    pub fn advance(&mut self, number: u64) {
        debug_assert!(
            !self.is_stale(number),
            "cursor must not move backwards (last {:?}, new {number})",
            self.last_processed
        );
        self.last_processed = Some(number);
    }
}
