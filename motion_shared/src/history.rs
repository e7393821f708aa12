//! Per-character state history.
//!
//! A fixed-length ring: `head` is the slot of the oldest entry and `len` the
//! number of live entries. Appending to a full ring overwrites the oldest
//! slot, so memory stays bounded under burst traffic.

use crate::{
    config::HISTORY_CAPACITY,
    error::{MovementError, MovementResult},
    state::PhysicalState,
};

#[derive(Debug, Clone)]
pub struct StateHistory {
    slots: Vec<Option<PhysicalState>>,
    head: usize,
    len: usize,
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a state, evicting the oldest one when full.
    ///
    /// Time and sequence may not go backwards. Equal sequence numbers are
    /// accepted: teleports and repeated inputs reuse the last one.
    pub fn append(&mut self, state: PhysicalState) -> MovementResult<()> {
        if let Ok(last) = self.last() {
            if state.timestamp < last.timestamp || state.sequence_number < last.sequence_number {
                return Err(MovementError::OutOfOrder {
                    last_time: last.timestamp,
                    last_seq: last.sequence_number,
                    time: state.timestamp,
                    seq: state.sequence_number,
                });
            }
        }

        let cap = self.capacity();
        if self.len == cap {
            self.slots[self.head] = Some(state);
            self.head = (self.head + 1) % cap;
        } else {
            self.slots[(self.head + self.len) % cap] = Some(state);
            self.len += 1;
        }
        Ok(())
    }

    /// Most recent state.
    pub fn last(&self) -> MovementResult<&PhysicalState> {
        if self.len == 0 {
            return Err(MovementError::EmptyHistory);
        }
        let idx = (self.head + self.len - 1) % self.capacity();
        self.slots[idx].as_ref().ok_or(MovementError::EmptyHistory)
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PhysicalState> + '_ {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Quat, Vec3};

    fn state(seq: u32) -> PhysicalState {
        let mut s = PhysicalState::spawn(Vec3::new(seq as f32, 0.0, 0.0), Quat::IDENTITY, 0);
        s.sequence_number = seq;
        s.timestamp = seq as i64 * 16;
        s
    }

    #[test]
    fn last_on_empty_history_fails() {
        let history = StateHistory::new();
        assert_eq!(history.last(), Err(MovementError::EmptyHistory));
    }

    #[test]
    fn appends_are_chronological_and_bounded() {
        let mut history = StateHistory::new();
        for seq in 0..=HISTORY_CAPACITY as u32 {
            history.append(state(seq)).unwrap();
            assert!(history.len() <= HISTORY_CAPACITY);
        }

        assert_eq!(history.len(), HISTORY_CAPACITY);
        // The very first entry was evicted by the 129th append.
        assert!(history.iter().all(|s| s.sequence_number != 0));
        assert_eq!(history.iter().next().unwrap().sequence_number, 1);
        assert_eq!(history.last().unwrap().sequence_number, HISTORY_CAPACITY as u32);

        let pairs: Vec<_> = history.iter().collect();
        for w in pairs.windows(2) {
            assert!(w[0].timestamp < w[1].timestamp);
            assert!(w[0].sequence_number < w[1].sequence_number);
        }
    }

    #[test]
    fn rejects_going_backwards() {
        let mut history = StateHistory::with_capacity(4);
        history.append(state(5)).unwrap();
        let err = history.append(state(4)).unwrap_err();
        assert!(matches!(err, MovementError::OutOfOrder { last_seq: 5, seq: 4, .. }));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn clear_resets() {
        let mut history = StateHistory::with_capacity(2);
        history.append(state(1)).unwrap();
        history.append(state(2)).unwrap();
        history.append(state(3)).unwrap();
        history.clear();
        assert!(history.is_empty());
        history.append(state(1)).unwrap();
        assert_eq!(history.last().unwrap().sequence_number, 1);
    }
}
