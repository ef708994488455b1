//! The move-buffer ring: a fixed-capacity circular queue of planned moves.
//!
//! An array-backed ring with ordinal neighbor links rather than `pv`/`nx`
//! pointers, so neighbor traversal for look-ahead stays O(1) with no
//! allocation.

use crate::MAX_AXES;

/// Minimum usable pool size (`>= 12`, enough for a look-ahead window to
/// smooth typical corner geometry); the default gives more headroom.
pub const DEFAULT_POOL_SIZE: usize = 32;

/// One-way lifecycle a slot passes through each time it is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Loading,
    Queued,
    Running,
}

/// Executor-side sub-state of a *running* buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Off,
    New,
    Init,
    Run,
    Restart,
}

/// Synchronous side effects queued to fire exactly at a buffer boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SpindleSpeed,
    SpindleMode,
    CoolantMist,
    CoolantFlood,
    OffsetUpdate,
    ProgramStop,
}

/// Tagged payload for a buffer's queued action, in place of per-buffer
/// function pointers.
#[derive(Debug, Clone, Copy)]
pub enum Move {
    Null,
    Aline,
    Dwell { seconds: f64 },
    Command { kind: CommandKind, value: f64 },
}

/// A single slot in the planner's ring buffer.
#[derive(Debug, Clone, Copy)]
pub struct MoveBuffer {
    pub buffer_state: BufferState,
    pub run_state: RunState,
    pub move_type: Move,
    pub replannable: bool,
    pub line_number: u32,

    pub unit: [f64; MAX_AXES],
    pub target: [f64; MAX_AXES],
    pub length: f64,
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,

    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,
    pub braking_velocity: f64,
    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    pub delta_vmax: f64,

    pub jerk: f64,
    pub recip_jerk: f64,
    pub cbrt_jerk: f64,
}

impl Default for MoveBuffer {
    fn default() -> Self {
        MoveBuffer {
            buffer_state: BufferState::Empty,
            run_state: RunState::Off,
            move_type: Move::Null,
            replannable: false,
            line_number: 0,
            unit: [0.0; MAX_AXES],
            target: [0.0; MAX_AXES],
            length: 0.0,
            head_length: 0.0,
            body_length: 0.0,
            tail_length: 0.0,
            entry_velocity: 0.0,
            cruise_velocity: 0.0,
            exit_velocity: 0.0,
            braking_velocity: 0.0,
            entry_vmax: 0.0,
            cruise_vmax: 0.0,
            exit_vmax: 0.0,
            delta_vmax: 0.0,
            jerk: 0.0,
            recip_jerk: 0.0,
            cbrt_jerk: 0.0,
        }
    }
}

impl MoveBuffer {
    /// Clears everything about this slot except what the ring itself needs
    /// to keep neighbor math working (there is nothing to preserve here
    /// since neighbors are computed from ordinals, not stored links).
    fn clear(&mut self) {
        *self = MoveBuffer::default();
    }
}

/// Array-backed circular queue of [`MoveBuffer`] slots with write/queue/run
/// cursors expressed as ordinals (`(i +/- 1) mod N`) rather than pointers.
pub struct BufferPool<const N: usize> {
    slots: [MoveBuffer; N],
    write: usize,
    run: usize,
    queued_count: usize,
    buffers_available: usize,
}

impl<const N: usize> BufferPool<N> {
    pub fn new() -> Self {
        BufferPool {
            slots: [MoveBuffer::default(); N],
            write: 0,
            run: 0,
            queued_count: 0,
            buffers_available: N,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn buffers_available(&self) -> usize {
        self.buffers_available
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queued_count == 0
    }

    fn bump(i: usize) -> usize {
        (i + 1) % N
    }

    /// Checks out the next empty slot for the producer to populate.
    /// Returns `None` if the pool is full (mirrors `mp_get_write_buffer`).
    pub fn get_write_buffer(&mut self) -> Option<(usize, &mut MoveBuffer)> {
        if self.buffers_available == 0 {
            return None;
        }
        let idx = self.write;
        self.slots[idx].clear();
        self.slots[idx].buffer_state = BufferState::Loading;
        self.buffers_available -= 1;
        Some((idx, &mut self.slots[idx]))
    }

    /// Commits a fully-populated `Loading` buffer, making it visible to the
    /// executor as `Queued` and advancing the write cursor.
    pub fn commit_write_buffer(&mut self, idx: usize, move_type: Move, line_number: u32) {
        debug_assert_eq!(idx, self.write);
        let buf = &mut self.slots[idx];
        buf.move_type = move_type;
        buf.line_number = line_number;
        buf.buffer_state = BufferState::Queued;
        buf.run_state = RunState::New;
        self.write = Self::bump(self.write);
        self.queued_count += 1;
    }

    /// Executor interface: returns the current run buffer, promoting it
    /// from `Queued` to `Running` on first pickup.
    pub fn get_run_buffer(&mut self) -> Option<&mut MoveBuffer> {
        let idx = self.run;
        match self.slots[idx].buffer_state {
            BufferState::Queued => {
                self.slots[idx].buffer_state = BufferState::Running;
                Some(&mut self.slots[idx])
            }
            BufferState::Running => Some(&mut self.slots[idx]),
            _ => None,
        }
    }

    /// Executor interface: frees the current run buffer, returning it to
    /// `Empty` and advancing the run cursor.
    pub fn free_run_buffer(&mut self) {
        let idx = self.run;
        if self.slots[idx].buffer_state != BufferState::Running {
            return;
        }
        self.slots[idx].clear();
        self.run = Self::bump(self.run);
        self.queued_count -= 1;
        self.buffers_available += 1;
    }

    /// Ordinal of the most recently committed buffer (the tail of the
    /// queue), used as the look-ahead sweep's starting point. `None` if the
    /// queue is empty.
    pub fn last_queued(&self) -> Option<usize> {
        if self.queued_count == 0 {
            return None;
        }
        Some((self.write + N - 1) % N)
    }

    pub fn prev_index(&self, idx: usize) -> usize {
        (idx + N - 1) % N
    }

    pub fn next_index(&self, idx: usize) -> usize {
        Self::bump(idx)
    }

    pub fn get(&self, idx: usize) -> &MoveBuffer {
        &self.slots[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut MoveBuffer {
        &mut self.slots[idx]
    }

    pub fn run_index(&self) -> usize {
        self.run
    }

    /// Number of buffers currently in the `Queued` or `Running` state, used
    /// to bound the backward look-ahead sweep.
    pub fn queued_count(&self) -> usize {
        self.queued_count
    }

    /// Ring-count conservation check used by invariant tests:
    /// `count(empty) + count(loading) + count(queued) + count(running) == N`.
    #[cfg(test)]
    pub fn state_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for s in &self.slots {
            match s.buffer_state {
                BufferState::Empty => counts.0 += 1,
                BufferState::Loading => counts.1 += 1,
                BufferState::Queued => counts.2 += 1,
                BufferState::Running => counts.3 += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_count_conservation() {
        let mut pool: BufferPool<8> = BufferPool::new();
        for i in 0..5 {
            let (idx, buf) = pool.get_write_buffer().unwrap();
            buf.length = i as f64;
            pool.commit_write_buffer(idx, Move::Aline, i as u32);
        }
        let (e, l, q, r) = pool.state_counts();
        assert_eq!(e + l + q + r, 8);
        assert_eq!(q, 5);

        pool.get_run_buffer().unwrap();
        let (e, l, q, r) = pool.state_counts();
        assert_eq!(e + l + q + r, 8);
        assert_eq!(r, 1);
        assert_eq!(q, 4);

        pool.free_run_buffer();
        let (e, l, q, r) = pool.state_counts();
        assert_eq!(e + l + q + r, 8);
        assert_eq!(e, 4);
        assert_eq!(r, 0);
    }

    #[test]
    fn write_buffer_exhaustion() {
        let mut pool: BufferPool<2> = BufferPool::new();
        let (idx0, _) = pool.get_write_buffer().unwrap();
        pool.commit_write_buffer(idx0, Move::Aline, 0);
        let (idx1, _) = pool.get_write_buffer().unwrap();
        pool.commit_write_buffer(idx1, Move::Aline, 1);
        assert!(pool.get_write_buffer().is_none());
    }
}
