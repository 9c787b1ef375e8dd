//! Playback scheduling core.
//!
//! Keeps the queue of converted-but-unscheduled buffers and the insertion
//! point on the device clock, and decides when queued audio is handed to the
//! render timeline. All bookkeeping is in whole device frames so buffers
//! splice back-to-back exactly, without float drift.

use std::collections::VecDeque;

use crate::sample_convert;

/// One converted chunk of stereo audio waiting to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBuffer {
    samples: Vec<f32>,
    frames: u64,
}

impl PendingBuffer {
    /// Builds a pending buffer from interleaved 16-bit stereo samples.
    ///
    /// Panics if the slice does not split into whole L/R frames.
    pub fn from_interleaved_i16(interleaved: &[i16]) -> Self {
        assert!(
            interleaved.len() % 2 == 0,
            "interleaved stereo samples must come in whole L/R frames"
        );
        let samples = sample_convert::convert_interleaved(interleaved);
        let frames = (samples.len() / 2) as u64;
        Self { samples, frames }
    }

    /// Duration of this buffer in device frames.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Stamps the buffer with its start time on the device clock.
    fn schedule_at(self, start_frame: u64) -> ScheduledBuffer {
        ScheduledBuffer {
            start_frame,
            samples: self.samples,
            cursor: 0,
        }
    }
}

/// A buffer handed to the render timeline with a fixed start time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    /// First device frame at which this buffer plays.
    pub start_frame: u64,
    samples: Vec<f32>,
    cursor: usize,
}

impl ScheduledBuffer {
    /// Duration in device frames.
    pub fn frames(&self) -> u64 {
        (self.samples.len() / 2) as u64
    }

    /// True once every sample has been consumed by the render callback.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.samples.len()
    }

    /// Consumes and returns the next stereo frame.
    pub fn next_frame(&mut self) -> (f32, f32) {
        let left = self.samples[self.cursor];
        let right = self.samples[self.cursor + 1];
        self.cursor += 2;
        (left, right)
    }

    #[cfg(test)]
    pub fn for_test(start_frame: u64, samples: Vec<f32>) -> Self {
        assert!(samples.len() % 2 == 0);
        Self {
            start_frame,
            samples,
            cursor: 0,
        }
    }
}

/// FIFO of buffers produced but not yet handed to the device.
#[derive(Debug, Default)]
pub struct PendingQueue {
    buffers: VecDeque<PendingBuffer>,
    queued_frames: u64,
}

impl PendingQueue {
    /// Appends a buffer at the tail.
    pub fn push(&mut self, buffer: PendingBuffer) {
        self.queued_frames += buffer.frames();
        self.buffers.push_back(buffer);
    }

    /// Total queued duration in frames.
    pub fn queued_frames(&self) -> u64 {
        self.queued_frames
    }

    /// Removes and returns every queued buffer, oldest first.
    pub fn drain_all(&mut self) -> VecDeque<PendingBuffer> {
        self.queued_frames = 0;
        std::mem::take(&mut self.buffers)
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Result of one scheduling pass.
#[derive(Debug, Default)]
pub struct PassOutcome {
    /// Buffers to append to the render timeline, in playback order.
    pub scheduled: Vec<ScheduledBuffer>,
    /// Frames the device clock had advanced past the stored insertion point,
    /// when the pass had to clamp a stale schedule back to "now".
    pub resync_frames: Option<u64>,
}

/// Pending queue plus the insertion point, the only state carried between
/// ingest calls.
#[derive(Debug, Default)]
pub struct SchedulerState {
    pending: PendingQueue,
    insertion_point: Option<u64>,
}

impl SchedulerState {
    /// Enqueues a converted buffer for the next pass.
    pub fn push(&mut self, buffer: PendingBuffer) {
        self.pending.push(buffer);
    }

    /// Frames of audio committed ahead of `now`: everything scheduled but
    /// not yet played, plus everything queued but not yet scheduled.
    pub fn lead_frames(&self, now: u64) -> u64 {
        let scheduled_ahead = self
            .insertion_point
            .map_or(0, |point| point.saturating_sub(now));
        scheduled_ahead + self.pending.queued_frames()
    }

    pub fn insertion_point(&self) -> Option<u64> {
        self.insertion_point
    }

    /// Runs one scheduling pass against the device clock at `now` frames.
    ///
    /// Until the first pass fires, queued audio shorter than
    /// `prebuffer_frames` is left to accumulate so producer jitter cannot
    /// open an audible gap between the first two buffers. Once scheduling
    /// has started the gate stays open; a device clock that has overtaken
    /// the insertion point clamps it back to `now` (reported via
    /// `resync_frames`) instead of scheduling into the past.
    pub fn run_pass(&mut self, now: u64, prebuffer_frames: u64) -> PassOutcome {
        if self.insertion_point.is_none() && self.pending.queued_frames() < prebuffer_frames {
            return PassOutcome::default();
        }

        let mut resync_frames = None;
        let mut insert_at = match self.insertion_point {
            Some(point) if point < now => {
                resync_frames = Some(now - point);
                now
            }
            Some(point) => point,
            None => now,
        };

        let mut scheduled = Vec::new();
        for buffer in self.pending.drain_all() {
            let frames = buffer.frames();
            scheduled.push(buffer.schedule_at(insert_at));
            insert_at += frames;
        }

        self.insertion_point = Some(insert_at);
        PassOutcome {
            scheduled,
            resync_frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingBuffer, PendingQueue, SchedulerState};

    fn buffer_of_frames(frames: usize) -> PendingBuffer {
        PendingBuffer::from_interleaved_i16(&vec![0i16; frames * 2])
    }

    #[test]
    fn test_pending_queue_tracks_queued_frames_and_drains_fifo() {
        let mut queue = PendingQueue::default();
        queue.push(buffer_of_frames(10));
        queue.push(buffer_of_frames(25));
        assert_eq!(queue.queued_frames(), 35);

        let drained: Vec<_> = queue.drain_all().into_iter().collect();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].frames(), 10);
        assert_eq!(drained[1].frames(), 25);
        assert_eq!(queue.queued_frames(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_prebuffer_gate_holds_back_short_queue() {
        let mut state = SchedulerState::default();
        // 50 ms at 44.1 kHz against a 100 ms gate.
        state.push(buffer_of_frames(2205));
        let outcome = state.run_pass(0, 4410);

        assert!(outcome.scheduled.is_empty());
        assert_eq!(state.insertion_point(), None);
        assert_eq!(state.lead_frames(0), 2205);
    }

    #[test]
    fn test_gate_opens_once_cumulative_duration_reaches_threshold() {
        let mut state = SchedulerState::default();
        state.push(buffer_of_frames(2205));
        assert!(state.run_pass(0, 4410).scheduled.is_empty());

        state.push(buffer_of_frames(2205));
        let outcome = state.run_pass(0, 4410);

        let starts: Vec<u64> = outcome.scheduled.iter().map(|b| b.start_frame).collect();
        assert_eq!(starts, vec![0, 2205]);
        assert_eq!(state.insertion_point(), Some(4410));
    }

    #[test]
    fn test_buffers_schedule_back_to_back_with_no_gap() {
        let mut state = SchedulerState::default();
        state.push(buffer_of_frames(100));
        state.push(buffer_of_frames(250));
        state.push(buffer_of_frames(7));
        let outcome = state.run_pass(1_000, 0);

        let starts: Vec<u64> = outcome.scheduled.iter().map(|b| b.start_frame).collect();
        assert_eq!(starts, vec![1_000, 1_100, 1_350]);
        assert_eq!(state.insertion_point(), Some(1_357));
    }

    #[test]
    fn test_later_submission_continues_from_previous_end_not_from_now() {
        let mut state = SchedulerState::default();
        state.push(buffer_of_frames(2205));
        state.push(buffer_of_frames(2205));
        state.run_pass(0, 4410);

        // The device has played only 1000 frames when the third chunk lands.
        state.push(buffer_of_frames(2205));
        let outcome = state.run_pass(1_000, 4410);

        assert_eq!(outcome.scheduled[0].start_frame, 4_410);
        assert_eq!(outcome.resync_frames, None);
        assert_eq!(state.insertion_point(), Some(6_615));
    }

    #[test]
    fn test_no_buffer_starts_before_the_clock() {
        let mut state = SchedulerState::default();
        state.push(buffer_of_frames(10));
        state.run_pass(500, 0);

        state.push(buffer_of_frames(10));
        let outcome = state.run_pass(2_000, 0);
        for buffer in &outcome.scheduled {
            assert!(buffer.start_frame >= 2_000);
        }
    }

    #[test]
    fn test_stale_insertion_point_clamps_to_now_and_reports_resync() {
        let mut state = SchedulerState::default();
        state.push(buffer_of_frames(6_615));
        state.run_pass(0, 4410);
        assert_eq!(state.insertion_point(), Some(6_615));

        // Producer stalls; the clock overtakes everything scheduled.
        state.push(buffer_of_frames(2205));
        let outcome = state.run_pass(13_230, 4410);

        assert_eq!(outcome.scheduled[0].start_frame, 13_230);
        assert_eq!(outcome.resync_frames, Some(6_615));
        assert_eq!(state.insertion_point(), Some(15_435));
    }

    #[test]
    fn test_gate_does_not_rearm_after_underrun() {
        let mut state = SchedulerState::default();
        state.push(buffer_of_frames(4_410));
        state.run_pass(0, 4410);

        // A single short chunk after the stall schedules immediately even
        // though it is far below the prebuffer threshold.
        state.push(buffer_of_frames(100));
        let outcome = state.run_pass(50_000, 4410);
        assert_eq!(outcome.scheduled.len(), 1);
        assert_eq!(outcome.scheduled[0].start_frame, 50_000);
    }

    #[test]
    fn test_empty_buffer_is_enqueued_and_drained() {
        let mut state = SchedulerState::default();
        state.push(buffer_of_frames(0));
        let outcome = state.run_pass(100, 0);

        assert_eq!(outcome.scheduled.len(), 1);
        assert_eq!(outcome.scheduled[0].frames(), 0);
        assert_eq!(state.insertion_point(), Some(100));
    }

    #[test]
    fn test_lead_frames_counts_scheduled_and_queued_audio() {
        let mut state = SchedulerState::default();
        state.push(buffer_of_frames(1_000));
        state.run_pass(0, 0);
        state.push(buffer_of_frames(300));

        assert_eq!(state.lead_frames(200), 800 + 300);
        assert_eq!(state.lead_frames(5_000), 300);
    }

    #[test]
    #[should_panic(expected = "whole L/R frames")]
    fn test_odd_sample_count_panics() {
        PendingBuffer::from_interleaved_i16(&[0, 1, 2]);
    }
}
