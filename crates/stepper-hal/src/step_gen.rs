//! Per-motor hardware timer interface (§4.2).
//!
//! Each motor owns a [`SegmentTimer`] running in frequency-generator mode and
//! a [`DmaCounter`] counting its compare events. Step edges between segment
//! boundaries are generated entirely by hardware; this module only computes
//! the prescaler/period that makes that true and tracks the signed half-step
//! count the DMA channel reports back.

use crate::hw::{DmaCounter, Prescaler, SegmentTimer};

/// Core clock the segment timer's tick counts are measured against. Matches
/// the 168 MHz SYSCLK `cnc-mcu-firmware` configures TIM2 against on its
/// reference board (§10.1); a different board passes its own clock through
/// [`StepGen::with_clock`].
pub const DEFAULT_F_CPU_HZ: u64 = 168_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGenError {
    /// `prep` called while a previous prep is still unconsumed by `load`.
    AlreadyPrepped,
    /// `prep`/`set_position` called while the timer is mid-segment.
    Executing,
}

/// Ceil-divide shaped for `ceil(time * F_CPU * 60 / half_steps)`, computed
/// in fixed-point so the emitted edge schedule is bit-exact across builds
/// rather than depending on float rounding mode.
fn ticks_per_step(time_seconds: f64, half_steps: u32, f_cpu_hz: u64) -> u64 {
    debug_assert!(half_steps > 0);
    // time_seconds is a planner-produced value in [MIN_SEGMENT_TIME,
    // MAX_SEGMENT_TIME] (0.5 ms .. 50 ms); scaling by 1e9 keeps the
    // nanosecond-resolution numerator an exact integer before the final
    // division, rather than carrying f64 rounding error into the ceil.
    let time_ns = (time_seconds * 1.0e9).round() as u64;
    let numerator = time_ns.saturating_mul(f_cpu_hz).saturating_mul(60);
    let denominator = (half_steps as u64).saturating_mul(1_000_000_000);
    ceil_div(numerator, denominator)
}

fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    (numerator + denominator - 1) / denominator
}

/// Selects the lowest prescaler whose period fits in 16 bits (§4.1
/// "Prescaler selection algorithm"). `None` means the segment is too long
/// even at the coarsest prescaler and the motor's clock is switched off for
/// the segment (it simply emits no edges and resumes next segment).
pub fn select_prescaler(ticks_per_step: u64) -> Option<(Prescaler, u16)> {
    const BIT16: u64 = 1 << 16;
    let (prescaler, shifted) = if ticks_per_step < BIT16 {
        (Prescaler::One, ticks_per_step)
    } else if ticks_per_step < BIT16 << 1 {
        (Prescaler::Two, ticks_per_step >> 1)
    } else if ticks_per_step < BIT16 << 2 {
        (Prescaler::Four, ticks_per_step >> 2)
    } else if ticks_per_step < BIT16 << 3 {
        (Prescaler::Eight, ticks_per_step >> 3)
    } else {
        return None;
    };
    Some((prescaler, (shifted + 1) as u16))
}

/// Outcome of [`StepGen::prepare`]: either a clock configuration to commit at
/// the next segment boundary, or a clock-off skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedSegment {
    pub prescaler: Option<Prescaler>,
    pub period: u16,
    pub direction_forward: bool,
    pub target_half_steps: i64,
}

/// Per-motor timer/DMA pair plus the position bookkeeping §3 assigns to
/// StepGen: commanded and encoder half-step counts.
pub struct StepGen<TIMER, DMA> {
    timer: TIMER,
    dma: DMA,
    f_cpu_hz: u64,
    active_prescaler: Option<Prescaler>,
    prepared: Option<PreparedSegment>,
    /// Position the hardware has been told to reach as of the last `load`.
    commanded_half_steps: i64,
    /// Accumulated from DMA readbacks at each `end`.
    encoder_half_steps: i64,
    /// Direction pin state of the segment currently loaded on the timer.
    active_direction_forward: bool,
    executing: bool,
}

impl<TIMER, DMA> StepGen<TIMER, DMA>
where
    TIMER: SegmentTimer,
    DMA: DmaCounter,
{
    pub fn new(timer: TIMER, dma: DMA) -> Self {
        StepGen {
            timer,
            dma,
            f_cpu_hz: DEFAULT_F_CPU_HZ,
            active_prescaler: None,
            prepared: None,
            commanded_half_steps: 0,
            encoder_half_steps: 0,
            active_direction_forward: true,
            executing: false,
        }
    }

    pub fn with_clock(mut self, f_cpu_hz: u64) -> Self {
        self.f_cpu_hz = f_cpu_hz;
        self
    }

    pub fn commanded_half_steps(&self) -> i64 {
        self.commanded_half_steps
    }

    pub fn encoder_half_steps(&self) -> i64 {
        self.encoder_half_steps
    }

    /// Overwrites commanded, encoder and internal position to `half_steps`
    /// (§4.1 `set_position`). Rejected while a move is executing.
    pub fn set_position(&mut self, half_steps: i64) -> Result<(), StepGenError> {
        if self.executing {
            return Err(StepGenError::Executing);
        }
        self.commanded_half_steps = half_steps;
        self.encoder_half_steps = half_steps;
        Ok(())
    }

    /// Computes the prescaler/period for `|target_half_steps -
    /// commanded_half_steps|` edges over `time_seconds` (§4.1 `prep_move`).
    pub fn prepare(
        &mut self,
        time_seconds: f64,
        target_half_steps: i64,
        reverse: bool,
    ) -> Result<PreparedSegment, StepGenError> {
        if self.prepared.is_some() {
            return Err(StepGenError::AlreadyPrepped);
        }
        let delta = target_half_steps - self.commanded_half_steps;
        let direction_forward = (delta >= 0) ^ reverse;
        let half_steps = delta.unsigned_abs() as u32;

        let segment = if half_steps == 0 {
            PreparedSegment { prescaler: None, period: 0, direction_forward, target_half_steps }
        } else {
            let ticks = ticks_per_step(time_seconds, half_steps, self.f_cpu_hz);
            match select_prescaler(ticks) {
                Some((prescaler, period)) => {
                    PreparedSegment { prescaler: Some(prescaler), period, direction_forward, target_half_steps }
                }
                None => PreparedSegment { prescaler: None, period: 0, direction_forward, target_half_steps },
            }
        };
        self.prepared = Some(segment);
        Ok(segment)
    }

    /// Stops the timer and folds the just-finished segment's DMA-measured
    /// half-step count into the encoder (§4.1 `end_move`), using the
    /// direction that was active for that segment.
    pub fn end(&mut self) {
        self.consume_dma_count();
        self.timer.stop();
        self.executing = false;
    }

    /// Commits the staged prep to hardware at a segment boundary (§4.1
    /// `load_move`): rescales the timer if the prescaler changed since the
    /// last load, then arms the new prescaler/period/direction. Must be
    /// called after [`Self::end`] has already folded in the previous
    /// segment's executed count.
    pub fn load(&mut self) {
        let prepared = self.prepared.take().unwrap_or(PreparedSegment {
            prescaler: None,
            period: 0,
            direction_forward: self.active_direction_forward,
            target_half_steps: self.commanded_half_steps,
        });

        match prepared.prescaler {
            Some(new_prescaler) => {
                if let Some(old_prescaler) = self.active_prescaler {
                    if old_prescaler != new_prescaler {
                        self.timer.rescale_running_count(old_prescaler, new_prescaler);
                    }
                }
                self.dma.reset();
                self.timer.configure(new_prescaler, prepared.period);
                self.active_prescaler = Some(new_prescaler);
                self.executing = true;
            }
            None => {
                self.timer.stop();
                self.active_prescaler = None;
                self.executing = false;
            }
        }
        self.active_direction_forward = prepared.direction_forward;
        self.commanded_half_steps = prepared.target_half_steps;
    }

    /// Reads the DMA down-counter and folds the executed half-step count
    /// into the signed encoder position (direction-aware).
    fn consume_dma_count(&mut self) {
        if !self.executing {
            return;
        }
        let remaining = self.dma.read();
        let executed = (0xFFFFu32 - remaining as u32) as i64;
        let signed = if self.active_direction_forward { executed } else { -executed };
        self.encoder_half_steps += signed;
    }

    /// Following error per §3/§8: `commanded - encoder`, bucket-brigaded one
    /// segment back by the executor (it reads this before calling `load`).
    pub fn following_error(&self) -> i64 {
        self.commanded_half_steps - self.encoder_half_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prescaler_boundaries_match_spec_table() {
        assert_eq!(select_prescaler(1).unwrap().0, Prescaler::One);
        assert_eq!(select_prescaler((1 << 16) - 1).unwrap().0, Prescaler::One);
        assert_eq!(select_prescaler(1 << 16).unwrap().0, Prescaler::Two);
        assert_eq!(select_prescaler((1 << 17) - 1).unwrap().0, Prescaler::Two);
        assert_eq!(select_prescaler(1 << 17).unwrap().0, Prescaler::Four);
        assert_eq!(select_prescaler((1 << 18) - 1).unwrap().0, Prescaler::Four);
        assert_eq!(select_prescaler(1 << 18).unwrap().0, Prescaler::Eight);
        assert_eq!(select_prescaler((1 << 19) - 1).unwrap().0, Prescaler::Eight);
        assert!(select_prescaler(1 << 19).is_none());
    }

    #[test]
    fn period_formula_matches_spec() {
        // period = (ticks_per_step >> log2(prescaler)) + 1
        let (prescaler, period) = select_prescaler(300_000).unwrap();
        assert_eq!(prescaler, Prescaler::Eight);
        assert_eq!(period as u64, (300_000u64 >> 3) + 1);
    }

    #[test]
    fn ticks_per_step_example_from_spec_scenario_5() {
        // microsteps=16, travel/rev=6.35, step-angle=1.8 => steps_per_unit=503.937
        // target half-steps = 2*round(1*503.937) = 1008. A 0.1 min (6 s) move
        // split over, say, 20 segments gives a 0.3 s segment budget per step.
        let t = ticks_per_step(0.005, 50, DEFAULT_F_CPU_HZ);
        assert!(t > 0);
    }

    #[derive(Default)]
    struct MockTimer {
        configured: Option<(Prescaler, u16)>,
        rescales: u32,
        stopped: bool,
    }
    impl SegmentTimer for MockTimer {
        fn configure(&mut self, prescaler: Prescaler, period: u16) {
            self.configured = Some((prescaler, period));
            self.stopped = false;
        }
        fn rescale_running_count(&mut self, _old: Prescaler, _new: Prescaler) {
            self.rescales += 1;
        }
        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    struct MockDma {
        remaining: u16,
    }
    impl MockDma {
        fn executed(steps: u16) -> Self {
            MockDma { remaining: 0xFFFF - steps }
        }
    }
    impl DmaCounter for MockDma {
        fn reset(&mut self) {
            self.remaining = 0xFFFF;
        }
        fn read(&self) -> u16 {
            self.remaining
        }
    }

    #[test]
    fn set_position_round_trips_commanded_and_encoder() {
        let mut gen = StepGen::new(MockTimer::default(), MockDma::executed(0));
        gen.set_position(1008).unwrap();
        assert_eq!(gen.commanded_half_steps(), 1008);
        assert_eq!(gen.encoder_half_steps(), 1008);
        assert_eq!(gen.following_error(), 0);
    }

    #[test]
    fn prepare_then_load_commits_direction_and_target() {
        let mut gen = StepGen::new(MockTimer::default(), MockDma::executed(0));
        let prepared = gen.prepare(0.005, 1008, false).unwrap();
        assert!(prepared.direction_forward);
        gen.load();
        assert_eq!(gen.commanded_half_steps(), 1008);
    }

    #[test]
    fn prepare_rejects_when_already_prepped() {
        let mut gen = StepGen::new(MockTimer::default(), MockDma::executed(0));
        gen.prepare(0.005, 500, false).unwrap();
        assert_eq!(gen.prepare(0.005, 600, false), Err(StepGenError::AlreadyPrepped));
    }

    #[test]
    fn end_folds_dma_count_into_encoder_before_next_load() {
        let mut gen = StepGen::new(MockTimer::default(), MockDma::executed(0));
        gen.prepare(0.005, 100, false).unwrap();
        gen.load();
        // The segment executed 97 of the 100 commanded half-steps.
        gen.dma.remaining = 0xFFFF - 97;
        gen.end();
        assert_eq!(gen.encoder_half_steps(), 97);
        assert_eq!(gen.following_error(), 100 - 97);
    }

    #[test]
    fn set_position_rejected_while_executing() {
        let mut gen = StepGen::new(MockTimer::default(), MockDma::executed(0));
        gen.prepare(0.005, 100, false).unwrap();
        gen.load();
        assert_eq!(gen.set_position(0), Err(StepGenError::Executing));
    }
}
