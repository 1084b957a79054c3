//! Runtime progress reporting: emitted every `tickFreq` seconds or on a
//! `SIGUSR1`, and once more as a per-pass summary.
//!
//! Grounded on the teacher's `stats.rs` directly: the same
//! counter-struct-plus-`indicatif::ProgressBar`-plus-`tracing::info!` shape,
//! re-pointed at this scan's own tick fields instead of key-recovery counts.

use std::time::Instant;

use indicatif::ProgressBar;
use tracing::info;

use crate::types::Pass;

pub struct RuntimeStats {
    pass: Pass,
    tip_height: i64,
    started: Instant,
    last_tick: Instant,
    sigs_since_tick: u64,
    cumulative_sigs: u64,
    current_height: i64,
    match_count: usize,
    progress_bar: ProgressBar,
}

impl RuntimeStats {
    pub fn start(pass: Pass, tip_height: i64) -> Self {
        info!(pass = pass.number(), tip_height, "pass started");
        Self {
            pass,
            tip_height,
            started: Instant::now(),
            last_tick: Instant::now(),
            sigs_since_tick: 0,
            cumulative_sigs: 0,
            current_height: 0,
            match_count: 0,
            progress_bar: ProgressBar::new_spinner(),
        }
    }

    pub fn record_signature(&mut self, height: i64) {
        self.sigs_since_tick += 1;
        self.cumulative_sigs += 1;
        self.current_height = self.current_height.max(height);
    }

    pub fn set_match_count(&mut self, count: usize) {
        self.match_count = count;
    }

    /// Emit one progress line: step, signatures since last tick, elapsed
    /// seconds, current match count, cumulative signature count, current
    /// block height, tip height.
    pub fn report(&mut self) {
        let elapsed = self.last_tick.elapsed().as_secs_f64();
        let message = format!(
            "step={} sigs_tick={} elapsed={:.1}s matches={} sigs_total={} height={}/{}",
            self.pass.number(),
            self.sigs_since_tick,
            elapsed,
            self.match_count,
            self.cumulative_sigs,
            self.current_height,
            self.tip_height,
        );
        self.progress_bar.set_message(message.clone());
        info!("{}", message);

        self.sigs_since_tick = 0;
        self.last_tick = Instant::now();
    }

    pub fn finish_pass(&self) {
        self.progress_bar.finish_and_clear();
        info!(
            pass = self.pass.number(),
            duration = ?self.started.elapsed(),
            sigs_total = self.cumulative_sigs,
            matches = self.match_count,
            "pass completed",
        );
    }
}
