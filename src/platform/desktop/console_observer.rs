use std::time::Instant;

use log::{info, trace};

use crate::{
    simulation_parameters::DomainBounds,
    snapshot::{Snapshot, SnapshotConsumer},
};

/// Headless stand-in for a renderer: reports the published snapshots on the log.
pub struct ConsoleObserver {
    frame_number: u64,
    last_step: u64,
    report_every: u64,
    last_report: Instant,
}

impl ConsoleObserver {
    pub fn new(report_every: u64) -> ConsoleObserver {
        ConsoleObserver {
            frame_number: 0,
            last_step: 0,
            report_every: report_every.max(1),
            last_report: Instant::now(),
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

impl SnapshotConsumer for ConsoleObserver {
    fn present(&mut self, snapshot: &Snapshot) {
        let steps_since_last_frame = snapshot.step_number.saturating_sub(self.last_step);
        self.last_step = snapshot.step_number;
        trace!(
            "frame {}: step {} (+{})",
            self.frame_number,
            snapshot.step_number,
            steps_since_last_frame
        );

        if self.frame_number % self.report_every == 0 {
            let elapsed = self.last_report.elapsed();
            self.last_report = Instant::now();
            let (cx, cy) = snapshot.centroid().map(|c| (c.x, c.y)).unwrap_or_default();
            info!(
                "{:05}: step {} t={:.3}s {} particles, centroid ({:.3}, {:.3}), {:.1}ms since last report",
                self.frame_number,
                snapshot.step_number,
                snapshot.time,
                snapshot.positions.len(),
                cx,
                cy,
                elapsed.as_secs_f64() * 1000.
            );
        }
        self.frame_number += 1;
    }

    fn on_parameter_reset(&mut self, bounds: DomainBounds) {
        info!(
            "parameters reset, domain [{}, {}] x [{}, {}]",
            bounds.left, bounds.right, bounds.bottom, bounds.top
        );
        self.last_step = 0;
    }
}
