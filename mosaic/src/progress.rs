//! Progress reporting for mosaic runs.

use tracing::info;

/// Progress information for a mosaic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicProgress {
    /// Completed steps of the current stage.
    pub current: usize,
    /// Total steps of the current stage.
    pub total: usize,
    pub stage: MosaicStage,
}

/// Stage of a mosaic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum MosaicStage {
    /// Aligning consecutive image pairs.
    Aligning,
    /// Rendering and writing output stripes.
    Rendering,
}

/// Receives progress updates. Called from the thread driving the stage.
pub trait ProgressObserver: Sync {
    fn on_progress(&self, progress: MosaicProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(MosaicProgress) + Sync,
{
    fn on_progress(&self, progress: MosaicProgress) {
        self(progress)
    }
}

/// Discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _progress: MosaicProgress) {}
}

/// Logs each update at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, progress: MosaicProgress) {
        let percent = if progress.total == 0 {
            100.0
        } else {
            progress.current as f64 * 100.0 / progress.total as f64
        };
        info!(
            stage = %progress.stage,
            current = progress.current,
            total = progress.total,
            "{} {:.1}%",
            progress.stage,
            percent
        );
    }
}

pub(crate) fn report_progress(
    observer: &dyn ProgressObserver,
    stage: MosaicStage,
    current: usize,
    total: usize,
) {
    observer.on_progress(MosaicProgress {
        current,
        total,
        stage,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_observer_receives_updates() {
        let seen = Mutex::new(Vec::new());
        let observer = |p: MosaicProgress| seen.lock().unwrap().push(p);
        report_progress(&observer, MosaicStage::Aligning, 1, 3);
        report_progress(&observer, MosaicStage::Rendering, 2, 2);

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            MosaicProgress {
                current: 1,
                total: 3,
                stage: MosaicStage::Aligning
            }
        );
        assert_eq!(seen[1].stage, MosaicStage::Rendering);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(MosaicStage::Aligning.to_string(), "Aligning");
        assert_eq!(MosaicStage::Rendering.to_string(), "Rendering");
    }
}
