use crossbeam::channel::{bounded, Sender};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::image_processing::ProcessingResult;
use crate::utils;

/// Seam between the dispatcher and the actual per-photo work, so the
/// concurrency core is testable with a stub.
pub trait CaptureProcessor: Send + Sync {
    fn process(&self, path: &Path) -> Result<ProcessingResult, PipelineError>;
}

/// Aggregate pipeline counters, updated atomically by workers and read by
/// the periodic reporter and the shutdown summary.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub captured: AtomicUsize,
    pub processed: AtomicUsize,
    pub errored: AtomicUsize,
    pub uploaded: AtomicUsize,
    pub upload_failed: AtomicUsize,
    pub duplicates: AtomicUsize,
    last_activity: Mutex<Option<Instant>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub captured: usize,
    pub processed: usize,
    pub errored: usize,
    pub uploaded: usize,
    pub upload_failed: usize,
    pub duplicates: usize,
}

impl PipelineStats {
    fn mark_activity(&self) {
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = Some(Instant::now());
        }
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity.lock().ok().and_then(|guard| *guard)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            errored: self.errored.load(Ordering::SeqCst),
            uploaded: self.uploaded.load(Ordering::SeqCst),
            upload_failed: self.upload_failed.load(Ordering::SeqCst),
            duplicates: self.duplicates.load(Ordering::SeqCst),
        }
    }

    pub fn summary_line(&self) -> String {
        let s = self.snapshot();
        let activity = match self.last_activity() {
            Some(at) => format!("{}s ago", at.elapsed().as_secs()),
            None => "never".to_string(),
        };
        format!(
            "captured={} processed={} errored={} uploaded={} upload_failed={} duplicates={} last_activity={}",
            s.captured, s.processed, s.errored, s.uploaded, s.upload_failed, s.duplicates, activity
        )
    }
}

struct CaptureTask {
    path: PathBuf,
}

/// Outcome of a graceful shutdown
#[derive(Debug)]
pub struct ShutdownReport {
    /// Tasks still unfinished when the grace period elapsed
    pub abandoned: usize,
    /// True when every submitted task finished inside the grace period
    pub clean: bool,
}

/// Bounded-queue worker pool driving a `CaptureProcessor`.
///
/// `submit` blocks once the queue is full, which is the backpressure toward
/// the producer. Tasks complete independently; one failure never affects the
/// others.
pub struct CaptureDispatcher {
    sender: Option<Sender<CaptureTask>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
    seen: Mutex<HashSet<String>>,
}

impl CaptureDispatcher {
    pub fn new(
        processor: Arc<dyn CaptureProcessor>,
        worker_count: usize,
        queue_depth: usize,
    ) -> Self {
        let (sender, receiver) = bounded::<CaptureTask>(queue_depth.max(1));
        let stats = Arc::new(PipelineStats::default());

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let processor = Arc::clone(&processor);
                let stats = Arc::clone(&stats);

                std::thread::Builder::new()
                    .name(format!("capture-worker-{}", worker_id))
                    .spawn(move || {
                        // Channel disconnect after shutdown drains the queue
                        while let Ok(task) = receiver.recv() {
                            match processor.process(&task.path) {
                                Ok(result) => {
                                    stats.processed.fetch_add(1, Ordering::SeqCst);
                                    if result.uploaded {
                                        stats.uploaded.fetch_add(1, Ordering::SeqCst);
                                    } else if result.upload_attempted {
                                        stats.upload_failed.fetch_add(1, Ordering::SeqCst);
                                    }
                                    info!(
                                        "processed {} -> {} ({}, {})",
                                        task.path.display(),
                                        result.output_path.display(),
                                        result.outcome_label,
                                        utils::format_duration(result.processing_time)
                                    );
                                }
                                Err(e) => {
                                    stats.errored.fetch_add(1, Ordering::SeqCst);
                                    warn!("processing failed for {}: {}", task.path.display(), e);
                                }
                            }
                            stats.mark_activity();
                        }
                    })
                    .unwrap_or_else(|e| panic!("cannot spawn worker thread: {}", e))
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            stats,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Queue a capture for processing. Returns false when the file was a
    /// duplicate (same name and size as an earlier submission) or vanished
    /// before it could be fingerprinted.
    pub fn submit(&self, path: &Path) -> bool {
        let signature = match utils::file_signature(path) {
            Ok(sig) => sig,
            Err(e) => {
                // File disappeared between discovery and submission
                warn!("skipping {}: {}", path.display(), e);
                return false;
            }
        };

        {
            let mut seen = match self.seen.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !seen.insert(signature) {
                self.stats.duplicates.fetch_add(1, Ordering::SeqCst);
                return false;
            }
        }

        self.stats.captured.fetch_add(1, Ordering::SeqCst);
        self.stats.mark_activity();

        if let Some(sender) = &self.sender {
            // Blocks when the queue is full; workers drain it
            if sender
                .send(CaptureTask {
                    path: path.to_path_buf(),
                })
                .is_err()
            {
                warn!("dispatcher already shut down, dropping {}", path.display());
                return false;
            }
        }
        true
    }

    /// Close intake and wait up to `grace` for in-flight and queued tasks.
    /// Workers still running after the grace period are detached and their
    /// tasks counted as abandoned.
    pub fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        // Dropping the sender disconnects the channel once drained
        self.sender.take();

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.workers.iter().all(|w| w.is_finished()) {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        let clean = self.workers.iter().all(|w| w.is_finished());
        if clean {
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }

        let s = self.stats.snapshot();
        let abandoned = s.captured.saturating_sub(s.processed + s.errored);

        if !clean {
            warn!(
                "{}",
                PipelineError::PoolShutdownTimeout { abandoned }
            );
        }

        ShutdownReport { abandoned, clean }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    struct StubProcessor {
        calls: AtomicUsize,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
        delay: Duration,
    }

    impl StubProcessor {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl CaptureProcessor for StubProcessor {
        fn process(&self, path: &Path) -> Result<ProcessingResult, PipelineError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.contains("bad") {
                Err(PipelineError::EnhancementFailure)
            } else {
                Ok(ProcessingResult {
                    input_path: path.to_path_buf(),
                    output_path: path.with_extension("out.jpg"),
                    outcome_label: "traditional",
                    has_faces: false,
                    uploaded: false,
                    upload_attempted: false,
                    processing_time: self.delay,
                })
            }
        }
    }

    fn temp_capture_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "eventshot_dispatch_{}_{}_{:?}",
            tag,
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_capture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_all_tasks_complete_and_stats_are_exact() {
        let dir = temp_capture_dir("exact");
        let processor = Arc::new(StubProcessor::new(Duration::from_millis(5)));
        let dispatcher = CaptureDispatcher::new(processor.clone(), 3, 32);

        let total = 20;
        let bad = 4;
        for i in 0..total {
            let name = if i < bad {
                format!("bad_{:02}.jpg", i)
            } else {
                format!("img_{:02}.jpg", i)
            };
            // Unique sizes so no two files share a signature
            let path = write_capture(&dir, &name, &vec![0u8; 10 + i]);
            assert!(dispatcher.submit(&path));
        }

        let report = dispatcher.shutdown(Duration::from_secs(10));
        assert!(report.clean);
        assert_eq!(report.abandoned, 0);

        assert_eq!(processor.calls.load(Ordering::SeqCst), total);
        assert!(processor.max_concurrent.load(Ordering::SeqCst) <= 3);

        let s = processor.calls.load(Ordering::SeqCst);
        assert_eq!(s, total);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_stats_separate_success_from_failure() {
        let dir = temp_capture_dir("split");
        let processor = Arc::new(StubProcessor::new(Duration::from_millis(1)));
        let dispatcher = CaptureDispatcher::new(processor, 2, 8);
        let stats = dispatcher.stats();

        for i in 0..6 {
            let name = if i % 2 == 0 {
                format!("bad_{}.jpg", i)
            } else {
                format!("img_{}.jpg", i)
            };
            let path = write_capture(&dir, &name, &vec![1u8; 20 + i]);
            dispatcher.submit(&path);
        }

        let report = dispatcher.shutdown(Duration::from_secs(10));
        assert!(report.clean);

        let s = stats.snapshot();
        assert_eq!(s.captured, 6);
        assert_eq!(s.processed, 3);
        assert_eq!(s.errored, 3);
        assert_eq!(s.processed + s.errored, s.captured);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_duplicate_submissions_are_dropped() {
        let dir = temp_capture_dir("dupe");
        let processor = Arc::new(StubProcessor::new(Duration::from_millis(1)));
        let dispatcher = CaptureDispatcher::new(processor.clone(), 2, 8);
        let stats = dispatcher.stats();

        let path = write_capture(&dir, "img.jpg", b"abcdef");
        assert!(dispatcher.submit(&path));
        assert!(!dispatcher.submit(&path));
        assert!(!dispatcher.submit(&path));

        let report = dispatcher.shutdown(Duration::from_secs(10));
        assert!(report.clean);

        let s = stats.snapshot();
        assert_eq!(s.captured, 1);
        assert_eq!(s.duplicates, 2);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_skipped_without_counting() {
        let processor = Arc::new(StubProcessor::new(Duration::from_millis(1)));
        let dispatcher = CaptureDispatcher::new(processor, 1, 4);
        let stats = dispatcher.stats();

        assert!(!dispatcher.submit(Path::new("/nonexistent/ghost.jpg")));

        let report = dispatcher.shutdown(Duration::from_secs(5));
        assert!(report.clean);
        assert_eq!(stats.snapshot().captured, 0);
    }

    #[test]
    fn test_summary_line_tracks_last_activity() {
        let dir = temp_capture_dir("activity");
        let processor = Arc::new(StubProcessor::new(Duration::from_millis(1)));
        let dispatcher = CaptureDispatcher::new(processor, 1, 4);
        let stats = dispatcher.stats();

        assert!(stats.summary_line().ends_with("last_activity=never"));

        let path = write_capture(&dir, "img.jpg", b"activity-bytes");
        assert!(dispatcher.submit(&path));

        let report = dispatcher.shutdown(Duration::from_secs(5));
        assert!(report.clean);

        let line = stats.summary_line();
        assert!(line.contains("last_activity="), "line: {}", line);
        assert!(!line.contains("never"), "line: {}", line);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_shutdown_reports_abandoned_tasks() {
        let dir = temp_capture_dir("abandon");
        // Each task takes far longer than the grace period
        let processor = Arc::new(StubProcessor::new(Duration::from_secs(5)));
        let dispatcher = CaptureDispatcher::new(processor, 1, 8);

        for i in 0..3 {
            let path = write_capture(&dir, &format!("img_{}.jpg", i), &vec![2u8; 30 + i]);
            dispatcher.submit(&path);
        }

        let report = dispatcher.shutdown(Duration::from_millis(200));
        assert!(!report.clean);
        assert!(report.abandoned >= 2, "abandoned = {}", report.abandoned);

        std::fs::remove_dir_all(&dir).ok();
    }
}
