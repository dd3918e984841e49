use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::dispatch::CaptureDispatcher;
use crate::utils;

/// Polling watcher over a tethered-capture directory.
///
/// A file is submitted only after its size is unchanged between two
/// consecutive scans, so half-written transfers are never picked up.
/// Submitted paths are remembered to keep rescans cheap; the dispatcher's
/// signature dedupe remains the real guarantee.
pub struct FolderWatcher {
    dir: PathBuf,
    extensions: Vec<String>,
    poll_interval: Duration,
    sizes: HashMap<PathBuf, u64>,
    submitted: HashSet<PathBuf>,
}

impl FolderWatcher {
    pub fn new(dir: PathBuf, extensions: Vec<String>, poll_interval: Duration) -> Self {
        Self {
            dir,
            extensions,
            poll_interval,
            sizes: HashMap::new(),
            submitted: HashSet::new(),
        }
    }

    /// Scan and submit until `running` goes false, logging aggregate stats
    /// every `stats_interval`.
    pub fn run(
        &mut self,
        dispatcher: &CaptureDispatcher,
        running: &AtomicBool,
        stats_interval: Duration,
    ) {
        info!("watching {} for new captures", self.dir.display());
        let mut last_stats = Instant::now();

        while running.load(Ordering::SeqCst) {
            let submitted = self.scan_once(dispatcher);
            if submitted > 0 {
                debug!("submitted {} new capture(s)", submitted);
            }

            if last_stats.elapsed() >= stats_interval {
                info!("{}", dispatcher.stats().summary_line());
                last_stats = Instant::now();
            }

            // Sleep in short slices so shutdown stays responsive
            let mut remaining = self.poll_interval;
            while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
                let slice = remaining.min(Duration::from_millis(200));
                std::thread::sleep(slice);
                remaining = remaining.saturating_sub(slice);
            }
        }

        info!("watcher stopped");
    }

    /// One scan pass. Returns the number of captures submitted.
    pub fn scan_once(&mut self, dispatcher: &CaptureDispatcher) -> usize {
        let mut submitted_now = 0;

        for entry in WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || !utils::has_valid_extension(path, &self.extensions)
                || self.submitted.contains(path)
            {
                continue;
            }

            // Vanished between listing and stat: transient, retry next scan
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };

            match self.sizes.get(path) {
                Some(&previous) if previous == size => {
                    if dispatcher.submit(path) {
                        submitted_now += 1;
                    }
                    self.submitted.insert(path.to_path_buf());
                    self.sizes.remove(path);
                }
                _ => {
                    // New file, or still growing; try again next scan
                    self.sizes.insert(path.to_path_buf(), size);
                }
            }
        }

        submitted_now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CaptureProcessor;
    use crate::error::PipelineError;
    use crate::image_processing::ProcessingResult;
    use std::path::Path;
    use std::sync::Arc;

    struct CountingProcessor;

    impl CaptureProcessor for CountingProcessor {
        fn process(&self, path: &Path) -> Result<ProcessingResult, PipelineError> {
            Ok(ProcessingResult {
                input_path: path.to_path_buf(),
                output_path: path.with_extension("out.jpg"),
                outcome_label: "disabled",
                has_faces: false,
                uploaded: false,
                upload_attempted: false,
                processing_time: Duration::from_millis(1),
            })
        }
    }

    fn temp_watch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "eventshot_watch_{}_{}_{:?}",
            tag,
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_file_needs_stable_size_before_submit() {
        let dir = temp_watch_dir("stable");
        let dispatcher = CaptureDispatcher::new(Arc::new(CountingProcessor), 1, 4);
        let mut watcher = FolderWatcher::new(
            dir.clone(),
            vec!["jpg".to_string()],
            Duration::from_millis(10),
        );

        let path = dir.join("img.jpg");
        std::fs::write(&path, b"partial").unwrap();

        // First sighting only records the size
        assert_eq!(watcher.scan_once(&dispatcher), 0);

        // File still growing: again no submission
        std::fs::write(&path, b"partial-more-bytes").unwrap();
        assert_eq!(watcher.scan_once(&dispatcher), 0);

        // Size now stable across scans
        assert_eq!(watcher.scan_once(&dispatcher), 1);

        // Already submitted, never resubmitted
        assert_eq!(watcher.scan_once(&dispatcher), 0);

        let report = dispatcher.shutdown(Duration::from_secs(5));
        assert!(report.clean);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_non_image_files_are_ignored() {
        let dir = temp_watch_dir("ignore");
        let dispatcher = CaptureDispatcher::new(Arc::new(CountingProcessor), 1, 4);
        let mut watcher = FolderWatcher::new(
            dir.clone(),
            vec!["jpg".to_string(), "png".to_string()],
            Duration::from_millis(10),
        );

        std::fs::write(dir.join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.join("img.jpg"), b"data").unwrap();

        assert_eq!(watcher.scan_once(&dispatcher), 0);
        assert_eq!(watcher.scan_once(&dispatcher), 1);

        let stats = dispatcher.stats();
        let report = dispatcher.shutdown(Duration::from_secs(5));
        assert!(report.clean);
        assert_eq!(stats.snapshot().captured, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
