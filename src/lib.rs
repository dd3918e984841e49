// Library exports so the pipeline can be embedded and tested as a crate
pub mod cli;
pub mod config_file;
pub mod dispatch;
pub mod error;
pub mod image_processing;
pub mod remote;
pub mod utils;
pub mod watcher;

// Re-export commonly used types
pub use cli::{Args, EnhanceModeArg, WatermarkPositionArg};
pub use dispatch::{CaptureDispatcher, CaptureProcessor, PipelineStats, ShutdownReport};
pub use error::PipelineError;
pub use image_processing::{PipelineConfig, ProcessingEngine, ProcessingResult};
pub use remote::{GalleryClient, RemoteEnhancer, UploadSink};
pub use watcher::FolderWatcher;
