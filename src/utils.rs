use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::cli::Args;

/// Create a styled progress bar
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.blue} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg} ({eta})",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb
}

/// Format duration in a human-readable way
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        format!("{}m {}s", mins, secs)
    } else if total_secs > 0 {
        format!("{}.{:03}s", total_secs, millis)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Validate command line arguments
pub fn validate_inputs(args: &Args) -> Result<()> {
    if args.watch_dir.is_none() && args.input_paths.is_empty() {
        return Err(anyhow::anyhow!(
            "Nothing to do: pass --watch <DIR> for live mode or --input <DIR|FILE> for batch mode"
        ));
    }

    if let Some(watch_dir) = &args.watch_dir {
        if !watch_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "Watch path is not a directory: {}",
                watch_dir.display()
            ));
        }
    }

    for input_path in &args.input_paths {
        if !input_path.exists() {
            return Err(anyhow::anyhow!(
                "Input path does not exist: {}",
                input_path.display()
            ));
        }
        if !input_path.is_dir() && !input_path.is_file() {
            return Err(anyhow::anyhow!(
                "Input path is neither a file nor a directory: {}",
                input_path.display()
            ));
        }
    }

    let extensions = args.parse_extensions();
    if extensions.is_empty() {
        return Err(anyhow::anyhow!("No valid extensions specified"));
    }

    if args.jobs > 32 {
        return Err(anyhow::anyhow!(
            "Job count must be between 0 (one per core) and 32, got: {}",
            args.jobs
        ));
    }

    if !(0.0..=1.0).contains(&args.lut_intensity) {
        return Err(anyhow::anyhow!(
            "LUT intensity must be between 0.0 and 1.0, got: {}",
            args.lut_intensity
        ));
    }

    if !(0.0..=1.0).contains(&args.watermark_opacity) {
        return Err(anyhow::anyhow!(
            "Watermark opacity must be between 0.0 and 1.0, got: {}",
            args.watermark_opacity
        ));
    }

    if args.watermark_size_ratio <= 0.0 || args.watermark_size_ratio > 1.0 {
        return Err(anyhow::anyhow!(
            "Watermark size ratio must be in (0.0, 1.0], got: {}",
            args.watermark_size_ratio
        ));
    }

    if let Some(model) = &args.face_model {
        if !model.is_file() {
            return Err(anyhow::anyhow!(
                "Face model file does not exist: {}",
                model.display()
            ));
        }
    }

    if args.upload_url.is_some() && args.event_id.is_none() {
        return Err(anyhow::anyhow!(
            "--upload-url requires --event-id to address the gallery album"
        ));
    }

    Ok(())
}

/// Get file extension in lowercase
pub fn get_file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a file has one of the specified extensions
pub fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
    if let Some(ext) = get_file_extension(path) {
        extensions.contains(&ext)
    } else {
        false
    }
}

/// Sanitize a filename stem so the output name is safe on any filesystem
/// (gallery mirrors and camera cards included)
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized = String::with_capacity(filename.len());

    for ch in filename.chars() {
        let replacement = match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        };
        sanitized.push(replacement);
    }

    // Collapse runs of underscores
    let mut result = String::new();
    let mut prev_was_underscore = false;
    for ch in sanitized.chars() {
        if ch == '_' {
            if !prev_was_underscore {
                result.push(ch);
                prev_was_underscore = true;
            }
        } else {
            result.push(ch);
            prev_was_underscore = false;
        }
    }

    let trimmed = result.trim_matches('_');

    const MAX_NAME_LENGTH: usize = 100;
    if trimmed.len() > MAX_NAME_LENGTH {
        let mut end = MAX_NAME_LENGTH;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        trimmed[..end].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Generate an 8-character hash from file content for uniqueness
/// Uses SHA256 over the first 4KB plus size and name
pub fn generate_content_hash(file_path: &Path) -> Result<String> {
    let mut file = File::open(file_path)?;
    let mut buffer = vec![0; 4096];
    let bytes_read = file.read(&mut buffer)?;
    buffer.truncate(bytes_read);

    let metadata = std::fs::metadata(file_path)?;
    let file_size = metadata.len();
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    let mut hasher = Sha256::new();
    hasher.update(&buffer);
    hasher.update(file_size.to_le_bytes());
    hasher.update(file_name.as_bytes());

    let result = hasher.finalize();
    let hex_hash = format!("{:x}", result);

    Ok(hex_hash[..8].to_string())
}

/// Create the output filename for a processed capture
/// Format: {prefix}_{sanitized_stem}_{hash8}.{ext}
pub fn create_output_filename(input_path: &Path, prefix: &str, extension: &str) -> Result<String> {
    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");

    let sanitized = sanitize_filename(stem);
    let hash = generate_content_hash(input_path)?;

    Ok(format!("{}_{}_{}.{}", prefix, sanitized, hash, extension))
}

/// Duplicate-detection signature for a capture: filename plus byte size.
/// A camera re-announcing the same file produces the same signature.
pub fn file_signature(path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    Ok(format!("{}:{}", name, metadata.len()))
}

/// Print verbose information if verbose mode is enabled
pub fn verbose_println(verbose: bool, message: &str) {
    if verbose {
        println!("{} {}", style("[VERBOSE]").dim(), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(1)), "1.000s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
    }

    #[test]
    fn test_get_file_extension() {
        assert_eq!(
            get_file_extension(Path::new("photo.JPG")),
            Some("jpg".to_string())
        );
        assert_eq!(get_file_extension(Path::new("noext")), None);
    }

    #[test]
    fn test_has_valid_extension() {
        let exts = vec!["jpg".to_string(), "png".to_string()];
        assert!(has_valid_extension(Path::new("a.jpg"), &exts));
        assert!(has_valid_extension(Path::new("a.PNG"), &exts));
        assert!(!has_valid_extension(Path::new("a.gif"), &exts));
        assert!(!has_valid_extension(Path::new("a"), &exts));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("normal_file"), "normal_file");
        assert_eq!(sanitize_filename("file-with-dashes"), "file-with-dashes");
        assert_eq!(sanitize_filename("file<>test"), "file_test");
        assert_eq!(sanitize_filename("file:with:colons"), "file_with_colons");
        assert_eq!(sanitize_filename("file/with\\slashes"), "file_with_slashes");
        assert_eq!(
            sanitize_filename("file|pipe?question*star"),
            "file_pipe_question_star"
        );
        assert_eq!(sanitize_filename("\"quoted\""), "quoted");
        assert_eq!(
            sanitize_filename("file___multiple___underscores"),
            "file_multiple_underscores"
        );
        assert_eq!(sanitize_filename("___leading"), "leading");
        assert_eq!(sanitize_filename("trailing___"), "trailing");

        let long_name = "a".repeat(110);
        let sanitized = sanitize_filename(&long_name);
        assert_eq!(sanitized.len(), 100);

        // Unicode preserved
        assert_eq!(sanitize_filename("café"), "café");
    }

    #[test]
    fn test_content_hash_and_signature() {
        let dir = std::env::temp_dir().join(format!(
            "eventshot_utils_test_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("IMG_0001.jpg");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"not really a jpeg").unwrap();
        drop(f);

        let hash1 = generate_content_hash(&path).unwrap();
        let hash2 = generate_content_hash(&path).unwrap();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 8);

        let sig = file_signature(&path).unwrap();
        assert_eq!(sig, "IMG_0001.jpg:17");

        let name = create_output_filename(&path, "final", "jpg").unwrap();
        assert_eq!(name, format!("final_IMG_0001_{}.jpg", hash1));

        std::fs::remove_dir_all(&dir).ok();
    }
}
