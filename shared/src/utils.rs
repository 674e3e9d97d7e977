//! Utility functions for the graphing bot
//!
//! Validation helpers shared by the configuration layer and the upload
//! pipeline: hex colours, service URLs and image files destined for the
//! chat service.

use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use url::Url;

/// Upload size limit for standard channels (8 MiB)
pub const UPLOAD_SIZE_LIMIT_STANDARD: u64 = 8 * 1024 * 1024;
/// Upload size limit for channels with elevated limits (25 MiB)
pub const UPLOAD_SIZE_LIMIT_ELEVATED: u64 = 25 * 1024 * 1024;

/// Image suffixes the chat service accepts
pub const SUPPORTED_IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

/// Outcome of validating a rendered file for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileValidation {
    pub valid: bool,
    pub error: Option<String>,
    pub size: Option<u64>,
}

impl FileValidation {
    fn rejected(error: String, size: Option<u64>) -> Self {
        Self {
            valid: false,
            error: Some(error),
            size,
        }
    }
}

/// Validate a rendered graph file against the chat service's upload limits.
///
/// The file must exist, be non-empty, stay under the applicable size limit
/// and carry a supported image suffix.
pub fn validate_upload_file(path: &Path, elevated_limits: bool) -> FileValidation {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => {
            return FileValidation::rejected(format!("Path is not a file: {}", path.display()), None)
        }
        Err(_) => {
            return FileValidation::rejected(
                format!("File does not exist: {}", path.display()),
                None,
            )
        }
    };

    let size = metadata.len();
    if size == 0 {
        return FileValidation::rejected(format!("File is empty: {}", path.display()), Some(size));
    }

    let limit = if elevated_limits {
        UPLOAD_SIZE_LIMIT_ELEVATED
    } else {
        UPLOAD_SIZE_LIMIT_STANDARD
    };
    if size > limit {
        return FileValidation::rejected(
            format!(
                "File too large: {} exceeds {} limit",
                format_file_size(size),
                format_file_size(limit)
            ),
            Some(size),
        );
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some(ext) if SUPPORTED_IMAGE_EXTENSIONS.contains(&ext) => FileValidation {
            valid: true,
            error: None,
            size: Some(size),
        },
        other => FileValidation::rejected(
            format!(
                "Unsupported file format: {}",
                other.unwrap_or("(no extension)")
            ),
            Some(size),
        ),
    }
}

/// Format a byte count in human-readable form.
pub fn format_file_size(size_bytes: u64) -> String {
    if size_bytes < 1024 {
        format!("{size_bytes} B")
    } else if size_bytes < 1024 * 1024 {
        format!("{:.1} KB", size_bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", size_bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Delete files in a directory older than `keep_days`.
///
/// Returns the number of files removed. Entries that cannot be inspected or
/// removed are logged and skipped.
pub fn cleanup_old_files(directory: &Path, keep_days: u32) -> crate::Result<usize> {
    if !directory.is_dir() {
        return Ok(0);
    }

    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(keep_days) * 86_400);
    let mut removed = 0;

    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Could not stat {}: {}", path.display(), e);
                continue;
            }
        };

        if modified < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed old artifact: {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }

    Ok(removed)
}

/// Validate a hex colour string.
///
/// Accepted forms: `#RGB`, `#RGBA`, `#RRGGBB` and `#RRGGBBAA`.
pub fn validate_hex_color(value: &str) -> bool {
    let trimmed = value.trim();
    let Some(digits) = trimmed.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 4 | 6 | 8) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a service base URL with safety checks.
///
/// Only http(s) URLs are accepted; loopback, private and link-local hosts
/// are rejected, as are path-traversal sequences and over-long hostnames.
pub fn validate_service_url(value: &str) -> bool {
    if value.is_empty() || value.len() > 2048 {
        return false;
    }

    let Ok(parsed) = Url::parse(value) else {
        return false;
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let Some(host) = parsed.host_str() else {
        return false;
    };
    if host.len() > 253 {
        return false;
    }
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_restricted_ip(&ip) {
            return false;
        }
    }

    // Path traversal and null-byte injection checks
    !(parsed.path().contains("..") || value.contains("%00"))
}

fn is_restricted_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_multicast()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_multicast(),
    }
}

/// Mask a secret for display, keeping only a short suffix.
pub fn mask_secret(value: &str) -> String {
    if value.len() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", &value[value.len() - 4..])
    }
}
