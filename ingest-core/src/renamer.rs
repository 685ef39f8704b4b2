//! Filename composition and collision-safe filesystem placement.

use crate::error::{IngestError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Characters reserved on at least one of the common filesystems
/// (Windows/NTFS, in practice the strictest of the bunch).
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const MAX_BASENAME_LEN: usize = 200;

/// Compose the destination basename: `{Actress} - [{Subtitle}] {CODE} {Title}{ext}`.
pub fn compose_filename(actress: &str, subtitle: &str, code: &str, title: &str, ext: &str) -> String {
    let stripped_title = strip_code(title, code);
    let titled = title_case(&stripped_title);
    let sanitized = sanitize(&titled);
    let collapsed = collapse_whitespace(&sanitized);

    let prefix = format!("{} - [{}] {} ", actress, subtitle, code);
    let suffix = ext;

    let budget = MAX_BASENAME_LEN.saturating_sub(prefix.chars().count() + suffix.chars().count());
    let truncated_title = truncate_chars(&collapsed, budget);

    format!("{}{}{}", prefix, truncated_title, suffix)
}

/// Remove any case-insensitive occurrence of `code` from `title`.
fn strip_code(title: &str, code: &str) -> String {
    let lower_title = title.to_lowercase();
    let lower_code = code.to_lowercase();

    let mut result = String::with_capacity(title.len());
    let mut rest = title;
    let mut rest_lower = lower_title.as_str();

    while let Some(pos) = rest_lower.find(&lower_code) {
        result.push_str(&rest[..pos]);
        let end = pos + code.len();
        rest = &rest[end..];
        rest_lower = &rest_lower[end..];
    }
    result.push_str(rest);
    result
}

fn title_case(input: &str) -> String {
    input
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { ' ' } else { c })
        .collect()
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Find an existing actress directory under `root` matching `actress` under
/// case-insensitive comparison, or create one using the provided spelling.
pub fn locate_actress_dir(root: &Path, actress: &str) -> Result<PathBuf> {
    let entries = std::fs::read_dir(root)?;
    let actress_lower = actress.to_lowercase();

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.to_lowercase() == actress_lower {
            debug!(existing = %name, requested = %actress, "reusing existing actress directory");
            return Ok(entry.path());
        }
    }

    let new_dir = root.join(actress);
    std::fs::create_dir_all(&new_dir)?;
    info!(dir = %new_dir.display(), "created actress directory");
    Ok(new_dir)
}

/// Move `source` into `dest_dir` under `basename`, appending " (N)" before
/// the extension on collision. Renames atomically within a filesystem;
/// falls back to copy-then-unlink with an fsync of the destination
/// directory across filesystems.
pub fn move_file(source: &Path, dest_dir: &Path, basename: &str) -> Result<PathBuf> {
    let target = unique_target(dest_dir, basename)?;

    match std::fs::rename(source, &target) {
        Ok(()) => Ok(target),
        Err(err) if is_cross_device(&err) => {
            warn!(from = %source.display(), to = %target.display(), "cross-device move, copying then unlinking");
            copy_then_unlink(source, &target)?;
            Ok(target)
        }
        Err(err) => Err(IngestError::MoveFailed {
            path: source.to_path_buf(),
            source: err,
        }),
    }
}

fn unique_target(dest_dir: &Path, basename: &str) -> Result<PathBuf> {
    let mut candidate = dest_dir.join(basename);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = Path::new(basename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| basename.to_string());
    let ext = Path::new(basename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let name = format!("{} ({}){}", stem, n, ext);
        candidate = dest_dir.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn is_cross_device(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc_exdev())
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV on Linux
}

fn copy_then_unlink(source: &Path, target: &Path) -> Result<()> {
    // Re-verify the collision check with a fresh stat immediately before the
    // final unlink, since a concurrent mover may have raced us.
    std::fs::copy(source, target)?;
    if let Some(parent) = target.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    if target.exists() {
        std::fs::remove_file(source)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn composes_basic_filename() {
        let name = compose_filename(
            "Ruri Saijo",
            "English Sub",
            "SONE-760",
            "The Same Commute Train As Always",
            ".mp4",
        );
        assert_eq!(
            name,
            "Ruri Saijo - [English Sub] SONE-760 The Same Commute Train As Always.mp4"
        );
    }

    #[test]
    fn strips_duplicate_code_from_title() {
        let name = compose_filename("Actress", "No Sub", "SONE-760", "SONE-760 Sample", ".mp4");
        assert_eq!(name.matches("SONE-760").count(), 1);
    }

    #[test]
    fn truncates_long_titles_not_code_or_subtitle() {
        let long_title = "a".repeat(400);
        let name = compose_filename("Actress", "English Sub", "AAA-1", &long_title, ".mp4");
        assert!(name.len() <= MAX_BASENAME_LEN + 10); // char vs byte slack
        assert!(name.contains("AAA-1"));
        assert!(name.contains("English Sub"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn sanitizes_illegal_characters() {
        let name = compose_filename("Actress", "No Sub", "AAA-1", "Title: Part/Two?", ".mp4");
        assert!(!name.contains(':'));
        assert!(!name.contains('/'));
        assert!(!name.contains('?'));
    }

    #[test]
    fn locates_existing_directory_case_insensitively() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("Ruri Saijo")).unwrap();

        let found = locate_actress_dir(root.path(), "ruri saijo").unwrap();
        assert_eq!(found, root.path().join("Ruri Saijo"));

        let entries: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "no new directory should have been created");
    }

    #[test]
    fn creates_directory_when_missing() {
        let root = TempDir::new().unwrap();
        let found = locate_actress_dir(root.path(), "New Actress").unwrap();
        assert!(found.is_dir());
        assert_eq!(found.file_name().unwrap(), "New Actress");
    }

    #[test]
    fn moves_file_and_handles_collision() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("dest");
        std::fs::create_dir(&dest).unwrap();

        let source1 = root.path().join("a.mp4");
        std::fs::write(&source1, b"one").unwrap();
        let target1 = move_file(&source1, &dest, "movie.mp4").unwrap();
        assert_eq!(target1, dest.join("movie.mp4"));

        let source2 = root.path().join("b.mp4");
        std::fs::write(&source2, b"two").unwrap();
        let target2 = move_file(&source2, &dest, "movie.mp4").unwrap();
        assert_eq!(target2, dest.join("movie (1).mp4"));
    }
}
