use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replaces `path` with `content` through a synced sibling temp file and a
/// rename, so concurrent readers see either the old or the new document.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        bail!("destination '{}' has no file name", path.display());
    };
    if path.is_dir() {
        bail!("destination '{}' is a directory", path.display());
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let staged = staging_path(dir, file_name);
    let written = File::create(&staged)
        .and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        })
        .with_context(|| format!("failed to stage {}", staged.display()));
    if let Err(error) = written {
        let _ = fs::remove_file(&staged);
        return Err(error);
    }
    fs::rename(&staged, path).with_context(|| {
        format!("failed to move {} into {}", staged.display(), path.display())
    })
}

fn staging_path(dir: &Path, file_name: &str) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(".{file_name}.{}.{seq}.tmp", std::process::id()))
}
