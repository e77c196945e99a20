/*!
 * Atomic file replacement
 *
 * Writers never expose a partially written file under its final name: the
 * payload goes to a uniquely named sibling temp file which is then renamed
 * over the destination. Readers see either the previous content or the new
 * content.
 */

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Atomically replace `path` with `bytes`, creating parent directories
///
/// I/O errors are returned unmodified. On failure the temp file is removed
/// on a best-effort basis and `path` keeps its previous content.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path_for(path);
    if let Err(e) = write_and_sync(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }

    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    write_atomic(path, &bytes).await
}

async fn write_and_sync(tmp: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Unique temp name in the same directory, so the rename stays on one volume
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}
