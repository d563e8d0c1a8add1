//! Replica provider for roots on the local filesystem
//!
//! Transfers are staged next to their target under a hidden temporary name
//! and renamed into place once complete, so a failed transfer never leaves a
//! half-written target behind.

use crate::fingerprint::Fingerprinter;
use crate::unwind::unwind_protect;
use async_trait::async_trait;
use ferrosync_config::{PropagationConfig, DEFAULT_FINGERPRINT_BUFFER_SIZE};
use ferrosync_types::{
    translate_io, Error, ErrorClass, Fingerprint, IoResultExt, MergeConfirm, MergeOutcome,
    ProgressSink, Props, ReplicaIo, ReplicaRoot, Result, SyncPath,
};
use filetime::FileTime;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Suffix of staged transfers
const STAGING_SUFFIX: &str = ".ferrosync-tmp";

/// [`ReplicaIo`] implementation over `tokio::fs`
#[derive(Debug, Clone)]
pub struct LocalReplica {
    fingerprinter: Fingerprinter,
    buffer_size: usize,
}

impl LocalReplica {
    /// Create a provider copying and hashing `buffer_size` bytes at a time
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            fingerprinter: Fingerprinter::new(buffer_size),
            buffer_size,
        }
    }

    /// Create a provider from the propagation settings
    pub fn from_config(config: &PropagationConfig) -> Self {
        Self::new(config.fingerprint_buffer_size)
    }

    async fn stream_file(
        &self,
        source: &Path,
        target: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<u64> {
        let read_context = format!("reading {}", source.display());
        let write_context = format!("writing {}", target.display());

        let mut reader = File::open(source).await.transient(&read_context)?;
        let mut writer = File::create(target).await.transient(&write_context)?;
        let mut buffer = vec![0u8; self.buffer_size];
        let mut copied = 0u64;

        loop {
            let read = reader.read(&mut buffer).await.transient(&read_context)?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .transient(&write_context)?;
            copied += read as u64;
            progress.bytes(read as u64);
        }

        writer.flush().await.transient(&write_context)?;
        writer.sync_all().await.transient(&write_context)?;
        Ok(copied)
    }

    async fn copy_tree(
        &self,
        source: &Path,
        staged: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let scan_root = source.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || {
            WalkDir::new(&scan_root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .collect::<std::result::Result<Vec<_>, walkdir::Error>>()
        })
        .await
        .map_err(|e| Error::fatal(format!("directory scan task failed: {}", e)))?
        .map_err(|e| {
            translate_io(
                ErrorClass::Transient,
                format!("scanning {}", source.display()),
                io::Error::from(e),
            )
        })?;

        let mut directories = Vec::new();
        for entry in &entries {
            let relative = entry.path().strip_prefix(source).map_err(|_| {
                Error::invariant(format!(
                    "{} escaped {}",
                    entry.path().display(),
                    source.display()
                ))
            })?;
            let destination = staged.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir_all(&destination)
                    .await
                    .transient(format!("creating {}", destination.display()))?;
                directories.push((entry.path().to_path_buf(), destination));
            } else if file_type.is_symlink() {
                let link = fs::read_link(entry.path())
                    .await
                    .transient(format!("reading link {}", entry.path().display()))?;
                make_symlink(&link, &destination).await?;
            } else {
                self.stream_file(entry.path(), &destination, progress)
                    .await?;
                preserve_metadata(entry.path(), &destination).await?;
            }
        }

        // Innermost first, so filling a directory does not bump its mtime again
        for (source_dir, destination) in directories.iter().rev() {
            preserve_metadata(source_dir, destination).await?;
        }

        trace!("Copied tree {} ({} entries)", source.display(), entries.len());
        Ok(())
    }
}

impl Default for LocalReplica {
    fn default() -> Self {
        Self::new(DEFAULT_FINGERPRINT_BUFFER_SIZE)
    }
}

/// Path on this host of `path` under `root`
fn local_path(root: &ReplicaRoot, path: &SyncPath) -> Result<PathBuf> {
    if !root.is_local() {
        return Err(not_local(root));
    }
    Ok(root.resolve(path))
}

fn not_local(root: &ReplicaRoot) -> Error {
    Error::fatal(format!("{} is not on the local filesystem", root))
}

/// Hidden sibling used to stage a transfer to `target`
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}{}", name, STAGING_SUFFIX))
}

/// Remove whatever is at `path`; missing is fine
async fn remove_any(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    // A deletion of an ancestor may have got there first
    match removed {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Cleanup for a staged transfer that did not complete
async fn discard(staged: PathBuf) -> Result<()> {
    debug!("Removing staged transfer {}", staged.display());
    remove_any(&staged)
        .await
        .transient(format!("removing {}", staged.display()))
}

/// Move a staged object over `target`, replacing an object of another kind
async fn place(staged: &Path, target: &Path) -> Result<()> {
    if let Ok(existing) = fs::symlink_metadata(target).await {
        let staged_is_dir = fs::symlink_metadata(staged)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if existing.is_dir() || staged_is_dir {
            remove_any(target)
                .await
                .transient(format!("replacing {}", target.display()))?;
        }
    }

    fs::rename(staged, target)
        .await
        .transient(format!("renaming into {}", target.display()))
}

async fn ensure_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .transient(format!("creating {}", parent.display()))?;
    }
    Ok(())
}

/// Copy the mtime and permission bits of `source` onto `target`
async fn preserve_metadata(source: &Path, target: &Path) -> Result<()> {
    let context = format!("copying properties to {}", target.display());
    let metadata = fs::metadata(source).await.transient(&context)?;

    fs::set_permissions(target, metadata.permissions())
        .await
        .transient(&context)?;
    filetime::set_file_mtime(target, FileTime::from_last_modification_time(&metadata))
        .transient(&context)
}

async fn set_mode(target: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(target, std::fs::Permissions::from_mode(mode)).await
    }
    #[cfg(not(unix))]
    {
        let mut permissions = fs::metadata(target).await?.permissions();
        permissions.set_readonly(mode & 0o222 == 0);
        fs::set_permissions(target, permissions).await
    }
}

async fn make_symlink(link: &Path, at: &Path) -> Result<()> {
    let context = format!("creating link {}", at.display());
    #[cfg(unix)]
    {
        fs::symlink(link, at).await.transient(context)
    }
    #[cfg(windows)]
    {
        fs::symlink_file(link, at).await.transient(context)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = link;
        Err(Error::transient(format!(
            "{}: symbolic links are not supported",
            context
        )))
    }
}

async fn read_text(file: &Path, path: &SyncPath) -> Result<String> {
    let bytes = fs::read(file)
        .await
        .transient(format!("reading {}", path))?;
    String::from_utf8(bytes)
        .map_err(|_| Error::transient(format!("{}: cannot merge binary contents", path)))
}

/// Line-union merge: every line of `left`, then the lines only `right` has
///
/// Returns the merged text and a transcript of what was added.
pub fn union_merge(left: &str, right: &str) -> (String, String) {
    let mut known: HashSet<&str> = left.lines().collect();
    let mut merged = String::with_capacity(left.len() + right.len());
    let mut added = Vec::new();

    for line in left.lines() {
        merged.push_str(line);
        merged.push('\n');
    }
    for line in right.lines() {
        if known.insert(line) {
            merged.push_str(line);
            merged.push('\n');
            added.push(line);
        }
    }

    let mut transcript = format!(
        "{} line(s) from left, {} added from right\n",
        left.lines().count(),
        added.len()
    );
    for line in added {
        transcript.push_str("+ ");
        transcript.push_str(line);
        transcript.push('\n');
    }
    (merged, transcript)
}

#[async_trait]
impl ReplicaIo for LocalReplica {
    async fn delete(&self, root: &ReplicaRoot, path: &SyncPath) -> Result<()> {
        let target = local_path(root, path)?;
        remove_any(&target)
            .await
            .transient(format!("deleting {}", path))
    }

    async fn copy_properties(
        &self,
        root: &ReplicaRoot,
        path: &SyncPath,
        from: &Props,
        _to: &Props,
    ) -> Result<()> {
        let target = local_path(root, path)?;
        let context = format!("setting properties of {}", path);

        if let Some(mode) = from.permissions {
            set_mode(&target, mode).await.transient(&context)?;
        }
        if let Some(modified) = from.modified {
            filetime::set_file_mtime(&target, FileTime::from_system_time(modified))
                .transient(&context)?;
        }
        Ok(())
    }

    async fn copy_file(
        &self,
        from_root: &ReplicaRoot,
        to_root: &ReplicaRoot,
        path: &SyncPath,
        size_hint: u64,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let source = local_path(from_root, path)?;
        let target = local_path(to_root, path)?;
        let staged = staging_path(&target);
        ensure_parent(&target).await?;

        let copied = unwind_protect(
            async {
                let copied = self.stream_file(&source, &staged, progress).await?;
                preserve_metadata(&source, &staged).await?;
                place(&staged, &target).await?;
                Ok(copied)
            },
            |_| discard(staged.clone()),
        )
        .await?;

        debug!("Updated {} ({} bytes, {} predicted)", path, copied, size_hint);
        Ok(())
    }

    async fn copy_generic(
        &self,
        from_root: &ReplicaRoot,
        to_root: &ReplicaRoot,
        path: &SyncPath,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let source = local_path(from_root, path)?;
        let target = local_path(to_root, path)?;
        let staged = staging_path(&target);

        let metadata = fs::symlink_metadata(&source)
            .await
            .transient(format!("reading {}", path))?;
        ensure_parent(&target).await?;
        remove_any(&staged)
            .await
            .transient(format!("removing {}", staged.display()))?;

        unwind_protect(
            async {
                if metadata.file_type().is_symlink() {
                    let link = fs::read_link(&source)
                        .await
                        .transient(format!("reading link {}", path))?;
                    make_symlink(&link, &staged).await?;
                } else if metadata.is_dir() {
                    self.copy_tree(&source, &staged, progress).await?;
                } else {
                    self.stream_file(&source, &staged, progress).await?;
                    preserve_metadata(&source, &staged).await?;
                }
                place(&staged, &target).await
            },
            |_| discard(staged.clone()),
        )
        .await?;

        debug!("Copied {} from {} to {}", path, from_root, to_root);
        Ok(())
    }

    async fn merge_files(
        &self,
        left: &ReplicaRoot,
        right: &ReplicaRoot,
        path: &SyncPath,
        confirm: &dyn MergeConfirm,
    ) -> Result<MergeOutcome> {
        let left_file = local_path(left, path)?;
        let right_file = local_path(right, path)?;

        let left_text = read_text(&left_file, path).await?;
        let right_text = read_text(&right_file, path).await?;
        let (merged, transcript) = union_merge(&left_text, &right_text);

        let title = format!("Merge result for {}", path);
        if !confirm.confirm(&title, &transcript).await {
            return Ok(MergeOutcome::Declined { transcript });
        }

        // Neither replica is replaced until both merged copies are on disk
        let left_staged = staging_path(&left_file);
        let right_staged = staging_path(&right_file);
        unwind_protect(
            async {
                for staged in [&left_staged, &right_staged] {
                    fs::write(staged, merged.as_bytes())
                        .await
                        .transient(format!("writing {}", staged.display()))?;
                }
                place(&left_staged, &left_file).await?;
                place(&right_staged, &right_file).await
            },
            |_| {
                let (left_staged, right_staged) = (left_staged.clone(), right_staged.clone());
                async move {
                    discard(left_staged).await?;
                    discard(right_staged).await
                }
            },
        )
        .await?;
        Ok(MergeOutcome::Committed { transcript })
    }

    async fn fingerprint(&self, root: &ReplicaRoot, path: &SyncPath) -> Result<Option<Fingerprint>> {
        if !root.is_local() {
            return Err(not_local(root));
        }
        self.fingerprinter
            .whole_file(&root.path, path)
            .await
            .map(Some)
    }
}
