//! Copy step
//!
//! The source path is packed into a tar archive in a temporary file, with
//! every entry rooted at `<dest>/<basename of source>`, and unpacked at the
//! container root. A source naming a directory itself (`.`, `dir/`) unpacks
//! its contents at `dest`.
//!
//! The archive carries no entries for the parents of `dest`, so directories
//! that already exist in the image keep their mode and owner.

use kiln_core::domain::config::CopyParams;
use kiln_core::domain::image::ImageRecord;
use kiln_engine::{Archive, Engine, ProgressSink};
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::info;

use super::Step;
use crate::error::{BuildError, Result};

pub(super) async fn run(
    step: &mut Step<'_>,
    engine: &dyn Engine,
    params: &CopyParams,
    base: &ImageRecord,
    progress: &mut dyn ProgressSink,
) -> Result<ImageRecord> {
    let index = step.index;
    let source = PathBuf::from(&params.source);
    let arcname = upload_path(&params.source, &params.dest);

    let container = engine.create_container(base.id.as_str(), None).await?;

    info!(
        "Step {}: packing {} as /{}",
        index,
        source.display(),
        arcname.display()
    );
    let (file, size) = tokio::task::spawn_blocking(move || build_archive(&source, &arcname))
        .await
        .map_err(io::Error::other)
        .and_then(|built| built)
        .map_err(|source| BuildError::Archive {
            step: index,
            source,
        })?;

    info!("Step {}: uploading {} bytes", index, size);
    let archive = Archive::new(tokio::fs::File::from_std(file), size);
    engine.put_archive(&container, "/", archive, progress).await?;

    step.commit_container(engine, &container).await
}

/// Archive path of the uploaded tree: `dest` joined with the source basename
///
/// The result is relative, since the archive is unpacked at `/`.
fn upload_path(source: &str, dest: &str) -> PathBuf {
    let dest = Path::new(dest.trim_start_matches('/'));
    match source_name(source) {
        Some(name) => dest.join(name),
        None => dest.to_path_buf(),
    }
}

/// Last component of `source` as written
///
/// `None` for `.`, `..` or a trailing separator.
fn source_name(source: &str) -> Option<&str> {
    match source.rsplit(std::path::is_separator).next() {
        None | Some("") | Some(".") | Some("..") => None,
        Some(name) => Some(name),
    }
}

/// Writes the archive to an anonymous temporary file
///
/// # Returns
/// The file, rewound to the start, and its length
fn build_archive(source: &Path, arcname: &Path) -> io::Result<(File, u64)> {
    let mut builder = tar::Builder::new(tempfile::tempfile()?);
    builder.follow_symlinks(false);

    if std::fs::metadata(source)?.is_dir() {
        builder.append_dir_all(arcname, source)?;
    } else {
        builder.append_path_with_name(source, arcname)?;
    }

    let mut file = builder.into_inner()?;
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    Ok((file, size))
}
