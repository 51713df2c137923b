//! Artifact extraction from the build container's working directory
//!
//! The runtime hands back a tar stream. Entries are read one at a time and
//! every regular file whose base name starts with the artifact prefix is
//! copied to the output sink, in archive order. Nothing is buffered beyond
//! a small queue of chunks between the blocking tar reader and the async
//! sink.

use crate::runtime::ByteStream;
use bytes::Bytes;
use futures::TryStreamExt;
use k6x_errors::{BuildError, Error};
use std::io::{self, Read, Write};
use tar::EntryType;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

const CHUNK_QUEUE: usize = 16;

/// What was copied out of an archive
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    pub files: Vec<String>,
    pub bytes: u64,
}

/// Copy every matching regular file of `archive` into `out`
///
/// # Errors
///
/// Returns the underlying stream error if reading the archive fails, or an
/// I/O error if writing to `out` fails.
pub fn copy_artifacts<R: Read, W: Write>(
    archive: R,
    prefix: &str,
    out: &mut W,
) -> Result<ArtifactReport, Error> {
    let mut archive = tar::Archive::new(archive);
    let mut report = ArtifactReport::default();

    for entry in archive.entries().map_err(unwrap_io)? {
        let mut entry = entry.map_err(unwrap_io)?;

        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }

        let path = entry.path().map_err(unwrap_io)?.into_owned();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        if !name.starts_with(prefix) {
            continue;
        }

        debug!(entry = %path.display(), "Copying artifact");
        let copied = io::copy(&mut entry, out).map_err(unwrap_io)?;
        report.bytes += copied;
        report.files.push(path.display().to_string());
    }

    Ok(report)
}

/// Stream matching files of a runtime archive into an async sink
///
/// The tar reader runs on the blocking pool; chunks travel through a
/// bounded channel so the archive is never held in memory.
///
/// # Errors
///
/// Returns the runtime's stream error verbatim, or an I/O error from `out`.
pub async fn extract_artifacts(
    stream: ByteStream,
    prefix: &str,
    out: &mut (dyn AsyncWrite + Send + Unpin),
) -> Result<ArtifactReport, Error> {
    let reader = SyncIoBridge::new(StreamReader::new(stream.map_err(io::Error::other)));
    let (tx, mut rx) = mpsc::channel(CHUNK_QUEUE);
    let prefix = prefix.to_owned();

    let task = tokio::task::spawn_blocking(move || {
        let mut sink = ChunkSender { tx };
        copy_artifacts(reader, &prefix, &mut sink)
    });

    while let Some(chunk) = rx.recv().await {
        out.write_all(&chunk).await?;
    }
    out.flush().await?;

    task.await.map_err(|e| BuildError::ExtractionFailed {
        message: e.to_string(),
    })?
}

/// `Write` adapter feeding the async side of [`extract_artifacts`]
struct ChunkSender {
    tx: mpsc::Sender<Bytes>,
}

impl Write for ChunkSender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "artifact sink closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Recover a runtime error that travelled through the I/O layer
fn unwrap_io(err: io::Error) -> Error {
    if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
        return inner.clone();
    }
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof | io::ErrorKind::Other => {
            BuildError::ExtractionFailed {
                message: err.to_string(),
            }
            .into()
        }
        _ => err.into(),
    }
}
