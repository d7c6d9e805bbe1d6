use std::fmt;
use std::path::Path;

use bytes::Bytes;
use futures::stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::{ByteStream, Error, FileDescriptor};

/// Chunk size used when streaming in-memory payloads.
const CHUNK_SIZE: usize = 64 * 1024;

/// A file to upload: its descriptor plus a streaming body.
///
/// The body is consumed by the transfer, so an `UploadFile` can be uploaded
/// exactly once.
pub struct UploadFile {
  descriptor: FileDescriptor,
  body: ByteStream,
}

impl UploadFile {
  /// Upload an in-memory buffer. The size is known up front.
  pub fn from_bytes(
    filename: impl Into<String>,
    content_type: Option<&str>,
    data: impl Into<Bytes>,
  ) -> Self {
    let data = data.into();
    let descriptor = FileDescriptor::new(filename, content_type, Some(data.len() as u64));

    let chunks: Vec<Result<Bytes, std::io::Error>> = (0..data.len())
      .step_by(CHUNK_SIZE)
      .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
      .collect();

    Self {
      descriptor,
      body: Box::pin(stream::iter(chunks)),
    }
  }

  /// Upload a file from disk, streaming it rather than reading it into memory.
  ///
  /// The filename sent to the service is the final path component.
  pub async fn from_path(path: impl AsRef<Path>, content_type: Option<&str>) -> Result<Self, Error> {
    let path = path.as_ref();
    let filename = path
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| Error::InvalidFilename(path.to_path_buf()))?
      .to_string();

    let file = File::open(path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(path.to_path_buf())
      } else {
        Error::Io(e)
      }
    })?;
    let size = file.metadata().await?.len();

    Ok(Self {
      descriptor: FileDescriptor::new(filename, content_type, Some(size)),
      body: Box::pin(ReaderStream::new(file)),
    })
  }

  /// Upload an arbitrary stream. Pass `size` when the total length is known;
  /// without it no progress can be reported.
  pub fn from_stream(
    filename: impl Into<String>,
    content_type: Option<&str>,
    size: Option<u64>,
    body: ByteStream,
  ) -> Self {
    Self {
      descriptor: FileDescriptor::new(filename, content_type, size),
      body,
    }
  }

  pub fn descriptor(&self) -> &FileDescriptor {
    &self.descriptor
  }

  pub fn into_parts(self) -> (FileDescriptor, ByteStream) {
    (self.descriptor, self.body)
  }
}

impl fmt::Debug for UploadFile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UploadFile")
      .field("descriptor", &self.descriptor)
      .finish_non_exhaustive()
  }
}
