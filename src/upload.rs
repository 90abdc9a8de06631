//! Chunked import of a local file as a new repository document.
//!
//! The file is cut into fixed-size parts. Pre-signed URLs are requested in
//! batches, each part is PUT to one URL, and the collected ETags are handed
//! to `StartImportUploadedParts`. The resulting task is then polled.

use std::path::{Path, PathBuf};

use futures::stream::BoxStream;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{ApiError, PartOutcome, RepositoryClient};
use crate::rest_types::{
    CreateMultipartUploadUrlsRequest, ImportPdfOptions, StartImportUploadedPartsRequest,
};
use crate::tasks::{PollPolicy, TaskOutcome, wait_for_task};

const MEGABYTE: usize = 1024 * 1024;
pub const DEFAULT_PART_SIZE_BYTES: usize = 5 * MEGABYTE;
pub const DEFAULT_URLS_PER_BATCH: u32 = 10;
/// Multipart uploads cap the part number at 10,000.
pub const MAX_UPLOAD_PARTS: u32 = 10_000;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is empty; nothing to import", path.display())]
    EmptyFile { path: PathBuf },

    #[error("Failed to request upload URLs (batch {iteration}): {source}")]
    RequestUrls {
        iteration: u32,
        #[source]
        source: ApiError,
    },

    #[error("Invalid import options: {0}")]
    InvalidOptions(&'static str),

    #[error("Part numbers past {max} are not supported")]
    TooManyParts { max: u32 },

    #[error("The repository did not return an upload id")]
    MissingUploadId,

    #[error("URL batches ran out with {remaining} bytes of the file left unwritten")]
    UnconsumedData { remaining: u64 },

    #[error("{} part upload(s) failed (parts {parts:?}); import not started", parts.len())]
    PartsFailed { parts: Vec<u32> },

    #[error("Failed to start the import task: {0}")]
    Finalize(#[source] ApiError),

    #[error("Failed to check the import task status: {0}")]
    Poll(#[source] ApiError),
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Name of the document created in the target folder.
    pub name: String,
    pub mime_type: String,
    pub auto_rename: bool,
    pub pdf_options: Option<ImportPdfOptions>,
    pub part_size: usize,
    pub urls_per_batch: u32,
    pub poll: PollPolicy,
}

impl ImportOptions {
    pub fn new(name: String, mime_type: String) -> Self {
        Self {
            name,
            mime_type,
            auto_rename: true,
            pdf_options: None,
            part_size: DEFAULT_PART_SIZE_BYTES,
            urls_per_batch: DEFAULT_URLS_PER_BATCH,
            poll: PollPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResult {
    pub part_number: u32,
    pub bytes_written: usize,
    pub outcome: PartOutcome,
}

/// Upload state carried across URL batches.
#[derive(Debug)]
pub struct UploadSession {
    file_name: String,
    mime_type: String,
    upload_id: Option<String>,
    parts: Vec<PartResult>,
    batches_requested: u32,
}

impl UploadSession {
    pub fn new(file_name: String, mime_type: String) -> Self {
        Self {
            file_name,
            mime_type,
            upload_id: None,
            parts: Vec::new(),
            batches_requested: 0,
        }
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn parts(&self) -> &[PartResult] {
        &self.parts
    }

    pub fn batches_requested(&self) -> u32 {
        self.batches_requested
    }

    pub fn next_part_number(&self) -> u32 {
        self.parts.len() as u32 + 1
    }

    /// Request for the next URL batch. The first batch names the file and
    /// lets the server open the upload; later batches continue it by id.
    pub fn next_batch_request(
        &self,
        urls_per_batch: u32,
    ) -> Result<CreateMultipartUploadUrlsRequest, ImportError> {
        let iteration = self.batches_requested + 1;
        if iteration == 1 {
            return Ok(CreateMultipartUploadUrlsRequest {
                upload_id: None,
                starting_part_number: 1,
                number_of_parts: urls_per_batch,
                file_name: Some(self.file_name.clone()),
                mime_type: Some(self.mime_type.clone()),
            });
        }

        let starting_part_number = (iteration - 1)
            .checked_mul(urls_per_batch)
            .and_then(|n| n.checked_add(1))
            .filter(|n| *n <= MAX_UPLOAD_PARTS)
            .ok_or(ImportError::TooManyParts {
                max: MAX_UPLOAD_PARTS,
            })?;

        Ok(CreateMultipartUploadUrlsRequest {
            upload_id: self.upload_id.clone(),
            starting_part_number,
            number_of_parts: urls_per_batch,
            file_name: None,
            mime_type: None,
        })
    }

    /// Requests the next batch of pre-signed URLs, keeping the upload id the
    /// server assigned on the first call.
    pub async fn request_batch(
        &mut self,
        client: &RepositoryClient,
        urls_per_batch: u32,
    ) -> Result<Vec<Url>, ImportError> {
        let request = self.next_batch_request(urls_per_batch)?;
        let iteration = self.batches_requested + 1;
        info!(
            iteration,
            starting_part_number = request.starting_part_number,
            "requesting upload URLs"
        );

        let response = client
            .create_multipart_upload_urls(&request)
            .await
            .map_err(|source| ImportError::RequestUrls { iteration, source })?;
        self.batches_requested = iteration;

        if iteration == 1 {
            match response.upload_id {
                Some(id) if !id.is_empty() => self.upload_id = Some(id),
                _ => return Err(ImportError::MissingUploadId),
            }
        }

        if response.urls.len() < urls_per_batch as usize {
            debug!(
                iteration,
                received = response.urls.len(),
                "server returned a short URL batch"
            );
        }
        Ok(response.urls)
    }

    pub fn record(&mut self, parts: Vec<PartResult>) {
        self.parts.extend(parts);
    }

    /// ETags in part order, or the numbers of the parts that failed.
    pub fn part_etags(&self) -> Result<Vec<String>, ImportError> {
        let failed: Vec<u32> = self
            .parts
            .iter()
            .filter(|p| p.outcome.etag().is_none())
            .map(|p| p.part_number)
            .collect();
        if !failed.is_empty() {
            return Err(ImportError::PartsFailed { parts: failed });
        }

        Ok(self
            .parts
            .iter()
            .filter_map(|p| p.outcome.etag().map(str::to_string))
            .collect())
    }
}

/// Reads up to `chunk_size` bytes. An empty chunk means end of file.
pub async fn read_chunk<R>(reader: &mut R, chunk_size: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = Vec::with_capacity(chunk_size);
    reader.take(chunk_size as u64).read_to_end(&mut chunk).await?;
    Ok(chunk)
}

/// Drains one URL batch against the reader. Stops at end of file without
/// touching the remaining URLs, so a result shorter than `urls` means the
/// file is exhausted.
pub async fn write_batch<R>(
    client: &RepositoryClient,
    reader: &mut R,
    urls: &[Url],
    part_size: usize,
    first_part_number: u32,
    progress_tx: mpsc::Sender<u64>,
) -> std::io::Result<Vec<PartResult>>
where
    R: AsyncRead + Unpin,
{
    let mut parts = Vec::with_capacity(urls.len());

    for (offset, url) in urls.iter().enumerate() {
        let chunk = read_chunk(reader, part_size).await?;
        if chunk.is_empty() {
            break;
        }

        let part_number = first_part_number + offset as u32;
        let bytes_written = chunk.len();
        let outcome = client.put_part(url, chunk).await;
        match &outcome {
            PartOutcome::Uploaded { .. } => debug!(part_number, bytes_written, "part uploaded"),
            PartOutcome::Failed { reason } => warn!(part_number, %reason, "part upload failed"),
        }

        let _ = progress_tx.try_send(bytes_written as u64);
        parts.push(PartResult {
            part_number,
            bytes_written,
            outcome,
        });
    }

    Ok(parts)
}

#[derive(Clone, Debug, Default)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub upload_id: String,
    pub part_etags: Vec<String>,
    pub url_batches: u32,
    pub task_id: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug)]
pub enum ImportEvent {
    Progress(UploadProgress),
    ImportStarted { task_id: String },
    Finished(ImportReport),
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

impl RepositoryClient {
    /// Imports `path` into the folder `folder_id` through a multipart upload.
    ///
    /// Network calls are strictly sequential. The file handle lives inside
    /// the stream and is released however the stream ends, including when
    /// the caller drops it early.
    pub fn chunked_import<'a>(
        &'a self,
        folder_id: i64,
        path: &'a Path,
        options: ImportOptions,
    ) -> BoxStream<'a, Result<ImportEvent, ImportError>> {
        let stream = async_stream::try_stream! {
            if options.part_size == 0 {
                Err(ImportError::InvalidOptions("part size must be greater than zero"))?;
            }
            if options.urls_per_batch == 0 || options.urls_per_batch > MAX_UPLOAD_PARTS {
                Err(ImportError::InvalidOptions("URLs per batch must be between 1 and 10000"))?;
            }

            let io_err = |source: std::io::Error| ImportError::Io { path: path.to_path_buf(), source };

            let mut file = File::open(path).await.map_err(io_err)?;
            let total_bytes = file.metadata().await.map_err(io_err)?.len();
            if total_bytes == 0 {
                Err(ImportError::EmptyFile { path: path.to_path_buf() })?;
            }

            yield ImportEvent::Progress(UploadProgress { bytes_uploaded: 0, total_bytes });

            let mut session = UploadSession::new(file_name_of(path), options.mime_type.clone());
            let (progress_tx, mut progress_rx) = mpsc::channel::<u64>(64);
            let mut bytes_uploaded = 0u64;

            loop {
                let urls = session.request_batch(self, options.urls_per_batch).await?;
                let first_part_number = session.next_part_number();

                let batch_result = {
                    let batch_fut = write_batch(
                        self,
                        &mut file,
                        &urls,
                        options.part_size,
                        first_part_number,
                        progress_tx.clone(),
                    );
                    tokio::pin!(batch_fut);

                    loop {
                        tokio::select! {
                            biased;
                            result = &mut batch_fut => {
                                break result;
                            }
                            Some(bytes) = progress_rx.recv() => {
                                bytes_uploaded += bytes;
                                yield ImportEvent::Progress(UploadProgress { bytes_uploaded, total_bytes });
                            }
                        }
                    }
                };
                while let Ok(bytes) = progress_rx.try_recv() {
                    bytes_uploaded += bytes;
                    yield ImportEvent::Progress(UploadProgress { bytes_uploaded, total_bytes });
                }

                let parts = batch_result.map_err(io_err)?;
                let produced = parts.len();
                session.record(parts);

                // Only a fully consumed batch can leave data behind. A file
                // ending exactly on a batch boundary therefore costs one more
                // batch that yields no parts.
                if produced != options.urls_per_batch as usize {
                    break;
                }
            }

            let bytes_read: u64 = session.parts().iter().map(|p| p.bytes_written as u64).sum();
            if bytes_read < total_bytes {
                Err(ImportError::UnconsumedData { remaining: total_bytes - bytes_read })?;
            }

            let part_etags = session.part_etags()?;
            let upload_id = session.upload_id().unwrap_or_default().to_string();
            info!(%upload_id, parts = part_etags.len(), "starting import task");

            let request = StartImportUploadedPartsRequest {
                upload_id: upload_id.clone(),
                part_etags: part_etags.clone(),
                name: options.name.clone(),
                auto_rename: options.auto_rename,
                pdf_options: options.pdf_options.clone(),
            };
            let task_id = self
                .start_import_uploaded_parts(folder_id, &request)
                .await
                .map_err(ImportError::Finalize)?
                .task_id;
            drop(file);

            yield ImportEvent::ImportStarted { task_id: task_id.clone() };

            let outcome = wait_for_task(self, &task_id, &options.poll)
                .await
                .map_err(ImportError::Poll)?;

            yield ImportEvent::Finished(ImportReport {
                upload_id,
                part_etags,
                url_batches: session.batches_requested(),
                task_id,
                outcome,
            });
        };

        Box::pin(stream)
    }
}
