//! The transfer engine: one HTTP attempt, from request to disk.
//!
//! An attempt streams the response body into the destination file,
//! emitting throttled progress along the way. Resume is expressed as a
//! `Range: bytes=<offset>-` request header; a server that answers 200
//! instead of 206 gets the file rewritten from scratch. Exactly one
//! terminal event (completed, paused or error) leaves the engine per
//! attempt, unless the attempt was evicted by a newer one, in which
//! case it ends silently.

use crate::progress::ProgressThrottle;
use crate::registry::{TransferHandle, TransferRegistry};
use downpour_core::{EventSink, TaskId, TransferError, TransferEvent};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};

/// One unit of work handed to the engine.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    /// Task identity, used for registry and event routing.
    pub id: TaskId,
    /// Source URL.
    pub url: String,
    /// Absolute path of the file to write.
    pub destination: PathBuf,
    /// Byte offset to resume from; 0 for a fresh transfer.
    pub resume_offset: u64,
}

/// How an attempt ended, as reported back to the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferOutcome {
    /// All bytes received and flushed.
    Completed {
        /// Final byte count.
        received_bytes: u64,
        /// Resource size.
        total_bytes: u64,
    },
    /// Suspended at the user's request; partial bytes retained on disk.
    Paused {
        /// Bytes durably on disk.
        received_bytes: u64,
        /// Resource size, 0 while unknown.
        total_bytes: u64,
    },
    /// The attempt failed.
    Failed {
        /// The failure.
        error: TransferError,
        /// Bytes received before the failure.
        received_bytes: u64,
        /// Resource size, 0 while unknown.
        total_bytes: u64,
    },
    /// The attempt was evicted by a newer attempt for the same task.
    /// No events were emitted for this ending.
    Detached,
}

/// Outcome of the attempt body plus whether the partial file must go.
struct Attempt {
    outcome: TransferOutcome,
    scrub_file: bool,
}

impl Attempt {
    fn keep(outcome: TransferOutcome) -> Self {
        Self {
            outcome,
            scrub_file: false,
        }
    }

    fn scrub(outcome: TransferOutcome) -> Self {
        Self {
            outcome,
            scrub_file: true,
        }
    }
}

/// Executes transfer attempts.
#[derive(Clone, Debug)]
pub struct TransferEngine {
    client: reqwest::Client,
    registry: Arc<TransferRegistry>,
    sink: Arc<dyn EventSink>,
    progress_interval: Duration,
}

impl TransferEngine {
    /// Create an engine sharing the given registry and event sink.
    #[must_use]
    pub fn new(
        registry: Arc<TransferRegistry>,
        sink: Arc<dyn EventSink>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry,
            sink,
            progress_interval,
        }
    }

    /// Run one attempt to completion, pause or failure.
    ///
    /// Registers the attempt, waits for any predecessor on the same task
    /// to release the file, streams the body, then emits exactly one
    /// terminal event and deregisters.
    pub async fn run(&self, request: TransferRequest) -> TransferOutcome {
        let mut handle = self.registry.register(&request.id);
        handle.wait_for_predecessor().await;

        let attempt = self.attempt(&request, &handle).await;
        self.finalize(&request, &handle, attempt).await
    }

    async fn attempt(&self, request: &TransferRequest, handle: &TransferHandle) -> Attempt {
        let id = &request.id;
        let offset = clamp_offset(&request.destination, request.resume_offset);
        if offset != request.resume_offset {
            tracing::warn!(
                target: "downpour::engine",
                id = %id,
                requested = request.resume_offset,
                clamped = offset,
                "Resume offset clamped to on-disk file size"
            );
        }

        if let Some(parent) = request.destination.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return Attempt::keep(failed(TransferError::from_io_error(&err), offset, 0));
            }
        }

        let mut http = self.client.get(&request.url);
        if offset > 0 {
            http = http.header(RANGE, format!("bytes={offset}-"));
        }

        let response = match http.send().await {
            Ok(response) => response,
            Err(err) => {
                return Attempt::keep(failed(
                    TransferError::connection(err.to_string()),
                    offset,
                    0,
                ));
            }
        };

        let status = response.status().as_u16();
        if status != 200 && status != 206 {
            return Attempt::keep(failed(TransferError::http_status(status), offset, 0));
        }

        // A 200 answer to a ranged request means the server ignored the
        // range; the whole body follows and the file must be rewritten.
        let effective_offset = if status == 200 { 0 } else { offset };
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let total_bytes = resolve_total_bytes(
            content_range.as_deref(),
            response.content_length(),
            effective_offset,
        );

        tracing::info!(
            target: "downpour::engine",
            id = %id,
            status,
            offset = effective_offset,
            total_bytes,
            "Transfer attempt started"
        );

        let file = if effective_offset > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&request.destination)
                .await
        } else {
            tokio::fs::File::create(&request.destination).await
        };
        let file = match file {
            Ok(file) => file,
            Err(err) => {
                return Attempt::keep(failed(
                    TransferError::from_io_error(&err),
                    effective_offset,
                    total_bytes,
                ));
            }
        };
        let mut writer = BufWriter::new(file);

        let cancel = handle.cancel_token();
        let mut stream = response.bytes_stream();
        let mut received = effective_offset;
        let mut throttle = ProgressThrottle::starting_at(self.progress_interval, effective_offset);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    // a failed flush on a user-initiated stop never deletes
                    // the file; report what actually made it to disk
                    let received_bytes = if let Err(err) = writer.flush().await {
                        tracing::warn!(
                            target: "downpour::engine",
                            id = %id,
                            error = %err,
                            "Flush failed during pause teardown"
                        );
                        on_disk_len(&request.destination)
                    } else {
                        received
                    };
                    return Attempt::keep(TransferOutcome::Paused {
                        received_bytes,
                        total_bytes,
                    });
                }

                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if let Err(err) = writer.write_all(&bytes).await {
                            return Attempt::scrub(failed(
                                TransferError::from_io_error(&err),
                                received,
                                total_bytes,
                            ));
                        }
                        received += bytes.len() as u64;
                        if let Some(sample) = throttle.record(received, total_bytes) {
                            self.sink.emit(TransferEvent::progress(
                                id.clone(),
                                sample.received_bytes,
                                sample.total_bytes,
                                sample.speed_bps,
                            ));
                        }
                    }
                    Some(Err(err)) => {
                        let flushed = writer.flush().await.is_ok();
                        if handle.is_paused() {
                            let received_bytes = if flushed {
                                received
                            } else {
                                on_disk_len(&request.destination)
                            };
                            return Attempt::keep(TransferOutcome::Paused {
                                received_bytes,
                                total_bytes,
                            });
                        }
                        return Attempt::scrub(failed(
                            TransferError::connection(err.to_string()),
                            received,
                            total_bytes,
                        ));
                    }
                    None => {
                        if let Err(err) = writer.flush().await {
                            return Attempt::scrub(failed(
                                TransferError::from_io_error(&err),
                                received,
                                total_bytes,
                            ));
                        }
                        if total_bytes > 0 && received < total_bytes {
                            return Attempt::scrub(failed(
                                TransferError::connection(
                                    "Connection closed before the full body arrived",
                                ),
                                received,
                                total_bytes,
                            ));
                        }
                        let total = if total_bytes == 0 { received } else { total_bytes };
                        return Attempt::keep(TransferOutcome::Completed {
                            received_bytes: received,
                            total_bytes: total,
                        });
                    }
                },
            }
        }
    }

    /// The single place terminal events leave the engine.
    async fn finalize(
        &self,
        request: &TransferRequest,
        handle: &TransferHandle,
        attempt: Attempt,
    ) -> TransferOutcome {
        let id = &request.id;

        if handle.is_detached() {
            tracing::debug!(
                target: "downpour::engine",
                id = %id,
                "Attempt detached, ending silently"
            );
            self.registry.deregister(id, handle.lease());
            return TransferOutcome::Detached;
        }

        // A pause can land between the attempt's last poll and this
        // point, with the registry entry still present and the pause
        // call already answered with success. A paused task never
        // reports completed or error, so the flag wins classification.
        let attempt = if handle.is_paused() {
            reclassify_paused(attempt)
        } else {
            attempt
        };

        if attempt.scrub_file {
            let _ = tokio::fs::remove_file(&request.destination).await;
        }

        match &attempt.outcome {
            TransferOutcome::Completed {
                received_bytes,
                total_bytes,
            } => {
                // make sure consumers see the 100% sample
                self.sink.emit(TransferEvent::progress(
                    id.clone(),
                    *received_bytes,
                    *total_bytes,
                    0.0,
                ));
                self.sink
                    .emit(TransferEvent::completed(id.clone(), &request.destination));
                tracing::info!(
                    target: "downpour::engine",
                    id = %id,
                    bytes = received_bytes,
                    "Transfer completed"
                );
            }
            TransferOutcome::Paused {
                received_bytes,
                total_bytes,
            } => {
                self.sink.emit(TransferEvent::paused(
                    id.clone(),
                    *received_bytes,
                    *total_bytes,
                ));
                tracing::info!(
                    target: "downpour::engine",
                    id = %id,
                    bytes = received_bytes,
                    "Transfer paused"
                );
            }
            TransferOutcome::Failed { error, .. } => {
                self.sink
                    .emit(TransferEvent::error(id.clone(), error.to_string()));
                tracing::warn!(
                    target: "downpour::engine",
                    id = %id,
                    error = %error,
                    "Transfer failed"
                );
            }
            TransferOutcome::Detached => {}
        }

        self.registry.deregister(id, handle.lease());
        attempt.outcome
    }
}

fn failed(error: TransferError, received_bytes: u64, total_bytes: u64) -> TransferOutcome {
    TransferOutcome::Failed {
        error,
        received_bytes,
        total_bytes,
    }
}

/// Rewrite an attempt's ending for a pause that raced it: completed and
/// failed both become paused, and the partial file is kept.
fn reclassify_paused(attempt: Attempt) -> Attempt {
    match attempt.outcome {
        TransferOutcome::Completed {
            received_bytes,
            total_bytes,
        }
        | TransferOutcome::Failed {
            received_bytes,
            total_bytes,
            ..
        } => Attempt::keep(TransferOutcome::Paused {
            received_bytes,
            total_bytes,
        }),
        outcome => Attempt::keep(outcome),
    }
}

/// Parse the total size out of a `Content-Range` header value like
/// `bytes 500-999/1000`. An unknown total (`*`) yields `None`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let idx = value.rfind('/')?;
    value[idx + 1..].trim().parse().ok()
}

/// Resolve the resource's total size from response metadata; 0 when the
/// server gave us nothing to go on.
fn resolve_total_bytes(
    content_range: Option<&str>,
    content_length: Option<u64>,
    offset: u64,
) -> u64 {
    content_range
        .and_then(parse_content_range_total)
        .or_else(|| content_length.map(|remaining| remaining + offset))
        .unwrap_or(0)
}

/// Current byte length of the file on disk; 0 when absent.
fn on_disk_len(path: &Path) -> u64 {
    std::fs::metadata(path).map_or(0, |meta| meta.len())
}

/// Clamp a requested resume offset to what is actually on disk. A
/// missing file means starting over at 0.
fn clamp_offset(path: &Path, requested: u64) -> u64 {
    requested.min(on_disk_len(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 500-999/1000"), Some(1000));
        assert_eq!(parse_content_range_total("bytes 0-0/1"), Some(1));
        assert_eq!(parse_content_range_total("bytes 500-999/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_resolve_total_prefers_content_range() {
        assert_eq!(
            resolve_total_bytes(Some("bytes 500-999/1000"), Some(500), 500),
            1000
        );
    }

    #[test]
    fn test_resolve_total_from_content_length_plus_offset() {
        // 206 without Content-Range: the length covers the remainder
        assert_eq!(resolve_total_bytes(None, Some(500), 500), 1000);
        // fresh 200
        assert_eq!(resolve_total_bytes(None, Some(1000), 0), 1000);
    }

    #[test]
    fn test_resolve_total_unknown() {
        assert_eq!(resolve_total_bytes(None, None, 0), 0);
        assert_eq!(resolve_total_bytes(Some("bytes 0-9/*"), None, 0), 0);
    }

    #[test]
    fn test_clamp_offset_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(clamp_offset(&dir.path().join("missing.bin"), 500), 0);
    }

    #[test]
    fn test_clamp_offset_to_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0u8; 300]).unwrap();

        assert_eq!(clamp_offset(&path, 500), 300);
        assert_eq!(clamp_offset(&path, 200), 200);
    }

    #[test]
    fn test_on_disk_len() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(on_disk_len(&dir.path().join("missing.bin")), 0);

        let path = dir.path().join("present.bin");
        std::fs::write(&path, [0u8; 42]).unwrap();
        assert_eq!(on_disk_len(&path), 42);
    }

    #[test]
    fn test_pause_overrides_completion() {
        let attempt = reclassify_paused(Attempt::keep(TransferOutcome::Completed {
            received_bytes: 1000,
            total_bytes: 1000,
        }));
        assert_eq!(
            attempt.outcome,
            TransferOutcome::Paused {
                received_bytes: 1000,
                total_bytes: 1000,
            }
        );
        assert!(!attempt.scrub_file);
    }

    #[test]
    fn test_pause_overrides_failure_and_keeps_file() {
        let attempt = reclassify_paused(Attempt::scrub(failed(
            TransferError::connection("reset"),
            400,
            1000,
        )));
        assert_eq!(
            attempt.outcome,
            TransferOutcome::Paused {
                received_bytes: 400,
                total_bytes: 1000,
            }
        );
        assert!(!attempt.scrub_file);
    }

    #[test]
    fn test_pause_reclassification_is_stable() {
        let attempt = reclassify_paused(Attempt::keep(TransferOutcome::Paused {
            received_bytes: 400,
            total_bytes: 1000,
        }));
        assert_eq!(
            attempt.outcome,
            TransferOutcome::Paused {
                received_bytes: 400,
                total_bytes: 1000,
            }
        );
    }
}
