// UASC for Rust
// SPDX-License-Identifier: MPL-2.0

//! The crypto work pool. RSA operations are far too slow for the connection tasks, so
//! chunk securing and unsecuring runs as typed jobs on the blocking pool, bounded by a
//! semaphore sized to the configured worker count.
//!
//! Ordering within a channel is preserved by construction: a connection admits one job at
//! a time for its channel and awaits the completion before dispatching the next message.
//! Different channels progress in parallel up to the worker limit.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use uasc_core::{
    comms::{chunker::Chunker, message_chunk::MessageChunk, secure_channel::SecureChannel},
    messages::{CodecRegistry, RequestMessage},
};
use uasc_types::{status_code::StatusCode, Error};

/// The output of a decode job: the request reassembled from the chunks of one message.
#[derive(Debug)]
pub struct DecodedRequest {
    /// The decoded request.
    pub message: RequestMessage,
    /// The request id carried in the sequence header of the first chunk.
    pub request_id: u32,
    /// The sequence number of the last chunk, input to validating the next message.
    pub last_sequence_number: u32,
}

/// A bounded pool of crypto workers.
#[derive(Clone)]
pub struct CryptoWorkPool {
    workers: Arc<Semaphore>,
}

impl CryptoWorkPool {
    /// Create a pool running at most `workers` jobs concurrently.
    pub fn new(workers: usize) -> CryptoWorkPool {
        CryptoWorkPool {
            workers: Arc::new(Semaphore::new(workers)),
        }
    }

    async fn run_job<R, F>(&self, job: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R, Error> + Send + 'static,
    {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| Error::new(StatusCode::BadServerHalted, "Crypto pool is shut down"))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| {
            Error::new(
                StatusCode::BadInternalError,
                format!("Crypto job panicked or was cancelled: {e}"),
            )
        })?
    }

    /// Remove security from the accumulated chunks of one message and decode the request
    /// it carries. Sequence numbers are validated to continue from
    /// `expected_sequence_number` and all chunks must repeat the first chunk's request id.
    pub async fn decode_message(
        &self,
        channel: Arc<Mutex<SecureChannel>>,
        codecs: Arc<CodecRegistry<RequestMessage>>,
        chunks: Vec<MessageChunk>,
        expected_sequence_number: u32,
    ) -> Result<DecodedRequest, Error> {
        self.run_job(move || {
            let mut channel = channel.lock();
            let mut plain_chunks = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                plain_chunks.push(channel.verify_and_remove_security(&chunk.data)?);
            }
            let last_sequence_number =
                Chunker::validate_chunks(expected_sequence_number, &channel, &plain_chunks)?;
            let request_id = plain_chunks[0]
                .chunk_info(&channel)?
                .sequence_header
                .request_id;
            let message = Chunker::decode(&plain_chunks, &channel, &codecs)
                .map_err(|e| e.with_request_id(request_id))?;
            Ok(DecodedRequest {
                message,
                request_id,
                last_sequence_number,
            })
        })
        .await
    }

    /// Apply security to one outgoing chunk, returning the wire bytes.
    pub async fn secure_chunk(
        &self,
        channel: Arc<Mutex<SecureChannel>>,
        chunk: MessageChunk,
        max_secured_size: usize,
    ) -> Result<Vec<u8>, Error> {
        self.run_job(move || {
            let channel = channel.lock();
            let mut dst = vec![0u8; max_secured_size];
            let size = channel.apply_security(&chunk, &mut dst)?;
            dst.truncate(size);
            Ok(dst)
        })
        .await
    }
}
