//! Streaming pipe adapter.
//!
//! Backends transfer objects with push-style uploads (the SDK pulls from a
//! reader) or pull-style downloads (the SDK pushes into a writer). These
//! helpers run that transfer on a background task connected to the caller
//! through a bounded in-memory pipe, so neither side buffers a whole object
//! and a slow consumer applies backpressure to the producer.

use crate::error::{StorageError, StorageResult};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Bytes buffered between the caller and the transfer task (64 KiB).
pub const PIPE_CAPACITY: usize = 64 * 1024;

type TransferTask = JoinHandle<StorageResult<()>>;

/// Spawn a download: `transfer` pushes object bytes into the pipe it is given.
///
/// The returned handle reads from the other end. If `transfer` fails, the
/// failure is reported by the read that would otherwise signal end-of-stream.
pub fn spawn_reader<F, Fut>(key: impl Into<String>, transfer: F) -> ReadHandle
where
    F: FnOnce(DuplexStream) -> Fut,
    Fut: Future<Output = StorageResult<()>> + Send + 'static,
{
    let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
    let token = CancellationToken::new();
    let task = spawn_cancellable(token.clone(), transfer(writer));

    ReadHandle {
        key: key.into(),
        reader: Some(reader),
        task: Some(task),
        _guard: token.drop_guard(),
    }
}

/// Spawn an upload: `transfer` pulls object bytes from the pipe it is given.
///
/// The returned handle writes into the other end. [`WriteHandle::close`]
/// signals end-of-stream and reports how the upload ended.
pub fn spawn_writer<F, Fut>(key: impl Into<String>, transfer: F) -> WriteHandle
where
    F: FnOnce(DuplexStream) -> Fut,
    Fut: Future<Output = StorageResult<()>> + Send + 'static,
{
    let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
    let token = CancellationToken::new();
    let task = spawn_cancellable(token.clone(), transfer(reader));

    WriteHandle {
        key: key.into(),
        writer: Some(writer),
        task: Some(task),
        token: token.clone(),
        _guard: token.drop_guard(),
        closed: false,
    }
}

fn spawn_cancellable<Fut>(token: CancellationToken, transfer: Fut) -> TransferTask
where
    Fut: Future<Output = StorageResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(StorageError::Cancelled),
            result = transfer => result,
        }
    })
}

async fn join(task: TransferTask) -> StorageResult<()> {
    task.await
        .map_err(|e| StorageError::TaskFailed(e.to_string()))?
}

fn closed_error(key: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("stream handle for {key} is closed"),
    )
}

/// Readable end of a download.
///
/// Dropping the handle cancels the transfer task.
pub struct ReadHandle {
    key: String,
    reader: Option<DuplexStream>,
    task: Option<TransferTask>,
    _guard: DropGuard,
}

impl ReadHandle {
    /// Key of the object being read.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the pipe and wait for the transfer task to stop.
    ///
    /// Transfer failures are reported through reads, not here. Calling
    /// `close` more than once is a no-op.
    pub async fn close(&mut self) -> StorageResult<()> {
        if self.reader.take().is_none() {
            return Ok(());
        }
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
            }
            let _ = task.await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadHandle")
            .field("key", &self.key)
            .field("open", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for ReadHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(Err(closed_error(&this.key)));
        };
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(reader).poll_read(cx, buf))?;
        if buf.filled().len() > before {
            return Poll::Ready(Ok(()));
        }

        // End of pipe: the transfer is done, surface how it ended.
        if let Some(task) = this.task.as_mut() {
            let outcome = ready!(Pin::new(task).poll(cx));
            this.task = None;
            let outcome = outcome.map_err(|e| StorageError::TaskFailed(e.to_string()));
            if let Err(err) = outcome.and_then(|result| result) {
                return Poll::Ready(Err(err.into_io()));
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Writable end of an upload.
///
/// Always finish with [`close`](WriteHandle::close) (or
/// [`abort`](WriteHandle::abort)). Dropping an open handle cancels the
/// transfer and the object is not published.
pub struct WriteHandle {
    key: String,
    writer: Option<DuplexStream>,
    task: Option<TransferTask>,
    token: CancellationToken,
    _guard: DropGuard,
    closed: bool,
}

impl WriteHandle {
    /// Key of the object being written.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Signal end-of-stream, wait for the transfer, and return its outcome.
    ///
    /// The first call returns the transfer's terminal error, if any. Later
    /// calls return `Ok(())` without blocking.
    pub async fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(mut writer) = self.writer.take() {
            // Fails only if the transfer already hung up; its own error is reported below.
            let _ = writer.shutdown().await;
        }
        match self.task.take() {
            Some(task) => join(task).await,
            None => Ok(()),
        }
    }

    /// Cancel the transfer without publishing the object.
    ///
    /// Returns the transfer's error if it had already failed on its own.
    pub async fn abort(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.token.cancel();
        self.writer.take();

        match self.task.take() {
            Some(task) => match join(task).await {
                Ok(()) | Err(StorageError::Cancelled) => Ok(()),
                Err(err) => Err(err),
            },
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle")
            .field("key", &self.key)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl AsyncWrite for WriteHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_error(&this.key))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    /// Only closes the pipe. Use [`WriteHandle::close`] to learn whether the upload succeeded.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    fn collecting_writer() -> (WriteHandle, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        let handle = spawn_writer("collect", |mut pipe| async move {
            let mut data = Vec::new();
            pipe.read_to_end(&mut data).await?;
            let _ = tx.send(data);
            Ok(())
        });
        (handle, rx)
    }

    #[tokio::test]
    async fn write_handle_delivers_all_bytes() {
        let (mut handle, rx) = collecting_writer();
        let payload = vec![42u8; PIPE_CAPACITY * 3 + 17];
        handle.write_all(&payload).await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(rx.await.unwrap(), payload);
    }

    #[tokio::test]
    async fn zero_length_payload_is_not_an_error() {
        let (mut handle, rx) = collecting_writer();
        handle.close().await.unwrap();
        assert!(rx.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writer_blocks_while_transfer_is_stalled() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();
        let mut handle = spawn_writer("stalled-reader", |mut pipe| async move {
            let _ = release_rx.await;
            let mut data = Vec::new();
            pipe.read_to_end(&mut data).await?;
            let _ = done_tx.send(data.len());
            Ok(())
        });

        let payload = vec![9u8; PIPE_CAPACITY * 2];
        let stalled =
            tokio::time::timeout(Duration::from_millis(200), handle.write_all(&payload)).await;
        assert!(stalled.is_err(), "write should wait for the transfer to read");

        release_tx.send(()).unwrap();
        // The timed-out write may have pushed part of the payload already.
        handle.write_all(&payload).await.unwrap();
        handle.close().await.unwrap();

        let received = done_rx.await.unwrap();
        assert!(received >= PIPE_CAPACITY * 2);
        assert!(received <= PIPE_CAPACITY * 4);
    }

    #[tokio::test]
    async fn close_twice_is_safe() {
        let (mut handle, _rx) = collecting_writer();
        handle.write_all(b"hello").await.unwrap();
        assert!(handle.close().await.is_ok());
        assert!(handle.close().await.is_ok());
    }

    #[tokio::test]
    async fn close_reports_transfer_failure_once() {
        let mut handle = spawn_writer("broken", |_pipe| async move {
            Err(StorageError::BucketConflict("rejected".to_string()))
        });
        // Whether this write lands in the pipe buffer or hits a closed pipe depends on timing.
        let _ = handle.write_all(b"data").await;

        let first = tokio::time::timeout(Duration::from_secs(5), handle.close())
            .await
            .expect("close must not hang");
        assert!(matches!(first, Err(StorageError::BucketConflict(_))));
        assert!(handle.close().await.is_ok());
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (mut handle, _rx) = collecting_writer();
        handle.close().await.unwrap();
        let err = handle.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn abort_cancels_pending_transfer() {
        let (dropped_tx, dropped_rx) = oneshot::channel::<()>();
        let mut handle = spawn_writer("stalled", |_pipe| async move {
            let _notify_on_drop = dropped_tx;
            std::future::pending::<()>().await;
            Ok(())
        });

        handle.abort().await.unwrap();
        // The sender is dropped along with the cancelled transfer future.
        assert!(dropped_rx.await.is_err());
        assert!(handle.close().await.is_ok());
    }

    #[tokio::test]
    async fn dropping_write_handle_cancels_transfer() {
        let (dropped_tx, dropped_rx) = oneshot::channel::<()>();
        let handle = spawn_writer("abandoned", |_pipe| async move {
            let _notify_on_drop = dropped_tx;
            std::future::pending::<()>().await;
            Ok(())
        });
        drop(handle);

        let result = tokio::time::timeout(Duration::from_secs(5), dropped_rx)
            .await
            .expect("transfer should be cancelled");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn read_handle_streams_transfer_output() {
        let payload = vec![7u8; PIPE_CAPACITY * 2 + 5];
        let expected = payload.clone();
        let mut handle = spawn_reader("blob", |mut pipe| async move {
            pipe.write_all(&payload).await?;
            Ok(())
        });

        let mut data = Vec::new();
        handle.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, expected);
        handle.close().await.unwrap();
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn read_handle_surfaces_transfer_error_as_read_error() {
        let mut handle = spawn_reader("flaky", |mut pipe| async move {
            pipe.write_all(b"partial").await?;
            Err(StorageError::NotFound("flaky".to_string()))
        });

        let mut data = Vec::new();
        let err = handle.read_to_end(&mut data).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn read_after_close_fails() {
        let mut handle = spawn_reader("closed", |_pipe| async move { Ok(()) });
        handle.close().await.unwrap();
        let mut buf = [0u8; 4];
        let err = handle.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
