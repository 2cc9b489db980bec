//! Cancellation-aware chunked copy with a reusable buffer.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

/// Buffer size for streaming copies (64 KiB).
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Fixed-size copy buffer, reusable across every entry of one operation.
#[derive(Debug)]
pub(crate) struct CopyBuffer {
    #[allow(clippy::large_stack_arrays)]
    buf: [u8; COPY_BUFFER_SIZE],
}

impl CopyBuffer {
    #[allow(clippy::large_stack_arrays)]
    pub(crate) fn new() -> Self {
        Self {
            buf: [0u8; COPY_BUFFER_SIZE],
        }
    }
}

/// How a [`copy_cancellable`] call ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CopyOutcome {
    /// The reader was drained; carries the byte count.
    Completed(u64),
    /// The abort flag flipped mid-copy; the output holds a prefix of the
    /// data and the caller decides what to do with it.
    Aborted,
}

/// Copies `reader` into `writer`, polling `abort` between chunks.
///
/// The flag is typically wired to a cancellation token's subscriber, so a
/// cancel request lands within one chunk of where the copy currently is.
pub(crate) fn copy_cancellable<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut CopyBuffer,
    abort: &AtomicBool,
) -> Result<CopyOutcome> {
    let mut total: u64 = 0;

    loop {
        if abort.load(Ordering::SeqCst) {
            return Ok(CopyOutcome::Aborted);
        }
        let bytes_read = match reader.read(&mut buffer.buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        writer.write_all(&buffer.buf[..bytes_read])?;
        total = total
            .checked_add(bytes_read as u64)
            .ok_or_else(|| io::Error::other("copied byte count overflowed"))?;
    }

    Ok(CopyOutcome::Completed(total))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::io::Cursor;

    fn live_flag() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_copy_empty_source() {
        let mut buffer = CopyBuffer::new();
        let mut input = Cursor::new(Vec::<u8>::new());
        let mut output = Vec::new();

        let outcome = copy_cancellable(&mut input, &mut output, &mut buffer, &live_flag());
        assert_eq!(outcome.unwrap(), CopyOutcome::Completed(0));
        assert!(output.is_empty());
    }

    #[test]
    fn test_copy_multiple_chunks() {
        let mut buffer = CopyBuffer::new();
        let data = vec![0x5Au8; COPY_BUFFER_SIZE * 2 + 123];
        let mut input = Cursor::new(&data);
        let mut output = Vec::new();

        let outcome = copy_cancellable(&mut input, &mut output, &mut buffer, &live_flag());
        assert_eq!(outcome.unwrap(), CopyOutcome::Completed(data.len() as u64));
        assert_eq!(output, data);
    }

    #[test]
    fn test_copy_buffer_is_reusable() {
        let mut buffer = CopyBuffer::new();
        for payload in [b"first".as_slice(), b"second payload".as_slice()] {
            let mut input = Cursor::new(payload);
            let mut output = Vec::new();
            copy_cancellable(&mut input, &mut output, &mut buffer, &live_flag()).unwrap();
            assert_eq!(output, payload);
        }
    }

    #[test]
    fn test_copy_aborts_before_first_chunk() {
        let mut buffer = CopyBuffer::new();
        let mut input = Cursor::new(vec![1u8; 16]);
        let mut output = Vec::new();
        let abort = AtomicBool::new(true);

        let outcome = copy_cancellable(&mut input, &mut output, &mut buffer, &abort);
        assert_eq!(outcome.unwrap(), CopyOutcome::Aborted);
        assert!(output.is_empty());
    }

    #[test]
    fn test_copy_aborts_mid_stream() {
        // Reader that flips the shared flag after the first chunk.
        struct FlippingReader<'a> {
            chunks_left: usize,
            abort: &'a AtomicBool,
        }

        impl Read for FlippingReader<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.chunks_left == 0 {
                    return Ok(0);
                }
                self.chunks_left -= 1;
                if self.chunks_left == 2 {
                    self.abort.store(true, Ordering::SeqCst);
                }
                Ok(buf.len().min(1024))
            }
        }

        let abort = AtomicBool::new(false);
        let mut reader = FlippingReader {
            chunks_left: 4,
            abort: &abort,
        };
        let mut buffer = CopyBuffer::new();
        let mut output = Vec::new();

        let outcome = copy_cancellable(&mut reader, &mut output, &mut buffer, &abort);
        assert_eq!(outcome.unwrap(), CopyOutcome::Aborted);
        // Only the chunks issued before the flag flipped made it out.
        assert!(output.len() < 4096);
    }

    #[test]
    fn test_copy_retries_interrupted_reads() {
        struct InterruptedOnce {
            interrupted: bool,
            data: Cursor<Vec<u8>>,
        }

        impl Read for InterruptedOnce {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "signal"));
                }
                self.data.read(buf)
            }
        }

        let mut reader = InterruptedOnce {
            interrupted: false,
            data: Cursor::new(b"payload".to_vec()),
        };
        let mut buffer = CopyBuffer::new();
        let mut output = Vec::new();

        let outcome = copy_cancellable(&mut reader, &mut output, &mut buffer, &live_flag());
        assert_eq!(outcome.unwrap(), CopyOutcome::Completed(7));
        assert_eq!(output, b"payload");
    }

    #[test]
    fn test_copy_propagates_write_errors() {
        struct FailingWriter;

        impl Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("disk full"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut buffer = CopyBuffer::new();
        let mut input = Cursor::new(vec![7u8; 64]);
        let err = copy_cancellable(&mut input, &mut FailingWriter, &mut buffer, &live_flag())
            .unwrap_err();
        assert!(matches!(err, crate::error::ArchiveError::Io(_)));
    }
}
