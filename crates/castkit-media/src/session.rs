//! Shared access to a writer from recorder threads.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::MediaError;
use crate::writer::MovieWriter;

/// Wraps a [`MovieWriter`] for use from multiple threads.
///
/// A screen recorder typically has one thread producing video frames and
/// another producing audio, both appending to the same file. The session
/// serializes their writes and supports swapping in a fresh writer when the
/// current file approaches a container size limit.
pub struct RecordingSession<W: MovieWriter> {
    writer: Mutex<W>,
    closed: AtomicBool,
}

impl<W: MovieWriter> RecordingSession<W> {
    pub fn new(writer: W) -> Self {
        RecordingSession {
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    /// Locks the current writer for a batch of writes.
    pub fn lock(&self) -> MutexGuard<'_, W> {
        self.writer.lock()
    }

    /// Atomically replaces the current writer with `next` and returns the
    /// old one, still unfinished, for the caller to finish and close.
    pub fn rotate(&self, next: W) -> Result<W, MediaError> {
        let mut guard = self.writer.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::InvalidState);
        }
        debug!("rotating to a fresh movie writer");
        Ok(std::mem::replace(&mut *guard, next))
    }

    /// Closes the current writer and the session; later rotations are
    /// rejected.
    pub fn close(&self) -> Result<(), W::Error> {
        let mut guard = self.writer.lock();
        self.closed.store(true, Ordering::SeqCst);
        guard.close()
    }

    /// Consumes the session, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::PixelBuffer;

    #[derive(Debug, thiserror::Error)]
    #[error("never")]
    struct NeverError;

    #[derive(Default)]
    struct CountingWriter {
        samples: usize,
        finished: bool,
    }

    impl MovieWriter for CountingWriter {
        type Error = NeverError;

        fn write_frame(&mut self, _: usize, _: &PixelBuffer, _: u64) -> Result<(), NeverError> {
            self.samples += 1;
            Ok(())
        }

        fn write_sample(&mut self, _: usize, _: &[u8], _: u64, _: bool) -> Result<(), NeverError> {
            self.samples += 1;
            Ok(())
        }

        fn write_samples(
            &mut self,
            _: usize,
            n: u32,
            _: &[u8],
            _: u64,
            _: bool,
        ) -> Result<(), NeverError> {
            self.samples += n as usize;
            Ok(())
        }

        fn is_vfr_supported(&self) -> bool {
            false
        }

        fn is_data_limit_reached(&mut self) -> bool {
            self.samples >= 2
        }

        fn dropped_frames(&self) -> u64 {
            0
        }

        fn finish(&mut self) -> Result<(), NeverError> {
            self.finished = true;
            Ok(())
        }

        fn close(&mut self) -> Result<(), NeverError> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn rotate_swaps_writers_and_returns_the_old_one() {
        let session = RecordingSession::new(CountingWriter::default());
        session.lock().write_sample(0, &[0], 1, true).unwrap();
        session.lock().write_sample(0, &[0], 1, true).unwrap();
        assert!(session.lock().is_data_limit_reached());

        let mut old = session.rotate(CountingWriter::default()).unwrap();
        assert_eq!(old.samples, 2);
        old.finish().unwrap();

        assert!(!session.lock().is_data_limit_reached());
        assert_eq!(session.into_inner().samples, 0);
    }

    #[test]
    fn closed_sessions_reject_rotation() {
        let session = RecordingSession::new(CountingWriter::default());
        session.close().unwrap();
        assert!(session.lock().finished);
        assert!(matches!(
            session.rotate(CountingWriter::default()),
            Err(MediaError::InvalidState)
        ));
    }
}
