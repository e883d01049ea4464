//! Trait abstraction for the LTM output port so the generator can be tested
//! without hardware

use async_trait::async_trait;
use std::io;

/// Byte sink the LTM generator writes frames to
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }
}

/// Any tokio writer (a file, stdout, a TCP stream) can stand in for the port
pub struct WriterPort<W> {
    writer: W,
}

impl<W> WriterPort<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> SerialPortIO for WriterPort<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.writer.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.writer.flush().await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct PortState {
        frames: Vec<Vec<u8>>,
        fail_write: Option<io::ErrorKind>,
        fail_flush: Option<io::ErrorKind>,
    }

    /// In-memory port; clones share what was written
    #[derive(Clone, Default)]
    pub struct MockSerialPort {
        state: Arc<Mutex<PortState>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self::default()
        }

        /// Each `write_all` call, in order
        pub fn frames(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().frames.clone()
        }

        /// All writes concatenated, as a receiver would see them
        pub fn stream(&self) -> Vec<u8> {
            self.state.lock().unwrap().frames.concat()
        }

        pub fn set_write_error(&self, kind: io::ErrorKind) {
            self.state.lock().unwrap().fail_write = Some(kind);
        }

        pub fn set_flush_error(&self, kind: io::ErrorKind) {
            self.state.lock().unwrap().fail_flush = Some(kind);
        }
    }

    #[async_trait]
    impl SerialPortIO for MockSerialPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut state = self.state.lock().unwrap();
            match state.fail_write {
                Some(kind) => Err(io::Error::new(kind, "port unplugged")),
                None => {
                    state.frames.push(data.to_vec());
                    Ok(())
                }
            }
        }

        async fn flush(&mut self) -> io::Result<()> {
            match self.state.lock().unwrap().fail_flush {
                Some(kind) => Err(io::Error::new(kind, "flush stalled")),
                None => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_writer_port_forwards_bytes() {
        let mut port = WriterPort::new(Vec::<u8>::new());
        port.write_all(b"$TA").await.unwrap();
        port.flush().await.unwrap();
        assert_eq!(port.into_inner(), b"$TA".to_vec());
    }

    #[tokio::test]
    async fn test_mock_clones_share_frames() {
        let port = MockSerialPort::new();
        let mut writer = port.clone();
        writer.write_all(b"$TG").await.unwrap();
        writer.write_all(b"$TA").await.unwrap();
        assert_eq!(port.frames().len(), 2);
        assert_eq!(port.stream(), b"$TG$TA".to_vec());
    }
}
