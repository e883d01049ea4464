//! # Publish Sink
//!
//! Synchronous call-per-frame delivery: every event is encoded as bullet
//! frames and handed to a [`Publisher`], and the replay loop waits for each
//! publish to be acknowledged before moving on.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::bullet::{BulletEncoder, INITIAL_FRAME};
use super::{RecordSink, ReplayEvent};
use crate::error::Result;

/// Transport for bullet frames
///
/// `publish` returns once the frame has been acknowledged by whatever sits
/// behind it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send {
    async fn publish(&mut self, frame: &str) -> Result<()>;
}

/// Publisher writing one frame per line to any tokio writer
///
/// A flush completes the acknowledgement.
pub struct LinePublisher<W> {
    writer: W,
    published: usize,
}

impl<W> LinePublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, published: 0 }
    }

    /// Frames published so far
    pub fn published(&self) -> usize {
        self.published
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> Publisher for LinePublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&mut self, frame: &str) -> Result<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        self.published += 1;
        Ok(())
    }
}

/// Record sink encoding events as bullet frames
pub struct PublishSink<P> {
    publisher: P,
    encoder: BulletEncoder,
}

impl<P: Publisher> PublishSink<P> {
    pub fn new(publisher: P, encoder: BulletEncoder) -> Self {
        Self { publisher, encoder }
    }

    pub fn into_publisher(self) -> P {
        self.publisher
    }
}

#[async_trait]
impl<P: Publisher> RecordSink for PublishSink<P> {
    async fn deliver(&mut self, event: ReplayEvent) -> Result<()> {
        match event {
            ReplayEvent::Start => self.publisher.publish(INITIAL_FRAME).await,
            ReplayEvent::Mode { mode, failsafe, hw_fail, cells } => {
                let frame = self.encoder.mode_frame(mode, failsafe, hw_fail, cells);
                self.publisher.publish(&frame).await
            }
            ReplayEvent::Home(home) => self.publisher.publish(&self.encoder.home_frame(&home)).await,
            ReplayEvent::Mission(mission) => {
                for frame in self.encoder.mission_frames(&mission) {
                    self.publisher.publish(&frame).await?;
                }
                Ok(())
            }
            ReplayEvent::Record { elapsed, record, cells, .. } => {
                let frame = self.encoder.data_frame(&record, elapsed.as_secs(), cells);
                self.publisher.publish(&frame).await
            }
            ReplayEvent::End => {
                debug!("Publish replay complete");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::bullet::BulletVersion;
    use crate::types::{FlightMode, HomePosition, LogRecord};
    use mockall::predicate::eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_line_publisher_writes_lines() {
        let mut publisher = LinePublisher::new(Vec::<u8>::new());
        publisher.publish("a:1").await.unwrap();
        publisher.publish("b:2").await.unwrap();

        assert_eq!(publisher.published(), 2);
        assert_eq!(String::from_utf8(publisher.into_inner()).unwrap(), "a:1\nb:2\n");
    }

    #[tokio::test]
    async fn test_start_event_publishes_initial_frame() {
        let mut mock = MockPublisher::new();
        mock.expect_publish()
            .with(eq(INITIAL_FRAME))
            .times(1)
            .returning(|_| Ok(()));

        let mut sink = PublishSink::new(mock, BulletEncoder::default());
        sink.deliver(ReplayEvent::Start).await.unwrap();
    }

    #[tokio::test]
    async fn test_mode_and_record_events() {
        let mut mock = MockPublisher::new();
        mock.expect_publish()
            .withf(|f: &str| f == "bcc:3,ftm:ANGL,css:3,hwh:1,")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_publish()
            .withf(|f: &str| f.starts_with("flt:5,ont:65,"))
            .times(1)
            .returning(|_| Ok(()));

        let mut sink = PublishSink::new(mock, BulletEncoder::new(BulletVersion::V1, "X"));
        sink.deliver(ReplayEvent::Mode { mode: FlightMode::Angle, failsafe: false, hw_fail: false, cells: 3 })
            .await
            .unwrap();
        sink.deliver(ReplayEvent::Record {
            index: 0,
            elapsed: Duration::from_millis(5_400),
            record: LogRecord::default(),
            cells: 3,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_publish_error_propagates() {
        let mut mock = MockPublisher::new();
        mock.expect_publish()
            .returning(|_| Err(crate::error::FlightLogError::ChannelClosed));

        let mut sink = PublishSink::new(mock, BulletEncoder::default());
        let result = sink.deliver(ReplayEvent::Home(HomePosition::default())).await;
        assert!(result.is_err(), "Publisher failure must stop the replay");
    }
}
