//! Events published to the presentation layer.
//!
//! Components hold an [`EventSink`] and publish without blocking; the
//! composition layer owns the receiving half.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Events emitted by the slideshow core.
#[derive(Debug, Clone, PartialEq)]
pub enum SlideshowEvent {
    /// The playlist was reloaded or an entry was added/removed.
    PlaylistChanged { len: usize },
    /// The presentation layer should display the entry at this index.
    NavigateToIndex(usize),
    /// The playback surface finished opening the current video.
    MediaOpened,
    /// The current video reached end of stream.
    MediaEnded,
    /// Playback progress as a ratio in `[0, 1]`.
    ProgressUpdated(f64),
}

/// Non-blocking publisher for [`SlideshowEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SlideshowEvent>>,
}

impl EventSink {
    /// Create a sink and its receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SlideshowEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish an event. A full or closed channel is logged, never fatal.
    pub fn emit(&self, event: SlideshowEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!("Event channel full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!("Event channel closed, dropping {:?}", event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitted_events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel(4);
        sink.emit(SlideshowEvent::NavigateToIndex(1));
        sink.emit(SlideshowEvent::MediaEnded);

        assert_eq!(rx.try_recv().ok(), Some(SlideshowEvent::NavigateToIndex(1)));
        assert_eq!(rx.try_recv().ok(), Some(SlideshowEvent::MediaEnded));
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = EventSink::channel(1);
        sink.emit(SlideshowEvent::MediaOpened);
        sink.emit(SlideshowEvent::MediaEnded);

        assert_eq!(rx.try_recv().ok(), Some(SlideshowEvent::MediaOpened));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_and_disabled_sinks_are_silent() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        sink.emit(SlideshowEvent::MediaOpened);

        EventSink::disabled().emit(SlideshowEvent::MediaOpened);
    }
}
