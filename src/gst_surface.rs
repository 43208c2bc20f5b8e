//! GStreamer-backed [`PlaybackSurface`].
//!
//! One `uridecodebin → videoconvert → videoscale → appsink` pipeline per
//! source. Decoded RGBA frames land in a shared slot the renderer can pull
//! from; bus messages are polled rather than watched, so no GLib main loop
//! is needed.

use crate::video::{PlaybackSurface, SurfaceEvent};
use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Latest frame pulled from the appsink.
#[derive(Clone)]
pub struct GstFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

struct ActivePipeline {
    pipeline: gst::Pipeline,
    /// Source exactly as the coordinator assigned it.
    source: String,
    uri: String,
    /// Set once the first preroll completed.
    opened: bool,
}

/// Playback surface rendering into an appsink.
pub struct GstSurface {
    active: Option<ActivePipeline>,
    current_frame: Arc<Mutex<Option<GstFrame>>>,
    visible: bool,
    muted: bool,
}

impl GstSurface {
    /// Initialize GStreamer (call once at startup).
    pub fn init() -> Result<()> {
        gst::init().context("Failed to initialize GStreamer")?;
        tracing::info!("GStreamer initialized: {}", gst::version_string());
        Ok(())
    }

    pub fn new() -> Self {
        Self {
            active: None,
            current_frame: Arc::new(Mutex::new(None)),
            visible: false,
            muted: false,
        }
    }

    /// Most recent decoded frame, if the surface is visible.
    pub fn current_frame(&self) -> Option<GstFrame> {
        if !self.visible {
            return None;
        }
        self.current_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    fn pipeline(&self) -> Result<&gst::Pipeline> {
        self.active
            .as_ref()
            .map(|active| &active.pipeline)
            .context("No source loaded")
    }

    fn set_state(&self, state: gst::State) -> Result<()> {
        self.pipeline()?
            .set_state(state)
            .with_context(|| format!("Failed to set pipeline to {:?}", state))?;
        Ok(())
    }

    fn build_pipeline(&self, uri: &str) -> Result<gst::Pipeline> {
        tracing::debug!("Creating pipeline for: {}", uri);
        let pipeline = gst::Pipeline::new();

        let src = gst::ElementFactory::make("uridecodebin")
            .name("source")
            .property("uri", uri)
            .build()
            .context("Failed to create uridecodebin")?;
        let convert = gst::ElementFactory::make("videoconvert")
            .name("convert")
            .build()
            .context("Failed to create videoconvert")?;
        let scale = gst::ElementFactory::make("videoscale")
            .name("scale")
            .build()
            .context("Failed to create videoscale")?;
        let appsink = gst_app::AppSink::builder()
            .name("sink")
            .caps(
                &gst_video::VideoCapsBuilder::new()
                    .format(gst_video::VideoFormat::Rgba)
                    .build(),
            )
            .build();

        pipeline
            .add_many([&src, &convert, &scale, appsink.upcast_ref()])
            .context("Failed to add elements to pipeline")?;
        gst::Element::link_many([&convert, &scale, appsink.upcast_ref()])
            .context("Failed to link elements")?;

        // Only video pads are linked; audio is dropped.
        let convert_weak = convert.downgrade();
        src.connect_pad_added(move |_src, src_pad| {
            let Some(convert) = convert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = convert.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                return;
            }

            let caps = src_pad
                .current_caps()
                .unwrap_or_else(|| src_pad.query_caps(None));
            let is_video = caps
                .structure(0)
                .is_some_and(|s| s.name().starts_with("video/"));
            if is_video {
                if let Err(e) = src_pad.link(&sink_pad) {
                    tracing::error!("Failed to link pads: {:?}", e);
                }
            }
        });

        let frame_slot = Arc::clone(&self.current_frame);
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;
                    let info =
                        gst_video::VideoInfo::from_caps(caps).map_err(|_| gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                    *frame_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(GstFrame {
                        pixels: map.as_slice().to_vec(),
                        width: info.width(),
                        height: info.height(),
                    });
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(pipeline)
    }
}

impl Default for GstSurface {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept either a URI or a filesystem path.
fn to_uri(source: &str) -> Result<String> {
    if source.contains("://") {
        return Ok(source.to_string());
    }
    let path = std::path::absolute(Path::new(source))
        .with_context(|| format!("Invalid video path {:?}", source))?;
    Ok(format!("file://{}", path.display()))
}

impl PlaybackSurface for GstSurface {
    fn set_source(&mut self, source: Option<&str>) -> Result<()> {
        self.close()?;
        let Some(source) = source else {
            return Ok(());
        };

        let uri = to_uri(source)?;
        let pipeline = self.build_pipeline(&uri)?;
        // Preroll so the first frame and duration become available.
        pipeline
            .set_state(gst::State::Paused)
            .context("Failed to preroll pipeline")?;
        self.active = Some(ActivePipeline {
            pipeline,
            source: source.to_string(),
            uri,
            opened: false,
        });
        Ok(())
    }

    fn source(&self) -> Option<String> {
        self.active.as_ref().map(|active| active.source.clone())
    }

    fn play(&mut self) -> Result<()> {
        self.set_state(gst::State::Playing)
    }

    fn pause(&mut self) -> Result<()> {
        self.set_state(gst::State::Paused)
    }

    fn stop(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Ok(());
        }
        self.set_state(gst::State::Null)
    }

    fn close(&mut self) -> Result<()> {
        *self
            .current_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(active) = self.active.take() {
            active
                .pipeline
                .set_state(gst::State::Null)
                .context("Failed to release pipeline")?;
            tracing::debug!("Released pipeline for {}", active.uri);
        }
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let nanos = u64::try_from(position.as_nanos()).unwrap_or(u64::MAX);
        self.pipeline()?
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::from_nseconds(nanos),
            )
            .context("Seek failed")
    }

    fn position(&self) -> Option<Duration> {
        self.pipeline()
            .ok()?
            .query_position::<gst::ClockTime>()
            .map(|p| Duration::from_nanos(p.nseconds()))
    }

    fn natural_duration(&self) -> Option<Duration> {
        self.pipeline()
            .ok()?
            .query_duration::<gst::ClockTime>()
            .map(|d| Duration::from_nanos(d.nseconds()))
    }

    fn natural_dimensions(&self) -> Option<(u32, u32)> {
        self.current_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|frame| (frame.width, frame.height))
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        let active = self.active.as_mut()?;
        let bus = active.pipeline.bus()?;

        while let Some(msg) = bus.pop_filtered(&[
            gst::MessageType::Eos,
            gst::MessageType::Error,
            gst::MessageType::AsyncDone,
        ]) {
            match msg.view() {
                gst::MessageView::Eos(_) => return Some(SurfaceEvent::Ended),
                gst::MessageView::Error(err) => {
                    return Some(SurfaceEvent::Failed(format!(
                        "{} ({:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                gst::MessageView::AsyncDone(_) if !active.opened => {
                    active.opened = true;
                    return Some(SurfaceEvent::Opened);
                }
                _ => {}
            }
        }
        None
    }
}

impl Drop for GstSurface {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!("Pipeline teardown on drop failed: {:#}", e);
        }
    }
}
