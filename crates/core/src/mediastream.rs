//! MediaStream pair (C2): two pacing sinks that drain a demuxed `Packet`
//! stream into a packetizer against wall clock. Grounded on `video.rs`'s
//! `is_multiple_of(300)` stats-logging cadence and its write-then-count loop
//! shape, generalized from a single WebRTC video track to either packetizer
//! over a generic output channel.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::info;

use crate::demux::Packet;
use crate::error::CoreError;
use crate::packetizer::{AudioPacketizer, VideoPacketizer};

/// Below this (pts behind wall clock by more than 200ms) pacing is dropped
/// so the stream catches up instead of falling further behind.
const CATCH_UP_THRESHOLD_MS: i64 = -200;
const STATS_LOG_INTERVAL: u64 = 300;
pub const AUDIO_FRAMETIME_MS: i64 = 20;

pub trait FramePacketizer {
    fn send_frame(&mut self, payload: &[u8], frametime_ms: i64) -> Result<Vec<Vec<u8>>, CoreError>;
}

impl FramePacketizer for VideoPacketizer {
    fn send_frame(&mut self, payload: &[u8], frametime_ms: i64) -> Result<Vec<Vec<u8>>, CoreError> {
        VideoPacketizer::send_frame(self, payload, frametime_ms)
    }
}

impl FramePacketizer for AudioPacketizer {
    fn send_frame(&mut self, payload: &[u8], frametime_ms: i64) -> Result<Vec<Vec<u8>>, CoreError> {
        AudioPacketizer::send_frame(self, payload, frametime_ms)
    }
}

pub enum PaceAction {
    SendImmediately,
    Sleep(i64),
}

/// Pure pacing decision: `diff = pts_ms - elapsed_ms`. Behind by more than
/// 200ms drops pacing; ahead of wall clock sleeps until due; otherwise sends
/// now.
pub fn pacing_action(pts_ms: i64, elapsed_ms: i64) -> PaceAction {
    let diff = pts_ms - elapsed_ms;
    if diff < CATCH_UP_THRESHOLD_MS || diff <= 0 {
        PaceAction::SendImmediately
    } else {
        PaceAction::Sleep(diff)
    }
}

/// `1000 / fps` in milliseconds, rounded down, floored at 1ms.
pub fn video_frametime_ms(framerate_num: u32, framerate_den: u32) -> i64 {
    if framerate_num == 0 {
        return 33;
    }
    ((1000i64 * framerate_den as i64) / framerate_num as i64).max(1)
}

/// Wall-clock pacing state shared bidirectionally between sibling sinks.
/// Exposed read-only to the sibling for diagnostics; pacing itself never
/// blocks on it since both sinks already reference the same wall clock.
#[derive(Default)]
pub struct SinkStats {
    pub last_pts_ms: AtomicI64,
}

pub struct MediaSink<P: FramePacketizer> {
    name: &'static str,
    packetizer: P,
    frametime_ms: i64,
    start_wall: Option<Instant>,
    stats: Arc<SinkStats>,
    sibling: Option<Arc<SinkStats>>,
    out_tx: mpsc::Sender<Vec<u8>>,
    frames_sent: u64,
}

impl<P: FramePacketizer> MediaSink<P> {
    pub fn new(name: &'static str, packetizer: P, frametime_ms: i64, out_tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            name,
            packetizer,
            frametime_ms,
            start_wall: None,
            stats: Arc::new(SinkStats::default()),
            sibling: None,
            out_tx,
            frames_sent: 0,
        }
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }

    pub fn link_sibling(&mut self, other: Arc<SinkStats>) {
        self.sibling = Some(other);
    }

    pub fn sibling_last_pts_ms(&self) -> Option<i64> {
        self.sibling.as_ref().map(|s| s.last_pts_ms.load(Ordering::Relaxed))
    }

    /// Drains `packets` until the stream ends or the downstream channel to
    /// C6 closes, pacing each frame against wall clock before packetizing
    /// and forwarding its wire packets in order.
    pub async fn run(mut self, mut packets: mpsc::Receiver<Packet>) -> Result<(), CoreError> {
        while let Some(packet) = packets.recv().await {
            self.pace(packet.pts_microseconds).await;

            let wire_packets = self.packetizer.send_frame(&packet.data, self.frametime_ms)?;
            for wire in wire_packets {
                if self.out_tx.send(wire).await.is_err() {
                    return Ok(());
                }
            }

            self.frames_sent += 1;
            if self.frames_sent.is_multiple_of(STATS_LOG_INTERVAL) {
                info!(sink = self.name, frames_sent = self.frames_sent, "media sink pacing frames");
            }
        }
        Ok(())
    }

    async fn pace(&mut self, pts_microseconds: i64) {
        let pts_ms = pts_microseconds / 1000;
        let start = *self.start_wall.get_or_insert_with(Instant::now);
        let elapsed = start.elapsed().as_millis() as i64;
        if let PaceAction::Sleep(delay) = pacing_action(pts_ms, elapsed) {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.stats.last_pts_ms.store(pts_ms, Ordering::Relaxed);
    }
}

/// Installs bidirectional sync-target linkage between the two sibling
/// sinks: each can read the other's last presentation timestamp.
pub fn link(video: &mut MediaSink<VideoPacketizer>, audio: &mut MediaSink<AudioPacketizer>) {
    let video_stats = video.stats();
    let audio_stats = audio.stats();
    video.link_sibling(audio_stats);
    audio.link_sibling(video_stats);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_immediately_when_on_time_or_behind_by_up_to_200ms() {
        assert!(matches!(pacing_action(1000, 1000), PaceAction::SendImmediately));
        assert!(matches!(pacing_action(1000, 1150), PaceAction::SendImmediately));
    }

    #[test]
    fn drops_pacing_when_behind_by_more_than_200ms() {
        assert!(matches!(pacing_action(1000, 1201), PaceAction::SendImmediately));
    }

    #[test]
    fn sleeps_when_ahead_of_wall_clock() {
        match pacing_action(1000, 700) {
            PaceAction::Sleep(ms) => assert_eq!(ms, 300),
            _ => panic!("expected Sleep"),
        }
    }

    #[test]
    fn video_frametime_derives_from_framerate_fraction() {
        assert_eq!(video_frametime_ms(30, 1), 33);
        assert_eq!(video_frametime_ms(25, 1), 40);
        assert_eq!(video_frametime_ms(0, 1), 33);
    }

    #[tokio::test]
    async fn sibling_linkage_is_bidirectional() {
        let (video_tx, _video_rx) = mpsc::channel(8);
        let (audio_tx, _audio_rx) = mpsc::channel(8);
        let video_packetizer = VideoPacketizer::new(
            crate::nal::VideoCodec::Vp8,
            1,
            105,
            crate::nal::ParameterSets::default(),
            crate::crypto::AnyEncryptor::for_mode(crate::crypto::MODE_AES256_GCM, &[0u8; 32]).unwrap(),
            1200,
            1000,
        );
        let audio_packetizer = AudioPacketizer::new(
            2,
            120,
            crate::crypto::AnyEncryptor::for_mode(crate::crypto::MODE_AES256_GCM, &[0u8; 32]).unwrap(),
            1000,
        );
        let mut video_sink = MediaSink::new("video", video_packetizer, 33, video_tx);
        let mut audio_sink = MediaSink::new("audio", audio_packetizer, AUDIO_FRAMETIME_MS, audio_tx);
        link(&mut video_sink, &mut audio_sink);

        video_sink.stats().last_pts_ms.store(42, Ordering::Relaxed);
        assert_eq!(audio_sink.sibling_last_pts_ms(), Some(42));

        audio_sink.stats().last_pts_ms.store(7, Ordering::Relaxed);
        assert_eq!(video_sink.sibling_last_pts_ms(), Some(7));
    }
}
