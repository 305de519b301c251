//! Container demuxer (C1). Wraps `matroska-demuxer` behind a `Read + Seek`
//! adapter fed from a byte channel, extracts parameter sets from track
//! codec-private data once, and emits two ordered, lazily-consumed `Packet`
//! streams (video, audio) with parameter-set injection applied per access
//! unit. Generalizes the teacher's blocking-thread-plus-bounded-channel
//! shape from `file_transfer_task.rs` to a demux source instead of a sink.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::mpsc as std_mpsc;

use matroska_demuxer::{Frame, MatroskaFile, TrackType};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::DemuxError;
use crate::nal::{self, ParameterSets, VideoCodec};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// A demuxed access unit ready for packetization.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts_microseconds: i64,
    pub stream_index: u32,
}

#[derive(Debug, Clone)]
pub struct VideoTrackInfo {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub framerate_num: u32,
    pub framerate_den: u32,
    pub parameter_sets: ParameterSets,
}

#[derive(Debug, Clone)]
pub struct AudioTrackInfo {
    pub sample_rate: u32,
    pub channels: u32,
}

pub struct DemuxHandle {
    pub video: Option<VideoTrackInfo>,
    pub audio: Option<AudioTrackInfo>,
    pub video_rx: mpsc::Receiver<Packet>,
    pub audio_rx: mpsc::Receiver<Packet>,
}

/// `Read + Seek` over bytes pushed by an upstream producer. A read past the
/// buffered tail blocks on the channel; this is the blocking-thread analog
/// of "reader yields, resumes on drain" -- the channel itself is the drain
/// signal, and its bound is enforced by the upstream feeder, not here.
pub struct ChannelReader {
    rx: std_mpsc::Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl ChannelReader {
    pub fn new(rx: std_mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    fn fill_to(&mut self, target: usize) {
        while !self.eof && self.buf.len() < target {
            match self.rx.recv() {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(_) => self.eof = true,
            }
        }
    }

    fn drain_all(&mut self) {
        while !self.eof {
            match self.rx.recv() {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(_) => self.eof = true,
            }
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.fill_to(self.pos + out.len());
        let available = self.buf.len().saturating_sub(self.pos);
        let n = available.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for ChannelReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => {
                self.drain_all();
                self.buf.len() as i64 + n
            }
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream"));
        }
        self.fill_to(target as usize);
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}

fn classify_video_codec(codec_id: &str) -> Option<VideoCodec> {
    match codec_id {
        "V_MPEG4/ISO/AVC" => Some(VideoCodec::H264),
        "V_MPEGH/ISO/HEVC" => Some(VideoCodec::H265),
        "V_VP8" => Some(VideoCodec::Vp8),
        "V_VP9" => Some(VideoCodec::Vp9),
        "V_AV1" => Some(VideoCodec::Av1),
        _ => None,
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn framerate_from_duration_ns(duration_ns: u64) -> (u32, u32) {
    if duration_ns == 0 {
        return (30, 1);
    }
    let num = 1_000_000_000u64;
    let g = gcd(num, duration_ns);
    ((num / g) as u32, (duration_ns / g) as u32)
}

type ReadyResult = Result<(Option<VideoTrackInfo>, Option<AudioTrackInfo>), DemuxError>;

/// Opens the container on a blocking thread and streams its two tracks into
/// bounded channels. Resolves once track metadata is known; the packet
/// streams continue to be produced in the background.
pub async fn open(reader: ChannelReader, capacity: usize) -> Result<DemuxHandle, DemuxError> {
    let (ready_tx, ready_rx) = oneshot::channel::<ReadyResult>();
    let (video_tx, video_rx) = mpsc::channel(capacity);
    let (audio_tx, audio_rx) = mpsc::channel(capacity);

    tokio::task::spawn_blocking(move || run_demux_thread(reader, ready_tx, video_tx, audio_tx));

    let (video, audio) = ready_rx
        .await
        .map_err(|_| DemuxError::Container("demux thread closed before emitting track info".to_string()))??;

    Ok(DemuxHandle {
        video,
        audio,
        video_rx,
        audio_rx,
    })
}

fn run_demux_thread(
    reader: ChannelReader,
    ready_tx: oneshot::Sender<ReadyResult>,
    video_tx: mpsc::Sender<Packet>,
    audio_tx: mpsc::Sender<Packet>,
) {
    let mut file = match MatroskaFile::open(reader) {
        Ok(f) => f,
        Err(e) => {
            let _ = ready_tx.send(Err(DemuxError::Container(e.to_string())));
            return;
        }
    };

    let timestamp_scale = file.info().timestamp_scale().get();

    let mut video_track_number = None;
    let mut video_codec = None;
    let mut video_params = ParameterSets::default();
    let mut video_info = None;
    let mut audio_track_number = None;
    let mut audio_info = None;

    for track in file.tracks() {
        if video_track_number.is_none() && track.track_type() == TrackType::Video {
            let Some(codec) = classify_video_codec(track.codec_id()) else {
                let _ = ready_tx.send(Err(DemuxError::UnsupportedCodec(track.codec_id().to_string())));
                return;
            };
            let Some(video) = track.video() else { continue };
            let params = match track.codec_private() {
                Some(private) => match nal::parse_parameter_sets(codec, private) {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = ready_tx.send(Err(DemuxError::InvalidConfigurationRecord(e)));
                        return;
                    }
                },
                None => ParameterSets::default(),
            };
            let (framerate_num, framerate_den) = track
                .default_duration()
                .map(|d| framerate_from_duration_ns(d.get()))
                .unwrap_or((30, 1));

            video_track_number = Some(track.track_number().get());
            video_codec = Some(codec);
            video_params = params.clone();
            video_info = Some(VideoTrackInfo {
                codec,
                width: video.pixel_width().get() as u32,
                height: video.pixel_height().get() as u32,
                framerate_num,
                framerate_den,
                parameter_sets: params,
            });
        } else if audio_track_number.is_none() && track.track_type() == TrackType::Audio {
            if track.codec_id() != "A_OPUS" {
                let _ = ready_tx.send(Err(DemuxError::UnsupportedCodec(track.codec_id().to_string())));
                return;
            }
            let Some(audio) = track.audio() else { continue };
            audio_track_number = Some(track.track_number().get());
            audio_info = Some(AudioTrackInfo {
                sample_rate: audio.sampling_frequency() as u32,
                channels: audio.channels().get() as u32,
            });
        }
    }

    if ready_tx.send(Ok((video_info, audio_info))).is_err() {
        return;
    }

    let mut frame = Frame::default();
    loop {
        match file.next_frame(&mut frame) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                warn!(error = %e, "demuxer parse error, ending stream");
                break;
            }
        }

        let pts_microseconds = (frame.timestamp as u128 * timestamp_scale as u128 / 1000) as i64;

        if Some(frame.track) == video_track_number {
            let codec = video_codec.expect("set alongside video_track_number");
            let data = if codec.needs_parameter_set_injection() {
                let nals = nal::split_nalus(&frame.data);
                nal::merge_nalus(&nal::inject_parameter_sets(codec, &video_params, nals))
            } else {
                std::mem::take(&mut frame.data)
            };
            let packet = Packet {
                data,
                pts_microseconds,
                stream_index: 0,
            };
            if video_tx.blocking_send(packet).is_err() {
                break;
            }
        } else if Some(frame.track) == audio_track_number {
            let packet = Packet {
                data: std::mem::take(&mut frame.data),
                pts_microseconds,
                stream_index: 1,
            };
            if audio_tx.blocking_send(packet).is_err() {
                break;
            }
        }
    }
}
