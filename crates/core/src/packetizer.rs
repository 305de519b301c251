//! Video and audio packetizers (C3): fragment frames to MTU, build RTP
//! headers, seal payloads with the track's encryptor, and drive RTCP SR
//! cadence. See `spec.md` §4.3/§4.4.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::{AnyEncryptor, TransportEncryptor};
use crate::error::{CoreError, CryptoError};
use crate::nal::{inject_parameter_sets, split_nalus, ParameterSets, VideoCodec};
use crate::rtp::{
    build_playout_delay_extension, build_rtp_header, build_sr_body, build_sr_header,
    next_sequence, next_timestamp, ntp_fraction, partition_mtu,
};

const NTP_EPOCH_OFFSET_SECONDS: u64 = 2_208_988_800;
const VIDEO_CLOCK_HZ: f64 = 90.0;
const AUDIO_CLOCK_HZ: u32 = 48;

/// Per-SSRC RTP session state, shared shape between the video and audio
/// packetizers.
#[derive(Debug, Default)]
struct SsrcTrack {
    ssrc: u32,
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    total_packets: u32,
    total_bytes: u32,
    last_rtcp_media_ms: i64,
    media_ms: i64,
    sent_any: bool,
}

fn seal_packet(
    header: &[u8],
    extension: Option<&[u8]>,
    plaintext: &[u8],
    encryptor: &mut dyn TransportEncryptor,
) -> Result<Vec<u8>, CoreError> {
    let (ciphertext, nonce_prefix) = encryptor.encrypt(plaintext, header)?;
    let mut out = Vec::with_capacity(
        header.len() + extension.map(|e| e.len()).unwrap_or(0) + ciphertext.len() + 4,
    );
    out.extend_from_slice(header);
    if let Some(ext) = extension {
        out.extend_from_slice(ext);
    }
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&nonce_prefix);
    Ok(out)
}

fn wall_clock_ntp() -> (u32, u32) {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seconds = since_epoch.as_secs() + NTP_EPOCH_OFFSET_SECONDS;
    let fraction = ntp_fraction(since_epoch.subsec_nanos() as f64 / 1_000_000_000.0);
    (seconds as u32, fraction)
}

fn maybe_build_sr(
    track: &mut SsrcTrack,
    sr_interval_ms: i64,
    encryptor: &mut dyn TransportEncryptor,
) -> Result<Option<Vec<u8>>, CoreError> {
    if !track.sent_any || sr_interval_ms <= 0 {
        return Ok(None);
    }
    if track.media_ms / sr_interval_ms <= track.last_rtcp_media_ms / sr_interval_ms {
        return Ok(None);
    }
    track.last_rtcp_media_ms = track.media_ms;

    let header = build_sr_header(track.ssrc);
    let (ntp_seconds, ntp_frac) = wall_clock_ntp();
    let body = build_sr_body(
        ntp_seconds,
        ntp_frac,
        track.timestamp,
        track.total_packets,
        track.total_bytes,
    );
    let (ciphertext, nonce_prefix) = encryptor.encrypt(&body, &header)?;
    let mut packet = Vec::with_capacity(header.len() + ciphertext.len() + 4);
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&ciphertext);
    packet.extend_from_slice(&nonce_prefix);
    Ok(Some(packet))
}

pub struct VideoPacketizer {
    codec: VideoCodec,
    track: SsrcTrack,
    encryptor: AnyEncryptor,
    params: ParameterSets,
    picture_id: u16,
    mtu: usize,
    sr_interval_ms: i64,
}

impl VideoPacketizer {
    pub fn new(
        codec: VideoCodec,
        ssrc: u32,
        payload_type: u8,
        params: ParameterSets,
        encryptor: AnyEncryptor,
        mtu: usize,
        sr_interval_ms: i64,
    ) -> Self {
        Self {
            codec,
            track: SsrcTrack {
                ssrc,
                payload_type,
                ..Default::default()
            },
            encryptor,
            params,
            picture_id: 0,
            mtu,
            sr_interval_ms,
        }
    }

    /// Fragments one access unit, seals each fragment, runs the common
    /// epilogue (byte/packet counters, RTCP SR cadence, clock advance), and
    /// returns the wire packets to send in order (RTP fragments, then an
    /// optional trailing SR).
    pub fn send_frame(&mut self, frame: &[u8], frametime_ms: i64) -> Result<Vec<Vec<u8>>, CoreError> {
        let mut packets = match self.codec {
            VideoCodec::Vp8 | VideoCodec::Vp9 | VideoCodec::Av1 => self.packetize_vp8(frame)?,
            VideoCodec::H264 | VideoCodec::H265 => self.packetize_annex_b(frame)?,
        };

        self.track.total_packets += packets.len() as u32;
        if !packets.is_empty() {
            self.track.sent_any = true;
        }
        if let Some(sr) = maybe_build_sr(&mut self.track, self.sr_interval_ms, &mut self.encryptor)? {
            packets.push(sr);
        }
        self.track.media_ms += frametime_ms;
        let increment = (VIDEO_CLOCK_HZ * frametime_ms as f64).round() as u32;
        self.track.timestamp = next_timestamp(self.track.timestamp, increment);
        Ok(packets)
    }

    fn packetize_vp8(&mut self, frame: &[u8]) -> Result<Vec<Vec<u8>>, CoreError> {
        let chunks: Vec<Vec<u8>> = partition_mtu(frame, self.mtu)
            .into_iter()
            .map(|c| c.to_vec())
            .collect();
        let n = chunks.len();
        let mut packets = Vec::with_capacity(n);

        for (i, chunk) in chunks.into_iter().enumerate() {
            let first = i == 0;
            let last = i == n - 1;
            let header = build_rtp_header(
                last,
                self.track.payload_type,
                true,
                self.track.sequence,
                self.track.timestamp,
                self.track.ssrc,
            );
            let ext = build_playout_delay_extension(0);

            let mut plaintext = Vec::with_capacity(4 + chunk.len());
            plaintext.push(0x80 | if first { 0x10 } else { 0 });
            plaintext.push(0x80);
            plaintext.push(0x80 | (((self.picture_id >> 8) as u8) & 0x7F));
            plaintext.push((self.picture_id & 0xFF) as u8);
            plaintext.extend_from_slice(&chunk);

            let packet = seal_packet(&header, Some(&ext), &plaintext, &mut self.encryptor)?;
            self.track.total_bytes = self.track.total_bytes.wrapping_add(packet.len() as u32);
            self.track.sequence = next_sequence(self.track.sequence);
            packets.push(packet);
        }
        self.picture_id = self.picture_id.wrapping_add(1);
        Ok(packets)
    }

    fn packetize_annex_b(&mut self, frame: &[u8]) -> Result<Vec<Vec<u8>>, CoreError> {
        let nals = inject_parameter_sets(self.codec, &self.params, split_nalus_or_whole(frame));
        let n_nals = nals.len();
        let mut packets = Vec::new();

        let (nal_header_len, fu_header_len) = match self.codec {
            VideoCodec::H264 => (1usize, 2usize),
            VideoCodec::H265 => (2usize, 3usize),
            _ => unreachable!("only annex-b codecs reach this path"),
        };

        for (ni, nal) in nals.into_iter().enumerate() {
            let is_last_nal = ni == n_nals - 1;

            if nal.len() <= self.mtu {
                let header = build_rtp_header(
                    is_last_nal,
                    self.track.payload_type,
                    false,
                    self.track.sequence,
                    self.track.timestamp,
                    self.track.ssrc,
                );
                let packet = seal_packet(&header, None, &nal, &mut self.encryptor)?;
                self.track.total_bytes = self.track.total_bytes.wrapping_add(packet.len() as u32);
                self.track.sequence = next_sequence(self.track.sequence);
                packets.push(packet);
                continue;
            }

            let nal_header = &nal[0..nal_header_len];
            let payload = &nal[nal_header_len..];
            let frag_size = self.mtu.saturating_sub(fu_header_len).max(1);
            let fragments: Vec<Vec<u8>> = partition_mtu(payload, frag_size)
                .into_iter()
                .map(|c| c.to_vec())
                .collect();
            let n_frag = fragments.len();

            for (fi, frag) in fragments.into_iter().enumerate() {
                let first = fi == 0;
                let last = fi == n_frag - 1;
                let marker = is_last_nal && last;

                let mut plaintext = Vec::with_capacity(fu_header_len + frag.len());
                match self.codec {
                    VideoCodec::H264 => {
                        let nal_type = nal_header[0] & 0x1F;
                        let byte0 = (nal_header[0] & 0xE0) | 28;
                        let byte1 = if first {
                            0x80 | nal_type
                        } else if last {
                            0x40 | nal_type
                        } else {
                            nal_type
                        };
                        plaintext.push(byte0);
                        plaintext.push(byte1);
                    }
                    VideoCodec::H265 => {
                        let nal_type = (nal_header[0] >> 1) & 0x3F;
                        let byte0 = (nal_header[0] & 0x81) | (49 << 1);
                        let byte1 = nal_header[1];
                        let byte2 = if first {
                            0x80 | nal_type
                        } else if last {
                            0x40 | nal_type
                        } else {
                            nal_type
                        };
                        plaintext.push(byte0);
                        plaintext.push(byte1);
                        plaintext.push(byte2);
                    }
                    _ => unreachable!(),
                }
                plaintext.extend_from_slice(&frag);

                let header = build_rtp_header(
                    marker,
                    self.track.payload_type,
                    false,
                    self.track.sequence,
                    self.track.timestamp,
                    self.track.ssrc,
                );
                let packet = seal_packet(&header, None, &plaintext, &mut self.encryptor)?;
                self.track.total_bytes = self.track.total_bytes.wrapping_add(packet.len() as u32);
                self.track.sequence = next_sequence(self.track.sequence);
                packets.push(packet);
            }
        }
        Ok(packets)
    }
}

/// The demuxer hands access units already in length-prefixed form; this is
/// a thin readability wrapper over `split_nalus` for the packetizer's use.
fn split_nalus_or_whole(frame: &[u8]) -> Vec<Vec<u8>> {
    let nals = split_nalus(frame);
    if nals.is_empty() {
        vec![frame.to_vec()]
    } else {
        nals
    }
}

pub struct AudioPacketizer {
    track: SsrcTrack,
    encryptor: AnyEncryptor,
    sr_interval_ms: i64,
}

impl AudioPacketizer {
    pub fn new(ssrc: u32, payload_type: u8, encryptor: AnyEncryptor, sr_interval_ms: i64) -> Self {
        Self {
            track: SsrcTrack {
                ssrc,
                payload_type,
                ..Default::default()
            },
            encryptor,
            sr_interval_ms,
        }
    }

    /// One Opus frame -> one RTP packet (marker always set, no extension),
    /// followed by the same SR cadence as video and a 48 kHz clock advance.
    pub fn send_frame(&mut self, opus_payload: &[u8], frametime_ms: i64) -> Result<Vec<Vec<u8>>, CoreError> {
        let header = build_rtp_header(
            true,
            self.track.payload_type,
            false,
            self.track.sequence,
            self.track.timestamp,
            self.track.ssrc,
        );
        let packet = seal_packet(&header, None, opus_payload, &mut self.encryptor)?;
        self.track.total_bytes = self.track.total_bytes.wrapping_add(packet.len() as u32);
        self.track.sequence = next_sequence(self.track.sequence);
        self.track.total_packets += 1;
        self.track.sent_any = true;

        let mut packets = vec![packet];
        if let Some(sr) = maybe_build_sr(&mut self.track, self.sr_interval_ms, &mut self.encryptor)? {
            packets.push(sr);
        }
        self.track.media_ms += frametime_ms;
        self.track.timestamp =
            next_timestamp(self.track.timestamp, (frametime_ms as u32).wrapping_mul(AUDIO_CLOCK_HZ));
        Ok(packets)
    }
}

/// Test-only encryptor that returns the plaintext unchanged so wire-format
/// assertions can inspect exact bytes without AEAD tag overhead.
#[cfg(test)]
pub struct PassthroughEncryptor {
    pub counter: u32,
}

#[cfg(test)]
impl TransportEncryptor for PassthroughEncryptor {
    fn encrypt(&mut self, plaintext: &[u8], _aad: &[u8]) -> Result<(Vec<u8>, [u8; 4]), CryptoError> {
        let prefix = self.counter.to_be_bytes();
        self.counter = self.counter.wrapping_add(1);
        Ok((plaintext.to_vec(), prefix))
    }
}
