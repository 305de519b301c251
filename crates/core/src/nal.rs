//! Length-prefixed NAL unit handling for H.264/H.265: access-unit
//! split/merge, IDR classification, and parameter-set extraction from
//! `avcC`/`hvcC` configuration records plus their injection into access
//! units. Generalizes the teacher's Annex-B-start-code scanning in
//! `h264.rs` to this wire's 4-byte-length-prefixed form, and extends it
//! to H.265's 2-byte NAL header.

use crate::error::NalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// `true` for the two codecs that carry avcC/hvcC parameter sets and
    /// need IDR-triggered injection; VP8/VP9/AV1 require none.
    pub fn needs_parameter_set_injection(self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265)
    }

    /// Name as it appears in `golive_protocol::voice::CODEC_PAYLOAD_TYPES`.
    pub fn codec_table_name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::H265 => "H265",
            VideoCodec::Vp8 => "VP8",
            VideoCodec::Vp9 => "VP9",
            VideoCodec::Av1 => "AV1",
        }
    }
}

/// Splits a length-prefixed access unit into its constituent NAL payloads.
/// Each entry is `(uint32 BE length, payload)`; malformed trailing bytes are
/// ignored once fewer than 4 bytes remain.
pub fn split_nalus(data: &[u8]) -> Vec<Vec<u8>> {
    let mut nals = Vec::new();
    let mut i = 0;
    while i + 4 <= data.len() {
        let len = u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]) as usize;
        i += 4;
        if i + len > data.len() {
            break;
        }
        nals.push(data[i..i + len].to_vec());
        i += len;
    }
    nals
}

/// Inverse of [`split_nalus`]: re-prepends each payload's 4-byte big-endian
/// length. `merge_nalus(split_nalus(frame)) == frame` for any well-formed
/// input (property 2).
pub fn merge_nalus(nals: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nals.iter().map(|n| n.len() + 4).sum());
    for nal in nals {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

fn h264_nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

fn h265_nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| (b >> 1) & 0x3F)
}

pub fn nal_type(codec: VideoCodec, nal: &[u8]) -> Option<u8> {
    match codec {
        VideoCodec::H264 => h264_nal_type(nal),
        VideoCodec::H265 => h265_nal_type(nal),
        _ => None,
    }
}

fn is_idr(codec: VideoCodec, nal: &[u8]) -> bool {
    match codec {
        VideoCodec::H264 => h264_nal_type(nal) == Some(5),
        VideoCodec::H265 => matches!(h265_nal_type(nal), Some(19) | Some(20)),
        _ => false,
    }
}

pub fn access_unit_contains_idr(codec: VideoCodec, nals: &[Vec<u8>]) -> bool {
    nals.iter().any(|n| is_idr(codec, n))
}

/// Parsed parameter sets for a video track's lifetime. H.264 has no VPS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSets {
    pub vps: Vec<Vec<u8>>,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

/// Reads a 2-byte big-endian length followed by that many bytes, returning
/// the payload and the offset just past it.
fn read_u16_prefixed(data: &[u8], offset: usize) -> Result<(&[u8], usize), NalError> {
    if offset + 2 > data.len() {
        return Err(NalError::Truncated);
    }
    let len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
    let start = offset + 2;
    if start + len > data.len() {
        return Err(NalError::Truncated);
    }
    Ok((&data[start..start + len], start + len))
}

/// Parses an `avcC` configuration record (ISO/IEC 14496-15). Skips the
/// 5-byte fixed prefix (configurationVersion, profile/compat/level,
/// lengthSizeMinusOne), then `sps_count` SPS followed by `pps_count` PPS,
/// each individually 2-byte-length-prefixed.
pub fn parse_avcc(data: &[u8]) -> Result<ParameterSets, NalError> {
    if data.is_empty() {
        return Err(NalError::Truncated);
    }
    let version = data[0];
    if version != 1 {
        return Err(NalError::UnsupportedConfigurationVersion(version));
    }
    if data.len() < 6 {
        return Err(NalError::Truncated);
    }
    let mut offset = 5;
    let sps_count = data[offset] & 0x1F;
    offset += 1;

    let mut sps = Vec::new();
    for _ in 0..sps_count {
        let (payload, next) = read_u16_prefixed(data, offset)?;
        sps.push(payload.to_vec());
        offset = next;
    }

    if offset >= data.len() {
        return Err(NalError::Truncated);
    }
    let pps_count = data[offset];
    offset += 1;

    let mut pps = Vec::new();
    for _ in 0..pps_count {
        let (payload, next) = read_u16_prefixed(data, offset)?;
        pps.push(payload.to_vec());
        offset = next;
    }

    Ok(ParameterSets {
        vps: Vec::new(),
        sps,
        pps,
    })
}

const HEVC_NAL_TYPE_VPS: u8 = 32;
const HEVC_NAL_TYPE_SPS: u8 = 33;
const HEVC_NAL_TYPE_PPS: u8 = 34;

/// Parses an `hvcC` configuration record. Skips the fixed 22-byte prefix,
/// then reads `num_arrays` groups, each a `nalu_type`-tagged run of
/// individually 2-byte-length-prefixed NAL units dispatched into
/// VPS/SPS/PPS buckets by that tag.
pub fn parse_hvcc(data: &[u8]) -> Result<ParameterSets, NalError> {
    if data.is_empty() {
        return Err(NalError::Truncated);
    }
    let version = data[0];
    if version != 1 {
        return Err(NalError::UnsupportedConfigurationVersion(version));
    }
    if data.len() < 23 {
        return Err(NalError::Truncated);
    }
    let mut offset = 22;
    let num_arrays = data[offset];
    offset += 1;

    let mut sets = ParameterSets::default();
    for _ in 0..num_arrays {
        if offset >= data.len() {
            return Err(NalError::Truncated);
        }
        let nalu_type = data[offset] & 0x3F;
        offset += 1;
        if offset + 2 > data.len() {
            return Err(NalError::Truncated);
        }
        let count = u16::from_be_bytes([data[offset], data[offset + 1]]);
        offset += 2;
        for _ in 0..count {
            let (payload, next) = read_u16_prefixed(data, offset)?;
            offset = next;
            match nalu_type {
                HEVC_NAL_TYPE_VPS => sets.vps.push(payload.to_vec()),
                HEVC_NAL_TYPE_SPS => sets.sps.push(payload.to_vec()),
                HEVC_NAL_TYPE_PPS => sets.pps.push(payload.to_vec()),
                _ => {}
            }
        }
    }
    Ok(sets)
}

pub fn parse_parameter_sets(codec: VideoCodec, codec_private: &[u8]) -> Result<ParameterSets, NalError> {
    match codec {
        VideoCodec::H264 => parse_avcc(codec_private),
        VideoCodec::H265 => parse_hvcc(codec_private),
        _ => Ok(ParameterSets::default()),
    }
}

fn contains_exact(haystack: &[Vec<u8>], needle: &[u8]) -> bool {
    haystack.iter().any(|n| n.as_slice() == needle)
}

/// Prepends any missing VPS/SPS/PPS (in that order) ahead of an IDR access
/// unit that doesn't already carry them. Non-IDR access units and
/// codecs that don't inject pass through unchanged. Idempotent: calling
/// this twice on its own output is a no-op the second time (property 3).
pub fn inject_parameter_sets(
    codec: VideoCodec,
    params: &ParameterSets,
    nals: Vec<Vec<u8>>,
) -> Vec<Vec<u8>> {
    if !codec.needs_parameter_set_injection() || !access_unit_contains_idr(codec, &nals) {
        return nals;
    }

    let mut prefix = Vec::new();
    for vps in &params.vps {
        if !contains_exact(&nals, vps) {
            prefix.push(vps.clone());
        }
    }
    for sps in &params.sps {
        if !contains_exact(&nals, sps) {
            prefix.push(sps.clone());
        }
    }
    for pps in &params.pps {
        if !contains_exact(&nals, pps) {
            prefix.push(pps.clone());
        }
    }

    if prefix.is_empty() {
        return nals;
    }
    prefix.extend(nals);
    prefix
}
