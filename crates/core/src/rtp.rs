//! Byte-exact RTP/RTCP builders and sequence/timestamp arithmetic. Follows
//! the teacher's `beam_protocol::frame::VideoFrameHeader` idiom: a
//! doc-commented byte layout, a pure `serialize`-style builder function per
//! shape, and inline roundtrip/fixed-vector tests.

/// RTP fixed header, 12 bytes:
///
/// ```text
/// byte 0   : version(2) padding(1)=0 extension(1) cc(4)=0
/// byte 1   : marker(1) payload_type(7)
/// bytes 2-3: sequence number, u16 BE
/// bytes 4-7: timestamp, u32 BE
/// bytes 8-11: SSRC, u32 BE
/// ```
pub fn build_rtp_header(
    marker: bool,
    payload_type: u8,
    extension: bool,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0] = (2 << 6) | ((extension as u8) << 4);
    header[1] = payload_type | if marker { 0x80 } else { 0 };
    header[2..4].copy_from_slice(&sequence.to_be_bytes());
    header[4..8].copy_from_slice(&timestamp.to_be_bytes());
    header[8..12].copy_from_slice(&ssrc.to_be_bytes());
    header
}

/// RFC 5285 one-byte-form extension id for playout delay.
pub const PLAYOUT_DELAY_EXT_ID: u8 = 5;

/// One-byte-form RTP header extension block carrying a single playout-delay
/// element, 8 bytes total:
///
/// ```text
/// bytes 0-1: 0xBE 0xDE (one-byte form magic)
/// bytes 2-3: length, u16 BE, count of 4-byte words following (1 here)
/// byte 4   : (id(4) << 4) | (len-1)(4)
/// bytes 5-7: value, u24 BE
/// ```
pub fn build_playout_delay_extension(delay: u32) -> [u8; 8] {
    let mut ext = [0u8; 8];
    ext[0] = 0xBE;
    ext[1] = 0xDE;
    ext[2..4].copy_from_slice(&1u16.to_be_bytes());
    ext[4] = ((PLAYOUT_DELAY_EXT_ID & 0x0F) << 4) | (1u8 & 0x0F);
    let value = delay.to_be_bytes();
    ext[5..8].copy_from_slice(&value[1..4]);
    ext
}

/// RTCP Sender Report header, 8 bytes: `0x80 0xC8 0x00 0x06` + SSRC (u32 BE).
pub fn build_sr_header(ssrc: u32) -> [u8; 8] {
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&[0x80, 0xC8, 0x00, 0x06]);
    header[4..8].copy_from_slice(&ssrc.to_be_bytes());
    header
}

/// RTCP Sender Report body (the part that gets encrypted), 20 bytes:
/// NTP seconds, NTP fraction, RTP timestamp, packet count, byte count; all
/// u32 BE.
pub fn build_sr_body(
    ntp_seconds: u32,
    ntp_fraction: u32,
    rtp_timestamp: u32,
    packet_count: u32,
    byte_count: u32,
) -> [u8; 20] {
    let mut body = [0u8; 20];
    body[0..4].copy_from_slice(&ntp_seconds.to_be_bytes());
    body[4..8].copy_from_slice(&ntp_fraction.to_be_bytes());
    body[8..12].copy_from_slice(&rtp_timestamp.to_be_bytes());
    body[12..16].copy_from_slice(&packet_count.to_be_bytes());
    body[16..20].copy_from_slice(&byte_count.to_be_bytes());
    body
}

/// `ntp_ls = round(fraction * 2^32)`, clamped to `2^32 - 1` rather than
/// wrapping, since a fraction of exactly 1.0 would otherwise overflow the
/// u32 field (per the open design question on NTP fraction overflow).
pub fn ntp_fraction(fraction: f64) -> u32 {
    let scaled = (fraction * (u32::MAX as f64 + 1.0)).round();
    if scaled >= u32::MAX as f64 {
        u32::MAX
    } else {
        scaled as u32
    }
}

pub fn next_sequence(current: u16) -> u16 {
    current.wrapping_add(1)
}

pub fn next_timestamp(current: u32, increment: u32) -> u32 {
    current.wrapping_add(increment)
}

/// Splits `data` into consecutive slices of at most `mtu` bytes, preserving
/// order. Callers separate NAL-unit header bytes before partitioning so a
/// split never falls inside them.
pub fn partition_mtu(data: &[u8], mtu: usize) -> Vec<&[u8]> {
    if mtu == 0 {
        return vec![data];
    }
    data.chunks(mtu).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtp_header_is_12_bytes_with_expected_layout() {
        let header = build_rtp_header(true, 101, true, 42, 0x1234_5678, 0xDEAD_BEEF);
        assert_eq!(header.len(), 12);
        assert_eq!(header[0], (2 << 6) | (1 << 4));
        assert_eq!(header[1], 101 | 0x80);
        assert_eq!(u16::from_be_bytes([header[2], header[3]]), 42);
        assert_eq!(
            u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            0x1234_5678
        );
        assert_eq!(
            u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
            0xDEAD_BEEF
        );
    }

    #[test]
    fn rtp_header_marker_and_extension_bits_clear_when_false() {
        let header = build_rtp_header(false, 120, false, 0, 0, 0);
        assert_eq!(header[0], 2 << 6);
        assert_eq!(header[1], 120);
    }

    #[test]
    fn playout_delay_extension_is_8_bytes() {
        let ext = build_playout_delay_extension(0x00_0A_BC);
        assert_eq!(&ext[0..4], &[0xBE, 0xDE, 0x00, 0x01]);
        assert_eq!(ext[4], (5 << 4) | 1);
        assert_eq!(&ext[5..8], &[0x00, 0x0A, 0xBC]);
    }

    #[test]
    fn sr_header_magic_bytes() {
        let header = build_sr_header(7);
        assert_eq!(&header[0..4], &[0x80, 0xC8, 0x00, 0x06]);
        assert_eq!(u32::from_be_bytes(header[4..8].try_into().unwrap()), 7);
    }

    #[test]
    fn sr_body_is_20_bytes_in_field_order() {
        let body = build_sr_body(100, 200, 300, 400, 500);
        assert_eq!(body.len(), 20);
        assert_eq!(u32::from_be_bytes(body[0..4].try_into().unwrap()), 100);
        assert_eq!(u32::from_be_bytes(body[4..8].try_into().unwrap()), 200);
        assert_eq!(u32::from_be_bytes(body[8..12].try_into().unwrap()), 300);
        assert_eq!(u32::from_be_bytes(body[12..16].try_into().unwrap()), 400);
        assert_eq!(u32::from_be_bytes(body[16..20].try_into().unwrap()), 500);
    }

    #[test]
    fn ntp_fraction_clamps_instead_of_overflowing() {
        assert_eq!(ntp_fraction(1.0), u32::MAX);
        assert_eq!(ntp_fraction(0.0), 0);
        assert_eq!(ntp_fraction(0.5), 0x8000_0000);
    }

    #[test]
    fn sequence_wraps_mod_2_16() {
        assert_eq!(next_sequence(u16::MAX), 0);
        assert_eq!(next_sequence(5), 6);
    }

    #[test]
    fn timestamp_wraps_mod_2_32() {
        assert_eq!(next_timestamp(u32::MAX, 1), 0);
        assert_eq!(next_timestamp(u32::MAX, 90), 89);
    }

    #[test]
    fn mtu_partition_preserves_order_and_bounds_size() {
        let data = vec![1u8; 2500];
        let chunks = partition_mtu(&data, 1200);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1200);
        assert_eq!(chunks[1].len(), 1200);
        assert_eq!(chunks[2].len(), 100);
    }
}
