//! `PlaySession` (§2/§5): the single logical owner that wires C1-C7 into one
//! run. Mirrors the teacher `main.rs`'s top-level `tokio::select!` across
//! independently-paced tasks plus an explicit graceful-shutdown sequence,
//! generalized from screen/audio capture + WebRTC send to MKV demux +
//! RTP/AEAD/UDP send driven by the voice gateway's state machine.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use golive_protocol::config::CoreConfig;
use golive_protocol::voice::{
    CodecPayloadType, SelectProtocolAckPayload, VideoPayload, CODEC_PAYLOAD_TYPES,
};

use crate::bridge::GatewayBridge;
use crate::cli::Args;
use crate::crypto::select_mode;
use crate::demux::{self, ChannelReader, Packet, VideoTrackInfo, DEFAULT_CHANNEL_CAPACITY};
use crate::gateway::{self, GatewayAction, SessionCredentials};
use crate::mediastream::{self, MediaSink, AUDIO_FRAMETIME_MS};
use crate::nal::VideoCodec;
use crate::transport::{setup_packetizers, UdpTransport};

/// Stand-in bitrate hint for the VIDEO opcode's `max_bitrate`: spec.md is
/// silent on where this figure comes from (no encoder-rate-control component
/// is in scope), so a fixed broadcast-quality default is used instead (see
/// DESIGN.md).
const DEFAULT_MAX_VIDEO_BITRATE: u32 = 2_500_000;

/// The EOF safety poll cadence from spec.md §5.
const EOF_SAFETY_POLL: Duration = Duration::from_secs(2);

/// Reads `path` ("-" for stdin) on a dedicated OS thread, pushing chunks
/// into a bounded channel so a full `ChannelReader` buffer backpressures the
/// read -- the concrete shape of "back-pressure ... pauses the upstream
/// source" from spec.md §4.1.
fn spawn_source_feeder(path: String) -> std_mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = std_mpsc::sync_channel(DEFAULT_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        let mut reader: Box<dyn Read> = if path == "-" {
            Box::new(std::io::stdin())
        } else {
            match std::fs::File::open(&path) {
                Ok(f) => Box::new(f),
                Err(e) => {
                    warn!(path, error = %e, "failed to open MKV source");
                    return;
                }
            }
        };
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "MKV source read error, ending stream");
                    break;
                }
            }
        }
    });
    rx
}

fn codec_list(video_codec: VideoCodec) -> Vec<CodecPayloadType> {
    let mut codecs = Vec::with_capacity(2);
    for (name, payload_type, rtx) in CODEC_PAYLOAD_TYPES {
        if *name == "opus" {
            codecs.push(CodecPayloadType {
                name: (*name).to_string(),
                kind: "audio".to_string(),
                priority: 1000,
                payload_type: *payload_type,
                rtx_payload_type: *rtx,
            });
        } else if *name == video_codec.codec_table_name() {
            codecs.push(CodecPayloadType {
                name: (*name).to_string(),
                kind: "video".to_string(),
                priority: 1000,
                payload_type: *payload_type,
                rtx_payload_type: *rtx,
            });
        }
    }
    codecs
}

fn video_payload_type(video_codec: VideoCodec) -> u8 {
    CODEC_PAYLOAD_TYPES
        .iter()
        .find(|(name, ..)| *name == video_codec.codec_table_name())
        .map(|(_, pt, _)| *pt)
        .expect("every supported VideoCodec has a fixed payload type entry")
}

fn audio_payload_type() -> u8 {
    CODEC_PAYLOAD_TYPES
        .iter()
        .find(|(name, ..)| *name == "opus")
        .map(|(_, pt, _)| *pt)
        .expect("opus has a fixed payload type entry")
}

/// Builds C3 from the negotiated secret/mode and starts the four background
/// tasks that drain demuxed packets through pacing/packetization/encryption
/// and onto the UDP socket. `eof_tx` reports `"video"`/`"audio"` once that
/// sink's packet stream ends, for the orchestrator's EOF safety poll.
#[allow(clippy::too_many_arguments)]
fn spawn_media_pipeline(
    ack: &SelectProtocolAckPayload,
    video_info: &VideoTrackInfo,
    audio_ssrc: u32,
    video_ssrc: u32,
    config: &CoreConfig,
    transport: Arc<UdpTransport>,
    video_rx: mpsc::Receiver<Packet>,
    audio_rx: mpsc::Receiver<Packet>,
    eof_tx: mpsc::Sender<&'static str>,
) -> Result<()> {
    let key: [u8; 32] = ack
        .secret_key
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("SELECT_PROTOCOL_ACK secret_key must be 32 bytes"))?;

    let packetizers = setup_packetizers(
        audio_ssrc,
        video_ssrc,
        video_info.codec,
        video_payload_type(video_info.codec),
        audio_payload_type(),
        video_info.parameter_sets.clone(),
        &ack.mode,
        &key,
        config.transport.mtu,
        config.transport.sr_interval_ms,
    )
    .context("unsupported AEAD mode in SELECT_PROTOCOL_ACK")?;

    let (video_wire_tx, mut video_wire_rx) = mpsc::channel::<Vec<u8>>(128);
    let (audio_wire_tx, mut audio_wire_rx) = mpsc::channel::<Vec<u8>>(128);

    let video_frametime = mediastream::video_frametime_ms(video_info.framerate_num, video_info.framerate_den);
    let mut video_sink = MediaSink::new("video", packetizers.video, video_frametime, video_wire_tx);
    let mut audio_sink = MediaSink::new("audio", packetizers.audio, AUDIO_FRAMETIME_MS, audio_wire_tx);
    mediastream::link(&mut video_sink, &mut audio_sink);

    let video_eof_tx = eof_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = video_sink.run(video_rx).await {
            warn!(error = %e, "video media sink ended with error");
        }
        let _ = video_eof_tx.send("video").await;
    });
    let audio_eof_tx = eof_tx;
    tokio::spawn(async move {
        if let Err(e) = audio_sink.run(audio_rx).await {
            warn!(error = %e, "audio media sink ended with error");
        }
        let _ = audio_eof_tx.send("audio").await;
    });

    let video_transport = Arc::clone(&transport);
    tokio::spawn(async move {
        while let Some(packet) = video_wire_rx.recv().await {
            video_transport.send_packet(&packet).await;
        }
    });
    tokio::spawn(async move {
        while let Some(packet) = audio_wire_rx.recv().await {
            transport.send_packet(&packet).await;
        }
    });

    Ok(())
}

/// Runs one Go-Live broadcast end to end until the source is exhausted, the
/// gateway closes fatally, or `cancel` fires. Resolves `Ok(())` in all three
/// cases per spec.md §5's cancellation semantics -- only genuine setup
/// defects (unsupported codec, malformed config, I/O setup failure) surface
/// as errors.
pub async fn play(args: Args, config: CoreConfig, cancel: CancellationToken) -> Result<()> {
    let server_id = args.guild_id.clone().unwrap_or_else(|| args.channel_id.clone());

    let (bridge_tx, mut bridge_rx) = mpsc::channel(16);
    let mut bridge = GatewayBridge::new(bridge_tx);
    bridge.on_voice_state_update(args.session_id.clone());
    bridge.on_voice_server_update(args.endpoint.clone(), args.token.clone());
    tokio::spawn(async move {
        while let Some(opcode) = bridge_rx.recv().await {
            info!(?opcode, "bridge opcode (no application gateway attached to this binary)");
        }
    });

    let byte_rx = spawn_source_feeder(args.mkv_path.clone());
    let reader = ChannelReader::new(byte_rx);
    let handle = demux::open(reader, config.transport.sink_high_water_mark)
        .await
        .context("failed to open MKV source")?;
    let video_info = handle.video.context("input has no supported video track")?;
    let _audio_info = handle.audio.context("input has no Opus audio track")?;
    let mut video_rx = Some(handle.video_rx);
    let mut audio_rx = Some(handle.audio_rx);
    info!(
        codec = ?video_info.codec,
        width = video_info.width,
        height = video_info.height,
        "demuxer ready"
    );

    let (actions_tx, mut actions_rx) = mpsc::channel(32);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel(32);
    let (eof_tx, mut eof_rx) = mpsc::channel::<&'static str>(4);
    let last_seq_ack = Arc::new(AtomicI64::new(0));
    let endpoint = args.endpoint.clone();
    let min_backoff = Duration::from_millis(config.gateway.reconnect_backoff_min_ms);
    let max_backoff = Duration::from_millis(config.gateway.reconnect_backoff_max_ms);
    let gateway_last_seq_ack = Arc::clone(&last_seq_ack);
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway::run_with_backoff(
            &endpoint,
            gateway_last_seq_ack,
            actions_tx,
            &mut outgoing_rx,
            min_backoff,
            max_backoff,
        )
        .await
        {
            warn!(error = %e, "voice gateway task ended with an error");
        }
    });

    let credentials = SessionCredentials {
        session_id: Some(args.session_id.clone()),
        endpoint: Some(args.endpoint.clone()),
        token: Some(args.token.clone()),
    };

    let mut transport: Option<Arc<UdpTransport>> = None;
    let mut audio_ssrc = 0u32;
    let mut video_ssrc = 0u32;
    let mut rtx_ssrc = 0u32;
    let mut has_connected_before = false;
    let mut video_eof = false;
    let mut audio_eof = false;
    let mut eof_poll = tokio::time::interval(EOF_SAFETY_POLL);

    let result: Result<()> = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancellation requested, tearing down session");
                break Ok(());
            }
            _ = eof_poll.tick() => {
                if video_eof && audio_eof {
                    info!("both source streams reached EOF");
                    break Ok(());
                }
            }
            Some(which) = eof_rx.recv() => {
                match which {
                    "video" => video_eof = true,
                    "audio" => audio_eof = true,
                    _ => {}
                }
                if video_eof && audio_eof {
                    info!("both media sinks drained their packet streams");
                    break Ok(());
                }
            }
            action = actions_rx.recv() => {
                match action {
                    None => {
                        info!("voice gateway task ended");
                        break Ok(());
                    }
                    Some(GatewayAction::StartHeartbeat { interval_ms }) => {
                        info!(interval_ms, "heartbeat started");
                        let outgoing = if has_connected_before {
                            gateway::build_resume(server_id.clone(), &credentials, last_seq_ack.load(Ordering::Relaxed))
                        } else {
                            gateway::build_identify(server_id.clone(), args.user_id.clone(), &credentials, true)
                        };
                        if outgoing_tx.send(outgoing).await.is_err() {
                            break Err(anyhow!("voice gateway outgoing channel closed"));
                        }
                    }
                    Some(GatewayAction::Ready(ready)) => {
                        audio_ssrc = ready.ssrc;
                        if let Some(stream) = ready.streams.first() {
                            video_ssrc = stream.ssrc;
                            rtx_ssrc = stream.rtx_ssrc;
                        }
                        let remote: SocketAddr = match format!("{}:{}", ready.ip, ready.port).parse() {
                            Ok(addr) => addr,
                            Err(e) => break Err(anyhow!("malformed READY address: {e}")),
                        };
                        let udp = match UdpTransport::bind(remote).await {
                            Ok(t) => t,
                            Err(e) => break Err(e.into()),
                        };
                        let discovery_timeout = Duration::from_secs(config.transport.discovery_timeout_secs);
                        let discovered = match udp.discover_ip(audio_ssrc, discovery_timeout).await {
                            Ok(d) => d,
                            Err(e) => break Err(e.into()),
                        };
                        let mode = select_mode(&ready.modes, config.transport.force_chacha);
                        info!(mode, address = discovered.ip, port = discovered.port, "IP discovered");
                        let select_protocol = gateway::build_select_protocol(
                            discovered.ip,
                            discovered.port,
                            mode.to_string(),
                            codec_list(video_info.codec),
                        );
                        if outgoing_tx.send(select_protocol).await.is_err() {
                            break Err(anyhow!("voice gateway outgoing channel closed"));
                        }
                        transport = Some(Arc::new(udp));
                    }
                    Some(GatewayAction::ProtocolAck(ack)) => {
                        let Some(udp) = transport.clone() else {
                            break Err(anyhow!("SELECT_PROTOCOL_ACK received before IP discovery"));
                        };
                        let Some(vrx) = video_rx.take() else {
                            break Err(anyhow!("SELECT_PROTOCOL_ACK received twice"));
                        };
                        let arx = audio_rx.take().expect("video_rx and audio_rx are taken together");
                        if let Err(e) = spawn_media_pipeline(
                            &ack,
                            &video_info,
                            audio_ssrc,
                            video_ssrc,
                            &config,
                            udp,
                            vrx,
                            arx,
                            eof_tx.clone(),
                        ) {
                            break Err(e);
                        }
                        has_connected_before = true;
                        let speaking = gateway::build_speaking(audio_ssrc, 1);
                        let video = gateway::build_video(VideoPayload::active(
                            audio_ssrc,
                            video_ssrc,
                            rtx_ssrc,
                            DEFAULT_MAX_VIDEO_BITRATE,
                            (video_info.framerate_num as f64 / video_info.framerate_den.max(1) as f64).round() as u32,
                            video_info.width,
                            video_info.height,
                        ));
                        if outgoing_tx.send(speaking).await.is_err() || outgoing_tx.send(video).await.is_err() {
                            break Err(anyhow!("voice gateway outgoing channel closed"));
                        }
                        info!("protocol negotiated, media pipeline running");
                    }
                    Some(GatewayAction::Resumed) => {
                        info!("voice gateway resumed");
                    }
                    Some(GatewayAction::Error(op)) => {
                        break Err(anyhow!("voice gateway reported fatal error opcode {op}"));
                    }
                    Some(GatewayAction::Fatal(code)) => {
                        break Err(anyhow!("voice gateway closed fatally (code {code}), giving up"));
                    }
                }
            }
        }
    };

    if audio_ssrc != 0 {
        let _ = outgoing_tx.send(gateway::build_speaking(audio_ssrc, 0)).await;
        let _ = outgoing_tx.send(gateway::build_video(VideoPayload::deactivated(audio_ssrc))).await;
    }
    if let Some(udp) = transport.take() {
        udp.shutdown();
    }
    gateway_task.abort();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_list_always_carries_opus_plus_the_negotiated_video_codec() {
        let codecs = codec_list(VideoCodec::H264);
        assert_eq!(codecs.len(), 2);
        assert!(codecs.iter().any(|c| c.name == "opus" && c.kind == "audio"));
        assert!(codecs.iter().any(|c| c.name == "H264" && c.kind == "video"));
    }

    #[test]
    fn codec_list_tracks_the_demuxed_codec_not_a_fixed_default() {
        let codecs = codec_list(VideoCodec::Vp9);
        assert!(codecs.iter().any(|c| c.name == "VP9" && c.kind == "video"));
        assert!(!codecs.iter().any(|c| c.name == "H264"));
    }

    #[test]
    fn payload_types_are_distinct_and_match_the_fixed_table() {
        let audio_pt = audio_payload_type();
        let video_pt = video_payload_type(VideoCodec::H265);
        assert_ne!(audio_pt, video_pt);
        assert!(CODEC_PAYLOAD_TYPES.iter().any(|(name, pt, _)| *name == "opus" && *pt == audio_pt));
        assert!(CODEC_PAYLOAD_TYPES.iter().any(|(name, pt, _)| *name == "H265" && *pt == video_pt));
    }
}
