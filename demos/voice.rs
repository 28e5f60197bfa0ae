//! Push-to-talk voice session over WebRTC.
//!
//! Uses `AZURE_OPENAI_*` directly when set, otherwise the token endpoint
//! from `VOICE_RTC_TOKEN_URL`. Commands on stdin: `t` toggles push-to-talk,
//! `vad on` / `vad off` switch turn detection, `q` quits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;
use voice_rtc::native::{SampleTrackCapture, WebRtcConnector, WebRtcRemoteTrack};
use voice_rtc::{AudioSink, Config, RealtimeTransport, RemoteAudioTrack, SessionIssuer};

/// One 20 ms Opus frame of silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const FRAME_DURATION: Duration = Duration::from_millis(20);

struct RtpCounter;

impl AudioSink for RtpCounter {
    fn attach_remote_track(&self, track: Arc<dyn RemoteAudioTrack>) {
        let Some(remote) = track.as_any().downcast_ref::<WebRtcRemoteTrack>() else {
            return;
        };
        let rtp = Arc::clone(remote.track());
        let id = track.id().to_string();
        tokio::spawn(async move {
            let mut packets = 0u64;
            while rtp.read_rtp().await.is_ok() {
                packets += 1;
                if packets % 250 == 0 {
                    tracing::info!(track_id = %id, packets, "assistant audio flowing");
                }
            }
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let (capture, mut tracks) = SampleTrackCapture::new();
    tokio::spawn(async move {
        while let Some(track) = tracks.recv().await {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(FRAME_DURATION);
                while !track.is_stopped() {
                    ticker.tick().await;
                    if let Err(e) = track
                        .write_opus_frame(Bytes::from_static(&OPUS_SILENCE), FRAME_DURATION)
                        .await
                    {
                        tracing::warn!(error = %e, "failed to write audio frame");
                        break;
                    }
                }
            });
        }
    });

    let mut builder = RealtimeTransport::builder(Config::new())
        .media_capture(Arc::new(capture))
        .peer_connector(Arc::new(WebRtcConnector::new()));
    if let Ok(issuer) = SessionIssuer::from_env() {
        builder = builder.token_provider(Arc::new(issuer));
    }
    let transport = builder.build()?;

    let _user = transport.on_user_message(|e| {
        if !e.partial {
            println!("you: {}", e.text);
        }
    });
    let _assistant = transport.on_assistant_message(|e| {
        if !e.partial {
            println!("assistant: {}", e.text);
        }
    });

    transport
        .connect(Arc::new(RtpCounter))
        .await
        .context("failed to connect")?;
    println!("connected; commands: t | vad on | vad off | q");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "t" => println!("speaking: {}", transport.toggle_speaking()),
            "vad on" => transport.toggle_turn_detection(true),
            "vad off" => transport.toggle_turn_detection(false),
            "q" => break,
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    transport.disconnect();
    println!("{:?}", transport.stats());
    Ok(())
}
