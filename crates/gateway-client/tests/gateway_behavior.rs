//! Behavioral tests against the public API
//!
//! Exercises the protocol scenarios end to end as far as they go without a
//! live gateway: payload shapes, rate window draining, voice request
//! coalescing and the close-code policy.

use gateway_client::compress::Decompressor;
use gateway_client::protocol::{CloseCode, GatewayMessage, IdentifyPayload, ResumePayload};
use gateway_client::ratelimit::{Permit, RateLimitBucket};
use gateway_client::voice::{ConnectionStage, VoiceQueue};
use gateway_client::GatewayClient;
use gateway_common::{Compression, GatewayConfig};
use gateway_core::{
    ArbiterError, EntityCache, SessionArbiter, SessionConnectNode, ShardInfo, Snowflake,
};
use serde_json::{json, Value};
use std::sync::Arc;

struct InertArbiter;

impl SessionArbiter for InertArbiter {
    fn append_session(&self, _node: Arc<dyn SessionConnectNode>) -> Result<(), ArbiterError> {
        Ok(())
    }
    fn remove_session(&self, _node: &Arc<dyn SessionConnectNode>) -> bool {
        true
    }
}

struct OpenCache;

impl EntityCache for OpenCache {
    fn guild_exists(&self, _: Snowflake) -> bool {
        true
    }
    fn voice_channel_exists(&self, _: Snowflake, _: Snowflake) -> bool {
        true
    }
    fn can_voice_connect(&self, _: Snowflake, _: Snowflake) -> bool {
        true
    }
    fn clear(&self) {}
    fn timeout(&self, _: u64) {}
}

#[test]
fn fresh_connect_identify_payload_shape() {
    // HELLO arrived, no session id: the client identifies with v=6 and
    // large_threshold=250.
    let payload = IdentifyPayload::new(
        "token",
        250,
        json!({"status": "online", "since": null, "game": null, "afk": false}),
        Some(ShardInfo::new(0, 1)),
    );
    let message: Value = serde_json::to_value(GatewayMessage::identify(&payload)).unwrap();

    assert_eq!(message["op"], 2);
    assert_eq!(message["d"]["v"], 6);
    assert_eq!(message["d"]["large_threshold"], 250);
    assert_eq!(message["d"]["shard"], json!([0, 1]));
    assert_eq!(message["d"]["properties"]["$browser"], "gateway-client");
}

#[test]
fn resume_payload_carries_session_and_sequence() {
    let payload = ResumePayload {
        session_id: "abc".to_string(),
        token: "token".to_string(),
        seq: 42,
    };
    let message: Value = serde_json::to_value(GatewayMessage::resume(&payload)).unwrap();

    assert_eq!(message["op"], 6);
    assert_eq!(message["d"]["session_id"], "abc");
    assert_eq!(message["d"]["seq"], 42);
}

#[test]
fn rate_window_drains_115_then_remainder() {
    let bucket = RateLimitBucket::new();
    bucket.reset_at(0);

    let sent_first_window = (0..130)
        .filter(|_| bucket.try_acquire_at(false, 1) == Permit::Granted)
        .count();
    assert_eq!(sent_first_window, 115);

    // Heartbeats still go out of the exhausted window
    assert_eq!(bucket.try_acquire_at(true, 2), Permit::Granted);

    let sent_second_window = (0..15)
        .filter(|_| bucket.try_acquire_at(false, 60_001) == Permit::Granted)
        .count();
    assert_eq!(sent_second_window, 15);
}

#[test]
fn voice_coalescing_lands_on_reconnect_with_latest_channel() {
    let mut queue = VoiceQueue::new();
    let guild = Snowflake::new(1);

    queue.queue_connect(guild, Snowflake::new(10), 0);
    queue.queue_disconnect(guild, 0);
    queue.queue_connect(guild, Snowflake::new(20), 0);

    let request = queue.get(guild).unwrap();
    assert_eq!(request.stage, ConnectionStage::Reconnect);
    assert_eq!(request.channel_id, Some(Snowflake::new(20)));

    // The reconnect plays out in two confirmed halves
    assert!(queue.update(guild, None, 1).is_none());
    let (ready, evicted) = queue.next_ready(1, &OpenCache);
    assert!(evicted.is_empty());
    assert_eq!(ready.unwrap().stage, ConnectionStage::Connect);
    let done = queue.update(guild, Some(Snowflake::new(20)), 2).unwrap();
    assert_eq!(done.channel_id, Some(Snowflake::new(20)));
    assert!(queue.is_empty());
}

#[test]
fn fatal_identity_codes_forbid_reconnect() {
    for raw in [4004u16, 4010, 4011] {
        let code = CloseCode::from_u16(raw).unwrap();
        assert!(!code.should_reconnect(), "{code} must be fatal");
    }
    // Server-requested reconnects close with 4000, which must be
    // recoverable, and unknown codes (including 1000) resume as well.
    assert!(CloseCode::from_u16(4000).unwrap().should_reconnect());
    assert!(CloseCode::from_u16(1000).is_none());
}

#[test]
fn zlib_stream_reassembles_split_messages() {
    use flate2::{Compress, Compression as Level, FlushCompress};

    let mut server = Compress::new(Level::default(), true);
    let mut decompressor = Decompressor::new(Compression::ZlibStream);

    let text = r#"{"op":0,"t":"READY","s":1,"d":{"session_id":"abc"}}"#;
    let mut frame = Vec::with_capacity(text.len() + 256);
    server
        .compress_vec(text.as_bytes(), &mut frame, FlushCompress::Sync)
        .unwrap();

    // The transport may deliver the message in arbitrary fragments
    let (a, rest) = frame.split_at(3);
    let (b, c) = rest.split_at(rest.len() / 2);
    assert!(decompressor.decompress(a).unwrap().is_none());
    assert!(decompressor.decompress(b).unwrap().is_none());
    assert_eq!(decompressor.decompress(c).unwrap().as_deref(), Some(text));
}

#[tokio::test]
async fn client_exposes_voice_lifecycle_through_the_public_api() {
    let client = GatewayClient::builder(GatewayConfig::new("token"))
        .arbiter(Arc::new(InertArbiter))
        .build();
    let guild = Snowflake::new(7);

    client.queue_audio_connect(guild, Snowflake::new(70));
    client.queue_audio_disconnect(guild);
    client.queue_audio_connect(guild, Snowflake::new(71));

    // Server confirms the disconnect half of the reconnect
    assert!(client.update_audio_connection(guild, None).is_none());
    // Then the connect half completes with the latest channel
    let done = client.update_audio_connection(guild, Some(Snowflake::new(71)));
    assert_eq!(done.unwrap().channel_id, Some(Snowflake::new(71)));
    assert!(client.remove_audio_connection(guild).is_none());
}
