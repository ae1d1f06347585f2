//! Framing codec tests.

use tasker_protocol::DelegateMessage;
use tasker_protocol::codec::{
    FrameError, MAX_FRAME_SIZE, read_frame, read_message, write_frame, write_message,
};

async fn roundtrip(msg: &DelegateMessage) -> DelegateMessage {
    let mut buf = Vec::new();
    write_message(&mut buf, msg).await.unwrap();

    let mut cursor = std::io::Cursor::new(buf);
    read_message(&mut cursor).await.unwrap()
}

#[tokio::test]
async fn codec_roundtrip() {
    let msg = DelegateMessage::new("eyJhY3Rpb24iOiJnZXRfdGFza2luZyJ9");
    assert_eq!(roundtrip(&msg).await, msg);
}

#[tokio::test]
async fn codec_roundtrip_empty_message() {
    let msg = DelegateMessage::new("");
    assert_eq!(roundtrip(&msg).await, msg);
}

#[tokio::test]
async fn codec_roundtrip_various_sizes() {
    for size in [1usize, 255, 4096, 65_537, 1024 * 1024] {
        let msg = DelegateMessage::new("x".repeat(size));
        assert_eq!(roundtrip(&msg).await, msg, "size {size}");
    }
}

#[tokio::test]
async fn codec_zero_length_frame() {
    let mut buf = Vec::new();
    write_frame(&mut buf, b"").await.unwrap();
    assert_eq!(buf.len(), 4);

    let mut cursor = std::io::Cursor::new(buf);
    let payload = read_frame(&mut cursor).await.unwrap();
    assert!(payload.is_empty());
}

#[tokio::test]
async fn codec_native_endian_header() {
    let msg = DelegateMessage::new("abc");
    let mut buf = Vec::new();
    write_message(&mut buf, &msg).await.unwrap();

    let json = serde_json::to_vec(&msg).unwrap();
    assert_eq!(&buf[..4], &(json.len() as u32).to_ne_bytes());
    assert_eq!(&buf[4..], json.as_slice());
}

#[tokio::test]
async fn codec_back_to_back_frames() {
    let mut buf = Vec::new();
    write_message(&mut buf, &DelegateMessage::new("one")).await.unwrap();
    write_message(&mut buf, &DelegateMessage::new("two")).await.unwrap();

    let mut cursor = std::io::Cursor::new(buf);
    let first: DelegateMessage = read_message(&mut cursor).await.unwrap();
    let second: DelegateMessage = read_message(&mut cursor).await.unwrap();
    assert_eq!(first.message, "one");
    assert_eq!(second.message, "two");
}

#[tokio::test]
async fn codec_too_large() {
    let len: u32 = MAX_FRAME_SIZE + 1;
    let mut buf = Vec::new();
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(b"{}");

    let mut cursor = std::io::Cursor::new(buf);
    let result: Result<DelegateMessage, _> = read_message(&mut cursor).await;
    assert!(matches!(result, Err(FrameError::TooLarge { .. })));
}

#[tokio::test]
async fn codec_truncated_payload() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&10u32.to_ne_bytes());
    buf.extend_from_slice(b"{\"me");

    let mut cursor = std::io::Cursor::new(buf);
    let result = read_frame(&mut cursor).await;
    assert!(matches!(result, Err(FrameError::Io(_))));
}

#[tokio::test]
async fn codec_invalid_json() {
    let mut buf = Vec::new();
    write_frame(&mut buf, b"not json").await.unwrap();

    let mut cursor = std::io::Cursor::new(buf);
    let result: Result<DelegateMessage, _> = read_message(&mut cursor).await;
    assert!(matches!(result, Err(FrameError::Json(_))));
}

#[tokio::test]
async fn codec_connection_closed() {
    let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
    let result: Result<DelegateMessage, _> = read_message(&mut cursor).await;
    assert!(matches!(result, Err(FrameError::ConnectionClosed)));
}
