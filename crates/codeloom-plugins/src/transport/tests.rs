//! Unit tests for frame reading and writing.

use rstest::rstest;

use super::*;

async fn read_all(input: &[u8]) -> Result<Vec<Vec<u8>>, TransportError> {
    let mut reader = FrameReader::new(input);
    let mut frames = Vec::new();
    while let Some(frame) = reader.read_frame().await? {
        frames.push(frame);
    }
    Ok(frames)
}

#[rstest]
#[tokio::test]
async fn writes_length_prefixed_frames() {
    let mut buffer = Vec::new();
    let mut writer = FrameWriter::new(&mut buffer);

    writer.write_frame(b"test payload").await.expect("write");

    assert_eq!(buffer, b"Content-Length: 12\r\n\r\ntest payload");
}

#[rstest]
#[tokio::test]
async fn reads_consecutive_frames() {
    let input = b"Content-Length: 2\r\n\r\n{}Content-Length: 4\r\n\r\nnull";

    let frames = read_all(input).await.expect("read");

    assert_eq!(frames, vec![b"{}".to_vec(), b"null".to_vec()]);
}

#[rstest]
#[case::lowercase(b"content-length: 2\r\n\r\n{}".as_slice())]
#[case::extra_header(b"Content-Type: application/json\r\nContent-Length: 2\r\n\r\n{}".as_slice())]
#[case::bare_newlines(b"Content-Length:2\n\n{}".as_slice())]
#[tokio::test]
async fn tolerates_header_variants(#[case] input: &[u8]) {
    let frames = read_all(input).await.expect("read");

    assert_eq!(frames, vec![b"{}".to_vec()]);
}

#[rstest]
#[tokio::test]
async fn clean_eof_ends_the_stream() {
    let frames = read_all(b"").await.expect("read");

    assert!(frames.is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_length_is_rejected() {
    let error = read_all(b"Content-Type: text/plain\r\n\r\n")
        .await
        .expect_err("no length");

    assert!(matches!(error, TransportError::MissingContentLength));
}

#[rstest]
#[case::not_a_number(b"Content-Length: many\r\n\r\n".as_slice())]
#[case::no_colon(b"garbage\r\n\r\n".as_slice())]
#[tokio::test]
async fn invalid_headers_are_rejected(#[case] input: &[u8]) {
    let error = read_all(input).await.expect_err("bad header");

    assert!(matches!(error, TransportError::InvalidHeader { .. }));
}

#[rstest]
#[tokio::test]
async fn truncated_body_is_an_io_error() {
    let error = read_all(b"Content-Length: 10\r\n\r\nshort")
        .await
        .expect_err("truncated");

    assert!(matches!(error, TransportError::Io(_)));
}

#[rstest]
#[tokio::test]
async fn frames_survive_a_duplex_pipe() {
    let (client, server) = tokio::io::duplex(64);
    let mut writer = FrameWriter::new(client);
    let mut reader = FrameReader::new(server);

    let payload = vec![b'x'; 1000];
    let send = async {
        writer.write_frame(&payload).await.expect("write");
        writer.close().await.expect("close");
    };
    let receive = async {
        let frame = reader.read_frame().await.expect("read");
        let end = reader.read_frame().await.expect("read eof");
        (frame, end)
    };
    let ((), (frame, end)) = tokio::join!(send, receive);

    assert_eq!(frame, Some(payload.clone()));
    assert!(end.is_none());
}
