// Copyright 2026 Martin Pool.

//! Reading remote files, whole and in chunks.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use assert_fs::prelude::*;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;

fn buffer_is_empty(fixture: &Fixture) -> bool {
    fs::read_dir(fixture.buffer.path()).unwrap().next().is_none()
}

#[test]
fn twenty_five_bytes_in_three_chunks() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = content(25);
    fixture.served.child("f").write_binary(&data).unwrap();
    let buffer = fixture.buffer.path().to_owned();

    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    assert_eq!(reader.state(), ReadState::NotStarted);
    let mut got = Vec::new();
    reader.read_to_end(&mut got).unwrap();
    assert_eq!(reader.state(), ReadState::Complete);
    assert_eq!(reader.remote_len(), Some(25));
    assert_eq!(reader.position(), 25);
    assert!(reader.is_chunked());
    drop(reader);
    assert_eq!(got, data);

    assert_eq!(
        fixture.chunk_calls(Verb::DownloadChunk),
        [(1, false), (2, false), (3, true)]
    );
    let counters = fixture.session.counters();
    assert_eq!(counters.get(Counter::ChunksDownloaded), 3);
    assert_eq!(counters.get(Counter::BytesReceived), 25);
    assert!(fixture.session.caches().downloads.is_empty());
    assert!(buffer_is_empty(&fixture));
}

#[test]
fn first_request_probes_the_length() {
    let mut fixture = Fixture::with_chunk_size(10);
    fixture.served.child("f").write_binary(&content(30)).unwrap();
    fixture
        .session
        .read_all("/f", fixture.buffer.path())
        .unwrap();
    let calls = fixture.channel.take_calls();
    assert_eq!(calls[0], Call::new(Verb::Metadata, "/f"));
    assert_eq!(
        calls[1..]
            .iter()
            .map(|c| c.path.as_str())
            .collect::<Vec<_>>(),
        ["/f.1.chunk", "/f.2.chunk", "/f.3.chunk.LASTCHUNK"]
    );
}

#[rstest]
#[case::fits_in_one_chunk(10, 10)]
#[case::smaller_than_a_chunk(10, 3)]
#[case::chunking_disabled(0, 1000)]
fn single_request_when_chunking_is_not_needed(#[case] chunk_size: u64, #[case] len: usize) {
    let mut fixture = Fixture::with_chunk_size(chunk_size);
    let data = content(len);
    fixture.served.child("f").write_binary(&data).unwrap();
    let buffer = fixture.buffer.path().to_owned();
    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    let mut got = Vec::new();
    reader.read_to_end(&mut got).unwrap();
    assert!(!reader.is_chunked());
    drop(reader);
    assert_eq!(got, data);
    let verbs: Vec<Verb> = fixture
        .channel
        .take_calls()
        .into_iter()
        .map(|c| c.verb)
        .collect();
    assert_eq!(verbs, [Verb::Metadata, Verb::Download]);
}

#[rstest]
#[case::whole(0)]
#[case::chunked(2)]
fn file_named_like_a_chunk(#[case] chunk_size: u64) {
    let mut fixture = Fixture::with_chunk_size(chunk_size);
    fixture.served.child("log.1.chunk").write_str("hello").unwrap();
    let buffer = fixture.buffer.path().to_owned();
    assert_eq!(fixture.session.length("/log.1.chunk").unwrap(), 5);
    let got = fixture.session.read_all("/log.1.chunk", &buffer).unwrap();
    assert_eq!(&got[..], b"hello");
}

#[test]
fn missing_file_fails_without_bytes() {
    let mut fixture = Fixture::with_chunk_size(10);
    let buffer = fixture.buffer.path().to_owned();
    let mut reader = fixture.session.open_read("/missing", &buffer).unwrap();
    let mut buf = [0u8; 16];
    let err = reader.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    assert_eq!(reader.state(), ReadState::Failed);
    assert_eq!(reader.position(), 0);
    let err = Error::from_io(&buffer, err);
    assert!(err.is_not_found());
    assert_matches!(err, Error::Remote(RemoteError { kind: RemoteKind::NotFound, .. }));
    drop(reader);

    let err = fixture.session.read_all("/missing", &buffer).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn reading_exactly_the_length_completes() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = content(25);
    fixture.served.child("f").write_binary(&data).unwrap();
    let buffer = fixture.buffer.path().to_owned();
    let key = TransferKey::new(IDENTITY, &buffer, "/f");

    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    let mut got = [0u8; 25];
    reader.read_exact(&mut got).unwrap();
    assert_eq!(reader.state(), ReadState::Complete);
    reader.close();
    assert_eq!(got[..], data[..]);
    assert!(fixture.session.caches().downloads.confirmed(&key).is_empty());
    assert!(buffer_is_empty(&fixture));

    // A changed file is fetched again rather than served from old chunks.
    let changed = content(30).into_iter().rev().take(25).collect::<Vec<u8>>();
    fixture.served.child("f").write_binary(&changed).unwrap();
    fixture.channel.take_calls();
    assert_eq!(fixture.session.read_all("/f", &buffer).unwrap(), changed);
    assert_eq!(fixture.chunk_calls(Verb::DownloadChunk).len(), 3);
}

#[test]
fn reading_exactly_the_length_from_the_buffer_completes() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = content(30);
    let file = fixture.served.child("f");
    file.write_binary(&data).unwrap();
    let buffer = fixture.buffer.path().to_owned();
    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    let mut head = [0u8; 20];
    reader.read_exact(&mut head).unwrap();
    reader.close();

    // Now the confirmed chunks are the whole file.
    file.write_binary(&data[..20]).unwrap();
    fixture.channel.take_calls();
    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    let mut got = [0u8; 20];
    reader.read_exact(&mut got).unwrap();
    assert_eq!(reader.state(), ReadState::Complete);
    drop(reader);
    assert_eq!(got[..], data[..20]);
    assert!(fixture.chunk_calls(Verb::DownloadChunk).is_empty());
    assert_eq!(fixture.session.counters().get(Counter::ChunksFromBuffer), 2);
    assert!(fixture.session.caches().downloads.is_empty());
    assert!(buffer_is_empty(&fixture));
}

/// Rewrites a served file just before any streamed download, after the
/// length has been probed.
struct RewriteBeforeDownload {
    inner: LoopbackChannel,
    file: PathBuf,
    content: Vec<u8>,
}

impl Channel for RewriteBeforeDownload {
    fn send(&mut self, request: &envelope::Request) -> Result<envelope::Response> {
        self.inner.send(request)
    }

    fn send_with_attachment(
        &mut self,
        request: &envelope::Request,
        attachment: Attachment<'_>,
    ) -> Result<envelope::Response> {
        self.inner.send_with_attachment(request, attachment)
    }

    fn open_stream(
        &mut self,
        request: &envelope::Request,
    ) -> Result<Box<dyn Read + Send>> {
        fs::write(&self.file, &self.content).unwrap();
        self.inner.open_stream(request)
    }

    fn fresh(&self) -> Box<dyn Channel> {
        self.inner.fresh()
    }

    fn endpoint(&self) -> String {
        self.inner.endpoint()
    }
}

#[rstest]
#[case::shorter(5)]
#[case::longer(15)]
fn single_request_body_must_match_the_length(#[case] actual: usize) {
    let served = TempDir::new().unwrap();
    let buffer = TempDir::new().unwrap();
    served.child("f").write_binary(&content(10)).unwrap();
    let channel = RewriteBeforeDownload {
        inner: LoopbackChannel::new(dispatcher(&served, Duration::ZERO)),
        file: served.child("f").path().to_owned(),
        content: content(actual),
    };
    let mut session = Session::login_with(
        Box::new(channel),
        IDENTITY,
        CREDENTIAL,
        SessionConfig::default().with_chunk_size(0),
        TransferCaches::new(),
    )
    .unwrap();
    let err = session.read_all("/f", buffer.path()).unwrap_err();
    assert_matches!(err, Error::Protocol(_));
}

#[test]
fn failure_mid_transfer_delivers_no_partial_chunk() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = content(25);
    let file = fixture.served.child("f");
    file.write_binary(&data).unwrap();
    let buffer = fixture.buffer.path().to_owned();

    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    let mut got = [0u8; 20];
    reader.read_exact(&mut got).unwrap();
    assert_eq!(got[..], data[..20]);

    // Shrink the file so the third chunk starts past its end.
    file.write_binary(&data[..15]).unwrap();
    let mut rest = [0u8; 10];
    let err = reader.read(&mut rest).unwrap_err();
    assert_eq!(reader.state(), ReadState::Failed);
    assert_eq!(reader.position(), 20);
    let err = Error::from_io(&buffer, err);
    assert_eq!(err.kind(), ErrorKind::BadArgument);
    // And it stays failed.
    assert!(reader.read(&mut rest).is_err());
    drop(reader);

    let key = TransferKey::new(IDENTITY, &buffer, "/f");
    assert_eq!(fixture.session.caches().downloads.confirmed(&key), [1, 2]);
}

#[test]
fn small_reads_cross_chunk_boundaries() {
    let mut fixture = Fixture::with_chunk_size(7);
    let data = content(50);
    fixture.served.child("f").write_binary(&data).unwrap();
    let buffer = fixture.buffer.path().to_owned();
    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    let mut got = Vec::new();
    let mut buf = [0u8; 3];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        got.extend_from_slice(&buf[..n]);
    }
    drop(reader);
    assert_eq!(got, data);
    assert_eq!(fixture.chunk_calls(Verb::DownloadChunk).len(), 8);
}

#[test]
fn abandoned_reader_keeps_confirmed_chunks() {
    let mut fixture = Fixture::with_chunk_size(10);
    fixture.served.child("f").write_binary(&content(45)).unwrap();
    let buffer = fixture.buffer.path().to_owned();
    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    let mut head = [0u8; 25];
    reader.read_exact(&mut head).unwrap();
    reader.close();
    let key = TransferKey::new(IDENTITY, &buffer, "/f");
    assert_eq!(fixture.session.caches().downloads.confirmed(&key), [1, 2]);
    assert!(!buffer_is_empty(&fixture));
}

#[rstest]
fn round_trip_sizes(#[values(0, 1, 9, 10, 11, 100)] len: usize) {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = content(len);
    let buffer = fixture.buffer.path().to_owned();
    fixture.session.write_all("/f", &buffer, &data).unwrap();
    assert_eq!(fs::read(fixture.served.child("f").path()).unwrap(), data);
    let got = fixture.session.read_all("/f", &buffer).unwrap();
    assert_eq!(got, data);
    assert!(fixture.session.caches().uploads.is_empty());
    assert!(fixture.session.caches().downloads.is_empty());
    assert!(buffer_is_empty(&fixture));
}
