// Copyright 2026 Martin Pool.

//! Retrying interrupted transfers through the same buffer.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};

use assert_fs::prelude::*;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use super::*;

/// Start reading a 50 byte file in 10 byte chunks, failing after chunk 2.
fn interrupted_download(fixture: &mut Fixture) -> Vec<u8> {
    let data = content(50);
    fixture.served.child("f").write_binary(&data).unwrap();
    fixture.channel.fail_chunks_after(2);
    let err = fixture
        .session
        .read_all("/f", fixture.buffer.path())
        .unwrap_err();
    assert_matches!(err, Error::Connect { .. });
    assert_eq!(
        fixture.chunk_calls(Verb::DownloadChunk),
        [(1, false), (2, false)]
    );
    fixture.channel.heal();
    data
}

#[test]
fn download_resumes_after_confirmed_chunks() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = interrupted_download(&mut fixture);
    let buffer = fixture.buffer.path().to_owned();
    let key = TransferKey::new(IDENTITY, &buffer, "/f");
    assert_eq!(fixture.session.caches().downloads.confirmed(&key), [1, 2]);

    let got = fixture.session.read_all("/f", &buffer).unwrap();
    assert_eq!(got, data);
    assert_eq!(
        fixture.chunk_calls(Verb::DownloadChunk),
        [(3, false), (4, false), (5, true)]
    );
    let counters = fixture.session.counters();
    assert_eq!(counters.get(Counter::ChunksFromBuffer), 2);
    assert_eq!(counters.get(Counter::ChunksDownloaded), 5);
    assert!(fixture.session.caches().downloads.is_empty());
}

#[test]
fn clone_resumes_a_download() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = interrupted_download(&mut fixture);
    let mut clone = fixture.session.clone();
    let got = clone.read_all("/f", fixture.buffer.path()).unwrap();
    assert_eq!(got, data);
    assert_eq!(fixture.chunk_calls(Verb::DownloadChunk).len(), 3);
}

#[test]
fn identities_sharing_a_buffer_keep_their_own_chunks() {
    let served = TempDir::new().unwrap();
    let buffer = TempDir::new().unwrap();
    let data = content(50);
    served.child("f").write_binary(&data).unwrap();
    let credentials: HashMap<String, String> = [
        (IDENTITY.to_owned(), CREDENTIAL.to_owned()),
        ("bob".to_owned(), "hunter2".to_owned()),
    ]
    .into();
    let dispatcher =
        Dispatcher::new(served.path(), Box::new(credentials)).with_login_delay(Duration::ZERO);
    let channel = LoopbackChannel::new(Arc::new(dispatcher));
    let caches = TransferCaches::new();
    let login = |identity: &str, credential: &str| {
        Session::login_with(
            Box::new(channel.clone()),
            identity,
            credential,
            SessionConfig::default().with_chunk_size(10),
            Arc::clone(&caches),
        )
        .unwrap()
    };
    let mut alice = login(IDENTITY, CREDENTIAL);
    let mut bob = login("bob", "hunter2");

    channel.fail_chunks_after(2);
    alice.read_all("/f", buffer.path()).unwrap_err();
    channel.heal();
    // Bob's completed download clears only his own spill area.
    assert_eq!(bob.read_all("/f", buffer.path()).unwrap(), data);
    channel.take_calls();

    assert_eq!(alice.read_all("/f", buffer.path()).unwrap(), data);
    assert_eq!(
        chunk_calls(&channel, Verb::DownloadChunk),
        [(3, false), (4, false), (5, true)]
    );
}

#[test]
fn other_buffer_starts_from_scratch() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = interrupted_download(&mut fixture);
    let other = TempDir::new().unwrap();
    let got = fixture.session.read_all("/f", other.path()).unwrap();
    assert_eq!(got, data);
    assert_eq!(fixture.chunk_calls(Verb::DownloadChunk).len(), 5);
}

#[test]
fn forgotten_transfers_start_from_scratch() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = interrupted_download(&mut fixture);
    assert_eq!(fixture.session.forget_transfers(), 1);
    let got = fixture
        .session
        .read_all("/f", fixture.buffer.path())
        .unwrap();
    assert_eq!(got, data);
    assert_eq!(fixture.chunk_calls(Verb::DownloadChunk).len(), 5);
}

#[test]
fn chunks_lost_from_the_buffer_are_fetched_again() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = interrupted_download(&mut fixture);
    for entry in fs::read_dir(fixture.buffer.path()).unwrap() {
        fs::remove_dir_all(entry.unwrap().path()).unwrap();
    }
    let got = fixture
        .session
        .read_all("/f", fixture.buffer.path())
        .unwrap();
    assert_eq!(got, data);
    assert_eq!(fixture.chunk_calls(Verb::DownloadChunk).len(), 5);
    assert_eq!(fixture.session.counters().get(Counter::ChunksFromBuffer), 0);
}

#[test]
fn upload_resume_skips_delivered_chunks() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = content(50);
    let buffer = fixture.buffer.path().to_owned();
    fixture.channel.fail_chunks_after(2);
    let mut writer = fixture.session.open_write("/f", &buffer, Some(50)).unwrap();
    let err = writer.write_all(&data).unwrap_err();
    assert_matches!(Error::from_io(&buffer, err), Error::Connect { .. });
    drop(writer);
    assert_eq!(
        fixture.chunk_calls(Verb::UploadChunk),
        [(1, false), (2, false)]
    );
    let key = TransferKey::new(IDENTITY, &buffer, "/f");
    assert_eq!(fixture.session.caches().uploads.confirmed(&key), [1, 2]);

    fixture.channel.heal();
    let mut writer = fixture.session.open_write("/f", &buffer, Some(50)).unwrap();
    writer.write_all(&data).unwrap();
    let outcome = writer.finish().unwrap();
    assert_eq!(
        outcome,
        UploadOutcome::Completed {
            len: 50,
            chunks_sent: 3,
            chunks_skipped: 2
        }
    );
    assert_eq!(
        fixture.chunk_calls(Verb::UploadChunk),
        [(3, false), (4, false), (5, false)]
    );
    assert_eq!(fs::read(fixture.served.child("f").path()).unwrap(), data);
    assert_eq!(fixture.session.counters().get(Counter::ChunksSkipped), 2);
    assert!(fixture.session.caches().uploads.is_empty());
}

#[test]
fn aborted_upload_continues_with_the_rest() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = content(35);
    let buffer = fixture.buffer.path().to_owned();

    let mut writer = fixture.session.open_write("/f", &buffer, Some(35)).unwrap();
    writer.write_all(&data[..22]).unwrap();
    assert_matches!(writer.finish().unwrap(), UploadOutcome::Aborted { written: 22, .. });
    assert_eq!(fixture.chunk_calls(Verb::UploadChunk).len(), 2);

    fixture.session.write_all("/f", &buffer, &data).unwrap();
    assert_eq!(
        fixture.chunk_calls(Verb::UploadChunk),
        [(3, false), (4, true)]
    );
    assert_eq!(fs::read(fixture.served.child("f").path()).unwrap(), data);
}

#[test]
fn resumed_download_reads_like_a_fresh_one() {
    let mut fixture = Fixture::with_chunk_size(10);
    let data = interrupted_download(&mut fixture);
    let buffer = fixture.buffer.path().to_owned();
    let mut reader = fixture.session.open_read("/f", &buffer).unwrap();
    let mut first = [0u8; 15];
    reader.read_exact(&mut first).unwrap();
    assert_eq!(first[..], data[..15]);
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, data[15..]);
    assert_eq!(reader.state(), ReadState::Complete);
}
