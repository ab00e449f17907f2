// Copyright 2026 Martin Pool.

//! Directory listings and listing filters.

use assert_fs::prelude::*;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use super::*;

fn populate(fixture: &Fixture) {
    for name in ["b.txt", "a.txt", "c.log", "null", "%41"] {
        fixture.served.child(name).touch().unwrap();
    }
    fixture.served.child("sub").create_dir_all().unwrap();
}

#[test]
fn missing_directory_is_none_and_empty_is_empty() {
    let mut fixture = Fixture::new();
    fixture.served.child("empty").create_dir_all().unwrap();
    fixture.served.child("file").touch().unwrap();
    let session = &mut fixture.session;
    assert_eq!(session.list("/nothing", None).unwrap(), None);
    assert_eq!(session.list("/file", None).unwrap(), None);
    assert_eq!(session.list("/empty", None).unwrap(), Some(vec![]));
}

#[test]
fn names_survive_encoding() {
    let mut fixture = Fixture::new();
    populate(&fixture);
    fixture.served.child("sub/line\nbreak").touch().unwrap();
    let names = fixture.session.list("/", None).unwrap().unwrap();
    assert_eq!(names, ["%41", "a.txt", "b.txt", "c.log", "null", "sub"]);
    let names = fixture.session.list("/sub", None).unwrap().unwrap();
    assert_eq!(names, ["line\nbreak"]);
    assert_eq!(fixture.session.counters().get(Counter::Listings), 2);
}

#[test]
fn inline_filter() {
    let mut fixture = Fixture::new();
    populate(&fixture);
    let filter = ListFilter::matching(["*.txt"]);
    let names = fixture.session.list("/", Some(&filter)).unwrap().unwrap();
    assert_eq!(names, ["a.txt", "b.txt"]);
    let dirs = ListFilter::default().only(EntryKind::Dir);
    let names = fixture.session.list("/", Some(&dirs)).unwrap().unwrap();
    assert_eq!(names, ["sub"]);
    let verbs: Vec<Verb> = fixture.channel.calls().iter().map(|c| c.verb).collect();
    assert_eq!(verbs, [Verb::ListDir, Verb::ListDir]);
}

#[test]
fn filter_matching_nothing_is_empty() {
    let mut fixture = Fixture::new();
    populate(&fixture);
    let filter = ListFilter::matching(["*.rs"]);
    assert_eq!(
        fixture.session.list("/", Some(&filter)).unwrap(),
        Some(vec![])
    );
}

#[test]
fn large_filter_is_sent_by_reference() {
    let config = SessionConfig {
        filter_inline_limit: 8,
        ..SessionConfig::default()
    };
    let mut fixture = Fixture::with_config(config);
    populate(&fixture);
    let filter = ListFilter::matching(["*.log", "a.*"]).only(EntryKind::File);
    let names = fixture.session.list("/", Some(&filter)).unwrap().unwrap();
    assert_eq!(names, ["a.txt", "c.log"]);
    let calls = fixture.channel.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].verb, Verb::PutFilter);
    assert!(calls[0].path.ends_with(".filter"));
    assert_eq!(calls[1].verb, Verb::ListDir);
}

#[test]
fn bad_pattern_is_rejected_by_the_server() {
    let mut fixture = Fixture::new();
    populate(&fixture);
    let filter = ListFilter::matching(["a[.txt"]);
    let err = fixture.session.list("/", Some(&filter)).unwrap_err();
    assert_matches!(&err, Error::Remote(remote) if remote.kind == RemoteKind::BadArgument);
}
