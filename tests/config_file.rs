// tests/config_file.rs
use std::fs;
use std::path::Path;
use std::time::Duration;

use mercari_watch::classify::PriceChangePolicy;
use mercari_watch::config::{self, parse_file_config, ConfigError, SourceSection};

#[test]
fn shipped_config_resolves_in_dry_run() {
    let content = fs::read_to_string("config/watch.toml").expect("config/watch.toml present");
    let s = parse_file_config(&content, "toml")
        .unwrap()
        .resolve(|_| None)
        .expect("dry run needs no credentials");

    assert!(s.dry_run);
    assert!(s.telegram.is_none());
    assert_eq!(
        s.keyword_names(),
        vec!["ps3 slim", "PS4 (cheap)", "gameboy advance"]
    );
    assert_eq!(s.keywords[1].search_term, "ps4");
    assert_eq!(s.keywords[1].price_min, Some(1000));
    assert_eq!(s.keywords[1].price_max, Some(15000));
    assert_eq!(s.keywords[2].title_must_contain, vec!["micro", "sp"]);
    assert_eq!(s.cycle_delay, Duration::from_secs(60));
    assert_eq!(s.dispatch.min_interval, Duration::from_millis(1100));
    assert_eq!(s.pricing.price_change, PriceChangePolicy::Any);
    assert!(matches!(s.source, SourceSection::Fixture { .. }));
}

#[test]
fn shipped_fixture_parses() {
    let content = fs::read_to_string("config/listings.fixture.json").unwrap();
    mercari_watch::source::fixture::FixtureSource::from_json(&content, 145.0).unwrap();
}

#[test]
fn load_from_reads_json_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watch.json");
    fs::write(
        &path,
        r#"{
            "dry_run": true,
            "metrics_addr": "127.0.0.1:9898",
            "pricing": {"usd_to_jpy": 150.0, "price_change": "drops_only"},
            "source": {"kind": "http", "endpoint": "http://127.0.0.1:8080/search"},
            "keywords": ["ps3", {"term": "ps4", "price_max": 20000}]
        }"#,
    )
    .unwrap();

    let s = config::load_from(&path).unwrap();
    assert_eq!(s.metrics_addr.unwrap().port(), 9898);
    assert_eq!(s.pricing.usd_to_jpy, Some(150.0));
    assert_eq!(s.pricing.price_change, PriceChangePolicy::DropsOnly);
    match s.source {
        SourceSection::Http {
            endpoint,
            page_size,
            ..
        } => {
            assert_eq!(endpoint, "http://127.0.0.1:8080/search");
            assert_eq!(page_size, 30);
        }
        other => panic!("unexpected source {other:?}"),
    }
}

#[test]
fn unknown_keys_and_empty_keyword_lists_are_rejected() {
    let typo = r#"
        keywords = ["ps3"]
        [delays]
        cycle_delay = 60
        [source]
        kind = "fixture"
        path = "x.json"
    "#;
    assert!(matches!(
        parse_file_config(typo, "toml"),
        Err(ConfigError::Parse(_))
    ));

    let none = r#"
        dry_run = true
        keywords = []
        [source]
        kind = "fixture"
        path = "x.json"
    "#;
    let err = parse_file_config(none, "toml")
        .unwrap()
        .resolve(|_| None)
        .unwrap_err();
    assert!(matches!(err, ConfigError::NoKeywords));
}

#[test]
fn missing_file_is_a_read_error() {
    let err = config::load_from(Path::new("does/not/exist.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn message_limit_outside_telegram_range_is_rejected() {
    let with_limit = |n: usize| {
        format!(
            r#"
            dry_run = true
            keywords = ["ps3"]
            [dispatcher]
            max_message_chars = {n}
            [source]
            kind = "fixture"
            path = "x.json"
        "#
        )
    };

    for bad in [100, 511, 4097] {
        let err = parse_file_config(&with_limit(bad), "toml")
            .unwrap()
            .resolve(|_| None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MessageLimit(n) if n == bad), "{err:?}");
    }

    let s = parse_file_config(&with_limit(512), "toml")
        .unwrap()
        .resolve(|_| None)
        .unwrap();
    assert_eq!(s.max_message_chars, 512);
}
