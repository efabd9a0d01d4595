// tests/aggregate_limits.rs
use mercari_watch::aggregate::{aggregate, TELEGRAM_MAX_CHARS};
use mercari_watch::classify::ClassificationKind;
use mercari_watch::listing::Listing;
use mercari_watch::poller::{BatchItem, NotificationBatch};

fn batch(n: usize, title_len: usize) -> NotificationBatch {
    let items = (0..n)
        .map(|i| BatchItem {
            listing: Listing {
                title: format!("item-{i:04} {}", "x".repeat(title_len)),
                price: format!("¥{}", 1000 + i),
                url: format!("https://jp.mercari.com/item/m{i:08}"),
                image_url: format!("https://static.mercdn.net/{i}.jpg"),
                listed_at: None,
            },
            kind: if i % 3 == 0 {
                ClassificationKind::PriceChanged {
                    previous: 5000 + i as u64,
                }
            } else {
                ClassificationKind::New
            },
            price: 1000 + i as u64,
        })
        .collect();
    NotificationBatch {
        display_name: "PS3 & friends".into(),
        items,
    }
}

fn item_ids(text: &str) -> Vec<String> {
    text.match_indices("item-")
        .map(|(at, _)| text[at..at + 9].to_string())
        .collect()
}

#[test]
fn big_batch_splits_under_limit_with_every_item_once_in_order() {
    let b = batch(200, 60);
    let msgs = aggregate(&b, TELEGRAM_MAX_CHARS);

    assert!(msgs.len() > 1, "200 long lines cannot fit one message");
    for m in &msgs {
        assert!(m.text.chars().count() <= TELEGRAM_MAX_CHARS);
    }

    let seen: Vec<String> = msgs.iter().flat_map(|m| item_ids(&m.text)).collect();
    let expected: Vec<String> = (0..200).map(|i| format!("item-{i:04}")).collect();
    assert_eq!(seen, expected);

    let carried: usize = msgs.iter().map(|m| m.items).sum();
    assert_eq!(carried, 200);
}

#[test]
fn follow_on_messages_repeat_the_header() {
    let msgs = aggregate(&batch(200, 60), TELEGRAM_MAX_CHARS);

    assert!(msgs[0].text.starts_with("🔍 <b>PS3 &amp; friends</b>: 200 new listings"));
    for m in &msgs[1..] {
        assert!(m.text.starts_with("🔍 <b>PS3 &amp; friends</b> (continued)"));
    }
}

#[test]
fn small_batch_is_a_single_message() {
    let msgs = aggregate(&batch(3, 10), TELEGRAM_MAX_CHARS);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].items, 3);
    assert!(msgs[0].text.contains("(was ¥5.000)"));
}

#[test]
fn tight_limit_still_delivers_everything() {
    let b = batch(30, 400);
    let msgs = aggregate(&b, 600);

    for m in &msgs {
        assert!(m.text.chars().count() <= 600, "{}", m.text.chars().count());
    }
    let carried: usize = msgs.iter().map(|m| m.items).sum();
    assert_eq!(carried, 30);
}

#[test]
fn small_limit_is_honoured_not_raised() {
    let msgs = aggregate(&batch(5, 60), 100);

    for m in &msgs {
        assert!(m.text.chars().count() <= 100, "{}", m.text);
    }
    let carried: usize = msgs.iter().map(|m| m.items).sum();
    assert_eq!(carried, 5);
}
