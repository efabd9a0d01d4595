//! Demo that renders a sample batch and pushes it through the dispatcher
//! (log only, unless BOT_TOKEN and CHAT_ID are set).

use std::sync::Arc;

use mercari_watch::aggregate::{aggregate, TELEGRAM_MAX_CHARS};
use mercari_watch::classify::ClassificationKind;
use mercari_watch::dispatch::local::LogTransport;
use mercari_watch::dispatch::telegram::TelegramTransport;
use mercari_watch::dispatch::{DispatchPolicy, Dispatcher, Transport};
use mercari_watch::listing::Listing;
use mercari_watch::poller::{BatchItem, NotificationBatch};

fn sample(title: &str, price: u64, kind: ClassificationKind) -> BatchItem {
    let slug = title.to_lowercase().replace(' ', "-");
    BatchItem {
        listing: Listing {
            title: title.into(),
            price: format!("¥{price}"),
            url: format!("https://jp.mercari.com/item/{slug}"),
            image_url: format!("https://static.mercdn.net/item/{slug}.jpg"),
            listed_at: None,
        },
        kind,
        price,
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::from_filename("key.env");
    tracing_subscriber::fmt().with_target(false).init();

    let transport: Arc<dyn Transport> =
        match (std::env::var("BOT_TOKEN"), std::env::var("CHAT_ID")) {
            (Ok(token), Ok(chat)) => Arc::new(TelegramTransport::new(token, chat)),
            _ => Arc::new(LogTransport),
        };
    let dispatcher = Dispatcher::new(transport, DispatchPolicy::default());

    let batch = NotificationBatch {
        display_name: "PS3 slim".into(),
        items: vec![
            sample("PS3 CECH-2000 <boxed>", 4800, ClassificationKind::New),
            sample("PS3 slim 120GB", 3500, ClassificationKind::PriceChanged { previous: 4200 }),
            sample("PS3 controller set", 2200, ClassificationKind::New),
        ],
    };

    for msg in aggregate(&batch, TELEGRAM_MAX_CHARS) {
        match dispatcher.dispatch(&msg.text).await {
            Ok(ack) => println!("sent {} item(s) in {} attempt(s)", msg.items, ack.attempts),
            Err(e) => eprintln!("not sent: {e}"),
        }
    }

    println!("notify-demo done");
}
