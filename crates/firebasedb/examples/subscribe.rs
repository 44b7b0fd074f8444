//! Stream change events from a Firebase Realtime Database location.
//!
//! ```sh
//! cargo run -p firebasedb --example subscribe -- <DATABASE_URL> [PATH]
//! ```
//!
//! Pass a database secret or ID token via environment variable:
//! ```sh
//! FIREBASE_AUTH=... cargo run -p firebasedb --example subscribe \
//!     -- https://dinosaur-facts.firebaseio.com/ dinosaurs
//! ```
//!
//! Event payloads are printed to stdout (pipe to `jq` for formatting).
//! Press Ctrl-C to close the subscription.

use firebasedb::{EventKind, Reference};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let url = args
        .first()
        .ok_or("usage: subscribe <DATABASE_URL> [PATH]")?;
    let auth = std::env::var("FIREBASE_AUTH").unwrap_or_default();

    let mut reference = Reference::new(url, &auth)?;
    if let Some(path) = args.get(1) {
        reference = reference.child(path);
    }

    eprintln!("subscribing to '{reference}' ...");
    let mut sub = reference.subscribe().await?;
    let mut errors = sub.decode_errors();

    loop {
        tokio::select! {
            event = sub.next() => {
                let Some(event) = event else {
                    eprintln!("[stream ended]");
                    break;
                };
                match event.kind() {
                    EventKind::Put | EventKind::Patch => {
                        let payload = event.decode::<serde_json::Value>()?;
                        eprintln!("[{}] path={}", event.event_type(), payload.path);
                        println!("{}", payload.data);
                    }
                    EventKind::Cancel | EventKind::AuthRevoked => {
                        eprintln!("[{}] {}", event.event_type(), event.raw_data());
                        break;
                    }
                    _ => eprintln!("[{}]", event.event_type()),
                }
            }
            Ok(err) = errors.recv() => {
                eprintln!("[malformed frame] {err}");
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("[interrupted]");
                break;
            }
        }
    }

    if let Err(e) = sub.close().await {
        eprintln!("[close] {e}");
    }
    Ok(())
}
