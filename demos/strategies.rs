//! Strategy comparison demo.
//!
//! Run with:
//! ```
//! cargo run --example strategies --features memory
//! ```

use skp_ratelimit::{FixedWindow, Identity, Limit, MemoryStorage, MovingWindow, SlidingWindowCounter, Strategy};

#[tokio::main]
async fn main() {
    let storage = MemoryStorage::new();
    let limit = Limit::new(5, 10, "ten_seconds");
    let identity = Identity::new("demo");

    println!("=== Strategy Comparison Demo ===\n");
    println!("Limit: 5 hits / 10s\n");

    run("Fixed Window", FixedWindow::new(), &storage, &limit, &identity).await;

    let storage = MemoryStorage::new();
    run("Moving Window", MovingWindow::new(), &storage, &limit, &identity).await;

    let storage = MemoryStorage::new();
    run("Sliding Window Counter", SlidingWindowCounter::new(), &storage, &limit, &identity).await;
}

async fn run<S: Strategy<MemoryStorage>>(
    name: &str,
    strategy: S,
    storage: &MemoryStorage,
    limit: &Limit,
    identity: &Identity,
) {
    print!("{name:24} | ");
    let mut results = Vec::new();
    for _ in 0..8 {
        let admitted = strategy.hit(storage, limit, identity).await.unwrap();
        results.push(if admitted { "admit" } else { "deny " });
    }
    println!("{}", results.join(" "));

    let stats = strategy.get_window_stats(storage, limit, identity).await.unwrap();
    println!("{:24}   remaining={} reset_epoch={:.1}", "", stats.remaining, stats.reset_epoch);
}
