//! # Instrumentation Client Demo
//!
//! Runs a small workload through a [`Runtime`] and ships the result to a
//! collector.
//!
//! ## Features Demonstrated
//!
//! - Deferred identity: records buffered before identity is set
//! - Parent/child spans with inherited join ids
//! - Structured log payloads, including one rejected for depth
//! - Overflow with random replacement and the `dropped_logs` counter
//! - Auto-finish of a span dropped without `finish()`
//! - Fire-and-forget delivery over one persistent connection
//!
//! With no `--collector` argument a local sink is started that counts the
//! bytes it receives.
//!
//! ## Running
//!
//! ```bash
//! cargo run -p traceguide --bin demo
//! cargo run -p traceguide --bin demo -- --verbose
//! cargo run -p traceguide --bin demo -- --collector 127.0.0.1:9998
//! RUST_LOG=traceguide=trace cargo run -p traceguide --bin demo -- --verbose
//! ```

use serde_json::json;
use std::io::Read;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use traceguide::{LogLevel, Runtime, RuntimeOptions};
use tracing_subscriber::EnvFilter;

/// Accepts connections and counts received bytes until the process exits.
fn spawn_sink() -> Result<(u16, Arc<AtomicU64>), std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);

    std::thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || {
                let mut stream = stream;
                let mut buf = [0u8; 8192];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    counter.fetch_add(n as u64, Ordering::Relaxed);
                }
            });
        }
    });

    Ok((port, received))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose");
    let collector = args
        .iter()
        .position(|a| a == "--collector")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let default_filter = if verbose { "traceguide=debug" } else { "traceguide=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    println!("=== Traceguide Instrumentation Demo ===\n");

    let (host, port, sink) = match collector {
        Some(addr) => {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or("--collector expects host:port")?;
            (host.to_string(), port.parse::<u16>()?, None)
        }
        None => {
            let (port, received) = spawn_sink()?;
            ("127.0.0.1".to_string(), port, Some(received))
        }
    };
    println!("Collector: {host}:{port}");

    let options = RuntimeOptions::default()
        .with_secure(false)
        .with_service(host, port)
        .with_max_log_records(50)
        .with_reporting_period(Duration::from_millis(200))
        .with_max_payload_depth(3)
        .with_debug(verbose);
    let runtime = Runtime::new(options)?;

    // --- Deferred identity ---
    runtime.info("buffered before identity is known");
    runtime.flush();
    println!(
        "Pending before identity: {} logs (flush skipped)",
        runtime.pending().logs
    );
    runtime.set_identity("demo-service", "demo-access-token")?;
    println!("Runtime guid: {}", runtime.guid().unwrap_or_default());

    // --- Spans ---
    for request in 0..5 {
        let mut parent = runtime.start_span();
        parent
            .set_operation("http/checkout")
            .set_end_user_id(1000 + request)
            .add_trace_join_id("request_id", format!("req-{request}"));

        let mut child = runtime.start_span();
        child
            .set_operation("db/insert_order")
            .set_parent(&parent)
            .add_attribute("table", "orders");
        child.log(
            LogLevel::Info,
            "order inserted",
            Some(&json!({"order": {"id": request, "items": [1, 2, 3]}})),
        );
        if request == 3 {
            child.error("insert retried after deadlock");
        }
        child.finish();
        parent.finish();
    }

    // --- Payload rejection ---
    runtime.log(
        LogLevel::Warn,
        "payload too deep, sent without it",
        Some(&json!({"a": {"b": {"c": {"d": 1}}}})),
    );

    // --- Auto-finish ---
    {
        let mut forgotten = runtime.start_span();
        forgotten.set_operation("background/forgotten");
    }

    // --- Overflow ---
    for i in 0..200 {
        runtime.info(format!("burst {i}"));
    }
    let counters = runtime.counters();
    println!(
        "After burst: {} pending logs, {} dropped",
        runtime.pending().logs,
        counters.get("dropped_logs").copied().unwrap_or(0)
    );

    runtime.flush();
    runtime.shutdown();

    if let Some(received) = sink {
        std::thread::sleep(Duration::from_millis(100));
        println!(
            "Sink received {} bytes",
            received.load(Ordering::Relaxed)
        );
    }

    println!("\nDone.");
    Ok(())
}
