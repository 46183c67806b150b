#[tokio::main]
async fn main() {
    if let Err(e) = trace_relay::run_server().await {
        eprintln!("trace-relay failed: {e:#}");
        std::process::exit(1);
    }
}
