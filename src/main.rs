#[tokio::main]
async fn main() {
    if let Err(error) = signal_feed_lib::logging::init_tracing() {
        eprintln!("{error}");
    }

    if let Err(error) = signal_feed_lib::run().await {
        tracing::error!(%error, "signal feed failed");
        std::process::exit(1);
    }
}
