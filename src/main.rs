#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = lidlink::run().await {
        log::error!("[lid] {}", e);
        std::process::exit(1);
    }
}
