#[tokio::main]
async fn main() {
    crosswire::server::run().await;
}
