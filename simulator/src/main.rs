mod host;
mod room;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
