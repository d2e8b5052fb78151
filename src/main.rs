#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clinic_chat::app::run().await
}
