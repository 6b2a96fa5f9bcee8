#[tokio::main]
async fn main() -> anyhow::Result<()> {
    powermate_simulator::run().await
}
