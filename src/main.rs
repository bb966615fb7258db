#[tokio::main]
async fn main() -> anyhow::Result<()> {
    finance_ledger::cli::run_with_sys_args().await
}
