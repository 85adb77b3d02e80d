use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = teeproxy::cli::Cli::parse();
    if let Err(e) = teeproxy::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
