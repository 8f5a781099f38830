//! ACI.dev MCP Gateway CLI
//!
//! Run with: cargo run --bin gateway -- <command>
//! Or after build: ./target/release/gateway <command>

#[tokio::main]
async fn main() {
    // Load .env before the config reads the environment
    let _ = dotenvy::dotenv();

    aci_gateway::init_logging();

    if let Err(e) = aci_gateway::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
