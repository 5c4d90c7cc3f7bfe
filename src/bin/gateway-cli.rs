use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the dispatch gateway", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List all routes
    Routes,
    /// Show one route
    Route { id: String },
    /// Override a route's static fallback target
    SetTarget { id: String, url: String },
    /// Aggregate route and service health
    Health,
    /// Request, load balancer and breaker counters
    Metrics,
    /// List circuit breakers
    Breakers,
    /// Close a circuit breaker
    ResetBreaker { key: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Routes => client.get(format!("{}/admin/routes", base)),
        Commands::Route { id } => client.get(format!("{}/admin/routes/{}", base, id)),
        Commands::SetTarget { id, url } => client
            .put(format!("{}/admin/routes/{}/target", base, id))
            .json(&json!({ "target": url })),
        Commands::Health => client.get(format!("{}/admin/health", base)),
        Commands::Metrics => client.get(format!("{}/admin/metrics", base)),
        Commands::Breakers => client.get(format!("{}/admin/breakers", base)),
        Commands::ResetBreaker { key } => {
            client.post(format!("{}/admin/breakers/{}/reset", base, key))
        }
    };

    let ok = print_response(request.send().await?).await?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };

    if status.is_success() {
        println!("{}", rendered);
        Ok(true)
    } else {
        eprintln!("Error: Admin API returned status {}", status);
        eprintln!("{}", rendered);
        Ok(false)
    }
}
