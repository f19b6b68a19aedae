//! Inspect a running tsdb-load

use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    host: String,
    /// Print the raw JSON status document.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let client = reqwest::Client::new();
    match client
        .get(&args.host)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                let status = match resp.json::<tsdb_load::rest::Status>().await {
                    Ok(status) => status,
                    Err(e) => {
                        eprintln!("Failed to fetch load status on {}: {}", args.host, e);
                        std::process::exit(1);
                    }
                };
                if args.json {
                    match serde_json::to_string_pretty(&status) {
                        Ok(json) => println!("{json}"),
                        Err(e) => eprintln!("Failed to render load status: {}", e),
                    }
                } else {
                    print!("{status}");
                }
            } else {
                eprintln!(
                    "Failed to get load status on {}: {}",
                    args.host,
                    resp.status()
                );
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to get load status on {}: {}", args.host, e);
            std::process::exit(1);
        }
    }
}
