use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BIN_NAME: &str = env!("CARGO_BIN_NAME");

#[derive(Parser, Debug)]
#[command(name = BIN_NAME)]
#[command(about = "Manage gallery upload requests", long_about = None)]
#[command(version = VERSION)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Color output mode (also respects NO_COLOR and FORCE_COLOR env vars)
    #[arg(long, visible_alias = "colour", value_enum, default_value = "auto", global = true)]
    color: ColorMode,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List requests in a guild
    List {
        #[arg(short, long)]
        guild: String,
        #[arg(short, long)]
        json: bool,
    },
    /// Show a single request
    Show { request_id: String },
    /// Approve a request
    Approve { request_id: String },
    /// Deny a request
    Deny { request_id: String },
    /// Close a request
    Close { request_id: String },
    /// Permanently delete a request
    Delete { request_id: String },
    /// Add a comment to a request
    Comment {
        request_id: String,
        content: String,
    },
}

#[derive(Debug, Deserialize, Serialize)]
struct UserRequest {
    id: String,
    guild_id: String,
    user_id: String,
    title: String,
    description: String,
    gallery_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChangeStatusRequest {
    action: &'static str,
}

#[derive(Debug, Serialize)]
struct AddCommentRequest {
    content: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{BIN_NAME}=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    configure_colors(args.color);

    let base_url =
        std::env::var("GALLERY_API_URL").unwrap_or_else(|_| "http://localhost:8080/api".to_string());
    let token = std::env::var("GALLERY_SESSION_TOKEN").unwrap_or_else(|_| {
        tracing::error!("GALLERY_SESSION_TOKEN is not set");
        process::exit(1);
    });

    let client = reqwest::Client::new();

    match args.command {
        Commands::List { guild, json } => run_list(&client, &base_url, &token, &guild, json).await,
        Commands::Show { request_id } => run_show(&client, &base_url, &token, &request_id).await,
        Commands::Approve { request_id } => {
            run_change_status(&client, &base_url, &token, &request_id, "approve").await
        }
        Commands::Deny { request_id } => {
            run_change_status(&client, &base_url, &token, &request_id, "deny").await
        }
        Commands::Close { request_id } => {
            run_change_status(&client, &base_url, &token, &request_id, "close").await
        }
        Commands::Delete { request_id } => run_delete(&client, &base_url, &token, &request_id).await,
        Commands::Comment { request_id, content } => {
            run_comment(&client, &base_url, &token, &request_id, content).await
        }
    }
}

async fn run_list(client: &reqwest::Client, base_url: &str, token: &str, guild: &str, json: bool) {
    let url = format!("{base_url}/requests?guild_id={guild}");
    let requests: Vec<UserRequest> = match send(client.get(&url), token).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list requests");
            process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&requests).unwrap());
        return;
    }

    if requests.is_empty() {
        println!("{}", "No requests found.".yellow());
        return;
    }

    for req in &requests {
        print_request(req);
    }
    println!("{} {} request(s)", "Total:".cyan().bold(), requests.len());
}

async fn run_show(client: &reqwest::Client, base_url: &str, token: &str, request_id: &str) {
    let url = format!("{base_url}/requests/{request_id}");
    match send::<UserRequest>(client.get(&url), token).await {
        Ok(req) => print_request(&req),
        Err(e) => {
            tracing::error!(error = %e, "Failed to fetch request");
            process::exit(1);
        }
    }
}

async fn run_change_status(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    request_id: &str,
    action: &'static str,
) {
    let url = format!("{base_url}/requests/{request_id}/status");
    let body = ChangeStatusRequest { action };
    match send::<UserRequest>(client.post(&url).json(&body), token).await {
        Ok(req) => {
            println!("{}", format!("✓ Request {action}d").green().bold());
            print_request(&req);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to {action} request");
            process::exit(1);
        }
    }
}

async fn run_delete(client: &reqwest::Client, base_url: &str, token: &str, request_id: &str) {
    let url = format!("{base_url}/requests/{request_id}");
    let response = match client
        .delete(&url)
        .bearer_auth(token)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "Failed to delete request");
            process::exit(1);
        }
    };

    if response.status().is_success() {
        println!("{}", "✓ Request deleted".green().bold());
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Delete failed - HTTP {}: {}", status, body);
        process::exit(1);
    }
}

async fn run_comment(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    request_id: &str,
    content: String,
) {
    let url = format!("{base_url}/requests/{request_id}/comments");
    let body = AddCommentRequest { content };
    match client.post(&url).bearer_auth(token).json(&body).send().await {
        Ok(response) if response.status().is_success() => {
            println!("{}", "✓ Comment added".green().bold());
        }
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Failed to add comment - HTTP {}: {}", status, body);
            process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to add comment");
            process::exit(1);
        }
    }
}

async fn send<T: serde::de::DeserializeOwned>(
    builder: reqwest::RequestBuilder,
    token: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    let response = builder.bearer_auth(token).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("HTTP {status}: {body}").into());
    }
    Ok(response.json::<T>().await?)
}

fn print_request(req: &UserRequest) {
    println!("{}", "-".repeat(50).bright_black());
    println!("  {:>10}  {}", "Id:".cyan().bold(), req.id);
    println!("  {:>10}  {}", "Guild:".cyan().bold(), req.guild_id);
    println!("  {:>10}  {}", "Owner:".cyan().bold(), req.user_id);
    println!("  {:>10}  {}", "Title:".cyan().bold(), req.title);
    println!("  {:>10}  {}", "Status:".cyan().bold(), colorize_status(&req.status));
    if let Some(gallery_id) = &req.gallery_id {
        println!("  {:>10}  {}", "Gallery:".cyan().bold(), gallery_id);
    }
    println!(
        "  {:>10}  {}",
        "Created:".cyan().bold(),
        req.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().bright_black()
    );
    if let Some(closed_at) = &req.closed_at {
        println!(
            "  {:>10}  {} by {}",
            "Closed:".cyan().bold(),
            closed_at.format("%Y-%m-%d %H:%M:%S UTC"),
            req.closed_by.as_deref().unwrap_or("unknown")
        );
    }
}

fn colorize_status(status: &str) -> String {
    match status {
        "Open" => status.blue().to_string(),
        "Approved" => status.green().to_string(),
        "Denied" | "Cancelled" => status.red().to_string(),
        "Closed" => status.bright_black().to_string(),
        other => other.to_string(),
    }
}

fn configure_colors(mode: ColorMode) {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
        return;
    }
    if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
        return;
    }
    match mode {
        ColorMode::Auto => {}
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
    }
}
