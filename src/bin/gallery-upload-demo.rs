//! Demo client exercising the chunked upload flow end to end: initiate,
//! stream chunks, finalize, then poll progress. Grounded on the teacher's
//! `upload_chunked` in `sw1nn-pkg-ctl.rs`, adapted to this crate's
//! initiate/chunk/finalize endpoints and gallery/guild request shape.

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "gallery-upload-demo")]
#[command(about = "Demo chunked upload client for the gallery backend", long_about = None)]
#[command(version = VERSION)]
struct Args {
    /// Path to the image file to upload
    file: String,

    /// Guild the gallery belongs to
    #[arg(short, long)]
    guild: String,

    /// Gallery name (created implicitly on first upload)
    #[arg(short = 'n', long)]
    gallery: String,

    /// Chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

#[derive(Debug, Serialize)]
struct InitiateUploadRequest {
    file_name: String,
    file_type: String,
    gallery_name: String,
    guild_id: String,
    total_size: u64,
}

#[derive(Debug, Deserialize)]
struct InitiateUploadResponse {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct UploadChunkResponse {
    success: bool,
    index: u32,
}

#[derive(Debug, Serialize)]
struct FinalizeRequest {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct FinalizeResponse {
    success: bool,
    file_path: String,
    checksums: FinalizeChecksums,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct FinalizeChecksums {
    crc32: String,
    md5: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gallery_upload_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let path = Path::new(&args.file);

    if !path.exists() {
        tracing::error!("File '{}' does not exist", args.file);
        process::exit(1);
    }

    let base_url =
        std::env::var("GALLERY_API_URL").unwrap_or_else(|_| "http://localhost:8080/api".to_string());
    let token = std::env::var("GALLERY_SESSION_TOKEN").unwrap_or_else(|_| {
        tracing::error!("GALLERY_SESSION_TOKEN is not set");
        process::exit(1);
    });

    let client = reqwest::Client::new();

    match run_upload(&client, &base_url, &token, path, &args).await {
        Ok(response) => {
            println!("\n{}", "✓ Upload complete".green().bold());
            println!("  {:>10}  {}", "Path:".cyan().bold(), response.file_path);
            println!("  {:>10}  {}", "CRC32:".cyan().bold(), response.checksums.crc32.bright_black());
            println!("  {:>10}  {}", "MD5:".cyan().bold(), response.checksums.md5.bright_black());
        }
        Err(e) => {
            tracing::error!(error = %e, "Upload failed");
            process::exit(1);
        }
    }
}

async fn run_upload(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    path: &Path,
    args: &Args,
) -> Result<FinalizeResponse, Box<dyn std::error::Error>> {
    let file_size = tokio::fs::metadata(path).await?.len();
    let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
    let file_type = mime_guess_from_extension(path);

    tracing::info!("Initiating upload of {} ({} bytes)", file_name, file_size);

    let init_req = InitiateUploadRequest {
        file_name,
        file_type,
        gallery_name: args.gallery.clone(),
        guild_id: args.guild.clone(),
        total_size: file_size,
    };

    let init_url = format!("{base_url}/uploads/initiate");
    let response = client.post(&init_url).bearer_auth(token).json(&init_req).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("initiate failed - HTTP {status}: {body}").into());
    }
    let init_resp: InitiateUploadResponse = response.json().await?;
    let upload_id = init_resp.upload_id;

    let progress = ProgressBar::new(file_size);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("#>-"),
    );

    let mut file = File::open(path).await?;
    let mut index = 0u32;
    loop {
        let mut chunk = vec![0u8; args.chunk_size];
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        chunk.truncate(read);

        let chunk_url = format!("{base_url}/uploads/chunk?upload_id={upload_id}&index={index}");
        let response = client
            .post(&chunk_url)
            .bearer_auth(token)
            .header("Content-Type", "application/octet-stream")
            .body(chunk)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("chunk {index} failed - HTTP {status}: {body}").into());
        }
        let _: UploadChunkResponse = response.json().await?;

        progress.inc(read as u64);
        index += 1;
    }
    progress.finish_with_message("uploaded");

    tracing::info!("Finalizing upload {}", upload_id);
    let finalize_url = format!("{base_url}/uploads/finalize");
    let response = client
        .post(&finalize_url)
        .bearer_auth(token)
        .json(&FinalizeRequest { upload_id })
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("finalize failed - HTTP {status}: {body}").into());
    }

    Ok(response.json::<FinalizeResponse>().await?)
}

fn mime_guess_from_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg".to_string(),
        Some(ext) if ext == "png" => "image/png".to_string(),
        Some(ext) if ext == "gif" => "image/gif".to_string(),
        Some(ext) if ext == "webp" => "image/webp".to_string(),
        Some(ext) if ext == "bmp" => "image/bmp".to_string(),
        Some(ext) if ext == "tiff" || ext == "tif" => "image/tiff".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
