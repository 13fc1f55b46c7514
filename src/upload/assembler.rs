//! Ordered chunk reassembly with contiguity and size validation, streamed
//! checksum computation, and an archive-signature sniff for `.zip`
//! filenames. Grounded on the teacher's `assemble_chunks` (streamed read +
//! hash in one pass) and `storage/mod.rs`'s discipline of never trusting a
//! path segment without validating it first.

use crate::error::{Error, Result, ResultIoExt};
use crc32fast::Hasher as Crc32Hasher;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Checksums computed while streaming the assembled file exactly once.
#[derive(Debug, Clone)]
pub struct AssembledChecksums {
    pub byte_length: u64,
    pub crc32_base64: String,
    pub md5_base64: String,
}

pub struct AssembledFile {
    pub path: PathBuf,
    pub checksums: AssembledChecksums,
}

const STREAM_BUF_SIZE: usize = 64 * 1024;

/// Read `temp_dir`, select `chunk-<n>` entries, validate they form a
/// contiguous `0..total_chunks` run, then stream them in order into a
/// single destination file — one chunk's worth of buffering at a time,
/// never the whole assembled file.
pub async fn assemble(
    temp_dir: &Path,
    upload_id: &str,
    file_name: &str,
    total_size: u64,
) -> Result<AssembledFile> {
    let mut indices = read_chunk_indices(temp_dir).await?;
    indices.sort_unstable();

    for (position, index) in indices.iter().enumerate() {
        if *index != position as u32 {
            return Err(Error::integrity(format!(
                "out of order: expected chunk {position}, found gap before chunk {index}"
            )));
        }
    }

    let dest_path = temp_dir
        .parent()
        .unwrap_or(temp_dir)
        .join(format!("{upload_id}-{file_name}"));

    let mut dest = fs::File::create(&dest_path).await.map_io_err(&dest_path)?;
    let mut crc32 = Crc32Hasher::new();
    let mut md5_ctx = md5::Context::new();
    let mut total_written: u64 = 0;

    for index in &indices {
        let chunk_path = temp_dir.join(format!("chunk-{index}"));
        let mut chunk_file = fs::File::open(&chunk_path).await.map_io_err(&chunk_path)?;
        let mut buf = vec![0u8; STREAM_BUF_SIZE];

        loop {
            let n = chunk_file.read(&mut buf).await.map_io_err(&chunk_path)?;
            if n == 0 {
                break;
            }
            crc32.update(&buf[..n]);
            md5_ctx.consume(&buf[..n]);
            dest.write_all(&buf[..n]).await.map_io_err(&dest_path)?;
            dest.flush().await.map_io_err(&dest_path)?;
            total_written += n as u64;
        }
    }

    dest.sync_all().await.map_io_err(&dest_path)?;
    drop(dest);

    if total_written != total_size {
        fs::remove_file(&dest_path).await.ok();
        return Err(Error::integrity(format!(
            "size mismatch: declared {total_size}, assembled {total_written}"
        )));
    }

    if file_name.to_ascii_lowercase().ends_with(".zip") {
        if let Err(e) = validate_zip_signature(&dest_path).await {
            fs::remove_file(&dest_path).await.ok();
            return Err(e);
        }
    }

    use base64::Engine;
    let crc32_base64 = base64::engine::general_purpose::STANDARD
        .encode(crc32.finalize().to_be_bytes());
    let md5_base64 = base64::engine::general_purpose::STANDARD.encode(md5_ctx.compute().0);

    Ok(AssembledFile {
        path: dest_path,
        checksums: AssembledChecksums {
            byte_length: total_written,
            crc32_base64,
            md5_base64,
        },
    })
}

async fn read_chunk_indices(temp_dir: &Path) -> Result<Vec<u32>> {
    let mut entries = fs::read_dir(temp_dir).await.map_io_err(temp_dir)?;
    let mut indices = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_io_err(temp_dir)? {
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if let Some(suffix) = name.strip_prefix("chunk-") {
            if let Ok(index) = suffix.parse::<u32>() {
                indices.push(index);
            }
        }
    }

    Ok(indices)
}

/// First 4 bytes must be `PK\x03\x04` / `\x05\x06` / `\x07\x08` (local
/// file header, empty archive, or spanned archive signature).
async fn validate_zip_signature(path: &Path) -> Result<()> {
    let mut file = fs::File::open(path).await.map_io_err(path)?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).await.map_io_err(path)?;

    let valid = magic[0] == b'P'
        && magic[1] == b'K'
        && matches!(magic[2], 0x03 | 0x05 | 0x07)
        && matches!(magic[3], 0x04 | 0x06 | 0x08);

    if valid {
        Ok(())
    } else {
        Err(Error::integrity("invalid archive: bad zip signature"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_chunk(dir: &Path, index: u32, data: &[u8]) {
        fs::write(dir.join(format!("chunk-{index}")), data).await.unwrap();
    }

    #[tokio::test]
    async fn assembles_chunks_in_index_order_regardless_of_write_order() {
        let staging = TempDir::new().unwrap();
        write_chunk(staging.path(), 2, b"ghi").await;
        write_chunk(staging.path(), 0, b"abc").await;
        write_chunk(staging.path(), 1, b"def").await;

        let assembled = assemble(staging.path(), "upload-1", "p.txt", 9).await.unwrap();
        let contents = fs::read(&assembled.path).await.unwrap();
        assert_eq!(contents, b"abcdefghi");
        assert_eq!(assembled.checksums.byte_length, 9);

        fs::remove_file(&assembled.path).await.ok();
    }

    #[tokio::test]
    async fn gap_in_chunk_sequence_fails_out_of_order() {
        let staging = TempDir::new().unwrap();
        write_chunk(staging.path(), 0, b"abc").await;
        write_chunk(staging.path(), 2, b"ghi").await;

        let err = assemble(staging.path(), "upload-2", "p.txt", 9).await.unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[tokio::test]
    async fn size_mismatch_fails_and_removes_output() {
        let staging = TempDir::new().unwrap();
        write_chunk(staging.path(), 0, b"abc").await;

        let err = assemble(staging.path(), "upload-3", "p.txt", 99).await.unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[tokio::test]
    async fn zip_extension_requires_valid_signature() {
        let staging = TempDir::new().unwrap();
        write_chunk(staging.path(), 0, b"not a zip").await;

        let err = assemble(staging.path(), "upload-4", "p.zip", 9).await.unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[tokio::test]
    async fn zip_extension_accepts_valid_signature() {
        let staging = TempDir::new().unwrap();
        let mut data = vec![b'P', b'K', 0x03, 0x04];
        data.extend_from_slice(b"rest");
        write_chunk(staging.path(), 0, &data).await;

        let assembled = assemble(staging.path(), "upload-5", "p.zip", data.len() as u64)
            .await
            .unwrap();
        fs::remove_file(&assembled.path).await.ok();
    }
}
