//! Media file validation
//!
//! Admission checks run before any session resources are allocated. The
//! quick path (`validate_media_file`) covers existence, readability, size,
//! extension and magic-number sniffing; the full path additionally runs a
//! probe so a corrupt container is rejected before a worker is started.

use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::probe::MediaProber;
use crate::{Error, Result};

/// Extensions accepted for transcode input.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "webm", "avi", "ts", "m2ts", "flv", "wmv", "mpg", "mpeg",
];

/// Smallest input considered a real media file. Anything below this is a
/// truncated upload or a placeholder.
const MIN_FILE_SIZE: u64 = 1024;

/// Quick validation: filesystem checks plus a magic-number sniff.
pub async fn validate_media_file(path: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::MediaValidation(format!("file not found: {}", path.display()))
        } else {
            Error::MediaValidation(format!("file unreadable: {}: {e}", path.display()))
        }
    })?;

    if !metadata.is_file() {
        return Err(Error::MediaValidation(format!(
            "not a regular file: {}",
            path.display()
        )));
    }
    if metadata.len() < MIN_FILE_SIZE {
        return Err(Error::MediaValidation(format!(
            "file too small ({} bytes): {}",
            metadata.len(),
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::MediaValidation(format!(
            "unsupported extension {extension:?}: {}",
            path.display()
        )));
    }

    let mut header = [0u8; 16];
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::MediaValidation(format!("cannot open: {e}")))?;
    let read = file
        .read(&mut header)
        .await
        .map_err(|e| Error::MediaValidation(format!("cannot read header: {e}")))?;

    if !sniff_media_magic(&header[..read]) {
        return Err(Error::MediaValidation(format!(
            "file header does not match a known media container: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Full validation: quick checks plus a comprehensive probe.
pub async fn validate_media_file_full(path: &Path, prober: &MediaProber) -> Result<()> {
    validate_media_file(path).await?;

    let descriptor = prober.probe(path).await?;
    if !descriptor.is_playable() {
        return Err(Error::MediaValidation(format!(
            "no decodable streams: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Recognize the magic numbers of the containers in the extension whitelist.
fn sniff_media_magic(header: &[u8]) -> bool {
    if header.len() < 8 {
        return false;
    }

    // ISO BMFF (mp4/mov/m4v): size + "ftyp" at offset 4.
    if &header[4..8] == b"ftyp" {
        return true;
    }
    // Matroska / WebM EBML header.
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return true;
    }
    // AVI: RIFF....AVI .
    if header.starts_with(b"RIFF") && header.len() >= 12 && &header[8..12] == b"AVI " {
        return true;
    }
    // MPEG-TS sync byte.
    if header[0] == 0x47 {
        return true;
    }
    // FLV.
    if header.starts_with(b"FLV") {
        return true;
    }
    // ASF (wmv).
    if header.starts_with(&[0x30, 0x26, 0xB2, 0x75]) {
        return true;
    }
    // MPEG program stream / elementary stream.
    if header.starts_with(&[0x00, 0x00, 0x01, 0xBA]) || header.starts_with(&[0x00, 0x00, 0x01, 0xB3])
    {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        (dir, path)
    }

    fn fake_mp4(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[4..8].copy_from_slice(b"ftyp");
        data
    }

    #[test]
    fn test_sniff_known_magics() {
        assert!(sniff_media_magic(&fake_mp4(16)));
        assert!(sniff_media_magic(&[
            0x1A, 0x45, 0xDF, 0xA3, 0, 0, 0, 0, 0, 0, 0, 0
        ]));
        assert!(sniff_media_magic(b"RIFF\x00\x00\x00\x00AVI LIST"));
        assert!(sniff_media_magic(b"FLV\x01\x05\x00\x00\x00\x09"));
        assert!(!sniff_media_magic(b"not a media file"));
        assert!(!sniff_media_magic(b"x"));
    }

    #[tokio::test]
    async fn test_rejects_missing_file() {
        let err = validate_media_file(Path::new("/no/such/file.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "media_validation");
    }

    #[tokio::test]
    async fn test_rejects_small_file() {
        let (_dir, path) = write_temp("tiny.mp4", b"ftyp");
        let err = validate_media_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[tokio::test]
    async fn test_rejects_bad_extension() {
        let (_dir, path) = write_temp("movie.exe", &fake_mp4(2048));
        let err = validate_media_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("unsupported extension"));
    }

    #[tokio::test]
    async fn test_rejects_bad_magic() {
        let (_dir, path) = write_temp("movie.mp4", &vec![0u8; 2048]);
        let err = validate_media_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("header"));
    }

    #[tokio::test]
    async fn test_accepts_valid_mp4() {
        let (_dir, path) = write_temp("movie.mp4", &fake_mp4(4096));
        assert!(validate_media_file(&path).await.is_ok());
    }
}
