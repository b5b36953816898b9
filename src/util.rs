use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use time::format_description::{self, well_known::Rfc3339};

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn hash_file(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut h = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(format!("{:x}", h.finalize()))
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

const BATCH_FORMAT: &str = "[year][month][day]_[hour][minute][second]_[subsecond digits:6]";

pub fn batch_timestamp() -> String {
    let now = time::OffsetDateTime::now_utc();
    format_description::parse_borrowed::<2>(BATCH_FORMAT)
        .ok()
        .and_then(|fmt| now.format(&fmt).ok())
        .unwrap_or_else(|| now.unix_timestamp().to_string())
}

pub fn sanitize_name(name: &str, max_len: usize) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | ' ' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(max_len)
        .collect()
}

// `base/stem`, then `stem_1`, `stem_2`, ... on collision.
pub fn create_unique_dir(base: &Path, stem: &str) -> Result<PathBuf> {
    ensure_dir(base)?;
    for attempt in 0..1000u32 {
        let name = if attempt == 0 {
            stem.to_string()
        } else {
            format!("{stem}_{attempt}")
        };
        let candidate = base.join(name);
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                return candidate
                    .canonicalize()
                    .with_context(|| format!("canonicalize {}", candidate.display()));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("create_dir {}", candidate.display()));
            }
        }
    }
    Err(anyhow!(
        "could not allocate a unique directory for {} under {}",
        stem,
        base.display()
    ))
}
