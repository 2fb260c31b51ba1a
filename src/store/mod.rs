use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::{error, info, warn};

use crate::models::Product;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Products read back from disk at startup.
#[derive(Debug, Default)]
pub struct LoadedCatalog {
    pub products: Vec<Product>,
    /// False when the file was missing, empty or unreadable.
    pub initialized: bool,
}

/// JSON file holding the full known-product catalog.
#[derive(Debug, Clone)]
pub struct ProductStore {
    path: PathBuf,
}

impl ProductStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing file is created empty, and empty or malformed
    /// content yields an empty, uninitialized catalog.
    pub async fn load(&self) -> LoadedCatalog {
        info!(path = %self.path.display(), "Loading known products");

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Products file not found, creating new file");
                if let Err(e) = tokio::fs::write(&self.path, b"").await {
                    error!(error = %e, "Failed to create products file");
                }
                return LoadedCatalog::default();
            }
            Err(e) => {
                error!(error = %e, "Failed to read products file");
                return LoadedCatalog::default();
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return LoadedCatalog::default();
        }

        match serde_json::from_slice::<Vec<Product>>(&data) {
            Ok(products) => {
                info!("Loaded {} known products", products.len());
                LoadedCatalog {
                    products,
                    initialized: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to decode products file, starting empty");
                LoadedCatalog::default()
            }
        }
    }

    /// Rewrites the whole file with `products`, sorted by id.
    ///
    /// The body goes to a uniquely named sibling file first and is renamed
    /// over the target, so readers never see a half-written catalog.
    pub async fn save(&self, products: &[Product]) -> Result<()> {
        let mut sorted: Vec<&Product> = products.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let body = encode_pretty(&sorted)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, body)
            .await
            .with_context(|| format!("failed to write {}", temp.display()))?;

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e)
                .with_context(|| format!("failed to replace {}", self.path.display()));
        }

        info!("Successfully saved {} products", products.len());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("products.json"));
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        name.push(format!(".{}.{seq}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

fn encode_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .context("failed to encode products")?;
    buf.push(b'\n');
    Ok(buf)
}
