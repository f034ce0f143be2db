//! Secondary submissions: application inventory, package catalogs and
//! configuration profiles. Each is best-effort and independent of the others.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::CheckinClient;
use crate::modules::export_profiles;
use crate::submission::{encode, file_and_hash};

const INVENTORY_FILE: &str = "ApplicationInventory.plist";
const CATALOG_DIR: &str = "catalogs";

/// One entry of the catalog hash exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogHash {
    pub name: String,
    pub sha256hash: String,
}

/// Send the application inventory unless the server already has this exact
/// version of it. Returns whether anything was uploaded.
pub async fn send_inventory(
    client: &CheckinClient,
    managed_install_dir: &Path,
    serial: &str,
) -> Result<bool> {
    let path = managed_install_dir.join(INVENTORY_FILE);
    debug!("Inventory path: {}", path.display());

    let (inventory, hash) = file_and_hash(&path)?;
    if inventory.is_empty() {
        debug!("No inventory to send");
        return Ok(false);
    }

    let server_hash = client
        .get_text(&format!("inventory/hash/{}", serial))
        .await
        .context("Could not fetch the server's inventory hash")?;
    if server_hash.trim() == hash {
        debug!("Server inventory is current");
        return Ok(false);
    }

    let form = [
        ("serial", serial.to_string()),
        ("base64bz2inventory", encode(&inventory)?),
    ];
    client.post_form("inventory/submit", &form).await?;
    info!("Inventory submitted");
    Ok(true)
}

/// Hashes of the non-hidden files in the package manager's catalog directory.
pub fn catalog_hashes(catalog_dir: &Path) -> Vec<CatalogHash> {
    let Ok(entries) = std::fs::read_dir(catalog_dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();

    names
        .into_iter()
        .filter_map(|name| match file_and_hash(&catalog_dir.join(&name)) {
            Ok((_, sha256hash)) => Some(CatalogHash { name, sha256hash }),
            Err(e) => {
                warn!("Could not hash catalog {}: {:#}", name, e);
                None
            }
        })
        .collect()
}

/// Offer our catalog hashes to the server and upload the ones it lacks.
/// Returns the names of the catalogs uploaded.
pub async fn send_catalogs(
    client: &CheckinClient,
    managed_install_dir: &Path,
    key: &str,
) -> Result<Vec<String>> {
    let catalog_dir = managed_install_dir.join(CATALOG_DIR);
    let check_list = catalog_hashes(&catalog_dir);
    if check_list.is_empty() {
        debug!("No catalogs to send");
        return Ok(Vec::new());
    }

    let mut listing = Vec::new();
    plist::to_writer_xml(&mut listing, &check_list)?;
    let form = [("key", key.to_string()), ("catalogs", encode(&listing)?)];
    let response = client.post_form("catalog/hash", &form).await?;

    let known: Vec<CatalogHash> = plist::from_bytes(response.as_bytes()).unwrap_or_default();

    let mut sent = Vec::new();
    for catalog in check_list.iter().filter(|c| !known.contains(c)) {
        debug!("Submitting catalog {}", catalog.name);
        match submit_catalog(client, &catalog_dir, key, catalog).await {
            Ok(()) => sent.push(catalog.name.clone()),
            Err(e) => warn!("Error while submitting catalog {}: {:#}", catalog.name, e),
        }
    }
    Ok(sent)
}

async fn submit_catalog(
    client: &CheckinClient,
    catalog_dir: &Path,
    key: &str,
    catalog: &CatalogHash,
) -> Result<()> {
    let (contents, _) = file_and_hash(&catalog_dir.join(&catalog.name))?;
    let form = [
        ("key", key.to_string()),
        ("base64bz2catalog", encode(&contents)?),
        ("name", catalog.name.clone()),
        ("sha256hash", catalog.sha256hash.clone()),
    ];
    client.post_form("catalog/submit", &form).await?;
    Ok(())
}

/// Export the installed profiles and upload them.
pub async fn send_profiles(client: &CheckinClient, profiles_command: &str, serial: &str) -> Result<()> {
    let profiles = export_profiles(profiles_command)
        .await
        .context("Couldn't output profiles")?;

    let form = [
        ("serial", serial.to_string()),
        ("base64bz2profiles", encode(&profiles)?),
    ];
    client.post_form("profiles/submit", &form).await?;
    info!("Profiles submitted");
    Ok(())
}
