//! Translates between the in-memory [`Inventory`] and its on-storage JSON representation, and
//! computes/verifies the digest sidecar that travels alongside `inventory.json`.

use crate::consts::INVENTORY_FILE;
use crate::digest::{DigestAlgorithm, HexDigest};
use crate::error::{OcflError, Result};
use crate::inventory::Inventory;

/// Reads and writes the OCFL inventory JSON document. The default implementation delegates to
/// `serde_json`, the way the teacher's `ocfl/serde.rs` does for the same document.
pub trait InventoryMapper: Send + Sync {
    fn read(&self, bytes: &[u8]) -> Result<Inventory>;

    fn write(&self, inventory: &Inventory) -> Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonInventoryMapper;

impl InventoryMapper for JsonInventoryMapper {
    fn read(&self, bytes: &[u8]) -> Result<Inventory> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn write(&self, inventory: &Inventory) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(inventory)?)
    }
}

/// Computes the sidecar contents (`"{digest}  inventory.json\n"`) for a serialized inventory
/// under its own digest algorithm.
pub fn sidecar_contents(algorithm: DigestAlgorithm, inventory_bytes: &[u8]) -> Result<(HexDigest, Vec<u8>)> {
    let digest = algorithm.hash_hex(&mut &inventory_bytes[..])?;
    let contents = format!("{}  {}\n", digest, INVENTORY_FILE).into_bytes();
    Ok((digest, contents))
}

/// Parses a sidecar file's contents, returning the digest it records. Used to validate a
/// loaded inventory against its sidecar.
pub fn parse_sidecar(sidecar_bytes: &[u8]) -> Result<HexDigest> {
    let text = std::str::from_utf8(sidecar_bytes)
        .map_err(|_| OcflError::CorruptObject {
            object_id: "<unknown>".to_string(),
            message: "inventory sidecar is not valid UTF-8".to_string(),
        })?
        .trim();

    let digest = text
        .split_whitespace()
        .next()
        .ok_or_else(|| OcflError::CorruptObject {
            object_id: "<unknown>".to_string(),
            message: "inventory sidecar is empty".to_string(),
        })?;

    Ok(digest.into())
}
