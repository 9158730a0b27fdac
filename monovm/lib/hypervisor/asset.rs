use std::{
    fmt::{self, Display},
    fs::File,
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::{MonovmError, MonovmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of boot artifact an asset stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// The guest kernel.
    Kernel,

    /// The guest root filesystem image.
    Image,

    /// The guest initrd.
    Initrd,

    /// The hypervisor binary.
    Hypervisor,

    /// The guest firmware.
    Firmware,
}

/// A boot artifact overriding the one set in a hypervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    kind: AssetType,
    path: PathBuf,
    computed_hash: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Asset {
    /// Creates an asset without verifying its content.
    pub fn new(kind: AssetType, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            computed_hash: None,
        }
    }

    /// Creates an asset whose content must hash to `expected_hash` (hex-encoded SHA-512).
    ///
    /// ## Errors
    ///
    /// Returns an error if the path is not absolute, the file cannot be read, or the digest does
    /// not match.
    pub fn with_hash(
        kind: AssetType,
        path: impl Into<PathBuf>,
        expected_hash: &str,
    ) -> MonovmResult<Self> {
        let mut asset = Self::new(kind, path);
        if !asset.valid() {
            return Err(MonovmError::InvalidAsset {
                kind: kind.to_string(),
                path: asset.path.display().to_string(),
            });
        }

        let actual = sha512_file(&asset.path)?;
        if !actual.eq_ignore_ascii_case(expected_hash) {
            return Err(MonovmError::AssetHashMismatch {
                kind: kind.to_string(),
                path: asset.path,
                expected: expected_hash.to_string(),
                actual,
            });
        }

        asset.computed_hash = Some(actual);
        Ok(asset)
    }

    /// Returns the asset kind.
    pub fn kind(&self) -> AssetType {
        self.kind
    }

    /// Returns the asset location on the host.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the verified digest, if the asset was created with one.
    pub fn computed_hash(&self) -> Option<&str> {
        self.computed_hash.as_deref()
    }

    /// An asset is usable when its path is absolute.
    pub fn valid(&self) -> bool {
        self.path.is_absolute()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn sha512_file(path: &Path) -> MonovmResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha512::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetType::Kernel => "kernel",
            AssetType::Image => "image",
            AssetType::Initrd => "initrd",
            AssetType::Hypervisor => "hypervisor",
            AssetType::Firmware => "firmware",
        };

        write!(f, "{name}")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_asset_valid() {
        assert!(Asset::new(AssetType::Kernel, "/usr/share/vmlinuz").valid());
        assert!(!Asset::new(AssetType::Kernel, "vmlinuz").valid());
        assert!(!Asset::new(AssetType::Image, "").valid());
    }

    #[test]
    fn test_asset_with_hash() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"kernel bytes")?;

        let expected = hex::encode(Sha512::digest(b"kernel bytes"));
        let asset = Asset::with_hash(AssetType::Kernel, file.path(), &expected)?;
        assert_eq!(asset.computed_hash(), Some(expected.as_str()));
        assert_eq!(asset.kind(), AssetType::Kernel);

        let result = Asset::with_hash(AssetType::Kernel, file.path(), "00");
        assert!(matches!(result, Err(MonovmError::AssetHashMismatch { .. })));

        let result = Asset::with_hash(AssetType::Kernel, "relative/kernel", &expected);
        assert!(matches!(result, Err(MonovmError::InvalidAsset { .. })));

        Ok(())
    }
}
