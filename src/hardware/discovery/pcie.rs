//! PCIe Address Resolution
//!
//! Recovers the PCIe bus address of a kernel NVMe device. Three sources are
//! consulted in a fixed order:
//!
//! 1. the block device's sysfs symlink chain
//! 2. the transport string reported by nvme-cli
//! 3. the parent controller's sysfs symlink chain
//!
//! The first source yielding a well-formed `DDDD:BB:DD.F` address wins.

use std::path::Path;
use tracing::debug;

/// Check for a PCIe address in `domain:bus:device.function` form (hex digits)
pub fn is_pcie_addr(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() != 12 {
        return false;
    }

    bytes.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b':',
        10 => *b == b'.',
        _ => b.is_ascii_hexdigit(),
    })
}

/// Canonical lowercase form, if the candidate is a PCIe address
pub fn normalize_pcie_addr(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    is_pcie_addr(trimmed).then(|| trimmed.to_ascii_lowercase())
}

/// Last path component that is a PCIe address; bridges come first in the chain
pub fn last_pcie_component(path: &Path) -> Option<String> {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .filter_map(normalize_pcie_addr)
        .last()
}

/// PCIe address embedded in a free-form transport string
/// (e.g. "pcie 0000:00:04.0", "traddr=0000:00:04.0")
pub fn pcie_from_transport(transport: &str) -> Option<String> {
    transport
        .split(|c: char| c.is_whitespace() || c == '=' || c == ',' || c == '/')
        .filter_map(normalize_pcie_addr)
        .last()
}

/// Resolve a symlink chain fully and pick its PCIe component
pub async fn pcie_from_symlink(path: &Path) -> Option<String> {
    match tokio::fs::canonicalize(path).await {
        Ok(resolved) => last_pcie_component(&resolved),
        Err(e) => {
            debug!("Cannot resolve {:?}: {}", path, e);
            None
        }
    }
}

/// First address out of the three ordered layers
pub fn resolve_pcie_addr(
    block_chain: Option<&str>,
    transport: Option<&str>,
    controller_chain: Option<&str>,
) -> Option<String> {
    block_chain
        .and_then(normalize_pcie_addr)
        .or_else(|| transport.and_then(pcie_from_transport))
        .or_else(|| controller_chain.and_then(normalize_pcie_addr))
}

/// Namespace block device name `nvme<ctrl>n<ns>`
pub fn is_nvme_namespace_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("nvme") else {
        return false;
    };
    let Some((ctrl, ns)) = rest.split_once('n') else {
        return false;
    };
    !ctrl.is_empty()
        && !ns.is_empty()
        && ctrl.bytes().all(|b| b.is_ascii_digit())
        && ns.bytes().all(|b| b.is_ascii_digit())
}

/// Controller name of a namespace (e.g. nvme0n1 -> nvme0)
pub fn controller_name(device_name: &str) -> Option<String> {
    let rest = device_name.strip_prefix("nvme")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("nvme{}", digits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_pcie_addr_format() {
        assert!(is_pcie_addr("0000:00:04.0"));
        assert!(is_pcie_addr("0000:af:00.1"));
        assert!(!is_pcie_addr("0000:00:04"));
        assert!(!is_pcie_addr("pci0000:00"));
        assert!(!is_pcie_addr("0000-00-04.0"));
        assert_eq!(normalize_pcie_addr(" 0000:AF:00.1 "), Some("0000:af:00.1".into()));
    }

    #[test]
    fn test_last_component_skips_bridges() {
        let path = PathBuf::from("/sys/devices/pci0000:00/0000:00:1d.0/0000:3b:00.0/nvme/nvme0/nvme0n1");
        assert_eq!(last_pcie_component(&path), Some("0000:3b:00.0".into()));
        assert_eq!(last_pcie_component(Path::new("/sys/devices/virtual/block/loop0")), None);
    }

    #[test]
    fn test_transport_string() {
        assert_eq!(pcie_from_transport("pcie 0000:00:04.0"), Some("0000:00:04.0".into()));
        assert_eq!(pcie_from_transport("traddr=0000:00:05.0,trsvcid=none"), Some("0000:00:05.0".into()));
        assert_eq!(pcie_from_transport("tcp traddr=10.0.0.1"), None);
    }

    #[test]
    fn test_layer_order() {
        assert_eq!(
            resolve_pcie_addr(Some("0000:00:04.0"), Some("pcie 0000:00:09.0"), Some("0000:00:0a.0")),
            Some("0000:00:04.0".into())
        );
        assert_eq!(
            resolve_pcie_addr(None, Some("pcie 0000:00:09.0"), Some("0000:00:0a.0")),
            Some("0000:00:09.0".into())
        );
        assert_eq!(
            resolve_pcie_addr(None, Some("loop"), Some("0000:00:0a.0")),
            Some("0000:00:0a.0".into())
        );
        assert_eq!(resolve_pcie_addr(None, None, None), None);
    }

    #[test]
    fn test_nvme_names() {
        assert!(is_nvme_namespace_name("nvme0n1"));
        assert!(is_nvme_namespace_name("nvme12n3"));
        assert!(!is_nvme_namespace_name("nvme0"));
        assert!(!is_nvme_namespace_name("nvme0n1p1"));
        assert!(!is_nvme_namespace_name("sda"));

        assert_eq!(controller_name("nvme3n1"), Some("nvme3".into()));
        assert_eq!(controller_name("sda"), None);
    }

    #[tokio::test]
    async fn test_symlink_chain() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("devices/pci0000:00/0000:00:04.0/nvme/nvme0/nvme0n1");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::create_dir_all(dir.path().join("block")).unwrap();
        let link = dir.path().join("block/nvme0n1");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert_eq!(pcie_from_symlink(&link).await, Some("0000:00:04.0".into()));
        assert_eq!(pcie_from_symlink(&dir.path().join("block/missing")).await, None);
    }
}
