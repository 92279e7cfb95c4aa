//! Engine Block Device Records
//!
//! Typed view of `bdev_get_bdevs` output. The free-form `driver_specific`
//! object is folded into a closed union over the driver kinds the manager
//! understands.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Driver Kind
// =============================================================================

/// Driver backing an engine bdev
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Nvme,
    Aio,
    Malloc,
    Null,
    Lvol,
    NetworkBlock,
    Raid,
    Unknown,
    None,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriverKind::Nvme => "nvme",
            DriverKind::Aio => "aio",
            DriverKind::Malloc => "malloc",
            DriverKind::Null => "null",
            DriverKind::Lvol => "lvol",
            DriverKind::NetworkBlock => "network_block",
            DriverKind::Raid => "raid",
            DriverKind::Unknown => "unknown",
            DriverKind::None => "none",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Driver Payloads
// =============================================================================

/// NVMe transport identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportId {
    #[serde(default)]
    pub trtype: Option<String>,
    #[serde(default)]
    pub traddr: Option<String>,
}

/// Controller identify data carried by an nvme bdev
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerData {
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

/// One controller path of an nvme bdev
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NvmeControllerRef {
    #[serde(default)]
    pub pci_address: Option<String>,
    #[serde(default)]
    pub trid: Option<TransportId>,
    #[serde(default)]
    pub ctrlr_data: Option<ControllerData>,
}

/// File backing an aio bdev
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AioBacking {
    #[serde(default)]
    pub filename: Option<String>,
}

/// Driver-specific payload, one variant per known driver kind
#[derive(Debug, Clone, PartialEq)]
pub enum DriverSpecific {
    Nvme(Vec<NvmeControllerRef>),
    Aio(AioBacking),
    Malloc(Value),
    Null(Value),
    Lvol(Value),
    NetworkBlock(Value),
    Raid(Value),
    /// Payload keyed by a driver we do not model
    Unknown { key: String, payload: Value },
    /// No payload and no recognizable product name
    None,
}

/// Known top-level keys of `driver_specific`.
///
/// `mp_policy` is the nvme multipath policy; it sits next to the `nvme`
/// key and is captured here so it can never be mistaken for a driver kind.
#[derive(Debug, Default, Deserialize)]
struct DriverSpecificFields {
    #[serde(default)]
    nvme: Option<Value>,
    #[serde(default)]
    aio: Option<Value>,
    #[serde(default)]
    malloc: Option<Value>,
    #[serde(default)]
    null: Option<Value>,
    #[serde(default)]
    lvol: Option<Value>,
    #[serde(default)]
    rbd: Option<Value>,
    #[serde(default)]
    nbd: Option<Value>,
    #[serde(default)]
    raid: Option<Value>,
    #[serde(default)]
    #[allow(dead_code)]
    mp_policy: Option<Value>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

impl DriverSpecific {
    /// Fold a raw payload; `product_name` decides the kind when the payload is empty
    pub fn from_payload(payload: &Value, product_name: Option<&str>) -> Self {
        let fields: DriverSpecificFields = match payload {
            Value::Object(_) => serde_json::from_value(payload.clone()).unwrap_or_default(),
            _ => DriverSpecificFields::default(),
        };

        if let Some(nvme) = fields.nvme {
            return DriverSpecific::Nvme(parse_nvme_entries(&nvme));
        }
        if let Some(aio) = fields.aio {
            return DriverSpecific::Aio(serde_json::from_value(aio).unwrap_or_default());
        }
        if let Some(v) = fields.malloc {
            return DriverSpecific::Malloc(v);
        }
        if let Some(v) = fields.null {
            return DriverSpecific::Null(v);
        }
        if let Some(v) = fields.lvol {
            return DriverSpecific::Lvol(v);
        }
        if let Some(v) = fields.rbd.or(fields.nbd) {
            return DriverSpecific::NetworkBlock(v);
        }
        if let Some(v) = fields.raid {
            return DriverSpecific::Raid(v);
        }
        if let Some((key, v)) = fields.other.into_iter().next() {
            return DriverSpecific::Unknown { key, payload: v };
        }

        match product_name.map(kind_from_product_name) {
            Some(DriverKind::Malloc) => DriverSpecific::Malloc(Value::Null),
            Some(DriverKind::Null) => DriverSpecific::Null(Value::Null),
            Some(DriverKind::Raid) => DriverSpecific::Raid(Value::Null),
            Some(DriverKind::Lvol) => DriverSpecific::Lvol(Value::Null),
            _ => DriverSpecific::None,
        }
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            DriverSpecific::Nvme(_) => DriverKind::Nvme,
            DriverSpecific::Aio(_) => DriverKind::Aio,
            DriverSpecific::Malloc(_) => DriverKind::Malloc,
            DriverSpecific::Null(_) => DriverKind::Null,
            DriverSpecific::Lvol(_) => DriverKind::Lvol,
            DriverSpecific::NetworkBlock(_) => DriverKind::NetworkBlock,
            DriverSpecific::Raid(_) => DriverKind::Raid,
            DriverSpecific::Unknown { .. } => DriverKind::Unknown,
            DriverSpecific::None => DriverKind::None,
        }
    }

    /// PCI addresses and transport addresses of an nvme bdev's controllers
    pub fn nvme_addresses(&self) -> Vec<&str> {
        let DriverSpecific::Nvme(entries) = self else {
            return Vec::new();
        };

        let mut addrs = Vec::new();
        for entry in entries {
            if let Some(addr) = entry.pci_address.as_deref() {
                addrs.push(addr);
            }
            if let Some(addr) = entry.trid.as_ref().and_then(|t| t.traddr.as_deref()) {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }
        addrs
    }

    /// Whether an nvme payload carries any PCI address or transport id
    pub fn has_nvme_identity(&self) -> bool {
        match self {
            DriverSpecific::Nvme(entries) => entries
                .iter()
                .any(|e| e.pci_address.is_some() || e.trid.is_some()),
            _ => false,
        }
    }

    /// Backing file of an aio bdev
    pub fn aio_filename(&self) -> Option<&str> {
        match self {
            DriverSpecific::Aio(backing) => backing.filename.as_deref(),
            _ => None,
        }
    }

    /// Raid payload, if present
    pub fn raid_payload(&self) -> Option<&Value> {
        match self {
            DriverSpecific::Raid(v) if !v.is_null() => Some(v),
            _ => None,
        }
    }
}

fn parse_nvme_entries(value: &Value) -> Vec<NvmeControllerRef> {
    let parse = |v: &Value| serde_json::from_value::<NvmeControllerRef>(v.clone()).ok();
    match value {
        Value::Array(items) => items.iter().filter_map(parse).collect(),
        Value::Object(_) => parse(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn kind_from_product_name(product_name: &str) -> DriverKind {
    match product_name {
        "NVMe disk" => DriverKind::Nvme,
        "AIO disk" => DriverKind::Aio,
        "Malloc disk" => DriverKind::Malloc,
        "Null disk" => DriverKind::Null,
        "Logical Volume" => DriverKind::Lvol,
        "Ceph Rbd Disk" => DriverKind::NetworkBlock,
        "Raid Volume" => DriverKind::Raid,
        _ => DriverKind::Unknown,
    }
}

// =============================================================================
// Bdev
// =============================================================================

/// Wire shape of one `bdev_get_bdevs` entry
#[derive(Debug, Clone, Deserialize)]
struct RawBdev {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    block_size: u64,
    #[serde(default)]
    num_blocks: u64,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    claimed: bool,
    #[serde(default)]
    driver_specific: Value,
}

/// One engine-managed block device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBdev")]
pub struct Bdev {
    pub name: String,
    pub aliases: Vec<String>,
    pub product_name: Option<String>,
    pub block_size: u64,
    pub num_blocks: u64,
    pub uuid: Option<String>,
    pub claimed: bool,
    /// Raw payload as reported by the engine
    pub driver_specific: Value,
    /// Payload folded into a driver kind
    #[serde(skip_serializing)]
    pub driver: DriverSpecific,
}

impl From<RawBdev> for Bdev {
    fn from(raw: RawBdev) -> Self {
        let driver = DriverSpecific::from_payload(&raw.driver_specific, raw.product_name.as_deref());
        Self {
            name: raw.name,
            aliases: raw.aliases,
            product_name: raw.product_name,
            block_size: raw.block_size,
            num_blocks: raw.num_blocks,
            uuid: raw.uuid,
            claimed: raw.claimed,
            driver_specific: raw.driver_specific,
            driver,
        }
    }
}

impl Bdev {
    pub fn kind(&self) -> DriverKind {
        self.driver.kind()
    }

    pub fn size_bytes(&self) -> u64 {
        self.block_size.saturating_mul(self.num_blocks)
    }

    /// Raid volume, judged by payload or product name
    pub fn is_raid(&self) -> bool {
        self.kind() == DriverKind::Raid
            || self.product_name.as_deref() == Some("Raid Volume")
    }
}

/// Parse a `bdev_get_bdevs` result, skipping entries that do not parse
pub fn parse_bdev_list(value: Value) -> Vec<Bdev> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<Bdev>(item) {
                Ok(bdev) => Some(bdev),
                Err(e) => {
                    tracing::debug!("Skipping unparsable bdev entry: {}", e);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mp_policy_is_not_a_kind() {
        let payload = json!({
            "mp_policy": "active_passive",
            "nvme": [{
                "pci_address": "0000:00:04.0",
                "trid": {"trtype": "PCIe", "traddr": "0000:00:04.0"},
                "ctrlr_data": {"model_number": "X", "serial_number": "Y"}
            }]
        });
        let driver = DriverSpecific::from_payload(&payload, Some("NVMe disk"));
        assert_eq!(driver.kind(), DriverKind::Nvme);
        assert_eq!(driver.nvme_addresses(), vec!["0000:00:04.0"]);

        let only_policy = json!({"mp_policy": "active_active"});
        let driver = DriverSpecific::from_payload(&only_policy, None);
        assert_eq!(driver, DriverSpecific::None);
        assert_eq!(driver.kind(), DriverKind::None);
        assert_eq!(DriverKind::None.to_string(), "none");

        assert_eq!(DriverSpecific::from_payload(&Value::Null, Some("Opaque disk")), DriverSpecific::None);
    }

    #[test]
    fn test_driver_kinds() {
        let aio = DriverSpecific::from_payload(&json!({"aio": {"filename": "/dev/sdb"}}), None);
        assert_eq!(aio.aio_filename(), Some("/dev/sdb"));

        let rbd = DriverSpecific::from_payload(&json!({"rbd": {"pool_name": "rbd"}}), None);
        assert_eq!(rbd.kind(), DriverKind::NetworkBlock);

        let other = DriverSpecific::from_payload(&json!({"crypto": {"key": "k"}}), None);
        assert_eq!(other.kind(), DriverKind::Unknown);
        assert!(matches!(other, DriverSpecific::Unknown { ref key, .. } if key == "crypto"));

        let malloc = DriverSpecific::from_payload(&Value::Null, Some("Malloc disk"));
        assert_eq!(malloc.kind(), DriverKind::Malloc);
    }

    #[test]
    fn test_nvme_single_object_payload() {
        let payload = json!({"nvme": {"trid": {"trtype": "TCP", "traddr": "10.0.0.5"}}});
        let driver = DriverSpecific::from_payload(&payload, None);
        assert!(driver.has_nvme_identity());
        assert_eq!(driver.nvme_addresses(), vec!["10.0.0.5"]);
    }

    #[test]
    fn test_parse_bdev_list() {
        let bdevs = parse_bdev_list(json!([
            {
                "name": "Malloc0",
                "aliases": ["5a3c1f7e-0000-4000-8000-000000000001"],
                "product_name": "Malloc disk",
                "block_size": 512,
                "num_blocks": 131072,
                "uuid": "5a3c1f7e-0000-4000-8000-000000000001",
                "claimed": false
            },
            {"no_name": true}
        ]));

        assert_eq!(bdevs.len(), 1);
        assert_eq!(bdevs[0].kind(), DriverKind::Malloc);
        assert_eq!(bdevs[0].size_bytes(), 64 * 1024 * 1024);
    }
}
