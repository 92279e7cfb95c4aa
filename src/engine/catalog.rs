//! Engine Operation Catalog
//!
//! Typed façade over the engine's RPC methods. Each operation is an
//! `EngineCall` that knows its method name, the exact parameter shape the
//! engine expects and whether it needs a longer timeout than the default.

use crate::domain::ports::RpcChannelRef;
use crate::engine::bdev::{parse_bdev_list, Bdev};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Timeout for lvstore creation; large stores take minutes to initialize
pub const CREATE_LVSTORE_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for lvstore deletion
pub const DELETE_LVSTORE_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Parameter Types
// =============================================================================

/// RAID levels accepted by `bdev_raid_create`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5f,
}

impl RaidLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaidLevel::Raid0 => "raid0",
            RaidLevel::Raid1 => "raid1",
            RaidLevel::Raid5f => "raid5f",
        }
    }

    /// Mirrors have no strip size
    pub fn uses_strip_size(&self) -> bool {
        !matches!(self, RaidLevel::Raid1)
    }
}

impl FromStr for RaidLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "raid0" | "0" => Ok(RaidLevel::Raid0),
            "raid1" | "1" => Ok(RaidLevel::Raid1),
            "raid5f" | "5f" => Ok(RaidLevel::Raid5f),
            other => Err(Error::InvalidParameter(format!("Unknown RAID level: {}", other))),
        }
    }
}

/// NVMe-oF listener address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenAddress {
    pub trtype: String,
    pub traddr: String,
    pub trsvcid: String,
    /// Address family; "ipv4" unless given
    pub adrfam: String,
}

impl ListenAddress {
    pub fn new(trtype: &str, traddr: &str, trsvcid: &str) -> Self {
        Self {
            trtype: trtype.to_string(),
            traddr: traddr.to_string(),
            trsvcid: trsvcid.to_string(),
            adrfam: "ipv4".to_string(),
        }
    }

    pub fn with_adrfam(mut self, adrfam: &str) -> Self {
        self.adrfam = adrfam.to_string();
        self
    }
}

// =============================================================================
// Engine Calls
// =============================================================================

/// One engine operation with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    // Bdev management
    GetBdevs { name: Option<String> },
    AttachNvmeController {
        name: String,
        trtype: String,
        traddr: String,
        adrfam: Option<String>,
        trsvcid: Option<String>,
    },
    DetachNvmeController { name: String },
    CreateMallocBdev { name: String, num_blocks: u64, block_size: u32 },
    DeleteMallocBdev { name: String },
    CreateAioBdev { name: String, filename: String, block_size: u32 },
    DeleteAioBdev { name: String },
    DeleteNullBdev { name: String },
    DeleteRbdBdev { name: String },

    // RAID management
    CreateRaid {
        name: String,
        level: RaidLevel,
        base_bdevs: Vec<String>,
        strip_size_kb: Option<u32>,
    },
    DeleteRaid { name: String },
    GetRaidBdevs,
    AddRaidBaseBdev { raid_bdev: String, base_bdev: String },
    RemoveRaidBaseBdev { raid_bdev: String, base_bdev: String },

    // NVMe-oF target management
    CreateTransport {
        trtype: String,
        tgt_name: Option<String>,
        trsvcid: Option<String>,
    },
    GetTransports,
    CreateSubsystem {
        nqn: String,
        allow_any_host: bool,
        serial_number: Option<String>,
        model_number: Option<String>,
    },
    DeleteSubsystem { nqn: String },
    GetSubsystems,
    AddSubsystemListener { nqn: String, address: ListenAddress },
    RemoveSubsystemListener { nqn: String, address: ListenAddress },
    AddSubsystemNamespace {
        nqn: String,
        bdev_name: String,
        nsid: Option<u32>,
        uuid: Option<String>,
    },
    RemoveSubsystemNamespace { nqn: String, nsid: u32 },
    AddSubsystemHost { nqn: String, host: String },
    RemoveSubsystemHost { nqn: String, host: String },
    GetSubsystemControllers { nqn: String },
    GetSubsystemQpairs { nqn: String },
    SetSubsystemAllowAnyHost { nqn: String, allow_any_host: bool },

    // Configuration
    SaveConfig { filename: Option<String> },
    LoadConfig { filename: String },
    GetFrameworkConfig,
    GetVersion,

    // Logical volume stores
    CreateLvstore {
        bdev_name: String,
        lvs_name: String,
        cluster_size: Option<u64>,
    },
    RenameLvstore { old_name: String, new_name: String },
    GrowLvstore { uuid: String },
    DeleteLvstore { uuid: String },
    GetLvstores,
    GetLvols,

    // Logical volumes
    CreateLvol {
        lvstore_uuid: String,
        lvol_name: String,
        size_in_mib: u64,
        thin_provision: bool,
        clear_method: Option<String>,
    },
    SnapshotLvol { lvol_name: String, snapshot_name: String },
    CloneLvol { snapshot_name: String, clone_name: String },
    CloneBdev {
        bdev_name: String,
        clone_name: String,
        lvstore_name: String,
    },
    RenameLvol { old_name: String, new_name: String },
    InflateLvol { name: String },
    DecoupleLvolParent { name: String },
    ResizeLvol { name: String, size_in_mib: u64 },
    SetLvolReadOnly { name: String },
    DeleteLvol { name: String },
    StartLvolShallowCopy { src_lvol_name: String, dst_bdev_name: String },
    CheckLvolShallowCopy { name: String },
    SetLvolParent { name: String, parent_name: String },
    SetLvolParentBdev { name: String, parent_bdev_name: String },
}

/// Insert an optional field only when it is set
fn put_opt<T: Serialize>(params: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(v) = value {
        params.insert(key.to_string(), json!(v));
    }
}

fn name_only(name: &str) -> Option<Value> {
    Some(json!({ "name": name }))
}

impl EngineCall {
    /// Engine method name
    pub fn method(&self) -> &'static str {
        use EngineCall::*;
        match self {
            GetBdevs { .. } => "bdev_get_bdevs",
            AttachNvmeController { .. } => "bdev_nvme_attach_controller",
            DetachNvmeController { .. } => "bdev_nvme_detach_controller",
            CreateMallocBdev { .. } => "bdev_malloc_create",
            DeleteMallocBdev { .. } => "bdev_malloc_delete",
            CreateAioBdev { .. } => "bdev_aio_create",
            DeleteAioBdev { .. } => "bdev_aio_delete",
            DeleteNullBdev { .. } => "bdev_null_delete",
            DeleteRbdBdev { .. } => "bdev_rbd_delete",
            CreateRaid { .. } => "bdev_raid_create",
            DeleteRaid { .. } => "bdev_raid_delete",
            GetRaidBdevs => "bdev_raid_get_bdevs",
            AddRaidBaseBdev { .. } => "bdev_raid_add_base_bdev",
            RemoveRaidBaseBdev { .. } => "bdev_raid_remove_base_bdev",
            CreateTransport { .. } => "nvmf_create_transport",
            GetTransports => "nvmf_get_transports",
            CreateSubsystem { .. } => "nvmf_create_subsystem",
            DeleteSubsystem { .. } => "nvmf_delete_subsystem",
            GetSubsystems => "nvmf_get_subsystems",
            AddSubsystemListener { .. } => "nvmf_subsystem_add_listener",
            RemoveSubsystemListener { .. } => "nvmf_subsystem_remove_listener",
            AddSubsystemNamespace { .. } => "nvmf_subsystem_add_ns",
            RemoveSubsystemNamespace { .. } => "nvmf_subsystem_remove_ns",
            AddSubsystemHost { .. } => "nvmf_subsystem_add_host",
            RemoveSubsystemHost { .. } => "nvmf_subsystem_remove_host",
            GetSubsystemControllers { .. } => "nvmf_subsystem_get_controllers",
            GetSubsystemQpairs { .. } => "nvmf_subsystem_get_qpairs",
            SetSubsystemAllowAnyHost { .. } => "nvmf_subsystem_allow_any_host",
            SaveConfig { .. } => "save_config",
            LoadConfig { .. } => "load_config",
            GetFrameworkConfig => "framework_get_config",
            GetVersion => "spdk_get_version",
            CreateLvstore { .. } => "bdev_lvol_create_lvstore",
            RenameLvstore { .. } => "bdev_lvol_rename_lvstore",
            GrowLvstore { .. } => "bdev_lvol_grow_lvstore",
            DeleteLvstore { .. } => "bdev_lvol_delete_lvstore",
            GetLvstores => "bdev_lvol_get_lvstores",
            GetLvols => "bdev_lvol_get_lvols",
            CreateLvol { .. } => "bdev_lvol_create",
            SnapshotLvol { .. } => "bdev_lvol_snapshot",
            CloneLvol { .. } => "bdev_lvol_clone",
            CloneBdev { .. } => "bdev_lvol_clone_bdev",
            RenameLvol { .. } => "bdev_lvol_rename",
            InflateLvol { .. } => "bdev_lvol_inflate",
            DecoupleLvolParent { .. } => "bdev_lvol_decouple_parent",
            ResizeLvol { .. } => "bdev_lvol_resize",
            SetLvolReadOnly { .. } => "bdev_lvol_set_read_only",
            DeleteLvol { .. } => "bdev_lvol_delete",
            StartLvolShallowCopy { .. } => "bdev_lvol_start_shallow_copy",
            CheckLvolShallowCopy { .. } => "bdev_lvol_check_shallow_copy",
            SetLvolParent { .. } => "bdev_lvol_set_parent",
            SetLvolParentBdev { .. } => "bdev_lvol_set_parent_bdev",
        }
    }

    /// Parameters exactly as the engine method expects them; `None` omits the field
    pub fn params(&self) -> Option<Value> {
        use EngineCall::*;
        match self {
            GetBdevs { name } => name.as_ref().map(|n| json!({ "name": n })),
            AttachNvmeController {
                name,
                trtype,
                traddr,
                adrfam,
                trsvcid,
            } => {
                let mut p = Map::new();
                p.insert("name".into(), json!(name));
                p.insert("trtype".into(), json!(trtype));
                p.insert("traddr".into(), json!(traddr));
                put_opt(&mut p, "adrfam", adrfam);
                put_opt(&mut p, "trsvcid", trsvcid);
                Some(Value::Object(p))
            }
            DetachNvmeController { name }
            | DeleteMallocBdev { name }
            | DeleteAioBdev { name }
            | DeleteNullBdev { name }
            | DeleteRbdBdev { name }
            | DeleteRaid { name }
            | InflateLvol { name }
            | DecoupleLvolParent { name }
            | SetLvolReadOnly { name }
            | DeleteLvol { name }
            | CheckLvolShallowCopy { name } => name_only(name),
            CreateMallocBdev {
                name,
                num_blocks,
                block_size,
            } => Some(json!({
                "name": name,
                "num_blocks": num_blocks,
                "block_size": block_size,
            })),
            CreateAioBdev {
                name,
                filename,
                block_size,
            } => Some(json!({
                "name": name,
                "filename": filename,
                "block_size": block_size,
            })),
            CreateRaid {
                name,
                level,
                base_bdevs,
                strip_size_kb,
            } => {
                let mut p = Map::new();
                p.insert("name".into(), json!(name));
                p.insert("raid_level".into(), json!(level.as_str()));
                p.insert("base_bdevs".into(), json!(base_bdevs));
                if level.uses_strip_size() {
                    put_opt(&mut p, "strip_size_kb", strip_size_kb);
                }
                Some(Value::Object(p))
            }
            GetRaidBdevs => Some(json!("all")),
            AddRaidBaseBdev {
                raid_bdev,
                base_bdev,
            }
            | RemoveRaidBaseBdev {
                raid_bdev,
                base_bdev,
            } => Some(json!({ "raid_bdev": raid_bdev, "base_bdev": base_bdev })),
            CreateTransport {
                trtype,
                tgt_name,
                trsvcid,
            } => {
                let mut p = Map::new();
                p.insert("trtype".into(), json!(trtype));
                put_opt(&mut p, "tgt_name", tgt_name);
                put_opt(&mut p, "trsvcid", trsvcid);
                Some(Value::Object(p))
            }
            GetTransports | GetSubsystems | GetFrameworkConfig | GetVersion | GetLvstores
            | GetLvols => None,
            CreateSubsystem {
                nqn,
                allow_any_host,
                serial_number,
                model_number,
            } => {
                let mut p = Map::new();
                p.insert("nqn".into(), json!(nqn));
                p.insert("allow_any_host".into(), json!(allow_any_host));
                put_opt(&mut p, "serial_number", serial_number);
                put_opt(&mut p, "model_number", model_number);
                Some(Value::Object(p))
            }
            DeleteSubsystem { nqn }
            | GetSubsystemControllers { nqn }
            | GetSubsystemQpairs { nqn } => Some(json!({ "nqn": nqn })),
            AddSubsystemListener { nqn, address } | RemoveSubsystemListener { nqn, address } => {
                Some(json!({ "nqn": nqn, "listen_address": address }))
            }
            AddSubsystemNamespace {
                nqn,
                bdev_name,
                nsid,
                uuid,
            } => {
                let mut ns = Map::new();
                ns.insert("bdev_name".into(), json!(bdev_name));
                put_opt(&mut ns, "nsid", nsid);
                put_opt(&mut ns, "uuid", uuid);
                Some(json!({ "nqn": nqn, "namespace": Value::Object(ns) }))
            }
            RemoveSubsystemNamespace { nqn, nsid } => Some(json!({ "nqn": nqn, "nsid": nsid })),
            AddSubsystemHost { nqn, host } | RemoveSubsystemHost { nqn, host } => {
                Some(json!({ "nqn": nqn, "host": host }))
            }
            SetSubsystemAllowAnyHost {
                nqn,
                allow_any_host,
            } => Some(json!({ "nqn": nqn, "allow_any_host": allow_any_host })),
            SaveConfig { filename } => filename.as_ref().map(|f| json!({ "filename": f })),
            LoadConfig { filename } => Some(json!({ "filename": filename })),
            CreateLvstore {
                bdev_name,
                lvs_name,
                cluster_size,
            } => {
                let mut p = Map::new();
                p.insert("bdev_name".into(), json!(bdev_name));
                p.insert("lvs_name".into(), json!(lvs_name));
                put_opt(&mut p, "cluster_sz", cluster_size);
                Some(Value::Object(p))
            }
            RenameLvstore { old_name, new_name } | RenameLvol { old_name, new_name } => {
                Some(json!({ "old_name": old_name, "new_name": new_name }))
            }
            GrowLvstore { uuid } | DeleteLvstore { uuid } => Some(json!({ "uuid": uuid })),
            CreateLvol {
                lvstore_uuid,
                lvol_name,
                size_in_mib,
                thin_provision,
                clear_method,
            } => {
                // The store is addressed as "uuid" here, unlike clone_bdev
                let mut p = Map::new();
                p.insert("uuid".into(), json!(lvstore_uuid));
                p.insert("lvol_name".into(), json!(lvol_name));
                p.insert("size_in_mib".into(), json!(size_in_mib));
                p.insert("thin_provision".into(), json!(thin_provision));
                put_opt(&mut p, "clear_method", clear_method);
                Some(Value::Object(p))
            }
            SnapshotLvol {
                lvol_name,
                snapshot_name,
            } => Some(json!({ "lvol_name": lvol_name, "snapshot_name": snapshot_name })),
            CloneLvol {
                snapshot_name,
                clone_name,
            } => Some(json!({ "snapshot_name": snapshot_name, "clone_name": clone_name })),
            CloneBdev {
                bdev_name,
                clone_name,
                lvstore_name,
            } => Some(json!({
                "bdev": bdev_name,
                "clone_name": clone_name,
                "lvs_name": lvstore_name,
            })),
            ResizeLvol { name, size_in_mib } => {
                Some(json!({ "name": name, "size_in_mib": size_in_mib }))
            }
            StartLvolShallowCopy {
                src_lvol_name,
                dst_bdev_name,
            } => Some(json!({
                "src_lvol_name": src_lvol_name,
                "dst_bdev_name": dst_bdev_name,
            })),
            SetLvolParent { name, parent_name } => {
                Some(json!({ "name": name, "parent_name": parent_name }))
            }
            SetLvolParentBdev {
                name,
                parent_bdev_name,
            } => Some(json!({ "name": name, "parent_bdev_name": parent_bdev_name })),
        }
    }

    /// Timeout override, for operations known to outlast the default
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            EngineCall::CreateLvstore { .. } => Some(CREATE_LVSTORE_TIMEOUT),
            EngineCall::DeleteLvstore { .. } => Some(DELETE_LVSTORE_TIMEOUT),
            _ => None,
        }
    }
}

// =============================================================================
// Composite Results
// =============================================================================

/// Snapshot of the engine's full configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullConfig {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub spdk_version: Value,
    pub bdevs: Value,
    pub nvmf: NvmfConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvmfConfig {
    pub transports: Value,
    pub subsystems: Value,
}

/// Engine summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: Value,
    pub bdev_count: usize,
    pub subsystem_count: usize,
    pub transport_count: usize,
    pub socket_path: String,
}

fn array_len(value: &Value) -> usize {
    value.as_array().map(Vec::len).unwrap_or(0)
}

// =============================================================================
// SPDK Client
// =============================================================================

/// Client methods whose arguments are all string fields of the same name
/// on the `EngineCall` variant
macro_rules! engine_calls {
    ($($method:ident($($arg:ident),*) => $variant:ident;)*) => {
        $(
            pub async fn $method(&self, $($arg: &str),*) -> Result<Value> {
                self.execute(EngineCall::$variant { $($arg: $arg.into()),* }).await
            }
        )*
    };
}

/// Typed client for the engine's RPC methods
#[derive(Clone)]
pub struct SpdkClient {
    channel: RpcChannelRef,
}

impl SpdkClient {
    /// Create a client over an RPC channel
    pub fn new(channel: RpcChannelRef) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &RpcChannelRef {
        &self.channel
    }

    /// Execute one catalog operation
    pub async fn execute(&self, call: EngineCall) -> Result<Value> {
        self.channel
            .call(call.method(), call.params(), call.timeout())
            .await
    }

    /// Call an arbitrary method with free-form params
    pub async fn call_raw(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.channel.call(method, params, None).await
    }

    pub async fn check_connection(&self) -> Result<()> {
        self.channel.check_connection().await
    }

    // ========== Bdev Management ==========

    /// List engine bdevs, optionally a single one by name
    pub async fn get_bdevs(&self, name: Option<&str>) -> Result<Vec<Bdev>> {
        let name = name.map(str::to_string);
        Ok(parse_bdev_list(self.execute(EngineCall::GetBdevs { name }).await?))
    }

    pub async fn attach_nvme_controller(
        &self,
        name: &str,
        trtype: &str,
        traddr: &str,
        adrfam: Option<&str>,
        trsvcid: Option<&str>,
    ) -> Result<Value> {
        self.execute(EngineCall::AttachNvmeController {
            name: name.into(),
            trtype: trtype.into(),
            traddr: traddr.into(),
            adrfam: adrfam.map(str::to_string),
            trsvcid: trsvcid.map(str::to_string),
        })
        .await
    }

    engine_calls! {
        detach_nvme_controller(name) => DetachNvmeController;
        delete_malloc_bdev(name) => DeleteMallocBdev;
        delete_aio_bdev(name) => DeleteAioBdev;
        delete_null_bdev(name) => DeleteNullBdev;
        delete_rbd_bdev(name) => DeleteRbdBdev;
    }

    /// Detach the controller and with it every bdev it exposes
    pub async fn delete_nvme_bdev(&self, name: &str) -> Result<Value> {
        self.detach_nvme_controller(name).await
    }

    pub async fn create_malloc_bdev(&self, name: &str, num_blocks: u64, block_size: Option<u32>) -> Result<Value> {
        let block_size = block_size.unwrap_or(512);
        self.execute(EngineCall::CreateMallocBdev { name: name.into(), num_blocks, block_size })
            .await
    }

    pub async fn create_aio_bdev(&self, name: &str, filename: &str, block_size: Option<u32>) -> Result<Value> {
        let block_size = block_size.unwrap_or(512);
        self.execute(EngineCall::CreateAioBdev { name: name.into(), filename: filename.into(), block_size })
            .await
    }

    // ========== RAID Management ==========

    pub async fn create_raid(
        &self,
        name: &str,
        level: RaidLevel,
        base_bdevs: &[String],
        strip_size_kb: Option<u32>,
    ) -> Result<Value> {
        self.execute(EngineCall::CreateRaid {
            name: name.into(),
            level,
            base_bdevs: base_bdevs.to_vec(),
            strip_size_kb,
        })
        .await
    }

    engine_calls! {
        delete_raid(name) => DeleteRaid;
        add_raid_base_bdev(raid_bdev, base_bdev) => AddRaidBaseBdev;
        remove_raid_base_bdev(raid_bdev, base_bdev) => RemoveRaidBaseBdev;
    }

    /// List RAID bdevs.
    ///
    /// Falls back to filtering `bdev_get_bdevs` when the dedicated method
    /// fails, flattening each bdev's raid payload.
    pub async fn get_raid_bdevs(&self) -> Result<Value> {
        match self.execute(EngineCall::GetRaidBdevs).await {
            Ok(raids) => {
                info!("Got RAID data using bdev_raid_get_bdevs");
                Ok(raids)
            }
            Err(e) => {
                warn!("bdev_raid_get_bdevs failed, using fallback method: {}", e);
                let bdevs = self.get_bdevs(None).await?;
                let raids = bdevs
                    .into_iter()
                    .filter(Bdev::is_raid)
                    .map(|bdev| flatten_raid_bdev(&bdev))
                    .collect();
                Ok(Value::Array(raids))
            }
        }
    }

    // ========== NVMe-oF Target Management ==========

    pub async fn create_transport(&self, trtype: &str, tgt_name: Option<&str>, trsvcid: Option<&str>) -> Result<Value> {
        self.execute(EngineCall::CreateTransport {
            trtype: trtype.into(),
            tgt_name: tgt_name.map(str::to_string),
            trsvcid: trsvcid.map(str::to_string),
        })
        .await
    }

    pub async fn create_subsystem(
        &self,
        nqn: &str,
        allow_any_host: bool,
        serial_number: Option<&str>,
        model_number: Option<&str>,
    ) -> Result<Value> {
        self.execute(EngineCall::CreateSubsystem {
            nqn: nqn.into(),
            allow_any_host,
            serial_number: serial_number.map(str::to_string),
            model_number: model_number.map(str::to_string),
        })
        .await
    }

    engine_calls! {
        get_transports() => GetTransports;
        get_subsystems() => GetSubsystems;
        delete_subsystem(nqn) => DeleteSubsystem;
        add_subsystem_host(nqn, host) => AddSubsystemHost;
        remove_subsystem_host(nqn, host) => RemoveSubsystemHost;
        get_subsystem_controllers(nqn) => GetSubsystemControllers;
        get_subsystem_qpairs(nqn) => GetSubsystemQpairs;
    }

    pub async fn add_subsystem_listener(&self, nqn: &str, address: ListenAddress) -> Result<Value> {
        self.execute(EngineCall::AddSubsystemListener { nqn: nqn.into(), address })
            .await
    }

    pub async fn remove_subsystem_listener(&self, nqn: &str, address: ListenAddress) -> Result<Value> {
        self.execute(EngineCall::RemoveSubsystemListener { nqn: nqn.into(), address })
            .await
    }

    pub async fn add_subsystem_namespace(
        &self,
        nqn: &str,
        bdev_name: &str,
        nsid: Option<u32>,
        uuid: Option<&str>,
    ) -> Result<Value> {
        self.execute(EngineCall::AddSubsystemNamespace {
            nqn: nqn.into(),
            bdev_name: bdev_name.into(),
            nsid,
            uuid: uuid.map(str::to_string),
        })
        .await
    }

    pub async fn remove_subsystem_namespace(&self, nqn: &str, nsid: u32) -> Result<Value> {
        self.execute(EngineCall::RemoveSubsystemNamespace { nqn: nqn.into(), nsid })
            .await
    }

    pub async fn set_subsystem_allow_any_host(&self, nqn: &str, allow_any_host: bool) -> Result<Value> {
        self.execute(EngineCall::SetSubsystemAllowAnyHost { nqn: nqn.into(), allow_any_host })
            .await
    }

    /// Namespaces of one subsystem; empty when the subsystem or the engine is unavailable
    pub async fn get_subsystem_namespaces(&self, nqn: &str) -> Vec<Value> {
        match self.get_subsystems().await {
            Ok(Value::Array(subsystems)) => subsystems
                .into_iter()
                .find(|s| s["nqn"].as_str() == Some(nqn))
                .and_then(|s| s.get("namespaces").and_then(Value::as_array).cloned())
                .unwrap_or_default(),
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("Failed to get namespaces for subsystem {}: {}", nqn, e);
                Vec::new()
            }
        }
    }

    // ========== Configuration Management ==========

    /// Version, bdevs, transports and subsystems in one snapshot
    pub async fn get_full_config(&self) -> Result<FullConfig> {
        let (bdevs, subsystems, transports, version) = tokio::try_join!(
            self.execute(EngineCall::GetBdevs { name: None }),
            self.get_subsystems(),
            self.get_transports(),
            self.get_version(),
        )
        .map_err(|e| Error::Internal(format!("Failed to get full config: {}", e)))?;

        Ok(FullConfig {
            timestamp: chrono::Utc::now(),
            spdk_version: version,
            bdevs,
            nvmf: NvmfConfig {
                transports,
                subsystems,
            },
        })
    }

    pub async fn save_config(&self, filename: Option<&str>) -> Result<Value> {
        let filename = filename.map(str::to_string);
        self.execute(EngineCall::SaveConfig { filename }).await
    }

    engine_calls! {
        load_config(filename) => LoadConfig;
        get_framework_config() => GetFrameworkConfig;
    }

    // ========== System Information ==========

    engine_calls! {
        get_version() => GetVersion;
    }

    pub async fn get_system_info(&self) -> Result<SystemInfo> {
        let (version, bdevs, subsystems, transports) = tokio::try_join!(
            self.get_version(),
            self.execute(EngineCall::GetBdevs { name: None }),
            self.get_subsystems(),
            self.get_transports(),
        )
        .map_err(|e| Error::Internal(format!("Failed to get system info: {}", e)))?;

        Ok(SystemInfo {
            version,
            bdev_count: array_len(&bdevs),
            subsystem_count: array_len(&subsystems),
            transport_count: array_len(&transports),
            socket_path: self.channel.endpoint(),
        })
    }

    // ========== LV Store Management ==========

    pub async fn create_lvstore(&self, bdev_name: &str, lvs_name: &str, cluster_size: Option<u64>) -> Result<Value> {
        self.execute(EngineCall::CreateLvstore { bdev_name: bdev_name.into(), lvs_name: lvs_name.into(), cluster_size })
            .await
    }

    // grow_lvstore resizes the store to its base bdev
    engine_calls! {
        rename_lvstore(old_name, new_name) => RenameLvstore;
        grow_lvstore(uuid) => GrowLvstore;
        delete_lvstore(uuid) => DeleteLvstore;
        get_lvstores() => GetLvstores;
        get_lvols() => GetLvols;
    }

    // ========== LVol Management ==========

    pub async fn create_lvol(
        &self,
        lvstore_uuid: &str,
        lvol_name: &str,
        size_in_mib: u64,
        thin_provision: bool,
        clear_method: Option<&str>,
    ) -> Result<Value> {
        self.execute(EngineCall::CreateLvol {
            lvstore_uuid: lvstore_uuid.into(),
            lvol_name: lvol_name.into(),
            size_in_mib,
            thin_provision,
            clear_method: clear_method.map(str::to_string),
        })
        .await
    }

    pub async fn resize_lvol(&self, name: &str, size_in_mib: u64) -> Result<Value> {
        self.execute(EngineCall::ResizeLvol { name: name.into(), size_in_mib })
            .await
    }

    // clone_bdev clones a non-lvol bdev into a store; inflate_lvol makes a thin lvol thick
    engine_calls! {
        snapshot_lvol(lvol_name, snapshot_name) => SnapshotLvol;
        clone_lvol(snapshot_name, clone_name) => CloneLvol;
        clone_bdev(bdev_name, clone_name, lvstore_name) => CloneBdev;
        rename_lvol(old_name, new_name) => RenameLvol;
        inflate_lvol(name) => InflateLvol;
        decouple_lvol_parent(name) => DecoupleLvolParent;
        set_lvol_read_only(name) => SetLvolReadOnly;
        delete_lvol(name) => DeleteLvol;
        start_lvol_shallow_copy(src_lvol_name, dst_bdev_name) => StartLvolShallowCopy;
        check_lvol_shallow_copy(name) => CheckLvolShallowCopy;
        set_lvol_parent(name, parent_name) => SetLvolParent;
        set_lvol_parent_bdev(name, parent_bdev_name) => SetLvolParentBdev;
    }
}

/// Raid entry for the fallback listing: bdev name first, then the raid
/// payload, then the bdev geometry
fn flatten_raid_bdev(bdev: &Bdev) -> Value {
    let Some(Value::Object(raid)) = bdev.driver.raid_payload() else {
        return serde_json::to_value(bdev).unwrap_or(Value::Null);
    };

    let mut entry = Map::new();
    entry.insert("name".into(), json!(bdev.name));
    for (k, v) in raid {
        entry.insert(k.clone(), v.clone());
    }
    entry.insert("block_size".into(), json!(bdev.block_size));
    entry.insert("num_blocks".into(), json!(bdev.num_blocks));
    entry.insert("claimed".into(), json!(bdev.claimed));
    Value::Object(entry)
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedChannel;
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn client(channel: ScriptedChannel) -> (SpdkClient, Arc<ScriptedChannel>) {
        let channel = Arc::new(channel);
        (SpdkClient::new(channel.clone()), channel)
    }

    #[test]
    fn test_store_identifier_field_names() {
        let create = EngineCall::CreateLvol {
            lvstore_uuid: "lvs-uuid".into(),
            lvol_name: "vol0".into(),
            size_in_mib: 1024,
            thin_provision: true,
            clear_method: None,
        };
        let params = create.params().unwrap();
        assert_eq!(params["uuid"], "lvs-uuid");
        assert!(params.get("lvol_store_uuid").is_none());
        assert!(params.get("clear_method").is_none());

        let clone = EngineCall::CloneBdev {
            bdev_name: "Nvme0n1".into(),
            clone_name: "c0".into(),
            lvstore_name: "lvs0".into(),
        };
        let params = clone.params().unwrap();
        assert_eq!(params["bdev"], "Nvme0n1");
        assert_eq!(params["lvs_name"], "lvs0");
        assert!(params.get("uuid").is_none());
    }

    #[test]
    fn test_raid_strip_size_only_for_striped_levels() {
        let raid1 = EngineCall::CreateRaid {
            name: "r1".into(),
            level: RaidLevel::Raid1,
            base_bdevs: vec!["a".into(), "b".into()],
            strip_size_kb: Some(64),
        };
        assert!(raid1.params().unwrap().get("strip_size_kb").is_none());

        let raid0 = EngineCall::CreateRaid {
            name: "r0".into(),
            level: RaidLevel::Raid0,
            base_bdevs: vec!["a".into(), "b".into()],
            strip_size_kb: Some(64),
        };
        let params = raid0.params().unwrap();
        assert_eq!(params["strip_size_kb"], 64);
        assert_eq!(params["raid_level"], "raid0");

        assert_eq!("RAID5F".parse::<RaidLevel>().unwrap(), RaidLevel::Raid5f);
        assert!("raid6".parse::<RaidLevel>().is_err());
    }

    #[test]
    fn test_param_shapes() {
        assert_eq!(EngineCall::GetBdevs { name: None }.params(), None);
        assert_eq!(EngineCall::GetRaidBdevs.params(), Some(json!("all")));
        assert_eq!(EngineCall::SaveConfig { filename: None }.params(), None);

        let listener = EngineCall::AddSubsystemListener {
            nqn: "nqn.2016-06.io.spdk:cnode1".into(),
            address: ListenAddress::new("TCP", "10.0.0.1", "4420"),
        };
        assert_eq!(
            listener.params().unwrap()["listen_address"],
            json!({"trtype": "TCP", "traddr": "10.0.0.1", "trsvcid": "4420", "adrfam": "ipv4"})
        );

        let ns = EngineCall::AddSubsystemNamespace {
            nqn: "nqn.2016-06.io.spdk:cnode1".into(),
            bdev_name: "Malloc0".into(),
            nsid: Some(1),
            uuid: None,
        };
        assert_eq!(
            ns.params().unwrap()["namespace"],
            json!({"bdev_name": "Malloc0", "nsid": 1})
        );
    }

    #[test]
    fn test_lvstore_timeouts() {
        let create = EngineCall::CreateLvstore {
            bdev_name: "Nvme0n1".into(),
            lvs_name: "lvs0".into(),
            cluster_size: None,
        };
        assert_eq!(create.timeout(), Some(Duration::from_secs(180)));
        assert_eq!(
            EngineCall::DeleteLvstore { uuid: "u".into() }.timeout(),
            Some(Duration::from_secs(120))
        );
        assert_eq!(EngineCall::GetLvols.timeout(), None);
    }

    #[tokio::test]
    async fn test_create_raid_error_propagates() {
        let (client, _) = client(ScriptedChannel::new().fail("bdev_raid_create", -32602, "Invalid params"));

        let err = client
            .create_raid("r0", RaidLevel::Raid0, &["a".into(), "b".into()], Some(64))
            .await
            .unwrap_err();

        assert_matches!(err, Error::Engine { code: -32602, ref message } if message == "Invalid params");
    }

    #[tokio::test]
    async fn test_raid_listing_fallback() {
        let (client, channel) = client(
            ScriptedChannel::new()
                .fail("bdev_raid_get_bdevs", -32601, "Method not found")
                .reply(
                    "bdev_get_bdevs",
                    json!([
                        {
                            "name": "raid0",
                            "product_name": "Raid Volume",
                            "block_size": 512,
                            "num_blocks": 2048,
                            "claimed": false,
                            "driver_specific": {"raid": {"raid_level": "raid0", "num_base_bdevs": 2}}
                        },
                        {"name": "Malloc0", "product_name": "Malloc disk", "block_size": 512, "num_blocks": 1}
                    ]),
                ),
        );

        let raids = client.get_raid_bdevs().await.unwrap();
        let raids = raids.as_array().unwrap();
        assert_eq!(raids.len(), 1);
        assert_eq!(raids[0]["name"], "raid0");
        assert_eq!(raids[0]["raid_level"], "raid0");
        assert_eq!(raids[0]["num_blocks"], 2048);

        let calls = channel.calls.lock().unwrap();
        assert_eq!(calls[0].1, Some(json!("all")));
    }

    #[tokio::test]
    async fn test_create_lvstore_uses_long_timeout() {
        let (client, channel) = client(ScriptedChannel::new());
        client.create_lvstore("Nvme0n1", "lvs0", Some(4 * 1024 * 1024)).await.unwrap();

        let (method, params, timeout) = channel.last_call();
        assert_eq!(method, "bdev_lvol_create_lvstore");
        assert_eq!(params.unwrap()["cluster_sz"], 4 * 1024 * 1024);
        assert_eq!(timeout, Some(CREATE_LVSTORE_TIMEOUT));
    }

    #[tokio::test]
    async fn test_string_argument_wrappers() {
        let (client, channel) = client(ScriptedChannel::new());

        client.clone_bdev("Nvme0n1", "clone0", "lvs0").await.unwrap();
        let (method, params, _) = channel.last_call();
        assert_eq!(method, "bdev_lvol_clone_bdev");
        assert_eq!(params.unwrap(), json!({"bdev": "Nvme0n1", "clone_name": "clone0", "lvs_name": "lvs0"}));

        client.add_subsystem_host("nqn.a", "nqn.host").await.unwrap();
        let (method, params, _) = channel.last_call();
        assert_eq!(method, "nvmf_subsystem_add_host");
        assert_eq!(params.unwrap()["host"], "nqn.host");

        client.delete_lvstore("uuid-1").await.unwrap();
        let (method, _, timeout) = channel.last_call();
        assert_eq!(method, "bdev_lvol_delete_lvstore");
        assert_eq!(timeout, Some(DELETE_LVSTORE_TIMEOUT));

        client.get_lvols().await.unwrap();
        assert_eq!(channel.last_call(), ("bdev_lvol_get_lvols".to_string(), None, None));
    }

    #[tokio::test]
    async fn test_subsystem_namespaces_degrade_to_empty() {
        let (client, _) = client(ScriptedChannel::new().reply(
            "nvmf_get_subsystems",
            json!([{"nqn": "nqn.a", "namespaces": [{"nsid": 1, "bdev_name": "Malloc0"}]}]),
        ));
        assert_eq!(client.get_subsystem_namespaces("nqn.a").await.len(), 1);
        assert!(client.get_subsystem_namespaces("nqn.missing").await.is_empty());

        let (client, _) = self::client(ScriptedChannel::new().fail("nvmf_get_subsystems", -1, "down"));
        assert!(client.get_subsystem_namespaces("nqn.a").await.is_empty());
    }

    #[tokio::test]
    async fn test_system_info_counts() {
        let (client, _) = client(
            ScriptedChannel::new()
                .reply("spdk_get_version", json!({"version": "SPDK v24.01"}))
                .reply("bdev_get_bdevs", json!([{"name": "a"}, {"name": "b"}]))
                .reply("nvmf_get_subsystems", json!([]))
                .reply("nvmf_get_transports", json!([{"trtype": "TCP"}])),
        );

        let info = client.get_system_info().await.unwrap();
        assert_eq!(info.bdev_count, 2);
        assert_eq!(info.subsystem_count, 0);
        assert_eq!(info.transport_count, 1);
        assert_eq!(info.socket_path, "/var/tmp/test.sock");
    }
}
