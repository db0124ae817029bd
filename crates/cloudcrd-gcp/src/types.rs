//! Wire types for the subset of the Compute Engine v1 and Cloud SQL Admin
//! v1beta4 APIs the controller uses. Unknown fields are ignored on decode.

use serde::{Deserialize, Serialize};

/// Compute Engine instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeInstance {
    /// Instance name
    pub name: String,
    /// Minimum CPU platform, `Automatic` to let the provider choose
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_cpu_platform: String,
    /// Full or partial machine type URL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_type: String,
    /// Lifecycle status reported by the provider (read only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Attached disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<AttachedDisk>,
    /// Network interfaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,
    /// Service accounts available to the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccount>,
}

impl ComputeInstance {
    /// Every non-empty external NAT address of the instance
    pub fn nat_ips(&self) -> impl Iterator<Item = &str> {
        self.network_interfaces
            .iter()
            .flat_map(|iface| iface.access_configs.iter())
            .filter_map(|ac| ac.nat_ip.as_deref())
            .filter(|ip| !ip.is_empty())
    }
}

/// Disk attached to an instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    /// Delete the disk together with the instance
    #[serde(default)]
    pub auto_delete: bool,
    /// Boot disk
    #[serde(default)]
    pub boot: bool,
    /// `PERSISTENT` or `SCRATCH`
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub disk_type: String,
    /// Parameters for creating a new disk along with the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<AttachedDiskInitializeParams>,
}

/// New-disk parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDiskInitializeParams {
    /// Image to create the disk from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_image: String,
    /// Size in GB; the API encodes int64 values as strings
    #[serde(
        default,
        with = "int64_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub disk_size_gb: Option<i64>,
}

/// Network interface of an instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Subnetwork URL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnetwork: String,
    /// External access configurations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_configs: Vec<AccessConfig>,
}

/// External access for a network interface
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// Only `ONE_TO_ONE_NAT` is supported by the API
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub access_type: String,
    /// Display name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Assigned external address (read only unless reserving one)
    #[serde(rename = "natIP", default, skip_serializing_if = "Option::is_none")]
    pub nat_ip: Option<String>,
}

/// Service account attached to an instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccount {
    /// Service account email
    #[serde(default)]
    pub email: String,
    /// OAuth scopes granted to the instance
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// One page of `instances.list`
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceList {
    /// Instances on this page
    #[serde(default)]
    pub items: Vec<ComputeInstance>,
    /// Token for the next page, absent on the last page
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Long-running operation returned by mutating calls
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation name
    #[serde(default)]
    pub name: String,
    /// PENDING, RUNNING or DONE
    #[serde(default)]
    pub status: String,
    /// Type of operation (insert, delete, CREATE, DELETE, ...)
    #[serde(default)]
    pub operation_type: String,
}

/// Cloud SQL instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    /// Instance name
    pub name: String,
    /// `SECOND_GEN` for current instances
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_type: String,
    /// Engine and version, e.g. `MYSQL_5_7`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database_version: String,
    /// Lifecycle state reported by the provider (read only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// User settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

/// Cloud SQL instance settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Machine tier, e.g. `db-n1-standard-1`
    #[serde(default)]
    pub tier: String,
    /// IP connectivity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_configuration: Option<IpConfiguration>,
}

/// Cloud SQL IP settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    /// Networks allowed to connect
    #[serde(default)]
    pub authorized_networks: Vec<AclEntry>,
}

/// One authorized network
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AclEntry {
    /// Address or CIDR range
    pub value: String,
}

/// Google's JSON error envelope
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

mod int64_string {
    //! int64 fields travel as JSON strings but numbers are accepted on decode

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Number(n)) => Ok(Some(n)),
            Some(Raw::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
