//! JSON wire types exchanged with the volume gateway.

use serde::{Deserialize, Serialize};

use crate::session::{OperationFault, TaskResult, TaskState, VolumeRecord};
use crate::volume::{ClusterMetadata, DeleteRequest, QueryFilter, VolumeCreateRequest, VolumeId};

const VOLUME_TYPE_BLOCK: &str = "BLOCK";

#[derive(Debug, Deserialize, Serialize)]
pub(super) struct WireVolumeId {
    pub id: String,
}

impl From<&VolumeId> for WireVolumeId {
    fn from(value: &VolumeId) -> Self {
        Self {
            id: value.as_str().to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireCluster {
    pub cluster_type: String,
    pub cluster_id: String,
    #[serde(rename = "vSphereUser")]
    pub owner: String,
    pub cluster_flavor: String,
}

impl From<&ClusterMetadata> for WireCluster {
    fn from(value: &ClusterMetadata) -> Self {
        Self {
            cluster_type: value.cluster_type.clone(),
            cluster_id: value.cluster_id.clone(),
            owner: value.owner_principal.clone(),
            cluster_flavor: value.cluster_flavor.clone(),
        }
    }
}

impl From<WireCluster> for ClusterMetadata {
    fn from(value: WireCluster) -> Self {
        Self {
            cluster_type: value.cluster_type,
            cluster_id: value.cluster_id,
            owner_principal: value.owner,
            cluster_flavor: value.cluster_flavor,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireMetadata {
    pub container_cluster: WireCluster,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireBacking {
    pub capacity_in_mb: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireCreateSpec {
    pub name: String,
    pub volume_type: &'static str,
    pub datastores: Vec<String>,
    pub metadata: WireMetadata,
    pub backing_object_details: WireBacking,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateVolumeBody {
    pub create_specs: Vec<WireCreateSpec>,
}

impl From<&VolumeCreateRequest> for CreateVolumeBody {
    fn from(value: &VolumeCreateRequest) -> Self {
        Self {
            create_specs: vec![WireCreateSpec {
                name: value.name.clone(),
                volume_type: VOLUME_TYPE_BLOCK,
                datastores: value
                    .datastores
                    .iter()
                    .map(|ds| ds.reference.clone())
                    .collect(),
                metadata: WireMetadata {
                    container_cluster: WireCluster::from(&value.cluster),
                },
                backing_object_details: WireBacking {
                    capacity_in_mb: value.size_mb,
                },
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct QueryVolumeBody {
    pub volume_ids: Vec<WireVolumeId>,
}

impl From<&QueryFilter> for QueryVolumeBody {
    fn from(value: &QueryFilter) -> Self {
        Self {
            volume_ids: value.volume_ids.iter().map(WireVolumeId::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteVolumeBody {
    pub volume_ids: Vec<WireVolumeId>,
    pub delete_disk: bool,
}

impl From<&DeleteRequest> for DeleteVolumeBody {
    fn from(value: &DeleteRequest) -> Self {
        Self {
            volume_ids: value.volume_ids.iter().map(WireVolumeId::from).collect(),
            delete_disk: value.delete_disk,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SubmitResponse {
    pub task: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct DatastoreResponse {
    pub reference: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireTaskInfo {
    pub task: String,
    pub state: TaskState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireFault {
    pub fault_type: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireVolume {
    pub volume_id: WireVolumeId,
    pub name: String,
    #[serde(default)]
    pub backing_object_details: Option<WireBacking>,
    #[serde(default)]
    pub datastore_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<WireMetadata>,
}

impl From<WireVolume> for VolumeRecord {
    fn from(value: WireVolume) -> Self {
        Self {
            volume_id: VolumeId::new(value.volume_id.id),
            name: value.name,
            capacity_mb: value
                .backing_object_details
                .map_or(0, |backing| backing.capacity_in_mb),
            datastore_url: value.datastore_url,
            cluster: value
                .metadata
                .map(|metadata| ClusterMetadata::from(metadata.container_cluster)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireOperationResult {
    #[serde(default)]
    pub volume_id: Option<WireVolumeId>,
    #[serde(default)]
    pub volumes: Vec<WireVolume>,
    #[serde(default)]
    pub fault: Option<WireFault>,
}

impl From<WireOperationResult> for TaskResult {
    fn from(value: WireOperationResult) -> Self {
        Self {
            volume_id: value.volume_id.map(|id| VolumeId::new(id.id)),
            volumes: value.volumes.into_iter().map(VolumeRecord::from).collect(),
            fault: value
                .fault
                .map(|fault| OperationFault::new(fault.fault_type, fault.message)),
        }
    }
}
