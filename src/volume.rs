//! Request descriptors for the three volume operations.
//!
//! Builders here are pure: they trim and validate caller input and hand back
//! an immutable descriptor ready for submission, or a [`RequestError`]
//! naming the offending field. Nothing in this module talks to a session.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Cluster type recorded on volumes created by this tool.
pub const DEFAULT_CLUSTER_TYPE: &str = "KUBERNETES";
/// Cluster flavour recorded on volumes created by this tool.
pub const DEFAULT_CLUSTER_FLAVOR: &str = "VANILLA";
/// Cluster identifier recorded when none is configured.
pub const DEFAULT_CLUSTER_ID: &str = "demo-cluster-id";

/// Errors raised when caller input cannot form a valid request.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a required string field is empty.
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
    /// Raised when the requested capacity is zero or negative.
    #[error("volume size must be greater than zero (got {0} MB)")]
    InvalidSize(i64),
    /// Raised when no datastore is supplied for a create request.
    #[error("at least one datastore is required")]
    NoDatastores,
    /// Raised when a query or delete names no volume.
    #[error("at least one volume identifier is required")]
    NoVolumeIds,
    /// Raised when a plan selects no operation.
    #[error("no operation selected")]
    EmptyPlan,
}

/// Opaque identifier assigned to a volume by the backend.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    /// Wraps a backend identifier, trimming surrounding whitespace.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_owned())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VolumeId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Reference to a datastore resolved through the session.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DatastoreRef {
    /// Managed object reference (for example `datastore-12`).
    pub reference: String,
    /// Datastore URL (for example `ds:///vmfs/volumes/abc/`).
    pub url: String,
}

impl DatastoreRef {
    /// Creates a datastore reference.
    #[must_use]
    pub fn new(reference: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            url: url.into(),
        }
    }
}

/// Descriptive tags associating a volume with its owning cluster.
///
/// The core carries these values verbatim and never validates them.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClusterMetadata {
    /// Orchestrator type, normally `KUBERNETES`.
    pub cluster_type: String,
    /// Identifier of the owning cluster.
    pub cluster_id: String,
    /// Principal that owns the volume on the management endpoint.
    pub owner_principal: String,
    /// Cluster flavour, normally `VANILLA`.
    pub cluster_flavor: String,
}

impl ClusterMetadata {
    /// Builds metadata for the default demo cluster owned by `owner`.
    #[must_use]
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            cluster_type: DEFAULT_CLUSTER_TYPE.to_owned(),
            cluster_id: DEFAULT_CLUSTER_ID.to_owned(),
            owner_principal: owner.into(),
            cluster_flavor: DEFAULT_CLUSTER_FLAVOR.to_owned(),
        }
    }
}

/// Validated descriptor for a block volume creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeCreateRequest {
    /// Volume name.
    pub name: String,
    /// Requested capacity in megabytes.
    pub size_mb: u64,
    /// Candidate datastores, in order of preference.
    pub datastores: Vec<DatastoreRef>,
    /// Owning cluster tags.
    pub cluster: ClusterMetadata,
}

impl VolumeCreateRequest {
    /// Starts a builder for a [`VolumeCreateRequest`].
    #[must_use]
    pub fn builder() -> VolumeCreateRequestBuilder {
        VolumeCreateRequestBuilder::new()
    }
}

/// Builder for [`VolumeCreateRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeCreateRequestBuilder {
    name: String,
    size_mb: i64,
    datastores: Vec<DatastoreRef>,
    cluster: Option<ClusterMetadata>,
}

impl VolumeCreateRequestBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the volume name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the requested size in megabytes. Values at or below zero are
    /// rejected by [`Self::build`].
    #[must_use]
    pub const fn size_mb(mut self, value: i64) -> Self {
        self.size_mb = value;
        self
    }

    /// Appends a datastore reference.
    #[must_use]
    pub fn datastore(mut self, value: DatastoreRef) -> Self {
        self.datastores.push(value);
        self
    }

    /// Replaces the datastore list.
    #[must_use]
    pub fn datastores(mut self, values: impl IntoIterator<Item = DatastoreRef>) -> Self {
        self.datastores = values.into_iter().collect();
        self
    }

    /// Sets the owning cluster metadata.
    #[must_use]
    pub fn cluster(mut self, value: ClusterMetadata) -> Self {
        self.cluster = Some(value);
        self
    }

    /// Builds and validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MissingField`] when the name is blank,
    /// [`RequestError::InvalidSize`] when the size is not positive, and
    /// [`RequestError::NoDatastores`] when the datastore list is empty.
    pub fn build(self) -> Result<VolumeCreateRequest, RequestError> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(RequestError::MissingField("name"));
        }
        let size_mb =
            u64::try_from(self.size_mb).map_err(|_| RequestError::InvalidSize(self.size_mb))?;
        if size_mb == 0 {
            return Err(RequestError::InvalidSize(self.size_mb));
        }
        if self.datastores.is_empty() {
            return Err(RequestError::NoDatastores);
        }

        Ok(VolumeCreateRequest {
            name,
            size_mb,
            datastores: self.datastores,
            cluster: self
                .cluster
                .unwrap_or_else(|| ClusterMetadata::for_owner(String::new())),
        })
    }
}

/// Filter selecting volumes by identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryFilter {
    /// Identifiers to match.
    pub volume_ids: Vec<VolumeId>,
}

impl QueryFilter {
    /// Builds a filter matching the given identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::NoVolumeIds`] when no identifier is given and
    /// [`RequestError::MissingField`] when one of them is blank.
    pub fn by_ids(volume_ids: impl IntoIterator<Item = VolumeId>) -> Result<Self, RequestError> {
        Ok(Self {
            volume_ids: collect_ids(volume_ids)?,
        })
    }
}

/// Descriptor for deleting volumes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeleteRequest {
    /// Identifiers to delete.
    pub volume_ids: Vec<VolumeId>,
    /// Whether the backing disk is removed along with the volume.
    pub delete_disk: bool,
}

impl DeleteRequest {
    /// Builds a delete request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::NoVolumeIds`] when no identifier is given and
    /// [`RequestError::MissingField`] when one of them is blank.
    pub fn new(
        volume_ids: impl IntoIterator<Item = VolumeId>,
        delete_disk: bool,
    ) -> Result<Self, RequestError> {
        Ok(Self {
            volume_ids: collect_ids(volume_ids)?,
            delete_disk,
        })
    }
}

fn collect_ids(
    volume_ids: impl IntoIterator<Item = VolumeId>,
) -> Result<Vec<VolumeId>, RequestError> {
    let ids: Vec<VolumeId> = volume_ids.into_iter().collect();
    if ids.is_empty() {
        return Err(RequestError::NoVolumeIds);
    }
    if ids.iter().any(VolumeId::is_empty) {
        return Err(RequestError::MissingField("volume_id"));
    }
    Ok(ids)
}

/// Generates a volume name in the persistent-volume-claim style
/// (`pvc-<uuid>`).
#[must_use]
pub fn generated_volume_name() -> String {
    format!("pvc-{}", Uuid::new_v4())
}
