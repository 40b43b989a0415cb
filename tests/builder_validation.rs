//! Validation rules enforced by the request builders.

use cnsvol::{
    ClusterMetadata, DatastoreRef, DeleteRequest, QueryFilter, RequestError, VolumeCreateRequest,
    VolumeId,
};
use rstest::rstest;

fn datastore() -> DatastoreRef {
    DatastoreRef::new("datastore-12", "ds:///vmfs/volumes/abc/")
}

#[test]
fn valid_input_yields_matching_descriptor() {
    let request = VolumeCreateRequest::builder()
        .name("  vol-1  ")
        .size_mb(5120)
        .datastore(datastore())
        .cluster(ClusterMetadata::for_owner("administrator"))
        .build()
        .expect("valid request");

    assert_eq!(request.name, "vol-1");
    assert_eq!(request.size_mb, 5120);
    assert_eq!(request.datastores, vec![datastore()]);
    assert_eq!(request.cluster.cluster_type, "KUBERNETES");
    assert_eq!(request.cluster.cluster_flavor, "VANILLA");
}

#[rstest]
#[case::zero_size("vol", 0, true, RequestError::InvalidSize(0))]
#[case::negative_size("vol", -1, true, RequestError::InvalidSize(-1))]
#[case::no_datastores("vol", 10, false, RequestError::NoDatastores)]
#[case::blank_name("   ", 10, true, RequestError::MissingField("name"))]
fn invalid_input_is_rejected(
    #[case] name: &str,
    #[case] size_mb: i64,
    #[case] with_datastore: bool,
    #[case] expected: RequestError,
) {
    let datastores = with_datastore.then(datastore);

    let result = VolumeCreateRequest::builder()
        .name(name)
        .size_mb(size_mb)
        .datastores(datastores)
        .cluster(ClusterMetadata::for_owner("administrator"))
        .build();

    assert_eq!(result, Err(expected));
}

#[test]
fn query_and_delete_require_identifiers() {
    assert_eq!(
        QueryFilter::by_ids(Vec::<VolumeId>::new()),
        Err(RequestError::NoVolumeIds)
    );
    assert_eq!(
        DeleteRequest::new(Vec::<VolumeId>::new(), true),
        Err(RequestError::NoVolumeIds)
    );
}
