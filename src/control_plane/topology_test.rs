use super::*;
use crate::ControlPlaneError;
use crate::Error;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn two_datacenters() -> TopologySpec {
    let mut spec = TopologySpec::default();
    for (id, name) in [("dc1", "east"), ("dc2", "west")] {
        spec.datacenters.insert(
            DatacenterId::from(id),
            DatacenterSpec {
                name: name.to_string(),
                members: Default::default(),
            },
        );
    }
    spec
}

#[test]
fn test_apply_boundary_change_removes_then_adds() {
    let next = apply_boundary_change(&strings(&["g", "t"]), &strings(&["m", "a"]), &strings(&["g"]))
        .unwrap();
    assert_eq!(next, strings(&["a", "m", "t"]));

    // Re-adding a boundary removed in the same change is allowed.
    let next = apply_boundary_change(&strings(&["g"]), &strings(&["g"]), &strings(&["g"])).unwrap();
    assert_eq!(next, strings(&["g"]));
}

#[test]
fn test_apply_boundary_change_rejects_missing_and_duplicate() {
    assert!(matches!(
        apply_boundary_change(&strings(&["g"]), &[], &strings(&["x"])),
        Err(Error::ControlPlane(ControlPlaneError::InvalidTopology(_)))
    ));
    assert!(matches!(
        apply_boundary_change(&strings(&["g"]), &strings(&["g"]), &[]),
        Err(Error::ControlPlane(ControlPlaneError::InvalidTopology(_)))
    ));
}

#[test]
fn test_validate_boundaries() {
    validate_boundaries(&[]).unwrap();
    validate_boundaries(&strings(&["a", "b", "c"])).unwrap();
    assert!(validate_boundaries(&strings(&["a", "a"])).is_err());
    assert!(validate_boundaries(&strings(&["b", "a"])).is_err());
}

#[test]
fn test_validate_placement() {
    let spec = two_datacenters();
    let east = DatacenterId::from("dc1");
    let west = DatacenterId::from("dc2");

    spec.validate_placement(&Placement::new(east.clone()).with_replicas(west.clone(), 2))
        .unwrap();

    let zero_primary = Placement::new(east.clone()).with_replicas(east.clone(), 0);
    assert!(matches!(
        spec.validate_placement(&zero_primary),
        Err(Error::ControlPlane(ControlPlaneError::InvalidTopology(_)))
    ));

    let unknown_primary = Placement::new(DatacenterId::from("dc9"));
    assert!(matches!(
        spec.validate_placement(&unknown_primary),
        Err(Error::ControlPlane(ControlPlaneError::UnknownDatacenter(_)))
    ));

    let unsorted = Placement::new(west).with_shard_boundaries(strings(&["z", "a"]));
    assert!(spec.validate_placement(&unsorted).is_err());
}

#[test]
fn test_lookups() {
    let mut spec = two_datacenters();
    let node = NodeId::from("n1");
    spec.datacenters.get_mut(&DatacenterId::from("dc2")).unwrap().members.insert(node.clone());
    spec.tables.insert(
        TableId::from("t1"),
        TableSpec {
            name: "test".into(),
            placement: Placement::new(DatacenterId::from("dc1")),
        },
    );

    assert_eq!(spec.datacenter_by_name("west"), Some(&DatacenterId::from("dc2")));
    assert_eq!(spec.datacenter_of(&node), Some(&DatacenterId::from("dc2")));
    assert_eq!(spec.table_by_name("test"), Some(&TableId::from("t1")));
    assert!(spec.table(&TableId::from("t2")).is_err());
}
