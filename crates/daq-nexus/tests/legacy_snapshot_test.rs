//! Location map linking and the pre-scan snapshot, driven through adapters.

use daq_nexus::legacy::{apply_location_map, LocationMapEntry};
use daq_nexus::positioner::{COLLECTION_SCANNABLES, FIELD_VALUE};
use daq_nexus::prelude::*;
use daq_nexus::snapshot::collect_snapshot;
use daq_nexus::ErrorClass;
use std::collections::BTreeMap;
use tracing_test::traced_test;

fn stage() -> Arc<SimulatedDevice> {
    Arc::new(
        SimulatedDevice::with_fields(
            "stage",
            vec!["x".to_string(), "y".to_string()],
            vec!["temperature".to_string()],
        )
        .with_units(Some("mm".to_string()))
        .with_position(Value::from(vec![1.0, 2.0, 295.0])),
    )
}

fn location_map() -> BTreeMap<String, LocationMapEntry> {
    BTreeMap::from([(
        "stage".to_string(),
        LocationMapEntry {
            paths: vec![
                "instrument:NXinstrument/sample_stage:NXpositioner/x".to_string(),
                "instrument:NXinstrument/sample_stage:NXpositioner/y".to_string(),
                "sample:NXsample/temperature".to_string(),
            ],
            units: vec![String::new(), String::new(), "K".to_string()],
            ..Default::default()
        },
    )])
}

fn run_scan(adapter: &mut DeviceAdapter, device: &SimulatedDevice, points: usize) -> Vec<DeviceTree> {
    let info = ScanInfo::new(vec![points]).with_role("stage", DeviceRole::Monitor);
    let trees = adapter.build_tree(&info).unwrap();
    for step in 0..points {
        let position = ScanPosition::from_step(step, info.shape()).unwrap();
        adapter.write_point(device.position().unwrap(), &position).unwrap();
    }
    trees
}

#[test]
fn test_location_map_links_adapter_datasets() {
    let device = stage();
    let options = AdapterOptions {
        has_location_map_entry: true,
        ..AdapterOptions::default()
    };
    let mut adapter = DeviceAdapter::for_device(device.clone(), options);
    let trees = run_scan(&mut adapter, &device, 3);
    assert!(trees
        .iter()
        .all(|tree| tree.collection_name() == Some(COLLECTION_SCANNABLES)));

    let adapters = vec![adapter];
    let mut root = GroupNode::new(NexusBaseClass::NXentry);
    let failures = apply_location_map(&mut root, &location_map(), &adapters);
    assert!(failures.is_empty());

    let sample_stage = root.group("instrument").and_then(|g| g.group("sample_stage")).unwrap();
    assert_eq!(sample_stage.nx_class(), NexusBaseClass::NXpositioner);
    let x = sample_stage.data_node("x").unwrap();
    assert_eq!(x.shape(), vec![3]);

    let x_tree = trees.iter().find(|tree| tree.name() == "stage.x").unwrap();
    let own = x_tree.group().data_node(FIELD_VALUE).unwrap();
    assert!(own.ptr_eq(&x));

    let temperature = root.find_data_node("sample/temperature").unwrap();
    assert_eq!(temperature.attribute_str("units").as_deref(), Some("K"));
}

#[test]
#[traced_test]
fn test_location_map_class_conflict_is_reported() {
    let device = stage();
    let mut adapter = DeviceAdapter::for_device(device.clone(), AdapterOptions::default());
    run_scan(&mut adapter, &device, 2);

    let mut root = GroupNode::new(NexusBaseClass::NXentry);
    root.add_group("instrument", GroupNode::new(NexusBaseClass::NXcollection));
    let adapters = vec![adapter];
    let failures = apply_location_map(&mut root, &location_map(), &adapters);

    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], NexusError::ClassMismatch { .. }));
    assert_eq!(failures[0].class(), ErrorClass::StructuralFatal);
    assert!(!root.contains("sample"));
    assert!(logs_contain("Location map could not be applied"));
}

#[test]
fn test_location_map_skips_devices_without_tree() {
    let device = stage();
    let mut adapter = DeviceAdapter::for_device(device.clone(), AdapterOptions::default());
    run_scan(&mut adapter, &device, 2);
    adapter.scan_end();

    let mut root = GroupNode::new(NexusBaseClass::NXentry);
    let failures = apply_location_map(&mut root, &location_map(), &[adapter]);
    assert!(failures.is_empty());
    assert!(!root.contains("instrument"));
}

#[test]
#[traced_test]
fn test_snapshot_of_simulated_devices() {
    let offline = Arc::new(SimulatedDevice::new("shutter").with_position(1.0));
    offline.set_offline(true);
    let registry: BTreeMap<String, Arc<dyn Device>> = BTreeMap::from([
        ("stage".to_string(), stage() as Arc<dyn Device>),
        ("shutter".to_string(), offline as Arc<dyn Device>),
    ]);
    let names = vec![
        "stage".to_string(),
        "shutter".to_string(),
        "slit".to_string(),
    ];
    let snapshot = collect_snapshot(&registry, &names, &BTreeMap::new());

    assert_eq!(snapshot.recorded(), vec!["stage"]);
    assert_eq!(snapshot.skipped.len(), 2);
    assert!(logs_contain("left out of the snapshot"));

    let stage = snapshot.group.group("stage").unwrap();
    assert_eq!(stage.data_node_names(), vec!["x", "y", "temperature"]);
    let temperature = stage.data_node("temperature").unwrap();
    assert!(temperature.attribute("units").is_none());
    assert_eq!(
        stage.data_node("x").unwrap().attribute_str("units").as_deref(),
        Some("mm")
    );
}
