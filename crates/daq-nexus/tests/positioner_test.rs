//! Scan lifecycle tests for positioner trees.

use daq_nexus::config::DeviceConfig;
use daq_nexus::dataset::SliceND;
use daq_nexus::positioner::{FIELD_NAME, FIELD_VALUE, FIELD_VALUE_SET};
use daq_nexus::prelude::*;
use daq_nexus::value::Scalar;
use daq_nexus::{AdapterKind, ErrorClass};
use std::collections::BTreeMap;
use tracing_test::traced_test;

fn read_f64(node: &DataNode, index: &[usize]) -> Option<f64> {
    let stop: Vec<usize> = index.iter().map(|i| i + 1).collect();
    node.read_slice(&SliceND::new(index.to_vec(), stop))
        .ok()?
        .first()
        .and_then(Scalar::as_f64)
}

#[test]
fn test_sample_x_scan() {
    let sample_x = Arc::new(SimulatedDevice::new("sample_x").with_units(Some("mm".to_string())));
    let mut adapter = DeviceAdapter::for_device(sample_x.clone(), AdapterOptions::default());
    assert_eq!(adapter.kind(), AdapterKind::PositionerSingle);

    let info = ScanInfo::new(vec![10]).with_role("sample_x", DeviceRole::Scannable);
    let trees = adapter.build_tree(&info).unwrap();
    assert_eq!(trees.len(), 1);
    let tree = &trees[0];
    assert_eq!(tree.name(), "sample_x");
    assert_eq!(tree.scan_role(), ScanRole::PerPoint);
    assert_eq!(tree.primary_field(), Some(FIELD_VALUE));
    assert_eq!(tree.axis_fields(), &[FIELD_VALUE_SET.to_string()]);

    for step in 0..10 {
        sample_x.move_to(step as f64);
        let position = ScanPosition::from_step(step, info.shape()).unwrap();
        adapter.write_demand(&Value::from(step as f64), &position).unwrap();
        adapter.write_point(step as f64, &position).unwrap();
    }

    let value = tree.group().data_node(FIELD_VALUE).unwrap();
    assert!(value.is_lazy());
    assert_eq!(value.shape(), vec![10]);
    assert_eq!(read_f64(&value, &[5]), Some(5.0));
    assert_eq!(value.attribute_str("units").as_deref(), Some("mm"));
    assert_eq!(value.attribute_str("local_name").as_deref(), Some("sample_x.sample_x"));

    let demand = tree.group().data_node(FIELD_VALUE_SET).unwrap();
    assert_eq!(demand.shape(), vec![10]);
    assert_eq!(read_f64(&demand, &[9]), Some(9.0));

    let name = tree.group().data_node(FIELD_NAME).unwrap();
    assert!(!name.is_lazy());

    adapter.scan_end();
    assert!(!adapter.is_active());
    adapter.scan_end();
    assert!(!adapter.is_active());
    assert!(adapter.field_nodes().is_none());
}

#[test]
fn test_single_field_monitor_has_only_value_dataset() {
    let monitor = Arc::new(SimulatedDevice::new("ring_current").with_position(300.0));
    let mut adapter = DeviceAdapter::for_device(monitor, AdapterOptions::default());
    let info = ScanInfo::new(vec![3]).with_role("ring_current", DeviceRole::Monitor);

    let trees = adapter.build_tree(&info).unwrap();
    assert_eq!(trees.len(), 1);
    let lazy: Vec<String> = trees[0]
        .group()
        .data_node_names()
        .into_iter()
        .filter(|n| trees[0].group().data_node(n).is_some_and(|d| d.is_lazy()))
        .collect();
    assert_eq!(lazy, vec![FIELD_VALUE.to_string()]);
}

#[test]
fn test_per_scan_monitor_is_fixed() {
    let monitor = Arc::new(SimulatedDevice::new("ring_current").with_position(300.2));
    let mut adapter = DeviceAdapter::for_device(monitor, AdapterOptions::default());
    let info = ScanInfo::new(vec![4]).with_role("ring_current", DeviceRole::MonitorPerScan);

    let trees = adapter.build_tree(&info).unwrap();
    assert_eq!(trees[0].scan_role(), ScanRole::PerScan);
    let value = trees[0].group().data_node(FIELD_VALUE).unwrap();
    assert!(!value.is_lazy());
    assert_eq!(value.read_all().unwrap().first().and_then(Scalar::as_f64), Some(300.2));
    assert!(trees[0].group().data_node(FIELD_VALUE_SET).is_none());
    assert_eq!(trees[0].axis_fields(), &[FIELD_VALUE.to_string()]);
}

#[test]
fn test_axis_is_value_without_demand_values() {
    let sample_x = Arc::new(SimulatedDevice::new("sample_x"));
    let options = AdapterOptions::default().with_write_demand_values(false);
    let mut adapter = DeviceAdapter::for_device(sample_x, options);
    let info = ScanInfo::new(vec![4]).with_role("sample_x", DeviceRole::Scannable);

    let trees = adapter.build_tree(&info).unwrap();
    assert!(trees[0].group().data_node(FIELD_VALUE_SET).is_none());
    assert_eq!(trees[0].axis_fields(), &[FIELD_VALUE.to_string()]);
}

#[test]
fn test_device_with_only_extra_fields() {
    let meter = Arc::new(SimulatedDevice::with_fields("meter", vec![], vec!["reading".to_string()]));
    let mut adapter = DeviceAdapter::for_device(meter, AdapterOptions::default());
    assert_eq!(adapter.kind(), AdapterKind::PositionerMulti);
    let info = ScanInfo::new(vec![3]).with_role("meter", DeviceRole::Monitor);

    let trees = adapter.build_tree(&info).unwrap();
    assert_eq!(trees.len(), 1);
    assert_eq!(trees[0].group().nx_class(), NexusBaseClass::NXcollection);
    assert_eq!(trees[0].primary_field(), Some("reading"));
    assert_eq!(trees[0].axis_fields(), &["reading".to_string()]);

    let position = ScanPosition::from_step(2, info.shape()).unwrap();
    adapter.write_point(1.5, &position).unwrap();
    let reading = trees[0].group().data_node("reading").unwrap();
    assert_eq!(read_f64(&reading, &[2]), Some(1.5));

    let psu = Arc::new(
        SimulatedDevice::with_fields("psu", vec![], vec!["current".to_string(), "voltage".to_string()])
            .with_position(Value::from(vec![0.5, 12.0])),
    );
    let mut adapter = DeviceAdapter::for_device(psu, AdapterOptions::default());
    let info = ScanInfo::new(vec![3]).with_role("psu", DeviceRole::Monitor);
    let trees = adapter.build_tree(&info).unwrap();
    assert_eq!(trees.len(), 1);
    assert_eq!(trees[0].primary_field(), Some("current"));
    assert_eq!(trees[0].axis_fields(), &["current".to_string()]);
}

#[test]
fn test_primary_from_implicit_step_only() {
    let stage = Arc::new(
        SimulatedDevice::with_fields("stage", vec!["x".to_string(), "y".to_string()], vec![])
            .with_position(Value::from(vec![0.0, 100.0])),
    );
    let mut adapter = DeviceAdapter::for_device(stage, AdapterOptions::default());
    let info = ScanInfo::new(vec![5])
        .with_role("stage", DeviceRole::Scannable)
        .with_scan_object(
            "stage",
            ScanObject::Implicit {
                start: Some(Value::from(vec![0.0, 100.0])),
                stop: None,
                step: Some(Value::from(vec![2.0, 1.0])),
            },
        );
    let trees = adapter.build_tree(&info).unwrap();
    assert_eq!(trees[0].primary_field(), Some("y"));

    let mismatched = ScanInfo::new(vec![5])
        .with_role("stage", DeviceRole::Scannable)
        .with_scan_object(
            "stage",
            ScanObject::Implicit {
                start: Some(Value::from(vec![0.0, 100.0])),
                stop: None,
                step: Some(Value::from(vec![2.0])),
            },
        );
    let err = adapter.build_tree(&mismatched).unwrap_err();
    assert!(matches!(err, NexusError::InvalidDeviceConfig { .. }));
}

#[test]
fn test_multi_field_device_trees() {
    let stage = Arc::new(
        SimulatedDevice::with_fields(
            "stage",
            vec!["x".to_string(), "y".to_string()],
            vec!["temperature".to_string()],
        )
        .with_position(Value::from(vec![0.0, 0.0, 295.0])),
    );
    let mut adapter = DeviceAdapter::for_device(stage.clone(), AdapterOptions::default());
    assert_eq!(adapter.kind(), AdapterKind::PositionerMulti);

    let info = ScanInfo::new(vec![2, 3]).with_role("stage", DeviceRole::Scannable);
    let trees = adapter.build_tree(&info).unwrap();
    assert_eq!(trees.len(), 3);

    let collection = &trees[0];
    assert_eq!(collection.group().nx_class(), NexusBaseClass::NXcollection);
    assert_eq!(collection.group().data_node_names(), vec!["x", "y", "temperature"]);
    assert_eq!(collection.axis_fields(), &["x".to_string(), "y".to_string()]);
    assert_eq!(trees[1].name(), "stage.x");
    assert_eq!(trees[2].name(), "stage.y");

    let x_in_collection = collection.group().data_node("x").unwrap();
    let x_in_axis = trees[1].group().data_node(FIELD_VALUE).unwrap();
    assert!(x_in_collection.ptr_eq(&x_in_axis));

    for step in 0..6 {
        let position = ScanPosition::from_step(step, info.shape()).unwrap();
        adapter
            .write_point(Value::from(vec![step as f64, -(step as f64), 295.0]), &position)
            .unwrap();
    }
    let y = collection.group().data_node("y").unwrap();
    assert_eq!(y.shape(), vec![2, 3]);
    assert_eq!(read_f64(&y, &[1, 1]), Some(-4.0));
    assert_eq!(read_f64(&x_in_axis, &[0, 2]), Some(2.0));
}

#[test]
fn test_short_position_is_rejected_without_partial_write() {
    let stage = Arc::new(SimulatedDevice::with_fields(
        "stage",
        vec!["x".to_string(), "y".to_string()],
        Vec::new(),
    ));
    let mut adapter = DeviceAdapter::for_device(stage, AdapterOptions::default());
    let info = ScanInfo::new(vec![4]).with_role("stage", DeviceRole::Monitor);
    let trees = adapter.build_tree(&info).unwrap();

    let position = ScanPosition::from_step(0, info.shape()).unwrap();
    let err = adapter.write_point(Value::from(vec![1.0]), &position).unwrap_err();
    assert_eq!(err.class(), ErrorClass::WriteFatal);
    assert!(err.to_string().contains("stage"));
    assert!(err.to_string().contains("at least 2"));

    let x = trees[0].group().data_node("x").unwrap();
    assert_eq!(x.shape(), vec![0]);
}

#[test]
fn test_write_without_build_fails() {
    let device = Arc::new(SimulatedDevice::new("sample_x"));
    let mut adapter = DeviceAdapter::for_device(device, AdapterOptions::default());
    let position = ScanPosition::from_step(0, &[5]).unwrap();
    let err = adapter.write_point(1.0, &position).unwrap_err();
    assert!(matches!(err, NexusError::NoActiveScan { .. }));
}

#[test]
fn test_unreadable_device_fails_build_recoverably() {
    let device = Arc::new(SimulatedDevice::new("shutter"));
    device.set_offline(true);
    let mut adapter = DeviceAdapter::for_device(device, AdapterOptions::default());
    let err = adapter.build_tree(&ScanInfo::new(vec![5])).unwrap_err();
    assert!(err.can_recover());
    assert_eq!(err.device(), Some("shutter"));
    assert!(!adapter.is_active());
}

#[test]
#[traced_test]
fn test_null_field_is_skipped_with_warning() {
    let stage = Arc::new(
        SimulatedDevice::with_fields(
            "stage",
            vec!["x".to_string()],
            vec!["status".to_string()],
        )
        .with_position(Value::List(vec![Value::from(1.0), Value::Null])),
    );
    let mut adapter = DeviceAdapter::for_device(stage, AdapterOptions::default());
    let info = ScanInfo::new(vec![2]).with_role("stage", DeviceRole::Monitor);
    let trees = adapter.build_tree(&info).unwrap();

    assert!(trees[0].group().contains(FIELD_VALUE));
    assert!(!trees[0].group().contains("status"));
    assert!(logs_contain("Field has no value"));

    let nodes = adapter.field_nodes().unwrap();
    assert!(nodes[0].1.is_some());
    assert!(nodes[1].1.is_none());

    let position = ScanPosition::from_step(1, info.shape()).unwrap();
    adapter
        .write_point(Value::List(vec![Value::from(2.0), Value::Null]), &position)
        .unwrap();
}

#[test]
fn test_primary_follows_largest_range() {
    let stage = Arc::new(SimulatedDevice::with_fields(
        "stage",
        vec!["a".to_string(), "b".to_string(), "c".to_string()],
        Vec::new(),
    ));
    let mut adapter = DeviceAdapter::for_device(stage, AdapterOptions::default());
    let info = ScanInfo::new(vec![3])
        .with_role("stage", DeviceRole::Scannable)
        .with_scan_object(
            "stage",
            ScanObject::Implicit {
                start: Some(Value::from(vec![0.0, 0.0, 0.0])),
                stop: Some(Value::from(vec![5.0, 2.0, 9.0])),
                step: None,
            },
        );
    let trees = adapter.build_tree(&info).unwrap();
    assert_eq!(trees[0].primary_field(), Some("c"));
}

#[test]
fn test_declarative_field_paths() {
    let stage = Arc::new(SimulatedDevice::with_fields(
        "stage",
        vec!["x".to_string(), "y".to_string()],
        Vec::new(),
    ));
    let config = DeviceConfig {
        nx_class: Some(NexusBaseClass::NXsample),
        field_paths: BTreeMap::from([
            ("x".to_string(), "transforms:NXtransformations/sample_x".to_string()),
            ("y".to_string(), "transforms:NXtransformations/sample_y".to_string()),
        ]),
        ..Default::default()
    };
    let options = AdapterOptions::default().with_device_config(Some(config));
    let mut adapter = DeviceAdapter::for_device(stage, options);
    let info = ScanInfo::new(vec![2]).with_role("stage", DeviceRole::Scannable);

    let trees = adapter.build_tree(&info).unwrap();
    let collection = trees[0].group();
    let transforms = collection.group("transforms").unwrap();
    assert_eq!(transforms.nx_class(), NexusBaseClass::NXtransformations);
    assert!(collection.find_data_node("transforms/sample_x").is_some());
    assert_eq!(trees[0].axis_fields(), &["sample_x".to_string(), "sample_y".to_string()]);
    assert_eq!(trees[1].group().nx_class(), NexusBaseClass::NXsample);
}

#[test]
fn test_missing_field_path_is_build_error() {
    let stage = Arc::new(SimulatedDevice::with_fields(
        "stage",
        vec!["x".to_string(), "y".to_string()],
        Vec::new(),
    ));
    let config = DeviceConfig {
        field_paths: BTreeMap::from([("x".to_string(), "x".to_string())]),
        ..Default::default()
    };
    let mut adapter =
        DeviceAdapter::for_device(stage, AdapterOptions::default().with_device_config(Some(config)));
    let err = adapter.build_tree(&ScanInfo::new(vec![2])).unwrap_err();
    assert!(matches!(err, NexusError::MissingFieldPath { ref field, .. } if field == "y"));
    assert_eq!(err.class(), ErrorClass::BuildFatal);
}

#[test]
fn test_rebuild_starts_clean() {
    let sample_x = Arc::new(SimulatedDevice::new("sample_x"));
    let mut adapter = DeviceAdapter::for_device(sample_x, AdapterOptions::default());
    let info = ScanInfo::new(vec![3]).with_role("sample_x", DeviceRole::Monitor);

    let first = adapter.build_tree(&info).unwrap();
    let position = ScanPosition::from_step(2, info.shape()).unwrap();
    adapter.write_point(7.0, &position).unwrap();
    adapter.scan_end();

    let second = adapter.build_tree(&info).unwrap();
    let old = first[0].group().data_node(FIELD_VALUE).unwrap();
    let new = second[0].group().data_node(FIELD_VALUE).unwrap();
    assert!(!old.ptr_eq(&new));
    assert_eq!(new.shape(), vec![0]);
}
