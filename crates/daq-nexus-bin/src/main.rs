//! CLI entry point for nexus-sim
//!
//! Runs a one-dimensional scan over simulated devices and prints the NeXus
//! tree the adapters produce, as JSON.
//!
//! # Usage
//!
//! ```bash
//! nexus-sim --points 10
//! nexus-sim --config config/nexus.toml --log-level debug --output scan.json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use daq_nexus::config::NexusConfig;
use daq_nexus::legacy::apply_location_map;
use daq_nexus::logging::{self, OutputFormat};
use daq_nexus::prelude::*;
use daq_nexus::snapshot::{collect_snapshot, GROUP_BEFORE_SCAN};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "nexus-sim")]
#[command(about = "Run a simulated scan and print the resulting NeXus tree", long_about = None)]
struct Cli {
    /// Configuration file (TOML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of scan points
    #[arg(long, default_value = "5")]
    points: usize,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// pretty, compact or json
    #[arg(long)]
    log_format: Option<String>,

    /// Write the tree here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Path of the scan file the tree is laid out for
    #[arg(long, default_value = "/tmp/nexus-sim/scan.nxs")]
    scan_file: PathBuf,
}

const SCAN_START: f64 = 0.0;
const SCAN_STEP: f64 = 0.5;

/// Where per-point values of a simulated device come from.
enum Source {
    Positioner(Arc<SimulatedDevice>),
    Detector(Arc<SimulatedDetector>),
}

struct SimDevice {
    source: Source,
    role: DeviceRole,
}

fn simulated_devices(config: &NexusConfig, data_dir: &str) -> BTreeMap<String, SimDevice> {
    let sample_x = SimulatedDevice::new("sample_x")
        .with_units(Some("mm".to_string()))
        .with_formats(vec!["%.3f".to_string()])
        .with_limits(Some(-10.0), Some(10.0));
    let stage = SimulatedDevice::with_fields(
        "stage",
        vec!["x".to_string(), "y".to_string()],
        vec!["temperature".to_string()],
    )
    .with_units(Some("mm".to_string()))
    .with_category("sample")
    .with_position(Value::from(vec![1.25, -0.5, 295.1]));
    let ring_current = SimulatedDevice::new("ring_current")
        .with_units(Some("mA".to_string()))
        .with_position(300.2);
    let counters = SimulatedDetector::new(
        "ct",
        DetectorMode::Counters(vec!["i0".to_string(), "it".to_string(), "if".to_string()]),
    )
    .with_description("Ion chambers");
    let camera = SimulatedDetector::new("camera", DetectorMode::Files(data_dir.to_string()))
        .with_description("Area detector writing its own files");

    let mut devices = BTreeMap::from([
        (
            "sample_x".to_string(),
            SimDevice {
                source: Source::Positioner(Arc::new(sample_x)),
                role: DeviceRole::Scannable,
            },
        ),
        (
            "stage".to_string(),
            SimDevice {
                source: Source::Positioner(Arc::new(stage)),
                role: DeviceRole::Monitor,
            },
        ),
        (
            "ring_current".to_string(),
            SimDevice {
                source: Source::Positioner(Arc::new(ring_current)),
                role: DeviceRole::MonitorPerScan,
            },
        ),
        (
            "ct".to_string(),
            SimDevice {
                source: Source::Detector(Arc::new(counters)),
                role: DeviceRole::Detector,
            },
        ),
        (
            "camera".to_string(),
            SimDevice {
                source: Source::Detector(Arc::new(camera)),
                role: DeviceRole::Detector,
            },
        ),
    ]);

    for positioner in &config.simulation.positioners {
        if devices.contains_key(&positioner.name) {
            warn!(device = %positioner.name, "Configured positioner shadows a built-in device, ignored");
            continue;
        }
        devices.insert(
            positioner.name.clone(),
            SimDevice {
                source: Source::Positioner(Arc::new(SimulatedDevice::from_config(positioner))),
                role: DeviceRole::Monitor,
            },
        );
    }
    devices
}

fn load_config(cli: &Cli) -> Result<NexusConfig> {
    let mut config = match &cli.config {
        Some(path) => NexusConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => NexusConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.parse::<OutputFormat>()?;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init_from_config(&config)?;

    let data_dir = config
        .writer
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("/tmp/nexus-sim"));
    let devices = simulated_devices(&config, &data_dir.display().to_string());
    let registry: BTreeMap<String, Arc<dyn Device>> = devices
        .iter()
        .map(|(name, device)| {
            let handle = match &device.source {
                Source::Positioner(d) => d.clone() as Arc<dyn Device>,
                Source::Detector(d) => d.clone() as Arc<dyn Device>,
            };
            (name.clone(), handle)
        })
        .collect();

    let mut info = ScanInfo::new(vec![cli.points])
        .with_file_path(&cli.scan_file)
        .with_scan_object(
            "sample_x",
            ScanObject::Implicit {
                start: Some(Value::from(SCAN_START)),
                stop: Some(Value::from(SCAN_START + SCAN_STEP * cli.points.saturating_sub(1) as f64)),
                step: Some(Value::from(SCAN_STEP)),
            },
        );
    for (name, device) in &devices {
        info = info.with_role(name.as_str(), device.role);
    }

    let mut adapters: Vec<DeviceAdapter> = devices
        .iter()
        .map(|(name, device)| {
            let options = config
                .adapter_options(name)
                .with_data_dir(Some(data_dir.clone()));
            match &device.source {
                Source::Positioner(d) => DeviceAdapter::for_device(d.clone(), options),
                Source::Detector(d) => DeviceAdapter::for_detector(d.clone(), options),
            }
        })
        .collect();

    // Build
    let mut entry = GroupNode::new(NexusBaseClass::NXentry);
    let mut instrument = GroupNode::new(NexusBaseClass::NXinstrument);
    for adapter in &mut adapters {
        match adapter.build_tree(&info) {
            Ok(trees) => {
                for tree in trees {
                    info!(
                        device = adapter.name(),
                        tree = tree.name(),
                        primary = ?tree.primary_field(),
                        "Built device tree"
                    );
                    let name = tree.name().to_string();
                    match tree.collection_name().map(str::to_string) {
                        Some(collection) => {
                            if instrument.group(&collection).is_none() {
                                instrument.add_group(
                                    collection.as_str(),
                                    GroupNode::new(NexusBaseClass::NXcollection),
                                );
                            }
                            if let Some(group) = instrument.group_mut(&collection) {
                                group.add_group(name, tree.into_group());
                            }
                        }
                        None => instrument.add_group(name, tree.into_group()),
                    }
                }
            }
            Err(e) if e.can_recover() => warn!(device = adapter.name(), error = %e, "Device skipped"),
            Err(e) => error!(device = adapter.name(), error = %e, class = %e.class(), "Could not build device tree"),
        }
    }
    entry.add_group("instrument", instrument);

    if config.snapshot.enabled {
        let names = config.snapshot_devices(&devices.keys().cloned().collect::<Vec<_>>());
        let snapshot = collect_snapshot(&registry, &names, &config.snapshot.metadata);
        entry.add_group(GROUP_BEFORE_SCAN, snapshot.group);
    }

    // Scan
    let sample_x = devices.get("sample_x").and_then(|d| match &d.source {
        Source::Positioner(p) => Some(p.clone()),
        Source::Detector(_) => None,
    });
    for step in 0..cli.points {
        let demand = SCAN_START + SCAN_STEP * step as f64;
        if let Some(sample_x) = &sample_x {
            sample_x.move_to(demand);
        }
        let position = ScanPosition::from_step(step, info.shape())?.with_axis_index("sample_x", step);
        for adapter in adapters.iter_mut().filter(|a| a.is_active()) {
            let Some(device) = devices.get(adapter.name()) else {
                continue;
            };
            if device.role.scan_role() == ScanRole::PerScan {
                continue;
            }
            if device.role.is_moved() {
                if let Err(e) = adapter.write_demand(&Value::from(demand), &position) {
                    error!(device = adapter.name(), step, error = %e, "Demand write failed");
                }
            }
            let value = match &device.source {
                Source::Positioner(d) => match d.position() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(device = adapter.name(), error = %e, step, "Position unreadable");
                        continue;
                    }
                },
                Source::Detector(d) => d.reading(step),
            };
            if let Err(e) = adapter.write_point(value, &position) {
                error!(device = adapter.name(), step, error = %e, "Write failed");
            }
        }
    }

    for failure in apply_location_map(&mut entry, &config.location_map, &adapters) {
        warn!(error = %failure, "Location map entry skipped");
    }

    let tree = serde_json::json!({ "entry": entry.describe() });
    for adapter in &mut adapters {
        adapter.scan_end();
    }

    let text = serde_json::to_string_pretty(&tree)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Wrote tree");
        }
        None => println!("{}", text),
    }
    Ok(())
}
