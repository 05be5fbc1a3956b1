//! Chart templates for S.M.A.R.T. devices.

use crate::charts::{Chart, Dim, clean_id};

use super::parse::{AtaAttribute, ScanDevice};

const PRIO_DEVICE: u32 = 2500;
const PRIO_ATTRIBUTE: u32 = 2600;

pub(super) fn device_prefix(dev: &ScanDevice) -> String {
    format!(
        "device_{}_type_{}_",
        clean_id(dev.short_name()),
        clean_id(&dev.typ)
    )
}

fn with_device_labels(chart: Chart, dev: &ScanDevice) -> Chart {
    chart
        .with_label("device_name", dev.short_name())
        .with_label("device_type", dev.typ.as_str())
}

pub(super) fn device_charts(dev: &ScanDevice) -> Vec<Chart> {
    let p = device_prefix(dev);
    let charts = vec![
        Chart::new(
            format!("{p}smart_status"),
            "Device smart status",
            "status",
            "smart status",
            "smartctl.device_smart_status",
        )
        .with_priority(PRIO_DEVICE)
        .with_dim(Dim::new(format!("{p}smart_status_passed"), "passed"))
        .with_dim(Dim::new(format!("{p}smart_status_failed"), "failed")),
        Chart::new(
            format!("{p}temperature"),
            "Device temperature",
            "Celsius",
            "temperature",
            "smartctl.device_temperature",
        )
        .with_priority(PRIO_DEVICE + 1)
        .with_dim(Dim::new(format!("{p}temperature"), "temperature")),
        Chart::new(
            format!("{p}power_on_time"),
            "Device power on time",
            "seconds",
            "power",
            "smartctl.device_power_on_time",
        )
        .with_priority(PRIO_DEVICE + 2)
        .with_dim(Dim::new(format!("{p}power_on_time"), "power_on_time")),
        Chart::new(
            format!("{p}power_cycles_count"),
            "Device power cycles",
            "cycles",
            "power",
            "smartctl.device_power_cycles_count",
        )
        .with_priority(PRIO_DEVICE + 3)
        .with_dim(Dim::new(format!("{p}power_cycle_count"), "power")),
    ];
    charts
        .into_iter()
        .map(|c| with_device_labels(c, dev))
        .collect()
}

/// Attribute names repeat (`Unknown_Attribute`), so the id is part of the key.
pub(super) fn attribute_prefix(dev: &ScanDevice, attr: &AtaAttribute) -> String {
    match attr.id {
        Some(id) => format!("{}attr_{id}_{}_", device_prefix(dev), clean_id(&attr.name)),
        None => format!("{}attr_{}_", device_prefix(dev), clean_id(&attr.name)),
    }
}

/// Normalized and raw value charts for one ATA attribute.
pub(super) fn attribute_charts(dev: &ScanDevice, attr: &AtaAttribute) -> Vec<Chart> {
    let p = attribute_prefix(dev, attr);
    let id = attr.id.unwrap_or_default();
    let charts = vec![
        Chart::new(
            format!("{p}normalized"),
            format!("Device smart attribute {} (normalized)", attr.name),
            "value",
            "attributes",
            "smartctl.device_smart_attr_normalized",
        )
        .with_priority(PRIO_ATTRIBUTE)
        .with_dim(Dim::new(format!("{p}normalized"), "normalized")),
        Chart::new(
            format!("{p}raw"),
            format!("Device smart attribute {} (raw)", attr.name),
            "value",
            "attributes",
            "smartctl.device_smart_attr_raw",
        )
        .with_priority(PRIO_ATTRIBUTE + 1)
        .with_dim(Dim::new(format!("{p}raw"), "raw")),
    ];
    charts
        .into_iter()
        .map(|c| {
            with_device_labels(c, dev)
                .with_label("attribute_id", id.to_string())
                .with_label("attribute_name", attr.name.as_str())
        })
        .collect()
}
