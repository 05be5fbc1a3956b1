//! Chart templates for Smart Array entities.
//!
//! Every chart and dimension id of an entity starts with the entity's
//! prefix, so vanished entities are retired with one prefix match.

use crate::charts::{Chart, Dim, clean_id};

use super::parse::{Array, Controller, LogicalDrive, PhysicalDrive};

const PRIO_CONTROLLER: u32 = 2100;
const PRIO_ARRAY: u32 = 2200;
const PRIO_LOGICAL_DRIVE: u32 = 2300;
const PRIO_PHYSICAL_DRIVE: u32 = 2400;

pub(super) fn controller_prefix(cntrl: &Controller) -> String {
    format!(
        "cntrl_{}_slot_{}_",
        clean_id(&cntrl.model),
        clean_id(&cntrl.slot)
    )
}

pub(super) fn array_prefix(cntrl: &Controller, arr: &Array) -> String {
    format!("array_{}_{}", clean_id(&arr.id), controller_prefix(cntrl))
}

pub(super) fn logical_drive_prefix(cntrl: &Controller, ld: &LogicalDrive) -> String {
    format!(
        "ld_{}_array_{}_{}",
        clean_id(&ld.id),
        clean_id(&ld.array_id),
        controller_prefix(cntrl)
    )
}

pub(super) fn physical_drive_prefix(cntrl: &Controller, pd: &PhysicalDrive) -> String {
    format!(
        "pd_{}_ld_{}_array_{}_{}",
        clean_id(&pd.location),
        clean_id(pd.ld_id()),
        clean_id(pd.array_id()),
        controller_prefix(cntrl)
    )
}

fn status_chart(prefix: &str, title: &str, family: &str, context: &str, priority: u32) -> Chart {
    Chart::new(
        format!("{prefix}status"),
        title,
        "status",
        family,
        format!("hpssa.{context}"),
    )
    .with_priority(priority)
    .with_dim(Dim::new(format!("{prefix}status_ok"), "ok"))
    .with_dim(Dim::new(format!("{prefix}status_nok"), "nok"))
}

fn temperature_chart(prefix: &str, title: &str, family: &str, context: &str, priority: u32) -> Chart {
    Chart::new(
        format!("{prefix}temperature"),
        title,
        "Celsius",
        family,
        format!("hpssa.{context}"),
    )
    .with_priority(priority)
    .with_dim(Dim::new(format!("{prefix}temperature"), "temperature"))
}

fn with_controller_labels(chart: Chart, cntrl: &Controller) -> Chart {
    chart
        .with_label("slot", cntrl.slot.as_str())
        .with_label("model", cntrl.model.as_str())
}

pub(super) fn controller_charts(cntrl: &Controller) -> Vec<Chart> {
    let p = controller_prefix(cntrl);
    let mut charts = vec![status_chart(
        &p,
        "Controller status",
        "controllers",
        "controller_status",
        PRIO_CONTROLLER,
    )];

    if !cntrl.controller_temperature_c.is_empty() {
        charts.push(temperature_chart(
            &p,
            "Controller temperature",
            "controllers",
            "controller_temperature",
            PRIO_CONTROLLER + 1,
        ));
    }

    charts.push(
        Chart::new(
            format!("{p}cache_module_presence"),
            "Controller cache module presence",
            "status",
            "cache",
            "hpssa.controller_cache_module_presence_status",
        )
        .with_priority(PRIO_CONTROLLER + 2)
        .with_dim(Dim::new(format!("{p}cache_presence_present"), "present"))
        .with_dim(Dim::new(
            format!("{p}cache_presence_not_present"),
            "not_present",
        )),
    );

    if cache_present(cntrl) {
        charts.push(status_chart(
            &format!("{p}cache_"),
            "Controller cache module status",
            "cache",
            "controller_cache_module_status",
            PRIO_CONTROLLER + 3,
        ));
        if !cntrl.cache_module_temperature_c.is_empty() {
            charts.push(temperature_chart(
                &format!("{p}cache_module_"),
                "Controller cache module temperature",
                "cache",
                "controller_cache_module_temperature",
                PRIO_CONTROLLER + 4,
            ));
        }
    }

    if has_battery(cntrl) {
        charts.push(status_chart(
            &format!("{p}cache_battery_"),
            "Controller cache backup battery status",
            "cache",
            "controller_cache_backup_battery_status",
            PRIO_CONTROLLER + 5,
        ));
    }

    charts
        .into_iter()
        .map(|c| with_controller_labels(c, cntrl))
        .collect()
}

pub(super) fn array_charts(cntrl: &Controller, arr: &Array) -> Vec<Chart> {
    let p = array_prefix(cntrl, arr);
    let chart = status_chart(&p, "Array status", "arrays", "array_status", PRIO_ARRAY)
        .with_label("array_id", arr.id.as_str())
        .with_label("interface_type", arr.interface_type.as_str())
        .with_label("array_type", arr.array_type.as_str());
    vec![with_controller_labels(chart, cntrl)]
}

pub(super) fn logical_drive_charts(cntrl: &Controller, ld: &LogicalDrive) -> Vec<Chart> {
    let p = logical_drive_prefix(cntrl, ld);
    let chart = status_chart(
        &p,
        "Logical drive status",
        "logical drives",
        "logical_drive_status",
        PRIO_LOGICAL_DRIVE,
    )
    .with_label("array_id", ld.array_id.as_str())
    .with_label("logical_drive_id", ld.id.as_str())
    .with_label("disk_name", ld.disk_name.as_str())
    .with_label("drive_type", ld.drive_type.as_str());
    vec![with_controller_labels(chart, cntrl)]
}

pub(super) fn physical_drive_charts(cntrl: &Controller, pd: &PhysicalDrive) -> Vec<Chart> {
    let p = physical_drive_prefix(cntrl, pd);
    let mut charts = vec![status_chart(
        &p,
        "Physical drive status",
        "physical drives",
        "physical_drive_status",
        PRIO_PHYSICAL_DRIVE,
    )];
    if !pd.current_temperature_c.is_empty() {
        charts.push(temperature_chart(
            &p,
            "Physical drive temperature",
            "physical drives",
            "physical_drive_temperature",
            PRIO_PHYSICAL_DRIVE + 1,
        ));
    }
    charts
        .into_iter()
        .map(|c| {
            with_controller_labels(c, cntrl)
                .with_label("array_id", pd.array_id())
                .with_label("logical_drive_id", pd.ld_id())
                .with_label("location", pd.location.as_str())
                .with_label("interface_type", pd.interface_type.as_str())
                .with_label("drive_type", pd.drive_type.as_str())
                .with_label("drive_model", pd.model.as_str())
        })
        .collect()
}

pub(super) fn cache_present(cntrl: &Controller) -> bool {
    cntrl.cache_board_present.eq_ignore_ascii_case("true")
}

pub(super) fn has_battery(cntrl: &Controller) -> bool {
    !cntrl.battery_capacitor_status.is_empty()
        || cntrl
            .battery_capacitor_count
            .parse::<u32>()
            .is_ok_and(|n| n > 0)
}
