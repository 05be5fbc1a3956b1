//! Chart templates for MegaRAID controllers managed by storcli.

use crate::charts::{Chart, Dim, clean_id};

use super::parse::{Bbu, StorController, StorDrive};

const PRIO_CONTROLLER: u32 = 2700;
const PRIO_BBU: u32 = 2750;
const PRIO_DRIVE: u32 = 2800;

pub(super) const CONTROLLER_STATUSES: &[&str] =
    &["optimal", "degraded", "partially_degraded", "failed"];
pub(super) const BBU_STATUSES: &[&str] = &["healthy", "unhealthy", "na"];

pub(super) fn controller_prefix(cntrl: &StorController) -> String {
    format!("cntrl_{}_", clean_id(&cntrl.number))
}

pub(super) fn bbu_prefix(cntrl: &StorController, idx: usize) -> String {
    format!("bbu_{idx}_{}", controller_prefix(cntrl))
}

pub(super) fn drive_prefix(drive: &StorDrive) -> String {
    format!(
        "pd_e{}_s{}_cntrl_{}_",
        clean_id(&drive.enclosure),
        clean_id(&drive.slot),
        clean_id(&drive.controller)
    )
}

fn controller_labels(chart: Chart, cntrl: &StorController) -> Chart {
    chart
        .with_label("controller_number", cntrl.number.as_str())
        .with_label("model", cntrl.model.as_str())
        .with_label("driver_name", cntrl.driver_name.as_str())
}

fn state_chart(id: String, title: &str, context: &str, priority: u32, states: &[&str]) -> Chart {
    let mut chart = Chart::new(
        id.clone(),
        title,
        "status",
        "controllers",
        format!("storcli.{context}"),
    )
    .with_priority(priority);
    for state in states {
        chart = chart.with_dim(Dim::new(format!("{id}_{state}"), *state));
    }
    chart
}

pub(super) fn controller_charts(cntrl: &StorController) -> Vec<Chart> {
    let p = controller_prefix(cntrl);
    let mut charts = vec![
        state_chart(
            format!("{p}status"),
            "Controller status",
            "controller_status",
            PRIO_CONTROLLER,
            CONTROLLER_STATUSES,
        ),
        state_chart(
            format!("{p}bbu_status"),
            "Controller BBU status",
            "controller_bbu_status",
            PRIO_CONTROLLER + 1,
            BBU_STATUSES,
        ),
    ];
    if cntrl.roc_temperature.is_some() {
        charts.push(
            Chart::new(
                format!("{p}roc_temperature"),
                "Controller ROC temperature",
                "Celsius",
                "controllers",
                "storcli.controller_roc_temperature",
            )
            .with_priority(PRIO_CONTROLLER + 2)
            .with_dim(Dim::new(format!("{p}roc_temperature"), "temperature")),
        );
    }
    if cntrl.memory_correctable_errors.is_some() || cntrl.memory_uncorrectable_errors.is_some() {
        charts.push(
            Chart::new(
                format!("{p}memory_errors"),
                "Controller memory errors",
                "errors",
                "controllers",
                "storcli.controller_memory_errors",
            )
            .with_priority(PRIO_CONTROLLER + 3)
            .with_dim(Dim::new(format!("{p}memory_correctable_errors"), "correctable"))
            .with_dim(Dim::new(
                format!("{p}memory_uncorrectable_errors"),
                "uncorrectable",
            )),
        );
    }
    charts
        .into_iter()
        .map(|c| controller_labels(c, cntrl))
        .collect()
}

pub(super) fn bbu_charts(cntrl: &StorController, idx: usize, bbu: &Bbu) -> Vec<Chart> {
    let p = bbu_prefix(cntrl, idx);
    let chart = Chart::new(
        format!("{p}temperature"),
        "BBU temperature",
        "Celsius",
        "bbu",
        "storcli.bbu_temperature",
    )
    .with_priority(PRIO_BBU)
    .with_dim(Dim::new(format!("{p}temperature"), "temperature"))
    .with_label("bbu_model", bbu.model.as_str());
    vec![controller_labels(chart, cntrl)]
}

pub(super) fn drive_charts(drive: &StorDrive) -> Vec<Chart> {
    let p = drive_prefix(drive);
    let mut charts = vec![
        Chart::new(
            format!("{p}errors"),
            "Physical drive errors",
            "errors/s",
            "physical drives",
            "storcli.phys_drive_errors",
        )
        .with_priority(PRIO_DRIVE)
        .with_dim(Dim::new(format!("{p}media_error_count"), "media").incremental())
        .with_dim(Dim::new(format!("{p}other_error_count"), "other").incremental()),
        Chart::new(
            format!("{p}predictive_failures"),
            "Physical drive predictive failures",
            "failures/s",
            "physical drives",
            "storcli.phys_drive_predictive_failures",
        )
        .with_priority(PRIO_DRIVE + 1)
        .with_dim(
            Dim::new(format!("{p}predictive_failure_count"), "predictive_failures").incremental(),
        ),
        Chart::new(
            format!("{p}smart_alert_status"),
            "Physical drive SMART alert status",
            "status",
            "physical drives",
            "storcli.phys_drive_smart_alert_status",
        )
        .with_priority(PRIO_DRIVE + 2)
        .with_dim(Dim::new(format!("{p}smart_alert_status_active"), "active"))
        .with_dim(Dim::new(format!("{p}smart_alert_status_inactive"), "inactive")),
    ];
    if drive.temperature.is_some() {
        charts.push(
            Chart::new(
                format!("{p}temperature"),
                "Physical drive temperature",
                "Celsius",
                "physical drives",
                "storcli.phys_drive_temperature",
            )
            .with_priority(PRIO_DRIVE + 3)
            .with_dim(Dim::new(format!("{p}temperature"), "temperature")),
        );
    }
    charts
        .into_iter()
        .map(|c| {
            c.with_label("controller_number", drive.controller.as_str())
                .with_label("enclosure_number", drive.enclosure.as_str())
                .with_label("slot_number", drive.slot.as_str())
                .with_label("media_type", drive.medium.as_str())
                .with_label("interface", drive.interface.as_str())
                .with_label("drive_model", drive.model.as_str())
        })
        .collect()
}
