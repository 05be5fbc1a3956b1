//! Text protocol spoken to the monitoring agent.
//!
//! ```text
//! CHART hpssa_local.cntrl_p440ar_0_status '' 'Controller status' 'status' 'controllers' 'hpssa.controller_status' line 2100 10 '' 'strobe' 'hpssa'
//! DIMENSION 'cntrl_p440ar_0_status_ok' 'ok' absolute 1 1 ''
//! BEGIN hpssa_local.cntrl_p440ar_0_status
//! SET 'cntrl_p440ar_0_status_ok' = 1
//! END
//! ```

use std::io::{self, Write};

use crate::charts::{Chart, Charts, Samples, clean_id};

/// Announcements and values of one job for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub module: String,
    pub job: String,
    pub update_every: u64,
    pub announce: Vec<Chart>,
    pub values: Vec<ChartValues>,
}

/// Values of the dimensions of one chart that were reported this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartValues {
    pub chart_id: String,
    pub values: Vec<(String, i64)>,
}

impl Frame {
    /// Assemble a frame from the live charts and the cycle's samples.
    ///
    /// Charts without any reported dimension are left out.
    pub fn build(
        module: &str,
        job: &str,
        update_every: u64,
        announce: Vec<Chart>,
        charts: &Charts,
        samples: &Samples,
    ) -> Self {
        let values = charts
            .live()
            .filter_map(|chart| {
                let values: Vec<(String, i64)> = chart
                    .dims
                    .iter()
                    .filter_map(|d| samples.get(&d.id).map(|v| (d.id.clone(), *v)))
                    .collect();
                (!values.is_empty()).then(|| ChartValues {
                    chart_id: chart.id.clone(),
                    values,
                })
            })
            .collect();

        Self {
            module: module.to_string(),
            job: job.to_string(),
            update_every,
            announce,
            values,
        }
    }

    /// Chart type prefix shared by every chart of the job.
    pub fn type_id(&self) -> String {
        format!("{}_{}", clean_id(&self.module), clean_id(&self.job))
    }

    pub fn is_empty(&self) -> bool {
        self.announce.is_empty() && self.values.is_empty()
    }
}

/// Write every line of `frame`.
pub fn write_frame<W: Write>(out: &mut W, plugin: &str, frame: &Frame) -> io::Result<()> {
    let type_id = frame.type_id();

    for chart in &frame.announce {
        write_chart(out, plugin, &type_id, &frame.module, frame.update_every, chart)?;
    }

    for chart in &frame.values {
        writeln!(out, "BEGIN {}.{}", type_id, chart.chart_id)?;
        for (dim, value) in &chart.values {
            writeln!(out, "SET '{}' = {}", dim, value)?;
        }
        writeln!(out, "END")?;
    }
    Ok(())
}

fn write_chart<W: Write>(
    out: &mut W,
    plugin: &str,
    type_id: &str,
    module: &str,
    update_every: u64,
    chart: &Chart,
) -> io::Result<()> {
    let options = if chart.is_obsolete() { "obsolete" } else { "" };
    writeln!(
        out,
        "CHART {}.{} '' '{}' '{}' '{}' '{}' {} {} {} '{}' '{}' '{}'",
        type_id,
        chart.id,
        quote(&chart.title),
        quote(&chart.units),
        quote(&chart.family),
        quote(&chart.context),
        chart.kind,
        chart.priority,
        update_every,
        options,
        plugin,
        module,
    )?;

    if !chart.labels.is_empty() {
        for (key, value) in &chart.labels {
            writeln!(out, "CLABEL '{}' '{}' 1", quote(key), quote(value))?;
        }
        writeln!(out, "CLABEL_COMMIT")?;
    }

    for dim in &chart.dims {
        writeln!(
            out,
            "DIMENSION '{}' '{}' {} {} {} ''",
            dim.id,
            quote(&dim.name),
            dim.algorithm,
            dim.multiplier,
            dim.divisor,
        )?;
    }
    Ok(())
}

/// Single quotes delimit fields; replace them inside values.
fn quote(s: &str) -> String {
    s.replace('\'', "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::{ChartKind, Dim};

    fn charts() -> Charts {
        let mut charts = Charts::new();
        charts
            .add(
                Chart::new("leases", "Active leases", "leases", "leases", "isc_dhcpd.leases_total")
                    .with_priority(100)
                    .with_dim(Dim::new("leases_active", "active")),
            )
            .unwrap();
        charts
            .add(
                Chart::new("pool_lan_utilization", "Pool utilization", "percent", "pools", "isc_dhcpd.pool_utilization")
                    .with_kind(ChartKind::Area)
                    .with_label("dhcp_pool_name", "lan")
                    .with_dim(Dim::new("pool_lan_utilization", "utilization").with_divisor(1000)),
            )
            .unwrap();
        charts
    }

    #[test]
    fn test_write_frame_announces_and_sets() {
        let mut charts = charts();
        let announce = charts.take_pending();
        let samples = Samples::from([("leases_active".to_string(), 3)]);

        let frame = Frame::build("isc_dhcpd", "local", 10, announce, &charts, &samples);
        assert_eq!(frame.values.len(), 1);

        let mut out = Vec::new();
        write_frame(&mut out, "strobe", &frame).unwrap();
        let text = String::from_utf8(out).unwrap();

        let expected = "\
CHART isc_dhcpd_local.leases '' 'Active leases' 'leases' 'leases' 'isc_dhcpd.leases_total' line 100 10 '' 'strobe' 'isc_dhcpd'
DIMENSION 'leases_active' 'active' absolute 1 1 ''
CHART isc_dhcpd_local.pool_lan_utilization '' 'Pool utilization' 'percent' 'pools' 'isc_dhcpd.pool_utilization' area 70000 10 '' 'strobe' 'isc_dhcpd'
CLABEL 'dhcp_pool_name' 'lan' 1
CLABEL_COMMIT
DIMENSION 'pool_lan_utilization' 'utilization' absolute 1 1000 ''
BEGIN isc_dhcpd_local.leases
SET 'leases_active' = 3
END
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_write_frame_obsolete() {
        let mut charts = charts();
        charts.take_pending();
        charts.mark_obsolete("leases");
        let frame = Frame::build("isc_dhcpd", "local", 10, charts.take_pending(), &charts, &Samples::new());

        let mut out = Vec::new();
        write_frame(&mut out, "strobe", &frame).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("CHART isc_dhcpd_local.leases "));
        assert!(text.contains(" 'obsolete' 'strobe' 'isc_dhcpd'"));
        assert!(!text.contains("BEGIN"));
    }

    #[test]
    fn test_empty_frame() {
        let charts = charts();
        let frame = Frame::build("m", "j", 1, Vec::new(), &charts, &Samples::new());
        assert!(frame.is_empty());
        assert_eq!(frame.type_id(), "m_j");
    }
}
