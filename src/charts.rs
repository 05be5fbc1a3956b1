//! Chart registry.
//!
//! Every job publishes its samples on a set of charts. A chart groups
//! dimensions that share units; a dimension is one numeric series whose id
//! is also the key of the sample set returned by `collect`.
//!
//! # Lifecycle
//!
//! - Charts are added once per discovered entity ([`Charts::add`]).
//! - Charts of vanished entities are marked obsolete ([`Charts::mark_obsolete_prefixed`]).
//! - The output writer drains announcements with [`Charts::take_pending`]:
//!   new charts once, obsolete charts once, after which obsolete charts are
//!   forgotten and may be added again under the same id.

use std::collections::{BTreeMap, HashMap, HashSet};

use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Result of one collection cycle: dimension id to integer value.
pub type Samples = BTreeMap<String, i64>;

/// Precision multiplier used for fractional values (percentages, ratios).
pub const PRECISION: i64 = 1000;

/// Chart registry errors. These indicate programming errors in a collector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    /// A live chart with this id already exists.
    #[error("duplicate chart id '{0}'")]
    DuplicateChart(String),

    /// A dimension id is declared twice, within or across live charts.
    #[error("duplicate dimension id '{dim}' in chart '{chart}'")]
    DuplicateDim { chart: String, dim: String },
}

/// Rendering style of a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChartKind {
    #[default]
    Line,
    Area,
    Stacked,
}

/// How the consumer turns raw samples into plotted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Algorithm {
    #[default]
    Absolute,
    Incremental,
    PercentageOfIncrementalRow,
}

/// Dimension descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dim {
    pub id: String,
    pub name: String,
    pub algorithm: Algorithm,
    pub multiplier: i64,
    pub divisor: i64,
}

impl Dim {
    /// Create an absolute dimension whose display name is `name`.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            algorithm: Algorithm::Absolute,
            multiplier: 1,
            divisor: 1,
        }
    }

    pub fn incremental(mut self) -> Self {
        self.algorithm = Algorithm::Incremental;
        self
    }

    pub fn percentage_of_incremental(mut self) -> Self {
        self.algorithm = Algorithm::PercentageOfIncrementalRow;
        self
    }

    pub fn with_multiplier(mut self, multiplier: i64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_divisor(mut self, divisor: i64) -> Self {
        self.divisor = divisor;
        self
    }
}

/// Chart descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub id: String,
    pub title: String,
    pub units: String,
    pub family: String,
    pub context: String,
    pub kind: ChartKind,
    pub priority: u32,
    pub labels: Vec<(String, String)>,
    pub dims: Vec<Dim>,
    obsolete: bool,
    announced: bool,
}

impl Chart {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        units: impl Into<String>,
        family: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            units: units.into(),
            family: family.into(),
            context: context.into(),
            kind: ChartKind::Line,
            priority: 70_000,
            labels: Vec::new(),
            dims: Vec::new(),
            obsolete: false,
            announced: false,
        }
    }

    pub fn with_kind(mut self, kind: ChartKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn with_dim(mut self, dim: Dim) -> Self {
        self.dims.push(dim);
        self
    }

    /// Whether the chart has been marked obsolete.
    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    fn check_dims(&self) -> Result<(), ChartError> {
        let mut seen = HashSet::new();
        for dim in &self.dims {
            if !seen.insert(dim.id.as_str()) {
                return Err(ChartError::DuplicateDim {
                    chart: self.id.clone(),
                    dim: dim.id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Ordered chart collection owned by one job.
#[derive(Debug, Clone, Default)]
pub struct Charts {
    charts: Vec<Chart>,
}

impl Charts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chart.
    ///
    /// An obsolete chart with the same id is replaced by the fresh one.
    ///
    /// # Errors
    /// Returns [`ChartError`] if a live chart already holds the id, or if a
    /// dimension id collides with one already declared.
    pub fn add(&mut self, mut chart: Chart) -> Result<(), ChartError> {
        chart.check_dims()?;

        for existing in self.charts.iter().filter(|c| !c.obsolete) {
            if existing.id == chart.id {
                return Err(ChartError::DuplicateChart(chart.id));
            }
            if let Some(dim) = chart
                .dims
                .iter()
                .find(|d| existing.dims.iter().any(|e| e.id == d.id))
            {
                return Err(ChartError::DuplicateDim {
                    chart: chart.id.clone(),
                    dim: dim.id.clone(),
                });
            }
        }

        chart.obsolete = false;
        chart.announced = false;
        match self.charts.iter().position(|c| c.id == chart.id) {
            Some(pos) => self.charts[pos] = chart,
            None => self.charts.push(chart),
        }
        Ok(())
    }

    /// Add several charts, stopping at the first error.
    pub fn add_all(&mut self, charts: impl IntoIterator<Item = Chart>) -> Result<(), ChartError> {
        charts.into_iter().try_for_each(|c| self.add(c))
    }

    /// Return announcements that never reached the output, so the next
    /// [`take_pending`](Self::take_pending) yields them again.
    pub fn restore_pending(&mut self, pending: Vec<Chart>) {
        for chart in pending {
            if chart.obsolete {
                if !self.charts.iter().any(|c| c.id == chart.id) {
                    self.charts.push(chart);
                }
            } else if let Some(live) = self
                .charts
                .iter_mut()
                .find(|c| c.id == chart.id && !c.obsolete)
            {
                live.announced = false;
            }
        }
    }

    /// Look up a live chart.
    pub fn get(&self, id: &str) -> Option<&Chart> {
        self.charts.iter().find(|c| c.id == id && !c.obsolete)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Mark a single chart obsolete. Returns `false` if no live chart has this id.
    pub fn mark_obsolete(&mut self, id: &str) -> bool {
        match self.charts.iter_mut().find(|c| c.id == id && !c.obsolete) {
            Some(chart) => {
                chart.obsolete = true;
                true
            }
            None => false,
        }
    }

    /// Mark every live chart whose id starts with `prefix` obsolete.
    ///
    /// Returns the number of charts affected.
    pub fn mark_obsolete_prefixed(&mut self, prefix: &str) -> usize {
        let mut n = 0;
        for chart in self
            .charts
            .iter_mut()
            .filter(|c| !c.obsolete && c.id.starts_with(prefix))
        {
            chart.obsolete = true;
            n += 1;
        }
        n
    }

    /// Live charts in insertion order.
    pub fn live(&self) -> impl Iterator<Item = &Chart> {
        self.charts.iter().filter(|c| !c.obsolete)
    }

    /// Number of live charts.
    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether some live chart declares a dimension with this id.
    pub fn declares(&self, dim_id: &str) -> bool {
        self.live().any(|c| c.dims.iter().any(|d| d.id == dim_id))
    }

    /// Sample keys that no live chart declares.
    pub fn undeclared<'a>(&self, samples: &'a Samples) -> Vec<&'a str> {
        let declared: HashSet<&str> = self
            .live()
            .flat_map(|c| c.dims.iter().map(|d| d.id.as_str()))
            .collect();
        samples
            .keys()
            .map(String::as_str)
            .filter(|k| !declared.contains(k))
            .collect()
    }

    /// Drain chart announcements.
    ///
    /// Returns live charts not yet announced and obsolete charts that were
    /// announced earlier. Obsolete charts are forgotten once returned.
    pub fn take_pending(&mut self) -> Vec<Chart> {
        let mut pending = Vec::new();
        self.charts.retain_mut(|chart| {
            if chart.obsolete {
                if chart.announced {
                    pending.push(chart.clone());
                }
                return false;
            }
            if !chart.announced {
                chart.announced = true;
                pending.push(chart.clone());
            }
            true
        });
        pending
    }
}

/// Tracks which entities exist between cycles.
#[derive(Debug, Clone, Default)]
pub struct EntityTracker {
    seen: HashSet<String>,
}

impl EntityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked set with `current`.
    ///
    /// Returns `(appeared, vanished)`, each sorted.
    pub fn update<I, S>(&mut self, current: I) -> (Vec<String>, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current: HashSet<String> = current.into_iter().map(Into::into).collect();

        let mut appeared: Vec<String> = current.difference(&self.seen).cloned().collect();
        let mut vanished: Vec<String> = self.seen.difference(&current).cloned().collect();
        appeared.sort();
        vanished.sort();

        self.seen = current;
        (appeared, vanished)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }
}

/// Entities keyed by identity, each remembered with its chart prefix so the
/// charts of a vanished entity can be retired.
#[derive(Debug, Clone, Default)]
pub struct PrefixTracker {
    tracker: EntityTracker,
    prefixes: HashMap<String, String>,
}

impl PrefixTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked entities with `current` (key to chart prefix).
    ///
    /// Returns the keys that appeared and the prefixes of vanished entities.
    pub fn update(&mut self, current: HashMap<String, String>) -> (Vec<String>, Vec<String>) {
        let (appeared, vanished) = self.tracker.update(current.keys().cloned());
        let retired = vanished
            .iter()
            .filter_map(|k| self.prefixes.get(k).cloned())
            .collect();
        self.prefixes = current;
        (appeared, retired)
    }

    /// Update and mark the charts of vanished entities obsolete.
    ///
    /// Returns the keys that appeared.
    pub fn sync(&mut self, charts: &mut Charts, current: HashMap<String, String>) -> Vec<String> {
        let (appeared, retired) = self.update(current);
        for prefix in retired {
            let n = charts.mark_obsolete_prefixed(&prefix);
            tracing::debug!(prefix = %prefix, charts = n, "Entity vanished");
        }
        appeared
    }
}

/// Turn an arbitrary identifier into a chart or dimension id.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`, and the result is lowercase.
pub fn clean_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Scale a fractional value by [`PRECISION`].
pub fn scaled(value: f64) -> i64 {
    (value * PRECISION as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_chart(id: &str, prefix: &str) -> Chart {
        Chart::new(id, "Status", "status", "health", "test.status")
            .with_dim(Dim::new(format!("{prefix}_ok"), "ok"))
            .with_dim(Dim::new(format!("{prefix}_nok"), "nok"))
    }

    #[test]
    fn test_add_rejects_live_duplicate() {
        let mut charts = Charts::new();
        charts.add(status_chart("ctrl_0_status", "ctrl_0")).unwrap();

        let err = charts
            .add(status_chart("ctrl_0_status", "ctrl_0_again"))
            .unwrap_err();
        assert_eq!(err, ChartError::DuplicateChart("ctrl_0_status".into()));
    }

    #[test]
    fn test_add_rejects_duplicate_dims() {
        let mut charts = Charts::new();
        let chart = Chart::new("c", "t", "u", "f", "x.c")
            .with_dim(Dim::new("a", "a"))
            .with_dim(Dim::new("a", "b"));
        assert!(matches!(
            charts.add(chart),
            Err(ChartError::DuplicateDim { .. })
        ));

        charts.add(status_chart("one", "shared")).unwrap();
        assert!(matches!(
            charts.add(status_chart("two", "shared")),
            Err(ChartError::DuplicateDim { .. })
        ));
    }

    #[test]
    fn test_obsolete_then_readd() {
        let mut charts = Charts::new();
        charts.add(status_chart("pd_1_status", "pd_1")).unwrap();
        assert_eq!(charts.take_pending().len(), 1);

        assert!(charts.mark_obsolete("pd_1_status"));
        assert!(!charts.contains("pd_1_status"));

        let pending = charts.take_pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_obsolete());
        assert!(charts.take_pending().is_empty());

        charts.add(status_chart("pd_1_status", "pd_1")).unwrap();
        let pending = charts.take_pending();
        assert_eq!(pending.len(), 1);
        assert!(!pending[0].is_obsolete());
    }

    #[test]
    fn test_restore_pending() {
        let mut charts = Charts::new();
        charts.add(status_chart("pd_1_status", "pd_1")).unwrap();
        charts.add(status_chart("pd_2_status", "pd_2")).unwrap();
        let lost = charts.take_pending();
        assert!(charts.take_pending().is_empty());

        charts.restore_pending(lost);
        let pending = charts.take_pending();
        assert_eq!(pending.len(), 2);
        assert!(charts.take_pending().is_empty());

        // Obsolete announcements come back too, without reviving the chart.
        assert!(charts.mark_obsolete("pd_1_status"));
        let lost = charts.take_pending();
        charts.restore_pending(lost);
        assert!(!charts.contains("pd_1_status"));
        let pending = charts.take_pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_obsolete());
        assert!(charts.take_pending().is_empty());

        // Charts removed meanwhile are not re-announced.
        charts.restore_pending(vec![status_chart("pd_9_status", "pd_9")]);
        assert!(charts.take_pending().is_empty());
    }

    #[test]
    fn test_obsolete_before_announce_is_silent() {
        let mut charts = Charts::new();
        charts.add(status_chart("a_status", "a")).unwrap();
        charts.mark_obsolete("a_status");
        assert!(charts.take_pending().is_empty());
    }

    #[test]
    fn test_mark_obsolete_prefixed() {
        let mut charts = Charts::new();
        charts.add(status_chart("dev_sda_status", "dev_sda")).unwrap();
        charts.add(status_chart("dev_sda1_status", "dev_sda1")).unwrap();
        charts.add(status_chart("dev_sdb_status", "dev_sdb")).unwrap();

        assert_eq!(charts.mark_obsolete_prefixed("dev_sda_"), 1);
        assert_eq!(charts.len(), 2);
        assert!(charts.contains("dev_sda1_status"));
    }

    #[test]
    fn test_undeclared_keys() {
        let mut charts = Charts::new();
        charts.add(status_chart("s", "x")).unwrap();

        let mut samples = Samples::new();
        samples.insert("x_ok".into(), 1);
        samples.insert("y_ok".into(), 1);
        assert_eq!(charts.undeclared(&samples), vec!["y_ok"]);
        assert!(charts.declares("x_nok"));
    }

    #[test]
    fn test_entity_tracker() {
        let mut tracker = EntityTracker::new();
        let (added, removed) = tracker.update(["a", "b"]);
        assert_eq!(added, vec!["a", "b"]);
        assert!(removed.is_empty());

        let (added, removed) = tracker.update(["b", "c"]);
        assert_eq!(added, vec!["c"]);
        assert_eq!(removed, vec!["a"]);
        assert!(tracker.contains("b"));
    }

    #[test]
    fn test_prefix_tracker_retires_charts() {
        let mut charts = Charts::new();
        charts.add(status_chart("db_a_status", "db_a")).unwrap();
        charts.add(status_chart("db_b_status", "db_b")).unwrap();

        let mut seen = PrefixTracker::new();
        let current = |keys: &[&str]| -> HashMap<String, String> {
            keys.iter().map(|k| (k.to_string(), format!("db_{k}_"))).collect()
        };
        assert_eq!(seen.sync(&mut charts, current(&["a", "b"])), vec!["a", "b"]);

        let appeared = seen.sync(&mut charts, current(&["b", "c"]));
        assert_eq!(appeared, vec!["c"]);
        assert!(!charts.contains("db_a_status"));
        assert!(charts.contains("db_b_status"));
    }

    #[test]
    fn test_clean_id() {
        assert_eq!(clean_id("E208i-p/0/A/1/1I:1:1"), "e208i-p_0_a_1_1i_1_1");
        assert_eq!(clean_id("library/nginx"), "library_nginx");
        assert_eq!(clean_id(" /dev/sda "), "_dev_sda");
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(ChartKind::Stacked.to_string(), "stacked");
        assert_eq!("AREA".parse::<ChartKind>().unwrap(), ChartKind::Area);
        assert_eq!(
            Algorithm::PercentageOfIncrementalRow.to_string(),
            "percentage-of-incremental-row"
        );
        assert_eq!(scaled(12.3456), 12346);
    }
}
