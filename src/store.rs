use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TuneError};
use crate::resample::FoldId;
use crate::space::{ParameterConfig, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Minimize,
    Maximize,
}

impl Direction {
    /// `Greater` when `a` is the better value.
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        match self {
            Self::Minimize => b.total_cmp(&a),
            Self::Maximize => a.total_cmp(&b),
        }
    }

    /// Maps a metric onto a quantity to minimise.
    pub fn objective(&self, value: f64) -> f64 {
        match self {
            Self::Minimize => value,
            Self::Maximize => -value,
        }
    }
}

/// One metric of one configuration on one fold. `value` is `None` when the fold failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub config: ParameterConfig,
    pub fold: FoldId,
    pub metric: String,
    pub value: Option<f64>,
    pub status: Status,
}

/// Payload captured from one fit. `config` holds the fit-determining dimensions only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub config: ParameterConfig,
    pub fold: FoldId,
    pub payload: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fit,
    Score,
    Extract,
}

/// Why something failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub config: ParameterConfig,
    pub fold: FoldId,
    pub stage: Stage,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Aggregate {
    /// Mean over ok folds; `None` when every fold failed.
    pub mean: Option<f64>,
    pub std_error: Option<f64>,
    pub n: usize,
    pub n_failed: usize,
}

/// Row of the flat metric table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricRow {
    #[serde(flatten)]
    pub parameters: BTreeMap<String, Value>,
    pub id: String,
    pub metric: String,
    pub value: Option<f64>,
    pub status: Status,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractionRow {
    #[serde(flatten)]
    pub parameters: BTreeMap<String, Value>,
    pub id: String,
    pub payload: serde_json::Value,
}

/// All records of one run, kept in enumeration order of the configurations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultStore {
    configs: Vec<ParameterConfig>,
    records: Vec<MetricRecord>,
    extractions: Vec<Extraction>,
    notes: Vec<Note>,
    #[serde(skip)]
    index: HashMap<ParameterConfig, usize>,
    #[serde(skip)]
    by_config: Vec<Vec<usize>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `config` to the enumeration order if it is new and returns its position.
    pub fn register(&mut self, config: &ParameterConfig) -> usize {
        if let Some(position) = self.index.get(config) {
            return *position;
        }
        let position = self.configs.len();
        self.configs.push(config.clone());
        self.by_config.push(Vec::new());
        self.index.insert(config.clone(), position);
        position
    }

    pub fn record(&mut self, record: MetricRecord) {
        let position = self.register(&record.config);
        self.by_config[position].push(self.records.len());
        self.records.push(record);
    }

    pub fn record_extraction(&mut self, extraction: Extraction) {
        self.extractions.push(extraction);
    }

    pub fn record_note(&mut self, note: Note) {
        self.notes.push(note);
    }

    pub fn configs(&self) -> &[ParameterConfig] {
        &self.configs
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn extractions(&self) -> &[Extraction] {
        &self.extractions
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn contains(&self, config: &ParameterConfig) -> bool {
        self.index.contains_key(config)
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for record in &self.records {
            if !names.contains(&record.metric) {
                names.push(record.metric.clone());
            }
        }
        names
    }

    pub fn records_for<'a>(
        &'a self,
        config: &ParameterConfig,
    ) -> impl Iterator<Item = &'a MetricRecord> + 'a {
        let rows = self
            .index
            .get(config)
            .map(|p| self.by_config[*p].as_slice())
            .unwrap_or(&[]);
        rows.iter().map(move |r| &self.records[*r])
    }

    /// `None` when nothing was recorded for `config` and `metric`.
    pub fn aggregate(&self, config: &ParameterConfig, metric: &str) -> Option<Aggregate> {
        let mut n = 0;
        let mut values = Vec::new();
        for record in self.records_for(config).filter(|r| r.metric == metric) {
            n += 1;
            if let (Status::Ok, Some(value)) = (record.status, record.value) {
                values.push(value);
            }
        }
        if n == 0 {
            return None;
        }
        let n_ok = values.len();
        let mean = (n_ok > 0).then(|| values.iter().sum::<f64>() / n_ok as f64);
        let std_error = mean.filter(|_| n_ok > 1).map(|mean| {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n_ok - 1) as f64;
            (var / n_ok as f64).sqrt()
        });
        Some(Aggregate {
            mean,
            std_error,
            n,
            n_failed: n - n_ok,
        })
    }

    /// Mean of `metric` for `config`, as an error when every fold failed.
    pub fn mean(&self, config: &ParameterConfig, metric: &str) -> Result<f64> {
        match self.aggregate(config, metric) {
            Some(Aggregate {
                mean: Some(mean), ..
            }) => Ok(mean),
            Some(_) => Err(TuneError::AggregationUndefined {
                config: config.clone(),
            }),
            None => Err(TuneError::config(format!(
                "no `{metric}` results for {config}"
            ))),
        }
    }

    /// Aggregates for every configuration with results, in enumeration order.
    pub fn collect_metrics(&self, metric: &str) -> Vec<(ParameterConfig, Aggregate)> {
        self.configs
            .iter()
            .filter_map(|c| self.aggregate(c, metric).map(|a| (c.clone(), a)))
            .collect()
    }

    /// `Greater` when `a` should rank above `b`. Equal means enumeration order decides.
    fn rank(direction: Direction, a: &Aggregate, b: &Aggregate) -> Ordering {
        match (a.mean, b.mean) {
            (Some(x), Some(y)) => direction
                .compare(x, y)
                .then_with(|| b.n_failed.cmp(&a.n_failed)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }

    /// Configuration with the best mean. Ties go to fewer failed folds, then to the
    /// configuration enumerated first.
    pub fn best(&self, metric: &str, direction: Direction) -> Option<&ParameterConfig> {
        let mut best: Option<(&ParameterConfig, Aggregate)> = None;
        for config in &self.configs {
            let Some(aggregate) = self.aggregate(config, metric) else {
                continue;
            };
            if aggregate.mean.is_none() {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, current)) => {
                    Self::rank(direction, &aggregate, current) == Ordering::Greater
                }
            };
            if better {
                best = Some((config, aggregate));
            }
        }
        best.map(|(config, _)| config)
    }

    /// The `n` best configurations, ranked like [`ResultStore::best`].
    pub fn show_best(
        &self,
        metric: &str,
        direction: Direction,
        n: usize,
    ) -> Vec<(ParameterConfig, Aggregate)> {
        let mut rows = self
            .collect_metrics(metric)
            .into_iter()
            .filter(|(_, a)| a.mean.is_some())
            .collect::<Vec<_>>();
        // stable sort keeps enumeration order among ties
        rows.sort_by(|(_, a), (_, b)| Self::rank(direction, b, a));
        rows.truncate(n);
        rows
    }

    /// Extractions whose fit produced `config`'s results.
    pub fn extractions_for<'a>(
        &'a self,
        config: &'a ParameterConfig,
    ) -> impl Iterator<Item = &'a Extraction> + 'a {
        self.extractions.iter().filter(move |e| {
            e.config
                .iter()
                .all(|(name, value)| config.get(name) == Some(value))
        })
    }

    pub fn metric_table(&self) -> Vec<MetricRow> {
        self.records
            .iter()
            .map(|r| MetricRow {
                parameters: columns(&r.config),
                id: r.fold.to_string(),
                metric: r.metric.clone(),
                value: r.value,
                status: r.status,
            })
            .collect()
    }

    pub fn extraction_table(&self) -> Vec<ExtractionRow> {
        self.extractions
            .iter()
            .map(|e| ExtractionRow {
                parameters: columns(&e.config),
                id: e.fold.to_string(),
                payload: e.payload.clone(),
            })
            .collect()
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = File::options()
            .write(true)
            .truncate(true)
            .create(true)
            .open(path)?;
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut store: ResultStore = serde_json::from_reader(file)?;
        store.reindex();
        Ok(store)
    }

    fn reindex(&mut self) {
        self.index = self
            .configs
            .iter()
            .enumerate()
            .map(|(p, c)| (c.clone(), p))
            .collect();
        self.by_config = vec![Vec::new(); self.configs.len()];
        for (row, record) in self.records.iter().enumerate() {
            let position = match self.index.get(&record.config) {
                Some(p) => *p,
                None => {
                    self.configs.push(record.config.clone());
                    self.by_config.push(Vec::new());
                    self.index.insert(record.config.clone(), self.configs.len() - 1);
                    self.configs.len() - 1
                }
            };
            self.by_config[position].push(row);
        }
    }
}

fn columns(config: &ParameterConfig) -> BTreeMap<String, Value> {
    config
        .iter()
        .map(|(n, v)| (n.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(x: f64) -> ParameterConfig {
        ParameterConfig::from_pairs([("x", x)])
    }

    fn fold(fold: usize) -> FoldId {
        FoldId { repeat: 0, fold }
    }

    fn ok(x: f64, f: usize, value: f64) -> MetricRecord {
        MetricRecord {
            config: config(x),
            fold: fold(f),
            metric: "rmse".to_string(),
            value: Some(value),
            status: Status::Ok,
        }
    }

    fn failed(x: f64, f: usize) -> MetricRecord {
        MetricRecord {
            value: None,
            status: Status::Failed,
            ..ok(x, f, 0.)
        }
    }

    #[test]
    fn test_aggregate_excludes_failed_folds() {
        let mut store = ResultStore::new();
        store.record(ok(1., 0, 1.));
        store.record(ok(1., 1, 3.));
        store.record(failed(1., 2));

        let aggregate = store.aggregate(&config(1.), "rmse").unwrap();
        assert_eq!(aggregate.mean, Some(2.));
        assert_eq!(aggregate.n, 3);
        assert_eq!(aggregate.n_failed, 1);
        // sd = sqrt(2), se = sqrt(2) / sqrt(2)
        assert!((aggregate.std_error.unwrap() - 1.).abs() < 1e-12);
        assert!(store.aggregate(&config(1.), "rsq").is_none());
    }

    #[test]
    fn test_all_failed_mean_is_undefined() {
        let mut store = ResultStore::new();
        store.record(failed(2., 0));
        store.record(failed(2., 1));
        let aggregate = store.aggregate(&config(2.), "rmse").unwrap();
        assert_eq!(aggregate.mean, None);
        assert_eq!(aggregate.n, aggregate.n_failed);
        assert!(matches!(
            store.mean(&config(2.), "rmse"),
            Err(TuneError::AggregationUndefined { .. })
        ));
        assert_eq!(store.best("rmse", Direction::Minimize), None);
    }

    #[test]
    fn test_best_breaks_ties_by_failures_then_order() {
        let mut store = ResultStore::new();
        // x=1: mean 2 with one failure, x=2: mean 2 with none, x=3: mean 2 with none
        store.record(ok(1., 0, 2.));
        store.record(failed(1., 1));
        store.record(ok(2., 0, 2.));
        store.record(ok(2., 1, 2.));
        store.record(ok(3., 0, 2.));
        store.record(ok(3., 1, 2.));
        store.record(ok(4., 0, 5.));
        store.record(ok(4., 1, 5.));

        assert_eq!(store.best("rmse", Direction::Minimize), Some(&config(2.)));
        assert_eq!(store.best("rmse", Direction::Maximize), Some(&config(4.)));

        let top = store.show_best("rmse", Direction::Minimize, 3);
        let order = top.iter().map(|(c, _)| c.get_f64("x").unwrap()).collect::<Vec<_>>();
        assert_eq!(order, vec![2., 3., 1.]);
    }

    #[test]
    fn test_enumeration_order_comes_from_registration() {
        let mut store = ResultStore::new();
        store.register(&config(9.));
        store.record(ok(1., 0, 1.));
        store.record(ok(9., 0, 1.));
        assert_eq!(store.configs(), &[config(9.), config(1.)]);
        assert_eq!(store.best("rmse", Direction::Minimize), Some(&config(9.)));
    }

    #[test]
    fn test_extractions_join_on_fit_dimensions() {
        let mut store = ResultStore::new();
        let full = ParameterConfig::from_pairs([("mixture", 0.5), ("penalty", 0.1)]);
        store.record_extraction(Extraction {
            config: ParameterConfig::from_pairs([("mixture", 0.5)]),
            fold: fold(0),
            payload: serde_json::json!({ "terms": 12 }),
        });
        store.record_extraction(Extraction {
            config: ParameterConfig::from_pairs([("mixture", 1.0)]),
            fold: fold(0),
            payload: serde_json::json!({ "terms": 3 }),
        });
        let joined = store.extractions_for(&full).collect::<Vec<_>>();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].payload["terms"], 12);

        let table = store.extraction_table();
        assert_eq!(table[1].id, "Repeat1/Fold01");
        assert_eq!(table[1].parameters["mixture"], Value::Float(1.0));
    }

    #[test]
    fn test_metric_table_is_flat() {
        let mut store = ResultStore::new();
        store.record(ok(1., 0, 0.5));
        store.record(failed(1., 1));
        let table = store.metric_table();
        assert_eq!(table.len(), 2);
        let row = serde_json::to_value(&table[1]).unwrap();
        assert_eq!(row["x"], 1.0);
        assert_eq!(row["status"], "failed");
        assert!(row["value"].is_null());
        assert_eq!(row["id"], "Repeat1/Fold02");
    }

    #[test]
    fn test_file_round_trip_rebuilds_index() {
        let mut store = ResultStore::new();
        store.record(ok(1., 0, 0.5));
        store.record(ok(2., 0, 0.25));
        store.record(failed(2., 1));
        store.record_note(Note {
            config: config(2.),
            fold: fold(1),
            stage: Stage::Fit,
            message: "did not converge".to_string(),
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        store.write_to_file(&path).unwrap();
        let restored = ResultStore::read_from_file(&path).unwrap();
        assert_eq!(restored, store);
        assert_eq!(restored.aggregate(&config(2.), "rmse").unwrap().n_failed, 1);
    }
}
