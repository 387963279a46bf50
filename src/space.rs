use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use itertools::Itertools;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TuneError};

/// A native (user-facing) parameter value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Level(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Level(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_level(&self) -> Option<&str> {
        match self {
            Self::Level(v) => Some(v),
            _ => None,
        }
    }
}

// -0.0 and 0.0 are the same configuration.
#[inline]
fn float_bits(v: f64) -> u64 {
    if v == 0.0 {
        0f64.to_bits()
    } else {
        v.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => float_bits(*a) == float_bits(*b),
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Level(a), Self::Level(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Float(v) => float_bits(*v).hash(state),
            Self::Integer(v) => v.hash(state),
            Self::Level(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Level(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Level(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Level(value)
    }
}

/// Monotone, invertible map between native values and search coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transform {
    #[default]
    Identity,
    Log2,
    Log10,
    Ln,
}

impl Transform {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Self::Identity => x,
            Self::Log2 => x.log2(),
            Self::Log10 => x.log10(),
            Self::Ln => x.ln(),
        }
    }

    pub fn inverse(&self, t: f64) -> f64 {
        match self {
            Self::Identity => t,
            Self::Log2 => t.exp2(),
            Self::Log10 => 10f64.powf(t),
            Self::Ln => t.exp(),
        }
    }

    fn requires_positive(&self) -> bool {
        !matches!(self, Self::Identity)
    }
}

/// Native range of a dimension. Bounds are inclusive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum Domain {
    Continuous { lower: f64, upper: f64 },
    Discrete { lower: i64, upper: i64 },
    Ordinal { levels: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub domain: Domain,
    #[serde(default)]
    pub transform: Transform,
}

impl ParameterSpec {
    pub fn continuous(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Continuous { lower, upper },
            transform: Transform::Identity,
        }
    }

    pub fn discrete(name: impl Into<String>, lower: i64, upper: i64) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Discrete { lower, upper },
            transform: Transform::Identity,
        }
    }

    pub fn ordinal<S: Into<String>>(
        name: impl Into<String>,
        levels: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Ordinal {
                levels: levels.into_iter().map(Into::into).collect(),
            },
            transform: Transform::Identity,
        }
    }

    /// Ranges stay in native units; the transform only changes how the range is traversed.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| {
            Err(TuneError::config(format!("parameter `{}`: {}", self.name, msg)))
        };
        if self.name.is_empty() {
            return Err(TuneError::config("parameter name must not be empty"));
        }
        match &self.domain {
            Domain::Continuous { lower, upper } => {
                if !lower.is_finite() || !upper.is_finite() {
                    return bad("range bounds must be finite".into());
                }
                if lower >= upper {
                    return bad(format!("empty range [{lower}, {upper}]"));
                }
                if self.transform.requires_positive() && *lower <= 0. {
                    return bad(format!("{:?} transform needs a positive range", self.transform));
                }
            }
            Domain::Discrete { lower, upper } => {
                if lower > upper {
                    return bad(format!("empty range [{lower}, {upper}]"));
                }
                if self.transform.requires_positive() && *lower <= 0 {
                    return bad(format!("{:?} transform needs a positive range", self.transform));
                }
            }
            Domain::Ordinal { levels } => {
                if levels.is_empty() {
                    return bad("no levels".into());
                }
                if levels.iter().unique().count() != levels.len() {
                    return bad("levels must be distinct".into());
                }
                if self.transform != Transform::Identity {
                    return bad("ordinal parameters cannot be transformed".into());
                }
            }
        }
        Ok(())
    }

    /// Bounds in transformed coordinates.
    fn transformed_bounds(&self) -> (f64, f64) {
        match &self.domain {
            Domain::Continuous { lower, upper } => {
                (self.transform.apply(*lower), self.transform.apply(*upper))
            }
            Domain::Discrete { lower, upper } => (
                self.transform.apply(*lower as f64),
                self.transform.apply(*upper as f64),
            ),
            Domain::Ordinal { levels } => (0., (levels.len() - 1) as f64),
        }
    }

    pub fn range(&self) -> (Value, Value) {
        match &self.domain {
            Domain::Continuous { lower, upper } => (Value::Float(*lower), Value::Float(*upper)),
            Domain::Discrete { lower, upper } => (Value::Integer(*lower), Value::Integer(*upper)),
            Domain::Ordinal { levels } => (
                Value::Level(levels[0].clone()),
                Value::Level(levels[levels.len() - 1].clone()),
            ),
        }
    }

    /// Brings a value to this dimension's native type and checks it lies in range.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        let out_of_range =
            || TuneError::config(format!("value {} is outside `{}`", value, self.name));
        match (&self.domain, value) {
            (Domain::Continuous { lower, upper }, Value::Float(_) | Value::Integer(_)) => {
                let v = value.as_f64().unwrap_or(f64::NAN);
                if v >= *lower && v <= *upper {
                    Ok(Value::Float(v))
                } else {
                    Err(out_of_range())
                }
            }
            (Domain::Discrete { lower, upper }, Value::Integer(v)) => {
                if v >= lower && v <= upper {
                    Ok(Value::Integer(*v))
                } else {
                    Err(out_of_range())
                }
            }
            (Domain::Discrete { .. }, Value::Float(v)) if v.fract() == 0. => {
                self.coerce(&Value::Integer(*v as i64))
            }
            (Domain::Ordinal { levels }, Value::Level(l)) => {
                if levels.contains(l) {
                    Ok(value.clone())
                } else {
                    Err(out_of_range())
                }
            }
            _ => Err(TuneError::config(format!(
                "value {} has the wrong type for `{}`",
                value, self.name
            ))),
        }
    }

    /// Position of a native value in the unit interval of transformed coordinates.
    pub fn to_unit(&self, value: &Value) -> Result<f64> {
        let value = self.coerce(value)?;
        let (lo, hi) = self.transformed_bounds();
        let t = match (&self.domain, &value) {
            (Domain::Ordinal { levels }, Value::Level(l)) => {
                levels.iter().position(|x| x == l).unwrap_or(0) as f64
            }
            _ => self.transform.apply(value.as_f64().unwrap_or(f64::NAN)),
        };
        if hi - lo <= 0. {
            return Ok(0.5);
        }
        Ok((t - lo) / (hi - lo))
    }

    /// Inverse of [`ParameterSpec::to_unit`]. Discrete and ordinal values snap to the nearest
    /// point.
    pub fn from_unit(&self, u: f64) -> Value {
        let u = u.clamp(0., 1.);
        let (lo, hi) = self.transformed_bounds();
        let t = lo + u * (hi - lo);
        match &self.domain {
            Domain::Continuous { lower, upper } => {
                Value::Float(self.transform.inverse(t).clamp(*lower, *upper))
            }
            Domain::Discrete { lower, upper } => {
                Value::Integer((self.transform.inverse(t).round() as i64).clamp(*lower, *upper))
            }
            Domain::Ordinal { levels } => {
                let index = (t.round() as usize).min(levels.len() - 1);
                Value::Level(levels[index].clone())
            }
        }
    }

    /// `levels` values evenly spaced in transformed coordinates.
    pub fn regular_values(&self, levels: usize) -> Vec<Value> {
        if let Domain::Ordinal { levels: all } = &self.domain {
            if levels >= all.len() {
                return all.iter().cloned().map(Value::Level).collect();
            }
        }
        let steps = levels.saturating_sub(1);
        if steps == 0 {
            return vec![self.range().0];
        }
        (0..=steps)
            .map(|i| self.from_unit(i as f64 / steps as f64))
            .unique()
            .collect()
    }
}

/// One value per dimension, in the order the space defines them.
///
/// Equality and hashing are by value, so configurations work as map keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterConfig {
    values: Vec<(String, Value)>,
}

impl ParameterConfig {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_level(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_level)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drops the named dimensions.
    pub fn without(&self, names: &[String]) -> ParameterConfig {
        Self {
            values: self
                .values
                .iter()
                .filter(|(n, _)| !names.contains(n))
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Display for ParameterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "{{}}");
        }
        let text = self
            .values
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .join(", ");
        write!(f, "{text}")
    }
}

/// Number of regular grid levels, either shared by every dimension or one per dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridLevels {
    One(usize),
    ForEach(Vec<usize>),
}

impl GridLevels {
    pub fn levels_for(&self, specs: &[ParameterSpec]) -> Result<Vec<usize>> {
        let levels = match self {
            Self::One(levels) => vec![*levels; specs.len()],
            Self::ForEach(v) => {
                if v.len() != specs.len() {
                    return Err(TuneError::config(format!(
                        "expected {} grid levels, received {}",
                        specs.len(),
                        v.len()
                    )));
                }
                v.clone()
            }
        };
        if levels.iter().any(|l| *l == 0) {
            return Err(TuneError::config("grid levels must be at least 1"));
        }
        Ok(levels)
    }
}

impl From<usize> for GridLevels {
    fn from(value: usize) -> Self {
        Self::One(value)
    }
}

impl From<Vec<usize>> for GridLevels {
    fn from(value: Vec<usize>) -> Self {
        Self::ForEach(value)
    }
}

/// The tunable dimensions of a pipeline.
///
/// Serialises as the list of specs; deserialising goes through [`ParameterSpace::define`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ParameterSpec>", into = "Vec<ParameterSpec>")]
pub struct ParameterSpace {
    specs: Vec<ParameterSpec>,
}

impl TryFrom<Vec<ParameterSpec>> for ParameterSpace {
    type Error = TuneError;

    fn try_from(specs: Vec<ParameterSpec>) -> Result<Self> {
        let mut space = Self::new();
        for spec in specs {
            space.define(spec)?;
        }
        Ok(space)
    }
}

impl From<ParameterSpace> for Vec<ParameterSpec> {
    fn from(space: ParameterSpace) -> Self {
        space.specs
    }
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, spec: ParameterSpec) -> Result<()> {
        spec.validate()?;
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(TuneError::DuplicateParameter(spec.name));
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Re-checks every spec and name uniqueness.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.specs {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(TuneError::DuplicateParameter(spec.name.clone()));
            }
        }
        Ok(())
    }

    /// Chaining form of [`ParameterSpace::define`].
    pub fn with(mut self, spec: ParameterSpec) -> Result<Self> {
        self.define(spec)?;
        Ok(self)
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn spec(&self, name: &str) -> Result<&ParameterSpec> {
        self.specs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| TuneError::UnknownParameter(name.to_string()))
    }

    pub fn range(&self, name: &str) -> Result<(Value, Value)> {
        Ok(self.spec(name)?.range())
    }

    pub fn transform(&self, name: &str) -> Result<Transform> {
        Ok(self.spec(name)?.transform)
    }

    /// Checks that `config` assigns exactly this space's dimensions and returns it in space
    /// order with native types.
    pub fn resolve(&self, config: &ParameterConfig) -> Result<ParameterConfig> {
        if let Some((name, _)) = config.iter().find(|(n, _)| self.spec(n).is_err()) {
            return Err(TuneError::UnknownParameter(name.to_string()));
        }
        let values = self
            .specs
            .iter()
            .map(|spec| {
                let value = config.get(&spec.name).ok_or_else(|| {
                    TuneError::config(format!("configuration has no value for `{}`", spec.name))
                })?;
                Ok((spec.name.clone(), spec.coerce(value)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ParameterConfig { values })
    }

    /// Unit-cube coordinates of a configuration, used by the surrogate.
    pub fn to_unit(&self, config: &ParameterConfig) -> Result<Vec<f64>> {
        self.specs
            .iter()
            .map(|spec| {
                let value = config
                    .get(&spec.name)
                    .ok_or_else(|| TuneError::UnknownParameter(spec.name.clone()))?;
                spec.to_unit(value)
            })
            .collect()
    }

    pub fn from_unit(&self, coords: &[f64]) -> ParameterConfig {
        ParameterConfig {
            values: self
                .specs
                .iter()
                .zip(coords.iter())
                .map(|(spec, u)| (spec.name.clone(), spec.from_unit(*u)))
                .collect(),
        }
    }

    /// Latin hypercube over transformed coordinates.
    ///
    /// Every dimension is cut into `n` strata and each stratum is used exactly once. Points that
    /// collapse onto the same configuration (small discrete spaces) are returned once.
    pub fn sample_space_filling<R: Rng>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Vec<ParameterConfig> {
        if n == 0 || self.specs.is_empty() {
            return Vec::new();
        }
        let columns = self
            .specs
            .iter()
            .map(|_| {
                let mut strata = (0..n).collect::<Vec<_>>();
                strata.shuffle(rng);
                strata
                    .into_iter()
                    .map(|s| (s as f64 + rng.gen::<f64>()) / n as f64)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        (0..n)
            .map(|row| {
                let coords = columns.iter().map(|c| c[row]).collect::<Vec<_>>();
                self.from_unit(&coords)
            })
            .unique()
            .collect()
    }

    /// Full Cartesian product of explicit per-dimension values, in space order.
    ///
    /// The last dimension varies fastest.
    pub fn cross_product(
        &self,
        grid_values: &[(String, Vec<Value>)],
    ) -> Result<Vec<ParameterConfig>> {
        if self.specs.is_empty() {
            return Err(TuneError::config("parameter space is empty"));
        }
        for (name, _) in grid_values {
            self.spec(name)?;
        }
        let mut seen = HashSet::new();
        if let Some((name, _)) = grid_values.iter().find(|(n, _)| !seen.insert(n)) {
            return Err(TuneError::DuplicateParameter(name.clone()));
        }
        let columns = self
            .specs
            .iter()
            .map(|spec| {
                let values = grid_values
                    .iter()
                    .find(|(n, _)| *n == spec.name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        TuneError::config(format!("grid has no values for `{}`", spec.name))
                    })?;
                if values.is_empty() {
                    return Err(TuneError::config(format!(
                        "grid values for `{}` are empty",
                        spec.name
                    )));
                }
                let values = values
                    .iter()
                    .map(|v| spec.coerce(v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(values.into_iter().unique().collect::<Vec<_>>())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.product(columns))
    }

    /// Grid with values evenly spaced in transformed coordinates.
    pub fn regular_grid(&self, levels: &GridLevels) -> Result<Vec<ParameterConfig>> {
        if self.specs.is_empty() {
            return Err(TuneError::config("parameter space is empty"));
        }
        let levels = levels.levels_for(&self.specs)?;
        let columns = self
            .specs
            .iter()
            .zip(levels)
            .map(|(spec, levels)| spec.regular_values(levels))
            .collect::<Vec<_>>();
        Ok(self.product(columns))
    }

    fn product(&self, columns: Vec<Vec<Value>>) -> Vec<ParameterConfig> {
        let names = self.specs.iter().map(|s| s.name.clone()).collect::<Vec<_>>();
        columns
            .into_iter()
            .multi_cartesian_product()
            .map(|row| ParameterConfig {
                values: names.iter().cloned().zip(row).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn space() -> ParameterSpace {
        ParameterSpace::new()
            .with(ParameterSpec::discrete("num_terms", 256, 4096).with_transform(Transform::Log2))
            .unwrap()
            .with(ParameterSpec::continuous("mixture", 0., 1.))
            .unwrap()
            .with(ParameterSpec::continuous("penalty", 1e-10, 1.).with_transform(Transform::Log10))
            .unwrap()
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut space = space();
        let err = space
            .define(ParameterSpec::continuous("mixture", 0., 0.5))
            .unwrap_err();
        assert!(matches!(err, TuneError::DuplicateParameter(name) if name == "mixture"));
    }

    #[test]
    fn test_invalid_specs_rejected() {
        let mut space = ParameterSpace::new();
        assert!(space.define(ParameterSpec::continuous("a", 1., 1.)).is_err());
        assert!(space.define(ParameterSpec::discrete("b", 5, 2)).is_err());
        assert!(space
            .define(ParameterSpec::continuous("c", 0., 1.).with_transform(Transform::Log10))
            .is_err());
        assert!(space
            .define(ParameterSpec::ordinal("d", Vec::<String>::new()))
            .is_err());
        assert!(space.is_empty());
    }

    #[test]
    fn test_range_and_transform() {
        let space = space();
        assert_eq!(
            space.range("num_terms").unwrap(),
            (Value::Integer(256), Value::Integer(4096))
        );
        assert_eq!(space.transform("penalty").unwrap(), Transform::Log10);
        assert!(matches!(
            space.range("missing"),
            Err(TuneError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_transforms_are_invertible() {
        for t in [Transform::Identity, Transform::Log2, Transform::Log10, Transform::Ln] {
            for x in [0.001, 0.5, 3., 1024.] {
                assert!((t.inverse(t.apply(x)) - x).abs() < 1e-9 * x.max(1.));
            }
        }
    }

    #[test]
    fn test_regular_values_use_transformed_spacing() {
        let space = space();
        let penalty = space.spec("penalty").unwrap().regular_values(11);
        assert_eq!(penalty.len(), 11);
        let first = penalty[0].as_f64().unwrap();
        let second = penalty[1].as_f64().unwrap();
        assert!((first - 1e-10).abs() < 1e-20);
        assert!((second - 1e-9).abs() < 1e-18);

        let terms = space.spec("num_terms").unwrap().regular_values(5);
        assert_eq!(
            terms,
            vec![256, 512, 1024, 2048, 4096]
                .into_iter()
                .map(Value::Integer)
                .collect::<Vec<_>>()
        );
    }

    fn column<V: Into<Value>>(name: &str, values: Vec<V>) -> (String, Vec<Value>) {
        (name.to_string(), values.into_iter().map(Into::into).collect())
    }

    #[test]
    fn test_cross_product_size_and_order() {
        let space = space();
        let grid = space
            .cross_product(&[
                column("penalty", vec![0.1, 0.01]),
                column("num_terms", vec![256, 1024, 4096]),
                column("mixture", vec![0, 1]),
            ])
            .unwrap();
        assert_eq!(grid.len(), 12);
        assert_eq!(grid[0].get_i64("num_terms"), Some(256));
        assert_eq!(grid[0].get_f64("mixture"), Some(0.));
        assert_eq!(grid[0].get_f64("penalty"), Some(0.1));
        assert_eq!(grid[1].get_f64("penalty"), Some(0.01));
        let names = grid[0].iter().map(|(n, _)| n).collect::<Vec<_>>();
        assert_eq!(names, vec!["num_terms", "mixture", "penalty"]);
    }

    #[test]
    fn test_cross_product_rejects_bad_grids() {
        let space = space();
        let missing = space.cross_product(&[column("penalty", vec![0.1])]);
        assert!(missing.is_err());

        let empty = space.cross_product(&[
            column("penalty", Vec::<f64>::new()),
            column("num_terms", vec![256]),
            column("mixture", vec![0.5]),
        ]);
        assert!(matches!(empty, Err(TuneError::Configuration(_))));

        let outside = space.cross_product(&[
            column("penalty", vec![5.0]),
            column("num_terms", vec![256]),
            column("mixture", vec![0.5]),
        ]);
        assert!(outside.is_err());

        let twice = space.cross_product(&[
            column("penalty", vec![0.1]),
            column("penalty", vec![0.2]),
        ]);
        assert!(matches!(twice, Err(TuneError::DuplicateParameter(_))));
    }

    #[test]
    fn test_space_filling_is_stratified_and_seeded() {
        let space = ParameterSpace::new()
            .with(ParameterSpec::continuous("x", 0., 1.))
            .unwrap()
            .with(ParameterSpec::continuous("y", 1., 1000.).with_transform(Transform::Log10))
            .unwrap();
        let n = 10;
        let a = space.sample_space_filling(n, &mut StdRng::seed_from_u64(7));
        let b = space.sample_space_filling(n, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert_eq!(a.len(), n);

        for dim in ["x", "y"] {
            let mut strata = a
                .iter()
                .map(|c| {
                    let u = space.spec(dim).unwrap().to_unit(c.get(dim).unwrap()).unwrap();
                    ((u * n as f64).floor() as usize).min(n - 1)
                })
                .collect::<Vec<_>>();
            strata.sort();
            assert_eq!(strata, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_unit_coordinates_round_trip_native_values() {
        let space = space();
        let config = space
            .resolve(&ParameterConfig::from_pairs([
                ("penalty", Value::Float(0.001)),
                ("num_terms", Value::Integer(1024)),
                ("mixture", Value::Float(0.25)),
            ]))
            .unwrap();
        let coords = space.to_unit(&config).unwrap();
        assert!((coords[0] - 0.5).abs() < 1e-12);
        assert!((coords[2] - 0.7).abs() < 1e-12);
        let back = space.from_unit(&coords);
        assert_eq!(back.get_i64("num_terms"), Some(1024));
        assert!((back.get_f64("penalty").unwrap() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_ordinal_levels() {
        let spec = ParameterSpec::ordinal("stemming", ["none", "light", "full"]);
        spec.validate().unwrap();
        assert_eq!(spec.to_unit(&"light".into()).unwrap(), 0.5);
        assert_eq!(spec.from_unit(0.9), Value::from("full"));
        assert_eq!(spec.regular_values(10).len(), 3);
    }

    #[test]
    fn test_config_equality_by_value() {
        let a = ParameterConfig::from_pairs([("x", 0.0), ("y", 1.5)]);
        let b = ParameterConfig::from_pairs([("x", -0.0), ("y", 1.5)]);
        assert_eq!(a, b);
        let mut set = std::collections::HashSet::new();
        assert_eq!(a.to_string(), "x=0, y=1.5");
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_deserialized_space_is_validated() {
        let space: ParameterSpace = serde_json::from_str(
            r#"[
                {"name": "mixture", "domain": {"type": "continuous", "lower": 0.0, "upper": 1.0}},
                {"name": "penalty", "domain": {"type": "continuous", "lower": 1e-10, "upper": 1.0},
                 "transform": "log10"}
            ]"#,
        )
        .unwrap();
        assert_eq!(space.len(), 2);
        assert_eq!(space.transform("penalty").unwrap(), Transform::Log10);
        space.validate().unwrap();

        let text = serde_json::to_string(&space).unwrap();
        assert_eq!(serde_json::from_str::<ParameterSpace>(&text).unwrap(), space);

        let empty_ordinal = r#"[{"name": "kind", "domain": {"type": "ordinal", "levels": []}}]"#;
        assert!(serde_json::from_str::<ParameterSpace>(empty_ordinal).is_err());

        let duplicate = r#"[
            {"name": "x", "domain": {"type": "continuous", "lower": 0.0, "upper": 1.0}},
            {"name": "x", "domain": {"type": "continuous", "lower": 5.0, "upper": 1.0}}
        ]"#;
        assert!(serde_json::from_str::<ParameterSpace>(duplicate).is_err());
    }

    #[test]
    fn test_validate_rechecks_specs() {
        let inverted = ParameterSpace {
            specs: vec![ParameterSpec::continuous("x", 5., 1.)],
        };
        assert!(matches!(inverted.validate(), Err(TuneError::Configuration(_))));

        let duplicate = ParameterSpace {
            specs: vec![
                ParameterSpec::continuous("x", 0., 1.),
                ParameterSpec::discrete("x", 1, 3),
            ],
        };
        assert!(matches!(duplicate.validate(), Err(TuneError::DuplicateParameter(_))));
    }
}
