use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tch::Device;

use crate::error::{Result, WranglerError};

/// Top-level model parameters: identity, storage location and the two
/// parameter groups consumed by the graph builder and the training loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Model name, used as the checkpoint file prefix.
    pub name: String,
    /// Directory for checkpoints and scalar summaries.
    pub path: PathBuf,
    #[serde(default)]
    pub device: DeviceChoice,
    #[serde(default)]
    pub graph: GraphParams,
    #[serde(default)]
    pub training: TrainingParams,
}

impl ModelParams {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            device: DeviceChoice::default(),
            graph: GraphParams::default(),
            training: TrainingParams::default(),
        }
    }

    /// Loads params from a `.yaml`/`.yml` or `.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let params: ModelParams = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            other => return Err(WranglerError::UnsupportedFormat(other.to_string())),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        self.graph.validate()?;
        self.training.validate()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    Cpu,
    Cuda,
    #[default]
    Auto,
}

impl DeviceChoice {
    pub fn device(self) -> Device {
        match self {
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda => Device::Cuda(0),
            DeviceChoice::Auto => Device::cuda_if_available(),
        }
    }
}

/// Shape of one input source, excluding the batch dimension.
///
/// Written in params files either as a bare integer or as a list of dims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ShapeRepr", into = "ShapeRepr")]
pub struct Shape(pub Vec<i64>);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ShapeRepr {
    Scalar(i64),
    Dims(Vec<i64>),
}

impl From<ShapeRepr> for Shape {
    fn from(repr: ShapeRepr) -> Self {
        match repr {
            ShapeRepr::Scalar(n) => Shape(vec![n]),
            ShapeRepr::Dims(dims) => Shape(dims),
        }
    }
}

impl From<Shape> for ShapeRepr {
    fn from(shape: Shape) -> Self {
        match shape.0.as_slice() {
            [n] => ShapeRepr::Scalar(*n),
            _ => ShapeRepr::Dims(shape.0),
        }
    }
}

impl From<i64> for Shape {
    fn from(n: i64) -> Self {
        Shape(vec![n])
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Shape(dims)
    }
}

impl Shape {
    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    /// Size of the innermost dimension.
    pub fn last(&self) -> i64 {
        self.0.last().copied().unwrap_or(1)
    }

    pub fn numel(&self) -> i64 {
        self.0.iter().product()
    }

    /// The full tensor shape for a batch of `batch` samples.
    pub fn with_batch(&self, batch: i64) -> Vec<i64> {
        std::iter::once(batch).chain(self.0.iter().copied()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    Elu,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseParams {
    #[serde(default = "default_num_units")]
    pub num_units: i64,
    #[serde(default)]
    pub activation: Option<Activation>,
    #[serde(default = "default_true")]
    pub bias: bool,
}

impl Default for DenseParams {
    fn default() -> Self {
        Self {
            num_units: default_num_units(),
            activation: None,
            bias: true,
        }
    }
}

impl DenseParams {
    pub fn units(num_units: i64) -> Self {
        Self {
            num_units,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentParams {
    /// Hidden state size of the LSTM layer.
    pub units: i64,
    #[serde(default)]
    pub dropout: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphParams {
    #[serde(default)]
    pub in_sizes: Vec<Shape>,
    #[serde(default)]
    pub out_sizes: Vec<i64>,
    #[serde(default)]
    pub dense_params: Vec<DenseParams>,
    #[serde(default)]
    pub recurr_params: Vec<RecurrentParams>,
    /// Padding length for text models.
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,
    /// Learned character embedding width. One-hot encoding when unset.
    #[serde(default)]
    pub embed_size: Option<i64>,
    /// Embedding rows are renormalised to at most this L2 norm on lookup.
    #[serde(default)]
    pub embed_max_norm: Option<f64>,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            in_sizes: Vec::new(),
            out_sizes: Vec::new(),
            dense_params: Vec::new(),
            recurr_params: Vec::new(),
            max_string_size: default_max_string_size(),
            embed_size: None,
            embed_max_norm: None,
        }
    }
}

impl GraphParams {
    fn validate(&self) -> Result<()> {
        if self.in_sizes.iter().any(|s| s.0.is_empty() || s.0.iter().any(|&d| d <= 0)) {
            return Err(invalid("graph.in_sizes", "every dim must be positive"));
        }
        if self.out_sizes.iter().any(|&n| n <= 0) {
            return Err(invalid("graph.out_sizes", "every size must be positive"));
        }
        if self.dense_params.iter().any(|d| d.num_units <= 0) {
            return Err(invalid("graph.dense_params", "num_units must be positive"));
        }
        if self.recurr_params.iter().any(|r| r.units <= 0) {
            return Err(invalid("graph.recurr_params", "units must be positive"));
        }
        if self.recurr_params.iter().any(|r| !(0.0..1.0).contains(&r.dropout)) {
            return Err(invalid("graph.recurr_params", "dropout must be in [0, 1)"));
        }
        if self.max_string_size == 0 {
            return Err(invalid("graph.max_string_size", "must be positive"));
        }
        if matches!(self.embed_size, Some(n) if n <= 0) {
            return Err(invalid("graph.embed_size", "must be positive"));
        }
        if matches!(self.embed_max_norm, Some(n) if n <= 0.0) {
            return Err(invalid("graph.embed_max_norm", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    /// Number of training steps between loss reports.
    #[serde(default = "default_interval")]
    pub interval: usize,
    /// Number of checkpoints kept on disk.
    #[serde(default = "default_max_to_keep")]
    pub max_to_keep: usize,
    #[serde(default)]
    pub seed: Option<i64>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            num_epochs: default_num_epochs(),
            interval: default_interval(),
            max_to_keep: default_max_to_keep(),
            seed: None,
        }
    }
}

impl TrainingParams {
    fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(invalid("training.learning_rate", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("training.batch_size", "must be positive"));
        }
        if self.interval == 0 {
            return Err(invalid("training.interval", "must be positive"));
        }
        if self.max_to_keep == 0 {
            return Err(invalid("training.max_to_keep", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: &str) -> WranglerError {
    WranglerError::InvalidParam {
        key,
        reason: reason.to_string(),
    }
}

fn default_true() -> bool {
    true
}

fn default_num_units() -> i64 {
    3
}

fn default_max_string_size() -> usize {
    256
}

fn default_learning_rate() -> f64 {
    0.01
}

fn default_batch_size() -> usize {
    256
}

fn default_num_epochs() -> usize {
    1
}

fn default_interval() -> usize {
    50
}

fn default_max_to_keep() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults_fill_missing_keys() {
        let yaml = "
name: test_log
path: ./tests/test_log
graph:
  in_sizes: [2]
  out_sizes: [1]
";
        let params: ModelParams = serde_yaml::from_str(yaml).unwrap();
        params.validate().unwrap();
        assert_eq!(params.graph.in_sizes, vec![Shape(vec![2])]);
        assert_eq!(params.graph.max_string_size, 256);
        assert_eq!(params.training.learning_rate, 0.01);
        assert_eq!(params.training.max_to_keep, 4);
        assert_eq!(params.device, DeviceChoice::Auto);
    }

    #[test]
    fn shapes_accept_scalars_and_lists() {
        let json = r#"{
            "name": "lstm", "path": "/tmp/lstm", "device": "cpu",
            "graph": {
                "in_sizes": [[20, 3], 4],
                "dense_params": [{"activation": "relu"}],
                "recurr_params": [{"units": 8}]
            }
        }"#;
        let params: ModelParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.graph.in_sizes[0].dims(), &[20, 3]);
        assert_eq!(params.graph.in_sizes[1].dims(), &[4]);
        assert_eq!(params.graph.dense_params[0].num_units, 3);
        assert!(params.graph.dense_params[0].bias);
        assert_eq!(params.graph.dense_params[0].activation, Some(Activation::Relu));
        assert_eq!(params.graph.recurr_params[0].dropout, 0.0);
    }

    #[test]
    fn scalar_shapes_serialize_back_to_integers() {
        let graph = GraphParams {
            in_sizes: vec![Shape::from(5), Shape::from(vec![10, 2])],
            ..Default::default()
        };
        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(value["in_sizes"], serde_json::json!([5, [10, 2]]));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut params = ModelParams::new("m", "/tmp/m");
        params.training.learning_rate = 0.0;
        assert!(matches!(
            params.validate(),
            Err(WranglerError::InvalidParam { key: "training.learning_rate", .. })
        ));

        let mut params = ModelParams::new("m", "/tmp/m");
        params.graph.out_sizes = vec![0];
        assert!(params.validate().is_err());

        let params = ModelParams::new(" ", "/tmp/m");
        assert!(params.validate().is_err());
    }

    #[test]
    fn from_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let params = ModelParams::new("m", dir.path());

        let json_path = dir.path().join("params.json");
        std::fs::write(&json_path, serde_json::to_string(&params).unwrap()).unwrap();
        assert_eq!(ModelParams::from_file(&json_path).unwrap().name, "m");

        let yaml_path = dir.path().join("params.yml");
        std::fs::write(&yaml_path, serde_yaml::to_string(&params).unwrap()).unwrap();
        assert_eq!(ModelParams::from_file(&yaml_path).unwrap().name, "m");

        let toml_path = dir.path().join("params.toml");
        std::fs::write(&toml_path, "").unwrap();
        assert!(matches!(
            ModelParams::from_file(&toml_path),
            Err(WranglerError::UnsupportedFormat(_))
        ));
    }
}
