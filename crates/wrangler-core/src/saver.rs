use memmap2::MmapOptions;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tch::{nn, Kind, Tensor};

use crate::config::ModelParams;
use crate::error::{Result, WranglerError};

const INDEX_FILE: &str = "checkpoint.json";

/// Names of the checkpoints currently on disk, oldest first.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    checkpoints: Vec<String>,
}

/// Writes numbered checkpoints of a var-store and keeps only the newest
/// `max_to_keep` of them.
#[derive(Debug)]
pub struct Saver {
    dir: PathBuf,
    name: String,
    max_to_keep: usize,
}

impl Saver {
    pub fn new<P: AsRef<Path>>(dir: P, name: &str, max_to_keep: usize) -> Result<Self> {
        let dir = absolute(dir.as_ref())?;
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            name: name.to_string(),
            max_to_keep: max_to_keep.max(1),
        })
    }

    /// Base file name checkpoints are derived from.
    pub fn meta_filename(&self) -> PathBuf {
        self.dir.join(format!("{}-{}", self.name, 0))
    }

    pub fn checkpoint_path(&self, step: i64) -> PathBuf {
        self.dir.join(format!("{}-{:08}.safetensors", self.name, step))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, vs: &nn::VarStore, step: i64, params: &ModelParams) -> Result<PathBuf> {
        let path = self.checkpoint_path(step);
        vs.save(&path)?;

        let params_path = self.dir.join(format!("{}-params.json", self.name));
        fs::write(params_path, serde_json::to_string_pretty(params)?)?;

        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut index = self.read_index()?;
        index.checkpoints.retain(|c| c != &file_name);
        index.checkpoints.push(file_name);

        while index.checkpoints.len() > self.max_to_keep {
            let stale = index.checkpoints.remove(0);
            let stale_path = self.dir.join(&stale);
            if let Err(e) = fs::remove_file(&stale_path) {
                log::warn!("Could not delete old checkpoint {:?}: {}", stale_path, e);
            }
        }
        self.write_index(&index)?;

        log::info!("Saved checkpoint {:?}", path);
        Ok(path)
    }

    pub fn checkpoints(&self) -> Result<Vec<PathBuf>> {
        let index = self.read_index()?;
        Ok(index.checkpoints.iter().map(|c| self.dir.join(c)).collect())
    }

    pub fn latest_checkpoint(&self) -> Result<Option<PathBuf>> {
        Ok(self.checkpoints()?.pop())
    }

    pub fn restore<P: AsRef<Path>>(&self, vs: &mut nn::VarStore, path: P) -> Result<()> {
        load_safetensors(vs, path)
    }

    pub fn restore_latest(&self, vs: &mut nn::VarStore) -> Result<PathBuf> {
        let path = self
            .latest_checkpoint()?
            .ok_or_else(|| WranglerError::NoCheckpoint(self.dir.display().to_string()))?;
        self.restore(vs, &path)?;
        Ok(path)
    }

    fn read_index(&self) -> Result<CheckpointIndex> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(CheckpointIndex::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_index(&self, index: &CheckpointIndex) -> Result<()> {
        let path = self.dir.join(INDEX_FILE);
        fs::write(path, serde_json::to_string_pretty(index)?)?;
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Copies every tensor of a safetensors file into the var-store variable of
/// the same name. Every variable must be present in the file.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();

    for name in variables.keys() {
        if tensors.tensor(name).is_err() {
            return Err(WranglerError::MissingVariable {
                path: path.display().to_string(),
                name: name.clone(),
            });
        }
    }

    for (name, view) in tensors.tensors() {
        if let Some(var) = variables.get_mut(&name) {
            let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
            let kind = match view.dtype() {
                safetensors::Dtype::F32 => Kind::Float,
                safetensors::Dtype::F64 => Kind::Double,
                safetensors::Dtype::F16 => Kind::Half,
                safetensors::Dtype::BF16 => Kind::BFloat16,
                safetensors::Dtype::I64 => Kind::Int64,
                other => return Err(WranglerError::UnsupportedDtype(format!("{:?}", other))),
            };

            let data = view.data();
            let tch_tensor = Tensor::from_data_size(data, &shape, kind).to_device(device);

            tch::no_grad(|| {
                var.f_copy_(&tch_tensor)
            })?;
            log::debug!("Restored tensor: {}", name);
        } else {
            log::warn!("Tensor {} found in checkpoint but not in model", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn store_with_weight(value: f64) -> nn::VarStore {
        let vs = nn::VarStore::new(Device::Cpu);
        let _ = vs.root().sub("params").var("w", &[2, 3], nn::Init::Const(value));
        vs
    }

    #[test]
    fn checkpoint_names_are_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let saver = Saver::new(dir.path(), "test_log", 4).unwrap();
        assert!(saver.checkpoint_path(7).ends_with("test_log-00000007.safetensors"));
        assert!(saver.meta_filename().ends_with("test_log-0"));
    }

    #[test]
    fn save_then_restore_roundtrips_variables() {
        let dir = tempfile::tempdir().unwrap();
        let params = ModelParams::new("m", dir.path());
        let saver = Saver::new(dir.path(), "m", 4).unwrap();

        let vs = store_with_weight(2.5);
        let path = saver.save(&vs, 3, &params).unwrap();
        assert!(path.exists());

        let mut other = store_with_weight(0.0);
        saver.restore(&mut other, &path).unwrap();
        let w = other.variables()["params.w"].shallow_clone();
        assert_eq!(w.mean(Kind::Float).double_value(&[]), 2.5);
    }

    #[test]
    fn keeps_only_the_newest_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let params = ModelParams::new("m", dir.path());
        let saver = Saver::new(dir.path(), "m", 2).unwrap();
        let vs = store_with_weight(1.0);

        for step in 0..4 {
            saver.save(&vs, step, &params).unwrap();
        }

        let kept = saver.checkpoints().unwrap();
        assert_eq!(kept, vec![saver.checkpoint_path(2), saver.checkpoint_path(3)]);
        assert!(!saver.checkpoint_path(0).exists());
        assert_eq!(saver.latest_checkpoint().unwrap(), Some(saver.checkpoint_path(3)));
    }

    #[test]
    fn restore_fails_when_a_variable_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let params = ModelParams::new("m", dir.path());
        let saver = Saver::new(dir.path(), "m", 4).unwrap();
        let path = saver.save(&store_with_weight(1.0), 0, &params).unwrap();

        let mut bigger = store_with_weight(0.0);
        let _ = bigger.root().var("extra", &[1], nn::Init::Const(0.0));
        assert!(matches!(
            saver.restore(&mut bigger, &path),
            Err(WranglerError::MissingVariable { .. })
        ));
    }

    #[test]
    fn restore_latest_without_checkpoints_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let saver = Saver::new(dir.path(), "m", 4).unwrap();
        let mut vs = store_with_weight(0.0);
        assert!(matches!(
            saver.restore_latest(&mut vs),
            Err(WranglerError::NoCheckpoint(_))
        ));
    }

    #[test]
    fn extra_checkpoint_tensors_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let params = ModelParams::new("m", dir.path());
        let saver = Saver::new(dir.path(), "m", 4).unwrap();

        let bigger = store_with_weight(4.0);
        let _ = bigger.root().var("extra", &[3], nn::Init::Const(1.0));
        let path = saver.save(&bigger, 0, &params).unwrap();

        let mut smaller = store_with_weight(0.0);
        saver.restore(&mut smaller, &path).unwrap();
        let vars = smaller.variables();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars["params.w"].mean(Kind::Float).double_value(&[]), 4.0);
    }

    #[test]
    fn unsupported_dtypes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bytes.safetensors");
        let data = [1u8, 2, 3, 4, 5, 6];
        let view = safetensors::tensor::TensorView::new(safetensors::Dtype::U8, vec![2, 3], &data).unwrap();
        safetensors::serialize_to_file(vec![("params.w", &view)], &None, &path).unwrap();

        let mut vs = store_with_weight(0.0);
        assert!(matches!(
            load_safetensors(&mut vs, &path),
            Err(WranglerError::UnsupportedDtype(_))
        ));
    }
}
