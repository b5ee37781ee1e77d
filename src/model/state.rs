//! Named parameter mapping of a model.
//!
//! A [`ModelState`] is the serialized record of a Burn module at full
//! precision, kept as a JSON tree whose object keys are the module's field
//! names. A parameter is any sub-tree carrying a `param` entry, named by
//! its dotted path (`blocks.0.sep1.depthwise.weight`).
//!
//! Loading merges a stored state into the current one: parameters present
//! in both are replaced, parameters only in the model keep their current
//! values and parameters only in the stored state are ignored. Each case
//! is listed in the returned [`LoadReport`].

use burn::module::Module;
use burn::record::{FullPrecisionSettings, Record};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::error::{Error, Result};

/// Full parameter mapping of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelState {
    tree: Value,
}

/// Outcome of applying a stored state to a model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Parameters copied from the stored state
    pub loaded: Vec<String>,
    /// Model parameters absent from the stored state
    pub missing: Vec<String>,
    /// Stored parameters the model does not have
    pub unexpected: Vec<String>,
}

impl LoadReport {
    /// True when both sides had exactly the same parameters
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl ModelState {
    /// Capture the current parameters of `module`
    pub fn capture<B: Backend, M: Module<B>>(module: &M) -> Result<Self> {
        let item = module
            .clone()
            .into_record()
            .into_item::<FullPrecisionSettings>();
        let tree = serde_json::to_value(item).map_err(|e| Error::ModelState(e.to_string()))?;

        Ok(Self { tree })
    }

    /// Dotted names of every parameter, in record order
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_parameters(&self.tree, String::new(), &mut names);
        names
    }

    /// Apply this state to `module`.
    ///
    /// With `strict`, any missing or unexpected parameter is an error.
    /// Parameters whose shapes disagree are always an error.
    pub fn apply<B: Backend, M: Module<B>>(
        &self,
        module: M,
        device: &B::Device,
        strict: bool,
    ) -> Result<(M, LoadReport)> {
        let current = Self::capture(&module)?;

        let mut report = LoadReport::default();
        let merged = merge(&current.tree, &self.tree, String::new(), &mut report)?;

        if strict && !report.is_exact() {
            return Err(Error::ModelState(format!(
                "strict load failed: missing {:?}, unexpected {:?}",
                report.missing, report.unexpected
            )));
        }

        let item: <M::Record as Record<B>>::Item<FullPrecisionSettings> =
            serde_json::from_value(merged).map_err(|e| Error::ModelState(e.to_string()))?;
        let record = <M::Record as Record<B>>::from_item::<FullPrecisionSettings>(item, device);

        Ok((module.load_record(record), report))
    }
}

fn is_parameter(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| obj.contains_key("param"))
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn collect_parameters(value: &Value, path: String, out: &mut Vec<String>) {
    if is_parameter(value) {
        out.push(path);
        return;
    }
    match value {
        Value::Object(obj) => {
            for (key, child) in obj {
                collect_parameters(child, join(&path, key), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_parameters(child, join(&path, &i.to_string()), out);
            }
        }
        _ => {}
    }
}

/// First `shape` entry found inside a parameter sub-tree
fn find_shape(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(obj) => obj
            .get("shape")
            .or_else(|| obj.values().find_map(find_shape)),
        _ => None,
    }
}

/// Overlay `stored` onto `current`, recording what happened in `report`
fn merge(current: &Value, stored: &Value, path: String, report: &mut LoadReport) -> Result<Value> {
    if is_parameter(current) {
        if let (Some(a), Some(b)) = (find_shape(current), find_shape(stored)) {
            if a != b {
                return Err(Error::ModelState(format!(
                    "shape mismatch for '{}': model has {}, stored state has {}",
                    path, a, b
                )));
            }
        }
        report.loaded.push(path);
        return Ok(stored.clone());
    }

    match (current, stored) {
        (Value::Object(cur), Value::Object(sto)) => {
            let mut out = Map::new();
            for (key, cur_child) in cur {
                let child_path = join(&path, key);
                let merged = match sto.get(key) {
                    Some(sto_child) => merge(cur_child, sto_child, child_path, report)?,
                    None => {
                        collect_parameters(cur_child, child_path, &mut report.missing);
                        cur_child.clone()
                    }
                };
                out.insert(key.clone(), merged);
            }
            for (key, sto_child) in sto {
                if !cur.contains_key(key) {
                    collect_parameters(sto_child, join(&path, key), &mut report.unexpected);
                }
            }
            Ok(Value::Object(out))
        }
        (Value::Array(cur), Value::Array(sto)) => {
            let mut out = Vec::with_capacity(cur.len());
            for (i, cur_child) in cur.iter().enumerate() {
                let child_path = join(&path, &i.to_string());
                match sto.get(i) {
                    Some(sto_child) => out.push(merge(cur_child, sto_child, child_path, report)?),
                    None => {
                        collect_parameters(cur_child, child_path, &mut report.missing);
                        out.push(cur_child.clone());
                    }
                }
            }
            for (i, sto_child) in sto.iter().enumerate().skip(cur.len()) {
                collect_parameters(sto_child, join(&path, &i.to_string()), &mut report.unexpected);
            }
            Ok(Value::Array(out))
        }
        _ => {
            // structural mismatch: keep the model's own value
            collect_parameters(current, path.clone(), &mut report.missing);
            collect_parameters(stored, path, &mut report.unexpected);
            Ok(current.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MiniXception, MiniXceptionConfig};
    use burn_ndarray::NdArray;
    use serde_json::json;

    type TestBackend = NdArray<f32>;

    fn model(num_classes: usize) -> MiniXception<TestBackend> {
        let device = Default::default();
        MiniXception::new(&MiniXceptionConfig::new().with_num_classes(num_classes), &device)
    }

    #[test]
    fn test_capture_names_parameters() -> Result<()> {
        let state = ModelState::capture(&model(7))?;
        let names = state.parameter_names();

        assert!(names.iter().any(|n| n == "stem1.conv.weight"));
        assert!(names.iter().any(|n| n.starts_with("blocks.3.sep2.pointwise")));
        assert!(names.iter().any(|n| n == "head.bias"));
        Ok(())
    }

    #[test]
    fn test_apply_copies_parameters() -> Result<()> {
        let device = Default::default();
        let source = model(7);
        let target = model(7);

        let state = ModelState::capture(&source)?;
        assert_ne!(state, ModelState::capture(&target)?);

        let (loaded, report) = state.apply(target, &device, true)?;

        assert!(report.is_exact());
        assert_eq!(ModelState::capture(&loaded)?, state);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_is_rejected() -> Result<()> {
        let device = Default::default();
        let age_state = ModelState::capture(&model(5))?;

        assert!(matches!(age_state.apply(model(7), &device, false), Err(Error::ModelState(_))));
        Ok(())
    }

    #[test]
    fn test_merge_reports_missing_and_unexpected() -> Result<()> {
        let current = json!({
            "conv": { "weight": { "id": "a", "param": { "shape": [2] } } },
            "bn": { "gamma": { "id": "b", "param": { "shape": [2] } } }
        });
        let stored = json!({
            "conv": { "weight": { "id": "c", "param": { "shape": [2] } } },
            "extra": { "weight": { "id": "d", "param": { "shape": [4] } } }
        });

        let mut report = LoadReport::default();
        let merged = merge(&current, &stored, String::new(), &mut report)?;

        assert_eq!(report.loaded, vec!["conv.weight"]);
        assert_eq!(report.missing, vec!["bn.gamma"]);
        assert_eq!(report.unexpected, vec!["extra.weight"]);
        assert_eq!(merged["conv"]["weight"]["id"], "c");
        assert_eq!(merged["bn"]["gamma"]["id"], "b");
        assert!(merged.get("extra").is_none());
        Ok(())
    }
}
