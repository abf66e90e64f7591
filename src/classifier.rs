use std::path::Path;

use numpy::IntoPyArray;
use pyo3::prelude::*;
use pyo3::types::IntoPyDict;

use crate::error::{ArgusError, Result};
use crate::feature_normalizer::FeatureBatch;

/// Anything that turns a batch of feature vectors into one composite label per row.
pub trait Classifier {
    fn predict(&self, batch: &FeatureBatch) -> Result<Vec<String>>;
}

/// A scikit-learn model saved with `joblib.dump`, run in an embedded interpreter.
pub struct JoblibClassifier {
    model: PyObject,
}

impl JoblibClassifier {
    pub fn load(model_path: &Path) -> Result<Self> {
        let path = model_path.to_string_lossy().into_owned();
        Python::with_gil(|py| -> PyResult<Self> {
            let joblib = py.import("joblib")?;
            let model = joblib.call_method1("load", (path.as_str(),))?.unbind();
            Ok(JoblibClassifier { model })
        })
        .map_err(|e| ArgusError::Model(format!("failed to load {}: {}", model_path.display(), e)))
    }
}

impl Classifier for JoblibClassifier {
    fn predict(&self, batch: &FeatureBatch) -> Result<Vec<String>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let matrix = batch.to_array();
        Python::with_gil(|py| -> PyResult<Vec<String>> {
            let pandas = py.import("pandas")?;

            // Column names must match training data or sklearn rejects the frame.
            let columns: Vec<&str> = batch.columns().to_vec();
            let kwargs = [("columns", columns)].into_py_dict(py)?;
            let frame = pandas.call_method("DataFrame", (matrix.into_pyarray(py),), Some(&kwargs))?;

            let prediction = self.model.bind(py).call_method1("predict", (frame,))?;
            prediction.call_method0("tolist")?.extract()
        })
        .map_err(|e| ArgusError::Model(format!("prediction failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch_never_reaches_model() {
        // `None` has no `predict`, so any call into the model would fail.
        let classifier = JoblibClassifier {
            model: Python::with_gil(|py| py.None()),
        };
        let labels = classifier.predict(&FeatureBatch::default()).unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn test_load_missing_model_is_model_error() {
        let result = JoblibClassifier::load(Path::new("/nonexistent/model.joblib"));
        assert!(matches!(result, Err(ArgusError::Model(_))));
    }
}
