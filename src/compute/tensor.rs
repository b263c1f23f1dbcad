// Dense tensors and JSON conversion

use super::model::{element_count, DataType, TensorSpec, MAX_ELEMENTS};
use crate::error::{Result, ServeError};
use serde_json::Value;

/// Row-major tensor of numeric values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self { shape, data }
    }

    /// Zero-filled tensor. Fails if the element count overflows.
    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let len = element_count(&shape).ok_or_else(|| {
            ServeError::InferenceError(format!("tensor shape {:?} is too large", shape))
        })?;
        Ok(Self {
            shape,
            data: vec![0.0; len],
        })
    }

    /// Size of the last axis (1 for scalars).
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Number of rows when viewed as `[rows, last_dim]`.
    pub fn rows(&self) -> usize {
        let last = self.last_dim();
        if last == 0 {
            0
        } else {
            self.data.len() / last
        }
    }

    /// Converts a JSON payload into a tensor matching `spec`.
    pub fn from_json(value: &Value, spec: &TensorSpec) -> Result<Self> {
        let mut shape = Vec::new();
        infer_json_shape(value, &mut shape);

        let capacity = element_count(&shape).unwrap_or(0).min(MAX_ELEMENTS);
        let mut data = Vec::with_capacity(capacity);
        flatten_json(value, &shape, 0, spec, &mut data)?;

        if shape.len() != spec.rank() {
            return Err(ServeError::InputSchemaMismatch(format!(
                "input '{}' has wrong rank: expected {}, got {}",
                spec.name,
                spec.rank(),
                shape.len()
            )));
        }

        for (axis, (&expected, &actual)) in spec.shape.iter().zip(shape.iter()).enumerate() {
            if let Some(expected) = expected {
                if expected as usize != actual {
                    return Err(ServeError::InputSchemaMismatch(format!(
                        "input '{}' dimension {} mismatch: expected {}, got {}",
                        spec.name, axis, expected, actual
                    )));
                }
            }
        }

        Ok(Self { shape, data })
    }

    /// Converts the tensor into nested JSON arrays typed per `dtype`.
    pub fn to_json(&self, dtype: DataType) -> Result<Value> {
        if let Some(bad) = self.data.iter().find(|v| !v.is_finite()) {
            return Err(ServeError::InferenceError(format!(
                "output contains non-finite value {}",
                bad
            )));
        }
        Ok(nest(&self.shape, &self.data, dtype))
    }
}

fn infer_json_shape(value: &Value, shape: &mut Vec<usize>) {
    if let Value::Array(items) = value {
        shape.push(items.len());
        if let Some(first) = items.first() {
            infer_json_shape(first, shape);
        }
    }
}

fn flatten_json(
    value: &Value,
    shape: &[usize],
    depth: usize,
    spec: &TensorSpec,
    out: &mut Vec<f64>,
) -> Result<()> {
    match value {
        Value::Array(items) => {
            if depth >= shape.len() || items.len() != shape[depth] {
                return Err(ServeError::InputSchemaMismatch(format!(
                    "input '{}' is ragged at depth {}",
                    spec.name, depth
                )));
            }
            for item in items {
                flatten_json(item, shape, depth + 1, spec, out)?;
            }
            Ok(())
        }
        scalar => {
            if depth != shape.len() {
                return Err(ServeError::InputSchemaMismatch(format!(
                    "input '{}' is ragged at depth {}",
                    spec.name, depth
                )));
            }
            out.push(scalar_value(scalar, spec)?);
            Ok(())
        }
    }
}

fn scalar_value(value: &Value, spec: &TensorSpec) -> Result<f64> {
    let mismatch = |what: &str| {
        ServeError::InputSchemaMismatch(format!(
            "input '{}' expects {} elements, got {}",
            spec.name,
            spec.dtype.as_str(),
            what
        ))
    };

    match (spec.dtype, value) {
        (DataType::Bool, Value::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        (DataType::Bool, _) => Err(mismatch(json_kind(value))),
        (dtype, Value::Number(n)) => {
            let v = n.as_f64().ok_or_else(|| mismatch("a non-finite number"))?;
            if dtype.is_integer() {
                if v.fract() != 0.0 {
                    return Err(mismatch("a fractional number"));
                }
                if dtype == DataType::Int32 && (v < i32::MIN as f64 || v > i32::MAX as f64) {
                    return Err(mismatch("an out-of-range number"));
                }
                Ok(v)
            } else if dtype == DataType::Float32 {
                Ok(v as f32 as f64)
            } else {
                Ok(v)
            }
        }
        (_, other) => Err(mismatch(json_kind(other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn nest(shape: &[usize], data: &[f64], dtype: DataType) -> Value {
    match shape.split_first() {
        None => element(data.first().copied().unwrap_or(0.0), dtype),
        Some((&len, rest)) => {
            let stride: usize = rest.iter().product();
            Value::Array(
                (0..len)
                    .map(|i| nest(rest, &data[i * stride..(i + 1) * stride], dtype))
                    .collect(),
            )
        }
    }
}

fn element(v: f64, dtype: DataType) -> Value {
    match dtype {
        DataType::Bool => Value::Bool(v != 0.0),
        DataType::Int32 | DataType::Int64 => Value::from(v.round() as i64),
        DataType::Float32 => Value::from(v as f32 as f64),
        DataType::Float64 => Value::from(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(dtype: DataType, shape: Vec<Option<i64>>) -> TensorSpec {
        TensorSpec::new("input", dtype, shape)
    }

    #[test]
    fn test_from_json_matrix() {
        let tensor = Tensor::from_json(
            &json!([[5.1, 3.5, 1.4, 0.2], [6.0, 2.9, 4.5, 1.5]]),
            &spec(DataType::Float64, vec![None, Some(4)]),
        )
        .unwrap();
        assert_eq!(tensor.shape, vec![2, 4]);
        assert_eq!(tensor.rows(), 2);
        assert_eq!(tensor.data[4], 6.0);
    }

    #[test]
    fn test_rank_mismatch() {
        let err = Tensor::from_json(&json!([1.0, 2.0]), &spec(DataType::Float32, vec![None, Some(2)]))
            .unwrap_err();
        assert!(matches!(err, ServeError::InputSchemaMismatch(_)));
        assert!(err.to_string().contains("wrong rank"));
    }

    #[test]
    fn test_fixed_dimension_mismatch() {
        let err = Tensor::from_json(&json!([[1.0, 2.0, 3.0]]), &spec(DataType::Float32, vec![None, Some(4)]))
            .unwrap_err();
        assert!(err.to_string().contains("dimension 1 mismatch"));
    }

    #[test]
    fn test_ragged_input() {
        let err = Tensor::from_json(&json!([[1.0, 2.0], [3.0]]), &spec(DataType::Float32, vec![None, None]))
            .unwrap_err();
        assert!(err.to_string().contains("ragged"));
    }

    #[test]
    fn test_element_type_checked() {
        let err = Tensor::from_json(&json!([1.5, 2.0]), &spec(DataType::Int64, vec![None])).unwrap_err();
        assert!(err.to_string().contains("fractional"));

        let err = Tensor::from_json(&json!(["a"]), &spec(DataType::Float32, vec![None])).unwrap_err();
        assert!(err.to_string().contains("a string"));

        let tensor = Tensor::from_json(&json!([true, false]), &spec(DataType::Bool, vec![Some(2)])).unwrap();
        assert_eq!(tensor.data, vec![1.0, 0.0]);
    }

    #[test]
    fn test_to_json_typed() {
        let tensor = Tensor::new(vec![2], vec![1.0, 0.0]);
        assert_eq!(tensor.to_json(DataType::Int64).unwrap(), json!([1, 0]));
        assert_eq!(tensor.to_json(DataType::Bool).unwrap(), json!([true, false]));

        let scalar = Tensor::new(vec![], vec![2.5]);
        assert_eq!(scalar.to_json(DataType::Float64).unwrap(), json!(2.5));
    }

    #[test]
    fn test_zeros_rejects_overflowing_shape() {
        assert_eq!(Tensor::zeros(vec![2, 3]).unwrap().data.len(), 6);
        assert!(matches!(
            Tensor::zeros(vec![usize::MAX, 4]),
            Err(ServeError::InferenceError(_))
        ));
    }

    #[test]
    fn test_non_finite_output_is_inference_error() {
        let tensor = Tensor::new(vec![1], vec![f64::NAN]);
        assert!(matches!(
            tensor.to_json(DataType::Float32),
            Err(ServeError::InferenceError(_))
        ));
    }
}
