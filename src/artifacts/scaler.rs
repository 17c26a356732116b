use serde::{Deserialize, Serialize};

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

/// Min-max scaler parameters captured at training time.
///
/// `x' = x * scale + offset`, where `scale = (hi - lo) / (max - min)` and
/// `offset = lo - min * scale`. Near-zero ranges scale by 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    data_min: Vec<f64>,
    data_max: Vec<f64>,
    #[serde(default = "default_feature_range")]
    feature_range: (f64, f64),
}

impl MinMaxScaler {
    pub fn new(data_min: Vec<f64>, data_max: Vec<f64>) -> Self {
        Self {
            data_min,
            data_max,
            feature_range: default_feature_range(),
        }
    }

    pub fn with_feature_range(mut self, lo: f64, hi: f64) -> Self {
        self.feature_range = (lo, hi);
        self
    }

    pub fn len(&self) -> usize {
        self.data_min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_min.is_empty()
    }

    pub fn data_min(&self, column: usize) -> f64 {
        self.data_min[column]
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("scaler has no columns".to_string());
        }
        if self.data_min.len() != self.data_max.len() {
            return Err(format!(
                "data_min has {} entries, data_max has {}",
                self.data_min.len(),
                self.data_max.len()
            ));
        }
        let (lo, hi) = self.feature_range;
        if lo.is_nan() || hi.is_nan() || lo >= hi {
            return Err(format!("feature_range ({lo}, {hi}) is empty"));
        }
        if let Some(i) = self
            .data_min
            .iter()
            .zip(&self.data_max)
            .position(|(min, max)| !min.is_finite() || !max.is_finite())
        {
            return Err(format!("column {i} has non-finite bounds"));
        }
        Ok(())
    }

    fn scale(&self, column: usize) -> f64 {
        let (lo, hi) = self.feature_range;
        let range = self.data_max[column] - self.data_min[column];
        let range = if range < 10.0 * f64::EPSILON { 1.0 } else { range };
        (hi - lo) / range
    }

    pub fn transform(&self, column: usize, value: f64) -> f64 {
        let scale = self.scale(column);
        let offset = self.feature_range.0 - self.data_min[column] * scale;
        value * scale + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_maps_training_bounds_to_range() {
        let scaler = MinMaxScaler::new(vec![0.0, 10.0], vec![100.0, 20.0]);
        assert_eq!(scaler.transform(0, 0.0), 0.0);
        assert!((scaler.transform(0, 50.0) - 0.5).abs() < 1e-12);
        assert!((scaler.transform(1, 20.0) - 1.0).abs() < 1e-12);
        // Out-of-range values are not clipped.
        assert!((scaler.transform(1, 30.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_scales_by_one() {
        let scaler = MinMaxScaler::new(vec![5.0], vec![5.0]);
        assert_eq!(scaler.transform(0, 5.0), 0.0);
        assert_eq!(scaler.transform(0, 7.0), 2.0);
    }

    #[test]
    fn test_custom_feature_range() {
        let scaler = MinMaxScaler::new(vec![0.0], vec![10.0]).with_feature_range(-1.0, 1.0);
        assert_eq!(scaler.transform(0, 0.0), -1.0);
        assert_eq!(scaler.transform(0, 10.0), 1.0);
    }

    #[test]
    fn test_deserialize_defaults_feature_range() {
        let scaler: MinMaxScaler =
            serde_json::from_str(r#"{"data_min":[0.0],"data_max":[2.0]}"#).unwrap();
        assert!(scaler.validate().is_ok());
        assert_eq!(scaler.transform(0, 1.0), 0.5);
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        assert!(MinMaxScaler::new(vec![0.0, 1.0], vec![1.0]).validate().is_err());
        assert!(MinMaxScaler::new(vec![0.0], vec![1.0])
            .with_feature_range(1.0, 1.0)
            .validate()
            .is_err());
        assert!(MinMaxScaler::new(vec![f64::NAN], vec![1.0]).validate().is_err());

        let empty = MinMaxScaler::new(vec![], vec![]);
        assert!(empty.is_empty());
        assert!(empty.validate().is_err());
    }
}
