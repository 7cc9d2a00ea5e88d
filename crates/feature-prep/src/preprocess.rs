use nalgebra::{DMatrix, DVector};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use sv_core::schema::{MORPH_COLUMNS, STIM_COLUMNS, TARGET_COLUMN, TREATMENT_COLUMN};
use sv_core::{
    CleanRow, CleanedDataset, RawRecord, RawTable, ScalerParams, SvError, SvResult, TargetStats,
};

/// Standardized design split into the morphology and stimulus blocks, plus
/// the normalized target.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub morph: DMatrix<f64>,
    pub stim: DMatrix<f64>,
    pub y: DVector<f64>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.y.len()
    }

    pub fn n_morph(&self) -> usize {
        self.morph.ncols()
    }

    pub fn n_stim(&self) -> usize {
        self.stim.ncols()
    }

    /// Row `i` of the full standardized design (morph then stim).
    pub fn full_row(&self, i: usize) -> Vec<f64> {
        self.morph
            .row(i)
            .iter()
            .chain(self.stim.row(i).iter())
            .copied()
            .collect()
    }
}

/// Everything a training run derives from the source table. The scaler and
/// target statistics are fit exactly once here.
#[derive(Debug, Clone)]
pub struct PreparedFeatures {
    pub dataset: CleanedDataset,
    pub matrix: FeatureMatrix,
    pub scaler: ScalerParams,
    pub target: TargetStats,
}

/// Cleans, filters and standardizes film records.
///
/// Column names default to the production schema; a custom layout is only
/// meant for smaller synthetic problems.
#[derive(Debug, Clone)]
pub struct FeaturePreprocessor {
    morph_columns: Vec<String>,
    stim_columns: Vec<String>,
    target_column: String,
    treatment_column: Option<String>,
}

impl Default for FeaturePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeaturePreprocessor {
    pub fn new() -> Self {
        Self {
            morph_columns: MORPH_COLUMNS.iter().map(|c| c.to_string()).collect(),
            stim_columns: STIM_COLUMNS.iter().map(|c| c.to_string()).collect(),
            target_column: TARGET_COLUMN.to_string(),
            treatment_column: Some(TREATMENT_COLUMN.to_string()),
        }
    }

    pub fn with_columns(
        morph_columns: &[&str],
        stim_columns: &[&str],
        target_column: &str,
        treatment_column: Option<&str>,
    ) -> Self {
        Self {
            morph_columns: morph_columns.iter().map(|c| c.to_string()).collect(),
            stim_columns: stim_columns.iter().map(|c| c.to_string()).collect(),
            target_column: target_column.to_string(),
            treatment_column: treatment_column.map(|c| c.to_string()),
        }
    }

    pub fn predictor_columns(&self) -> Vec<String> {
        self.morph_columns
            .iter()
            .chain(&self.stim_columns)
            .cloned()
            .collect()
    }

    fn required_columns(&self) -> Vec<String> {
        let mut cols = self.predictor_columns();
        cols.push(self.target_column.clone());
        if let Some(treatment) = &self.treatment_column {
            if !cols.contains(treatment) {
                cols.push(treatment.clone());
            }
        }
        cols
    }

    /// Clean, fit the scaler and target statistics, and build the design.
    pub fn prepare(&self, table: &RawTable) -> SvResult<PreparedFeatures> {
        let dataset = self.clean(table)?;
        let scaler = self.fit_scaler(&dataset)?;
        let target = self.fit_target_stats(&dataset)?;
        let matrix = self.build_matrix(&dataset, &scaler, &target)?;

        tracing::info!(
            "Feature shapes: {} morph | {} stim | {} rows",
            matrix.n_morph(),
            matrix.n_stim(),
            matrix.n_rows()
        );

        Ok(PreparedFeatures {
            dataset,
            matrix,
            scaler,
            target,
        })
    }

    /// Drop rows with any missing required field, then keep untreated rows.
    pub fn clean(&self, table: &RawTable) -> SvResult<CleanedDataset> {
        let required = self.required_columns();
        if let Some(missing) = required.iter().find(|c| !table.has_column(c)) {
            return Err(SvError::invalid_table(format!(
                "required column '{missing}' not present in table"
            )));
        }

        let mut rows = Vec::new();
        let mut incomplete = 0usize;
        let mut treated = 0usize;

        for record in &table.records {
            if required.iter().any(|c| record.get(c).is_none()) {
                incomplete += 1;
                continue;
            }
            if let Some(treatment) = &self.treatment_column {
                if parse_indicator(record, treatment)? != 0 {
                    treated += 1;
                    continue;
                }
            }
            rows.push(self.parse_row(record)?);
        }

        tracing::info!(
            "Removed {} incomplete and {} treated films → Remaining samples: {}",
            incomplete,
            treated,
            rows.len()
        );

        Ok(CleanedDataset { rows })
    }

    fn parse_row(&self, record: &RawRecord) -> SvResult<CleanRow> {
        let mut predictors = Vec::with_capacity(self.morph_columns.len() + self.stim_columns.len());
        for column in self.morph_columns.iter().chain(&self.stim_columns) {
            let value = if self.treatment_column.as_deref() == Some(column.as_str()) {
                parse_indicator(record, column)? as f64
            } else {
                parse_number(record, column)?
            };
            predictors.push(value);
        }
        let target = parse_number(record, &self.target_column)?;

        let required = self.required_columns();
        let labels: BTreeMap<String, String> = record
            .cells
            .iter()
            .filter(|(k, _)| !required.contains(k))
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect();

        Ok(CleanRow {
            source_index: record.index,
            predictors,
            target,
            labels,
        })
    }

    /// Per-column mean and population standard deviation.
    ///
    /// A constant column keeps scale 1.0 so its standardized values are all
    /// zero. The treatment indicator is always constant after filtering.
    pub fn fit_scaler(&self, dataset: &CleanedDataset) -> SvResult<ScalerParams> {
        if dataset.is_empty() {
            return Err(SvError::DegenerateData(
                "no rows remain after cleaning".into(),
            ));
        }
        let columns = self.predictor_columns();
        let mut mean = Vec::with_capacity(columns.len());
        let mut scale = Vec::with_capacity(columns.len());

        for (j, name) in columns.iter().enumerate() {
            let values = dataset.column(j);
            let m = values.iter().mean();
            let sd = values.iter().population_std_dev();
            if !m.is_finite() || !sd.is_finite() {
                return Err(SvError::DegenerateData(format!(
                    "column '{name}' has non-finite statistics"
                )));
            }
            let s = if sd <= 10.0 * f64::EPSILON * m.abs().max(1.0) {
                tracing::warn!("Predictor '{}' is constant; leaving it unscaled", name);
                1.0
            } else {
                sd
            };
            mean.push(m);
            scale.push(s);
        }

        Ok(ScalerParams {
            columns,
            mean,
            scale,
        })
    }

    /// Target mean and sample standard deviation (divisor N - 1).
    pub fn fit_target_stats(&self, dataset: &CleanedDataset) -> SvResult<TargetStats> {
        if dataset.len() < 2 {
            return Err(SvError::DegenerateData(format!(
                "target standard deviation needs at least 2 rows, have {}",
                dataset.len()
            )));
        }
        let targets = dataset.targets();
        let mean = targets.iter().mean();
        let std = targets.iter().std_dev();
        if !std.is_finite() || std <= 10.0 * f64::EPSILON * mean.abs().max(1.0) {
            return Err(SvError::DegenerateData(format!(
                "target '{}' has zero variance",
                self.target_column
            )));
        }
        Ok(TargetStats { mean, std })
    }

    /// Apply a fitted scaler and target normalization to a cleaned dataset.
    pub fn build_matrix(
        &self,
        dataset: &CleanedDataset,
        scaler: &ScalerParams,
        target: &TargetStats,
    ) -> SvResult<FeatureMatrix> {
        let n = dataset.len();
        let n_morph = self.morph_columns.len();
        let n_stim = self.stim_columns.len();

        let standardized = dataset
            .rows
            .iter()
            .map(|row| scaler.transform(&row.predictors))
            .collect::<SvResult<Vec<_>>>()?;

        let morph = DMatrix::from_fn(n, n_morph, |i, j| standardized[i][j]);
        let stim = DMatrix::from_fn(n, n_stim, |i, j| standardized[i][n_morph + j]);
        let y = DVector::from_iterator(n, dataset.rows.iter().map(|r| target.normalize(r.target)));

        Ok(FeatureMatrix { morph, stim, y })
    }
}

fn parse_number(record: &RawRecord, column: &str) -> SvResult<f64> {
    let cell = record.get(column).unwrap_or_default();
    let value: f64 = cell.parse().map_err(|_| SvError::InvalidRecord {
        row: record.index,
        reason: format!("'{column}' value '{cell}' is not a number"),
    })?;
    if !value.is_finite() {
        return Err(SvError::InvalidRecord {
            row: record.index,
            reason: format!("'{column}' value '{cell}' is not finite"),
        });
    }
    Ok(value)
}

/// String → float → integer coercion of the treatment indicator.
fn parse_indicator(record: &RawRecord, column: &str) -> SvResult<i64> {
    let value = parse_number(record, column)?;
    if value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
        return Err(SvError::InvalidRecord {
            row: record.index,
            reason: format!("'{column}' value {value} is not representable as an integer"),
        });
    }
    Ok(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use sv_core::schema::{required_columns, N_FEATURES, N_MORPH};

    /// Complete record with distinct values per row and column.
    fn full_record(index: usize, tg: &str) -> RawRecord {
        let mut record = RawRecord::new(index).with_cell("system", Some("PS-b-PMMA"));
        for (j, col) in required_columns().iter().enumerate() {
            let value = match *col {
                "Tg_num" => tg.to_string(),
                _ => format!("{}", (index as f64 + 1.0) * (j as f64 + 1.0) + (index * index) as f64),
            };
            record = record.with_cell(col, Some(&value));
        }
        record
    }

    fn table(records: Vec<RawRecord>) -> RawTable {
        let mut columns: Vec<String> = required_columns().iter().map(|c| c.to_string()).collect();
        columns.push("system".into());
        RawTable { columns, records }
    }

    #[test]
    fn test_missing_field_drops_only_that_row() {
        let mut records: Vec<RawRecord> = (0..6).map(|i| full_record(i, "0")).collect();
        records[2].cells.insert("d_pi".into(), None);
        records[4].cells.insert("S_V_porod".into(), None);

        let cleaned = FeaturePreprocessor::new().clean(&table(records)).unwrap();
        let kept: Vec<usize> = cleaned.rows.iter().map(|r| r.source_index).collect();
        assert_eq!(kept, vec![0, 1, 3, 5]);
    }

    #[test]
    fn test_treated_films_are_filtered() {
        let records = vec![
            full_record(0, "0"),
            full_record(1, "1"),
            full_record(2, "0.0"),
            full_record(3, "2"),
            full_record(4, "0"),
        ];
        let cleaned = FeaturePreprocessor::new().clean(&table(records)).unwrap();
        assert_eq!(cleaned.len(), 3);
        assert!(cleaned.rows.iter().all(|r| r.predictors[N_MORPH + 1] == 0.0));
        assert_eq!(cleaned.rows[0].labels.get("system").map(String::as_str), Some("PS-b-PMMA"));
    }

    #[test]
    fn test_fractional_indicator_is_invalid() {
        let records = vec![full_record(0, "0"), full_record(1, "0.5")];
        let err = FeaturePreprocessor::new().clean(&table(records)).unwrap_err();
        assert!(matches!(err, SvError::InvalidRecord { row: 1, .. }));
    }

    #[test]
    fn test_treated_row_is_dropped_before_parsing() {
        let mut records = vec![full_record(0, "0"), full_record(1, "1"), full_record(2, "0")];
        records[1].cells.insert("FWHM_pi".into(), Some("wide".into()));
        let cleaned = FeaturePreprocessor::new().clean(&table(records)).unwrap();
        let kept: Vec<usize> = cleaned.rows.iter().map(|r| r.source_index).collect();
        assert_eq!(kept, vec![0, 2]);
    }

    #[test]
    fn test_non_numeric_cell_is_invalid() {
        let mut records = vec![full_record(0, "0")];
        records[0].cells.insert("FWHM_pi".into(), Some("wide".into()));
        let err = FeaturePreprocessor::new().clean(&table(records)).unwrap_err();
        assert!(matches!(err, SvError::InvalidRecord { row: 0, .. }));
    }

    #[test]
    fn test_missing_column_is_invalid() {
        let mut t = table(vec![full_record(0, "0")]);
        t.columns.retain(|c| c != "Porod_exponent");
        assert!(matches!(
            FeaturePreprocessor::new().clean(&t),
            Err(SvError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_standardized_columns_have_zero_mean_unit_std() {
        let records: Vec<RawRecord> = (0..12).map(|i| full_record(i, "0")).collect();
        let prepared = FeaturePreprocessor::new().prepare(&table(records)).unwrap();
        let m = &prepared.matrix;
        assert_eq!(m.n_morph() + m.n_stim(), N_FEATURES);

        for j in 0..N_FEATURES {
            let col: Vec<f64> = (0..m.n_rows()).map(|i| m.full_row(i)[j]).collect();
            let mean = col.iter().mean();
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-10);
            let sd = col.iter().population_std_dev();
            if prepared.scaler.columns[j] == "Tg_num" {
                assert_abs_diff_eq!(sd, 0.0, epsilon = 1e-12);
            } else {
                assert_abs_diff_eq!(sd, 1.0, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_target_normalized_with_sample_std() {
        let records: Vec<RawRecord> = (0..5).map(|i| full_record(i, "0")).collect();
        let prepared = FeaturePreprocessor::new().prepare(&table(records)).unwrap();
        let y = &prepared.matrix.y;
        assert_abs_diff_eq!(y.iter().mean(), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(y.iter().std_dev(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_constant_target_is_degenerate() {
        let mut records: Vec<RawRecord> = (0..4).map(|i| full_record(i, "0")).collect();
        for r in &mut records {
            r.cells.insert("S_V_porod".into(), Some("3.0".into()));
        }
        let err = FeaturePreprocessor::new().prepare(&table(records)).unwrap_err();
        assert!(matches!(err, SvError::DegenerateData(_)));
    }

    #[test]
    fn test_single_row_is_degenerate() {
        let err = FeaturePreprocessor::new()
            .prepare(&table(vec![full_record(0, "0")]))
            .unwrap_err();
        assert!(matches!(err, SvError::DegenerateData(_)));
    }

    #[test]
    fn test_custom_layout() {
        let pre = FeaturePreprocessor::with_columns(&["a", "b"], &["c"], "y", None);
        let csv = "a,b,c,y\n1,2,3,4\n2,4,5,7\n3,1,8,1\n";
        let t = crate::loader::read_table(csv.as_bytes()).unwrap();
        let prepared = pre.prepare(&t).unwrap();
        assert_eq!(prepared.matrix.morph.shape(), (3, 2));
        assert_eq!(prepared.matrix.stim.shape(), (3, 1));
        assert_abs_diff_eq!(prepared.scaler.mean[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(prepared.target.mean, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(prepared.target.std, 3.0, epsilon = 1e-12);
    }
}
