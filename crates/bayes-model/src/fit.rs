use std::time::Instant;

use feature_prep::PreparedFeatures;
use nuts_sampler::{sample, CancelFlag, SamplerConfig};

use sv_core::SvError;

use crate::error::ModelResult;
use crate::model::RegressionModel;
use crate::trace::PosteriorTrace;

/// Condition the regression on prepared features and sample its posterior.
///
/// `feature_names` must name every morph column followed by every stim column.
pub fn fit(
    prepared: &PreparedFeatures,
    feature_names: Vec<String>,
    config: &SamplerConfig,
    cancel: &CancelFlag,
) -> ModelResult<PosteriorTrace> {
    let expected = prepared.matrix.n_morph() + prepared.matrix.n_stim();
    if feature_names.len() != expected {
        return Err(SvError::InvalidArtifact(format!(
            "{} feature names given for {} predictors",
            feature_names.len(),
            expected
        ))
        .into());
    }
    let model = RegressionModel::from_features(&prepared.matrix)?;
    let started = Instant::now();
    let output = sample(&model, config, cancel)?;
    tracing::info!(
        "Sampling finished in {:.1}s ({} divergences)",
        started.elapsed().as_secs_f64(),
        output.total_divergences()
    );
    Ok(PosteriorTrace::from_sample(
        &output,
        &model,
        prepared,
        feature_names,
        config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use feature_prep::FeaturePreprocessor;
    use nuts_sampler::SamplerError;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use sv_core::{RawRecord, RawTable};

    fn synthetic_prepared() -> PreparedFeatures {
        let mut rng = StdRng::seed_from_u64(99);
        let records = (0..40)
            .map(|i| {
                let m1: f64 = rng.gen_range(-2.0..2.0);
                let m2: f64 = rng.gen_range(-2.0..2.0);
                let s1 = (i % 3) as f64;
                let noise: f64 = rng.gen_range(-0.2..0.2);
                let y = 5.0 + 2.0 * m1 - 1.0 * m2 + 0.1 * s1 + noise;
                RawRecord::new(i)
                    .with_cell("m1", Some(&m1.to_string()))
                    .with_cell("m2", Some(&m2.to_string()))
                    .with_cell("s1", Some(&s1.to_string()))
                    .with_cell("y", Some(&y.to_string()))
            })
            .collect();
        let table = RawTable {
            columns: ["m1", "m2", "s1", "y"].map(String::from).to_vec(),
            records,
        };
        FeaturePreprocessor::with_columns(&["m1", "m2"], &["s1"], "y", None)
            .prepare(&table)
            .unwrap()
    }

    fn short_config() -> SamplerConfig {
        SamplerConfig {
            num_chains: 2,
            num_draws: 300,
            num_warmup: 300,
            target_accept: 0.8,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn test_fit_recovers_coefficient_signs() {
        let prepared = synthetic_prepared();
        let names = vec!["m1".into(), "m2".into(), "s1".into()];
        let trace = fit(&prepared, names, &short_config(), &CancelFlag::new()).unwrap();

        assert_eq!(trace.chains.len(), 2);
        assert_eq!(trace.draws_per_chain(), 300);
        let means = trace.posterior_means();
        assert!(means.beta[0] > 0.5, "beta[m1] = {}", means.beta[0]);
        assert!(means.beta[1] < -0.2, "beta[m2] = {}", means.beta[1]);
        assert!(means.alpha.abs() < 0.2);
        assert!(trace.iter_params().all(|p| p.b > 0.0));
    }

    #[test]
    fn test_fit_honours_cancellation() {
        let prepared = synthetic_prepared();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let names = vec!["m1".into(), "m2".into(), "s1".into()];
        let err = fit(&prepared, names, &short_config(), &cancel).unwrap_err();
        assert!(matches!(err, ModelError::Sampler(SamplerError::Cancelled(_))));
    }

    #[test]
    fn test_fit_rejects_wrong_feature_name_count() {
        let prepared = synthetic_prepared();
        for names in [vec![], vec!["m1".to_string(), "m2".to_string()]] {
            let err = fit(&prepared, names, &short_config(), &CancelFlag::new()).unwrap_err();
            assert!(matches!(
                err,
                ModelError::Data(SvError::InvalidArtifact(_))
            ));
        }
    }
}
