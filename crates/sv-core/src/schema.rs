//! Column layout shared by training and serving.
//!
//! The predictor order below is the single source of truth: the scaler is fit
//! on `PREDICTOR_COLUMNS` in this order, the model splits the standardized
//! matrix at `N_MORPH`, and the serving path splits raw request vectors at the
//! same boundary.

/// Micro-structural descriptors extracted from scattering patterns.
pub const MORPH_COLUMNS: [&str; 15] = [
    "I_x100",
    "FWHM_x100",
    "d_x100",
    "I_z100",
    "FWHM_z100",
    "d_z100",
    "I_z300",
    "FWHM_z300",
    "d_z300",
    "I_pi",
    "FWHM_pi",
    "d_pi",
    "Ratio_total",
    "Porod_exponent",
    "Porod_prefactor",
];

/// Process stimuli: field strength, post-treatment indicator, chain length.
pub const STIM_COLUMNS: [&str; 3] = ["Efield_num", "Tg_num", "CB_length_nm"];

/// Post-treatment indicator; only rows where it equals zero are retained.
pub const TREATMENT_COLUMN: &str = "Tg_num";

pub const TARGET_COLUMN: &str = "S_V_porod";

pub const N_MORPH: usize = MORPH_COLUMNS.len();
pub const N_STIM: usize = STIM_COLUMNS.len();
pub const N_FEATURES: usize = N_MORPH + N_STIM;

/// Morphology columns followed by stimulus columns.
pub fn predictor_columns() -> Vec<&'static str> {
    MORPH_COLUMNS.iter().chain(STIM_COLUMNS.iter()).copied().collect()
}

/// Every column a row must carry to survive cleaning.
pub fn required_columns() -> Vec<&'static str> {
    let mut cols = predictor_columns();
    cols.push(TARGET_COLUMN);
    cols
}
