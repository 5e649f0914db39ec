//! Radio signal and timing calculations.
//!
//! Contains helpers for:
//! - Log-distance path loss and received power
//! - Thermal noise floor and the resulting reception threshold
//! - Effective communication distance for a given link budget
//! - Propagation delay, frame airtime and link serialization time
//!
//! Units:
//! - Power: dBm, mW (conversion provided)
//! - Distance: meters
//! - Time: `SimTime` for the API, seconds (f64) inside formulas

use serde::Deserialize;

use super::clock::SimTime;

/// Distances below this are treated as this, so a co-located pair never hits log10(0).
pub const MIN_DISTANCE: f64 = 1e-3;

/// Thermal noise density at room temperature in dBm/Hz.
const THERMAL_NOISE_DBM_PER_HZ: f64 = -174.0;

/// Parameters of the shared wireless channel and the radios attached to it.
///
/// Defaults follow an 802.11n station at 2.4 GHz with the log-distance model
/// calibrated to 1 m.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PhyParameters {
    /// Transmit power at the antenna port in dBm.
    pub tx_power_dbm: f64,
    pub tx_gain_db: f64,
    pub rx_gain_db: f64,
    /// Receiver noise figure in dB, added on top of thermal noise.
    pub noise_figure_db: f64,
    /// Clear channel assessment threshold in dBm. Signals below it are neither
    /// sensed nor received.
    pub cca_threshold_dbm: f64,
    /// Path loss exponent (n). 2.0 for free space, 2.7-3.5 for urban areas.
    pub path_loss_exponent: f64,
    /// Reference distance d₀ in meters.
    pub reference_distance_m: f64,
    /// Path loss at d₀ in dB.
    pub reference_loss_db: f64,
    /// Minimum signal-to-noise ratio needed to decode a frame.
    pub min_snr_db: f64,
    pub bandwidth_hz: f64,
    pub propagation_speed_mps: f64,
    /// Payload bit rate on air.
    pub phy_rate_bps: f64,
    /// Fixed per-frame preamble and PHY header duration in microseconds.
    pub preamble_us: f64,
}

impl Default for PhyParameters {
    fn default() -> Self {
        Self {
            tx_power_dbm: 16.0206,
            tx_gain_db: 0.0,
            rx_gain_db: 0.0,
            noise_figure_db: 7.0,
            cca_threshold_dbm: -62.8,
            path_loss_exponent: 3.0,
            reference_distance_m: 1.0,
            reference_loss_db: 46.6777,
            min_snr_db: 4.0,
            bandwidth_hz: 20e6,
            propagation_speed_mps: 299_792_458.0,
            phy_rate_bps: 6.5e6,
            preamble_us: 40.0,
        }
    }
}

/// Calculate the path loss (in dB) at a given distance using the log-distance model.
///
/// # Formula
///
/// ```text
/// PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀)
/// ```
///
/// Where:
/// - `PL(d₀)`: Path loss at the reference distance, from `params.reference_loss_db`
/// - `n`: Path loss exponent, from `params.path_loss_exponent`
/// - `d₀`: Reference distance, from `params.reference_distance_m`
/// - `d`: Distance in meters
///
/// # Parameters
///
/// - `distance`: Distance between transmitter and receiver in meters
/// - `params`: Channel parameters carrying the model constants
///
/// # Returns
///
/// Path loss in dB. Deterministic: there is no shadowing term, so the same
/// distance always gives the same loss.
///
/// # Notes
///
/// - Distances inside the reference distance return `PL(d₀)`
/// - Distances are clamped to [`MIN_DISTANCE`] first, so co-located nodes never reach `log10(0)`
pub fn calculate_path_loss(distance: f64, params: &PhyParameters) -> f64 {
    let distance = distance.max(MIN_DISTANCE);
    if distance <= params.reference_distance_m {
        return params.reference_loss_db;
    }
    params.reference_loss_db + 10.0 * params.path_loss_exponent * (distance / params.reference_distance_m).log10()
}

/// Received signal strength at a given distance.
///
/// # Formula
///
/// ```text
/// P_rx = P_tx + G_tx + G_rx − PL(d)
/// ```
///
/// # Returns
///
/// Received power in dBm.
pub fn calculate_rssi(distance: f64, params: &PhyParameters) -> f64 {
    params.tx_power_dbm + params.tx_gain_db + params.rx_gain_db - calculate_path_loss(distance, params)
}

/// Receiver noise floor.
///
/// # Formula
///
/// ```text
/// N = −174 dBm/Hz + 10 × log₁₀(B) + NF
/// ```
///
/// Where `B` is the channel bandwidth in Hz and `NF` the receiver noise figure in dB.
/// With the defaults (20 MHz, 7 dB) this is about −94 dBm.
pub fn noise_floor_dbm(params: &PhyParameters) -> f64 {
    THERMAL_NOISE_DBM_PER_HZ + 10.0 * params.bandwidth_hz.log10() + params.noise_figure_db
}

/// Lowest received power that still decodes: the CCA threshold or the SNR limit, whichever is higher.
pub fn reception_threshold_dbm(params: &PhyParameters) -> f64 {
    params.cca_threshold_dbm.max(noise_floor_dbm(params) + params.min_snr_db)
}

/// Whether a frame received at `rssi_dbm` decodes.
pub fn is_receivable(rssi_dbm: f64, params: &PhyParameters) -> bool {
    rssi_dbm >= params.cca_threshold_dbm && rssi_dbm - noise_floor_dbm(params) >= params.min_snr_db
}

/// Deterministic range of a transmitter: the distance where received power
/// drops to the reception threshold.
///
/// # Formula
///
/// Solving `P_tx + G − PL(d₀) − 10n × log₁₀(d/d₀) = RL` for `d`:
///
/// ```text
/// d = d₀ × 10^((P_tx + G − PL(d₀) − RL) / (10n))
/// ```
///
/// Where `G` is the sum of both antenna gains and `RL` is
/// [`reception_threshold_dbm`].
///
/// # Returns
///
/// Range in meters, or 0.0 when the budget cannot even cover the reference loss.
/// Used for logging the expected radio range of a scenario.
pub fn calculate_effective_distance(params: &PhyParameters) -> f64 {
    let budget = params.tx_power_dbm + params.tx_gain_db + params.rx_gain_db - params.reference_loss_db - reception_threshold_dbm(params);
    if budget < 0.0 {
        return 0.0;
    }
    params.reference_distance_m * 10f64.powf(budget / (10.0 * params.path_loss_exponent))
}

/// Constant-speed propagation delay.
pub fn propagation_delay(distance: f64, params: &PhyParameters) -> SimTime {
    SimTime::from_secs_f64(distance / params.propagation_speed_mps)
}

/// Time a frame occupies the medium.
///
/// # Formula
///
/// ```text
/// T_air = T_preamble + size × 8 / R_phy
/// ```
///
/// # Parameters
///
/// - `size_bytes`: Frame payload length in bytes
/// - `params`: Channel parameters carrying `preamble_us` and `phy_rate_bps`
///
/// # Returns
///
/// Airtime as a `SimTime`. With the defaults a 512-byte frame takes about 670 µs.
pub fn calculate_air_time(size_bytes: usize, params: &PhyParameters) -> SimTime {
    SimTime::from_secs_f64(params.preamble_us * 1e-6) + serialization_time(size_bytes, params.phy_rate_bps)
}

/// Time needed to clock `size_bytes` onto a link running at `rate_bps`.
pub fn serialization_time(size_bytes: usize, rate_bps: f64) -> SimTime {
    SimTime::from_secs_f64(size_bytes as f64 * 8.0 / rate_bps)
}

/// Convert power from dBm to milliwatts: `P(mW) = 10^(P(dBm) / 10)`.
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert power from milliwatts to dBm: `P(dBm) = 10 × log₁₀(P(mW))`.
///
/// Non-positive inputs yield `-inf`/NaN; callers only pass sums of positive powers.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}
