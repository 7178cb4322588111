use serde::Deserialize;

use crate::model::Blockchain;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dispersion: DispersionConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Alerts of the same (type, address) within this window merge instead
    /// of creating a duplicate.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    /// Per-address detector state idle longer than this is evicted.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 900,
            retention_secs: 604_800,
        }
    }
}

fn default_dedup_window_secs() -> u64 {
    900
}

fn default_retention_secs() -> u64 {
    604_800
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispersionConfig {
    #[serde(default = "default_dispersion_min")]
    pub min_transactions: usize,
    #[serde(default = "default_dispersion_window")]
    pub window_secs: u64,
    /// Fraction of the trailing-24h outflow the windowed sum must reach.
    #[serde(default = "default_outflow_fraction")]
    pub outflow_fraction: f64,
}

impl Default for DispersionConfig {
    fn default() -> Self {
        Self {
            min_transactions: 3,
            window_secs: 3600,
            outflow_fraction: 0.5,
        }
    }
}

fn default_dispersion_min() -> usize {
    3
}

fn default_dispersion_window() -> u64 {
    3600
}

fn default_outflow_fraction() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_score_threshold")]
    pub statistical_threshold: f64,
    #[serde(default = "default_score_threshold")]
    pub ai_threshold: f64,
    /// Minimum prior observations before the statistical score is computed.
    #[serde(default = "default_min_history")]
    pub min_history: usize,
    #[serde(default = "default_predictor_timeout_ms")]
    pub predictor_timeout_ms: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            statistical_threshold: 0.6,
            ai_threshold: 0.6,
            min_history: 5,
            predictor_timeout_ms: 2000,
        }
    }
}

fn default_score_threshold() -> f64 {
    0.6
}

fn default_min_history() -> usize {
    5
}

fn default_predictor_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_frequent_min")]
    pub frequent_counterparty_min: u64,
    /// Relative tolerance for the possible_owner bidirectional-value check.
    #[serde(default = "default_owner_tolerance")]
    pub owner_tolerance: f64,
    #[serde(default = "default_value_buckets")]
    pub value_buckets: Vec<ValueBucketConfig>,
    #[serde(default)]
    pub risk_weights: RiskWeights,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            frequent_counterparty_min: 5,
            owner_tolerance: 0.1,
            value_buckets: default_value_buckets(),
            risk_weights: RiskWeights::default(),
        }
    }
}

fn default_frequent_min() -> u64 {
    5
}

fn default_owner_tolerance() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValueBucketConfig {
    pub label: String,
    pub min: f64,
    /// None marks the open-ended terminal bucket.
    pub max: Option<f64>,
}

fn default_value_buckets() -> Vec<ValueBucketConfig> {
    let ranges = [
        ("0-0.1", 0.0, Some(0.1)),
        ("0.1-0.5", 0.1, Some(0.5)),
        ("0.5-1.0", 0.5, Some(1.0)),
        ("1.0-2.0", 1.0, Some(2.0)),
        ("2.0+", 2.0, None),
    ];
    ranges
        .into_iter()
        .map(|(label, min, max)| ValueBucketConfig {
            label: label.to_string(),
            min,
            max,
        })
        .collect()
}

/// Weights of the composite address risk score. Tunable so the scoring
/// mix can change without touching detection logic.
#[derive(Debug, Deserialize, Clone)]
pub struct RiskWeights {
    #[serde(default = "default_weight_flagged")]
    pub flagged_fraction: f64,
    #[serde(default = "default_weight_counterparty")]
    pub risky_counterparty: f64,
    #[serde(default = "default_weight_anomaly")]
    pub max_anomaly: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            flagged_fraction: 0.4,
            risky_counterparty: 0.3,
            max_anomaly: 0.3,
        }
    }
}

fn default_weight_flagged() -> f64 {
    0.4
}

fn default_weight_counterparty() -> f64 {
    0.3
}

fn default_weight_anomaly() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    pub address: String,
    pub blockchain: Blockchain,
    pub label: Option<String>,
    pub threshold: f64,
    #[serde(default = "default_true")]
    pub alert_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.dispersion.min_transactions < 2 {
            return Err(eyre::eyre!(
                "dispersion.min_transactions must be at least 2"
            ));
        }
        if !(0.0..=1.0).contains(&self.dispersion.outflow_fraction) {
            return Err(eyre::eyre!("dispersion.outflow_fraction must be in [0, 1]"));
        }
        for threshold in [
            self.scoring.statistical_threshold,
            self.scoring.ai_threshold,
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(eyre::eyre!("scoring thresholds must be in [0, 1]"));
            }
        }
        if !(0.0..1.0).contains(&self.analytics.owner_tolerance) {
            return Err(eyre::eyre!("analytics.owner_tolerance must be in [0, 1)"));
        }

        let w = &self.analytics.risk_weights;
        if w.flagged_fraction < 0.0 || w.risky_counterparty < 0.0 || w.max_anomaly < 0.0 {
            return Err(eyre::eyre!("risk weights must be non-negative"));
        }
        if w.flagged_fraction + w.risky_counterparty + w.max_anomaly <= 0.0 {
            return Err(eyre::eyre!("at least one risk weight must be positive"));
        }

        let buckets = &self.analytics.value_buckets;
        if buckets.is_empty() {
            return Err(eyre::eyre!("at least one value bucket must be configured"));
        }
        for pair in buckets.windows(2) {
            let upper = pair[0].max.ok_or_else(|| {
                eyre::eyre!(
                    "value bucket '{}' has no upper bound but is not last",
                    pair[0].label
                )
            })?;
            if (upper - pair[1].min).abs() > f64::EPSILON {
                return Err(eyre::eyre!(
                    "value buckets '{}' and '{}' do not partition contiguously",
                    pair[0].label,
                    pair[1].label
                ));
            }
        }
        if let Some(last) = buckets.last() {
            if last.max.is_some() {
                return Err(eyre::eyre!(
                    "last value bucket '{}' must be open-ended",
                    last.label
                ));
            }
        }

        for wallet in &self.wallets {
            if wallet.address.trim().is_empty() {
                return Err(eyre::eyre!("wallet with empty address in config"));
            }
            if wallet.threshold < 0.0 {
                return Err(eyre::eyre!(
                    "wallet '{}' has negative threshold",
                    wallet.address
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[engine]
dedup_window_secs = 600

[dispersion]
min_transactions = 4

[scoring]
predictor_timeout_ms = 500

[[wallets]]
address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
blockchain = "ethereum"
label = "treasury"
threshold = 1.0
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.dedup_window_secs, 600);
        assert_eq!(config.engine.retention_secs, 604_800); // default
        assert_eq!(config.dispersion.min_transactions, 4);
        assert_eq!(config.dispersion.window_secs, 3600); // default
        assert_eq!(config.scoring.predictor_timeout_ms, 500);
        assert_eq!(config.wallets.len(), 1);
        assert_eq!(config.wallets[0].blockchain, Blockchain::Ethereum);
        assert!(config.wallets[0].alert_enabled); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_buckets_partition() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analytics.value_buckets.len(), 5);
        assert!(config.analytics.value_buckets.last().unwrap().max.is_none());
    }

    #[test]
    fn test_validate_gapped_buckets() {
        let mut config = Config::default();
        config.analytics.value_buckets[1].min = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_closed_last_bucket() {
        let mut config = Config::default();
        config.analytics.value_buckets.last_mut().unwrap().max = Some(10.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_negative_wallet_threshold() {
        let mut config = Config::default();
        config.wallets.push(WalletConfig {
            address: "0xabc".into(),
            blockchain: Blockchain::Ethereum,
            label: None,
            threshold: -1.0,
            alert_enabled: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_weights() {
        let mut config = Config::default();
        config.analytics.risk_weights = RiskWeights {
            flagged_fraction: 0.0,
            risky_counterparty: 0.0,
            max_anomaly: 0.0,
        };
        assert!(config.validate().is_err());
    }
}
