use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::lenient;

/// Classification label returned by the detection service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Verdict {
    Abnormal,
    Normal,
    Other(String),
}

impl Verdict {
    pub const ABNORMAL_LABEL: &'static str = "ABNORMAL_REQUEST";
    pub const NORMAL_LABEL: &'static str = "NORMAL_REQUEST";

    pub fn is_abnormal(&self) -> bool {
        matches!(self, Verdict::Abnormal)
    }
}

impl From<String> for Verdict {
    fn from(label: String) -> Self {
        match label.as_str() {
            Self::ABNORMAL_LABEL => Verdict::Abnormal,
            Self::NORMAL_LABEL => Verdict::Normal,
            _ => Verdict::Other(label),
        }
    }
}

impl From<Verdict> for String {
    fn from(verdict: Verdict) -> Self {
        verdict.to_string()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Abnormal => f.write_str(Self::ABNORMAL_LABEL),
            Verdict::Normal => f.write_str(Self::NORMAL_LABEL),
            Verdict::Other(label) => f.write_str(label),
        }
    }
}

/// Scores produced by the detection modules for one request.
///
/// Common-attack flags arrive as arbitrary JSON and are stored as their
/// truthiness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetrics {
    #[serde(default, alias = "ws_module_web_attack_detection_score", deserialize_with = "lenient::score")]
    pub web_attack_detection_score: f64,

    #[serde(default, alias = "ws_module_dga_detection_score", deserialize_with = "lenient::score")]
    pub dga_detection_score: f64,

    #[serde(default, alias = "ws_module_common_attack_detection", deserialize_with = "lenient::flags")]
    pub common_attack_detection: BTreeMap<String, bool>,
}

impl DetectionMetrics {
    pub fn any_common_attack(&self) -> bool {
        self.common_attack_detection.values().any(|flag| *flag)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub metrics: DetectionMetrics,
    pub verdict: Verdict,
}

impl DetectionResult {
    pub fn new(metrics: DetectionMetrics, verdict: Verdict) -> Self {
        Self { metrics, verdict }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_labels() {
        assert_eq!(Verdict::from("ABNORMAL_REQUEST".to_string()), Verdict::Abnormal);
        assert_eq!(Verdict::from("NORMAL_REQUEST".to_string()), Verdict::Normal);
        assert_eq!(
            Verdict::from("SUSPICIOUS".to_string()),
            Verdict::Other("SUSPICIOUS".to_string())
        );
        assert_eq!(Verdict::Abnormal.to_string(), "ABNORMAL_REQUEST");
    }

    #[test]
    fn metrics_accept_gateway_field_names() {
        let metrics: DetectionMetrics = serde_json::from_str(
            r#"{
                "ws_module_web_attack_detection_score": 91.5,
                "ws_module_dga_detection_score": 3,
                "ws_module_common_attack_detection": {"sql_injection": false, "xss": true}
            }"#,
        )
        .unwrap();

        assert_eq!(metrics.web_attack_detection_score, 91.5);
        assert_eq!(metrics.dga_detection_score, 3.0);
        assert!(metrics.any_common_attack());
    }

    #[test]
    fn common_attack_flags_use_truthiness() {
        let metrics: DetectionMetrics = serde_json::from_str(
            r#"{
                "ws_module_web_attack_detection_score": "12.5",
                "ws_module_dga_detection_score": null,
                "ws_module_common_attack_detection": {"sql_injection": null, "xss": 0, "lfi": ""}
            }"#,
        )
        .unwrap();
        assert_eq!(metrics.web_attack_detection_score, 12.5);
        assert_eq!(metrics.dga_detection_score, 0.0);
        assert_eq!(metrics.common_attack_detection.len(), 3);
        assert!(!metrics.any_common_attack());

        let metrics: DetectionMetrics = serde_json::from_str(
            r#"{"ws_module_common_attack_detection": {"sql_injection": null, "rce": "detected"}}"#,
        )
        .unwrap();
        assert!(metrics.any_common_attack());

        let metrics: DetectionMetrics =
            serde_json::from_str(r#"{"ws_module_common_attack_detection": null}"#).unwrap();
        assert!(metrics.common_attack_detection.is_empty());
    }

    #[test]
    fn missing_scores_default_to_zero() {
        let metrics: DetectionMetrics = serde_json::from_str("{}").unwrap();
        assert_eq!(metrics.web_attack_detection_score, 0.0);
        assert!(!metrics.any_common_attack());
    }
}
