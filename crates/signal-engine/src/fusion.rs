use chrono::{DateTime, Utc};
use engine_core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Maximum number of component signals a fusion accepts.
const MAX_COMPONENTS: usize = 4;

/// One sub-signal feeding the fusion: a normalized score with a confidence
/// and the time it was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSignal {
    /// e.g. technical, fundamental, sentiment, smart_money
    pub source: String,
    /// Normalized score in [-1, +1].
    pub score: f64,
    /// Confidence in [0, 1]; weights are proportional to this.
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

/// Fused output for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedSignal {
    pub ticker: String,
    pub composite: f64,
    pub direction: String,
    pub confidence: f64,
    pub component_breakdown: serde_json::Value,
}

/// Confidence-weighted signal fusion. Zero-confidence stacks fall back to
/// the most recently updated component so a fresh signal still steers the
/// output.
pub struct FusionEngine;

impl FusionEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn fuse(&self, ticker: &str, components: &[ComponentSignal]) -> EngineResult<FusedSignal> {
        if components.is_empty() {
            return Err(EngineError::InvalidArgument(
                "signal fusion needs at least one component".to_string(),
            ));
        }
        if components.len() > MAX_COMPONENTS {
            return Err(EngineError::InvalidArgument(format!(
                "signal fusion accepts at most {MAX_COMPONENTS} components, got {}",
                components.len()
            )));
        }
        for c in components {
            if !(-1.0..=1.0).contains(&c.score) {
                return Err(EngineError::InvalidArgument(format!(
                    "component {} score {} outside [-1, 1]",
                    c.source, c.score
                )));
            }
            if !(0.0..=1.0).contains(&c.confidence) {
                return Err(EngineError::InvalidArgument(format!(
                    "component {} confidence {} outside [0, 1]",
                    c.source, c.confidence
                )));
            }
        }

        let total_confidence: f64 = components.iter().map(|c| c.confidence).sum();
        let (composite, confidence) = if total_confidence > f64::EPSILON {
            let composite = components
                .iter()
                .map(|c| c.score * c.confidence)
                .sum::<f64>()
                / total_confidence;
            // Confidence of the blend: confidence-weighted mean confidence.
            let confidence = components
                .iter()
                .map(|c| c.confidence * c.confidence)
                .sum::<f64>()
                / total_confidence;
            (composite, confidence)
        } else {
            // All confidences zero: the most recent component wins the tie.
            let recent = components
                .iter()
                .max_by_key(|c| c.updated_at)
                .ok_or_else(|| EngineError::Internal("empty component set".to_string()))?;
            (recent.score, 0.0)
        };

        let direction = if composite > 0.15 {
            "bullish"
        } else if composite < -0.15 {
            "bearish"
        } else {
            "neutral"
        };

        let breakdown: Vec<serde_json::Value> = components
            .iter()
            .map(|c| {
                let weight = if total_confidence > f64::EPSILON {
                    c.confidence / total_confidence
                } else {
                    0.0
                };
                json!({
                    "source": c.source,
                    "score": c.score,
                    "confidence": c.confidence,
                    "weight": weight,
                    "updated_at": c.updated_at.to_rfc3339(),
                })
            })
            .collect();

        Ok(FusedSignal {
            ticker: ticker.to_string(),
            composite,
            direction: direction.to_string(),
            confidence,
            component_breakdown: serde_json::Value::Array(breakdown),
        })
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn component(source: &str, score: f64, confidence: f64, at: i64) -> ComponentSignal {
        ComponentSignal {
            source: source.to_string(),
            score,
            confidence,
            updated_at: Utc.timestamp_opt(at, 0).unwrap(),
        }
    }

    #[test]
    fn composite_is_confidence_weighted() {
        let fused = FusionEngine::new()
            .fuse(
                "AAPL",
                &[
                    component("technical", 1.0, 0.8, 0),
                    component("sentiment", -1.0, 0.2, 0),
                ],
            )
            .unwrap();
        // (1*0.8 - 1*0.2) / 1.0 = 0.6
        assert!((fused.composite - 0.6).abs() < 1e-12);
        assert_eq!(fused.direction, "bullish");
    }

    #[test]
    fn zero_confidence_falls_back_to_most_recent() {
        let fused = FusionEngine::new()
            .fuse(
                "AAPL",
                &[
                    component("technical", 0.9, 0.0, 100),
                    component("fundamental", -0.7, 0.0, 200),
                ],
            )
            .unwrap();
        assert_eq!(fused.composite, -0.7);
        assert_eq!(fused.confidence, 0.0);
        assert_eq!(fused.direction, "bearish");
    }

    #[test]
    fn out_of_range_inputs_reject() {
        let engine = FusionEngine::new();
        assert!(engine
            .fuse("X", &[component("technical", 1.5, 0.5, 0)])
            .is_err());
        assert!(engine
            .fuse("X", &[component("technical", 0.5, 1.5, 0)])
            .is_err());
        let five = vec![
            component("a", 0.0, 0.5, 0),
            component("b", 0.0, 0.5, 0),
            component("c", 0.0, 0.5, 0),
            component("d", 0.0, 0.5, 0),
            component("e", 0.0, 0.5, 0),
        ];
        assert!(engine.fuse("X", &five).is_err());
    }

    #[test]
    fn small_composite_is_neutral() {
        let fused = FusionEngine::new()
            .fuse(
                "AAPL",
                &[
                    component("technical", 0.1, 0.5, 0),
                    component("fundamental", -0.05, 0.5, 0),
                ],
            )
            .unwrap();
        assert_eq!(fused.direction, "neutral");
    }
}
