//! Risk bands, route levels and suggestion text.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lower (exclusive) bounds of the upper four risk bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BandThresholds {
    pub medium: f64,
    pub medium_high: f64,
    pub high: f64,
    pub extreme: f64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            medium: 0.2,
            medium_high: 0.23,
            high: 0.33,
            extreme: 0.4,
        }
    }
}

impl BandThresholds {
    /// Cut-offs used to pick the driving advice of a flagged point. They
    /// are stricter than the description bands in the middle range.
    pub const ADVICE: Self = Self {
        medium: 0.2,
        medium_high: 0.25,
        high: 0.3,
        extreme: 0.4,
    };

    /// `true` if the thresholds are finite and strictly increasing.
    pub fn is_ordered(&self) -> bool {
        let t = [self.medium, self.medium_high, self.high, self.extreme];
        t.iter().all(|v| v.is_finite()) && t.windows(2).all(|w| w[0] < w[1])
    }

    pub fn band(&self, risk: f64) -> RiskBand {
        if risk > self.extreme {
            RiskBand::Extreme
        } else if risk > self.high {
            RiskBand::High
        } else if risk > self.medium_high {
            RiskBand::MediumHigh
        } else if risk > self.medium {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    /// Three-level rating of a whole route from its average risk.
    pub fn route_level(&self, avg_risk: f64) -> RouteRiskLevel {
        if avg_risk > self.high {
            RouteRiskLevel::High
        } else if avg_risk > self.medium_high {
            RouteRiskLevel::Medium
        } else {
            RouteRiskLevel::Low
        }
    }

    /// Whole-route advice from the average and maximum node risk.
    pub fn overall_suggestion(&self, avg_risk: f64, max_risk: f64, vehicle: VehicleType) -> String {
        let assessment = if max_risk > self.extreme {
            "Route contains high-risk segments"
        } else if avg_risk > self.high {
            "Overall route risk is high"
        } else {
            "Overall route risk is low"
        };
        format!("{assessment}; {}", vehicle.advice())
    }
}

/// Five-way classification of a node risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskBand {
    Low,
    Medium,
    MediumHigh,
    High,
    Extreme,
}

impl RiskBand {
    pub fn description(self) -> &'static str {
        match self {
            Self::Extreme => "Extreme-risk segment: sharp bends, severe weather and poor road conditions",
            Self::High => "High-risk segment: sharp bends, poor road conditions and limited visibility",
            Self::MediumHigh => "Medium-high-risk segment: frequent bends and slippery surface",
            Self::Medium => "Medium-risk segment: heavy traffic and average road conditions",
            Self::Low => "Low-risk segment: good road conditions and clear visibility",
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            Self::Extreme => "Detour or choose another route; if passage is unavoidable, proceed with extreme caution",
            Self::High => "Slow down, keep a safe following distance and watch the road",
            Self::MediumHigh => "Reduce speed and watch for slippery surfaces",
            Self::Medium => "Keep normal speed and watch for changes in traffic flow",
            Self::Low => "Road conditions are good; normal driving",
        }
    }
}

/// Route-level rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteRiskLevel {
    Low,
    Medium,
    High,
}

/// Kind of vehicle travelling the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    HazardousGoods,
    Coach,
    Truck,
    #[default]
    Other,
}

impl VehicleType {
    /// Lenient parse: Chinese labels and common English aliases, anything
    /// else is [`VehicleType::Other`].
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Other;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "危险品运输车" | "hazmat" | "hazardous" | "hazardous_goods" | "dangerous_goods" => {
                Self::HazardousGoods
            }
            "大型客车" | "coach" | "bus" => Self::Coach,
            "货车" | "truck" | "lorry" => Self::Truck,
            _ => Self::Other,
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Self::HazardousGoods => "use designated routes or avoid the high-risk segments",
            Self::Coach => "avoid night-time peak hours and observe height and weight limits",
            Self::Truck => "avoid city centres and prefer freight routes",
            Self::Other => "avoid night-time peak hours and drive safely",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries_are_exclusive() {
        let t = BandThresholds::default();
        assert_eq!(t.band(0.0), RiskBand::Low);
        assert_eq!(t.band(0.2), RiskBand::Low);
        assert_eq!(t.band(0.21), RiskBand::Medium);
        assert_eq!(t.band(0.23), RiskBand::Medium);
        assert_eq!(t.band(0.3), RiskBand::MediumHigh);
        assert_eq!(t.band(0.34), RiskBand::High);
        assert_eq!(t.band(0.4), RiskBand::High);
        assert_eq!(t.band(0.41), RiskBand::Extreme);
        assert_eq!(t.band(3.0), RiskBand::Extreme);
    }

    #[test]
    fn test_advice_cut_offs_differ_from_description_bands() {
        let risk = 0.32;
        assert_eq!(BandThresholds::default().band(risk), RiskBand::MediumHigh);
        assert_eq!(BandThresholds::ADVICE.band(risk), RiskBand::High);
        assert_eq!(BandThresholds::ADVICE.band(0.26), RiskBand::MediumHigh);
        assert!(BandThresholds::ADVICE.is_ordered());
    }

    #[test]
    fn test_route_level() {
        let t = BandThresholds::default();
        assert_eq!(t.route_level(0.1), RouteRiskLevel::Low);
        assert_eq!(t.route_level(0.23), RouteRiskLevel::Low);
        assert_eq!(t.route_level(0.3), RouteRiskLevel::Medium);
        assert_eq!(t.route_level(0.5), RouteRiskLevel::High);
    }

    #[test]
    fn test_overall_suggestion_prefers_max_over_avg() {
        let t = BandThresholds::default();
        let s = t.overall_suggestion(0.1, 0.5, VehicleType::Truck);
        assert!(s.starts_with("Route contains high-risk segments"));
        assert!(s.ends_with("prefer freight routes"));

        let s = t.overall_suggestion(0.35, 0.39, VehicleType::Other);
        assert!(s.starts_with("Overall route risk is high"));

        let s = t.overall_suggestion(0.1, 0.2, VehicleType::Coach);
        assert!(s.starts_with("Overall route risk is low"));
        assert!(s.contains("height and weight"));
    }

    #[test]
    fn test_vehicle_type_parse() {
        assert_eq!(VehicleType::parse(Some("危险品运输车")), VehicleType::HazardousGoods);
        assert_eq!(VehicleType::parse(Some(" Coach ")), VehicleType::Coach);
        assert_eq!(VehicleType::parse(Some("货车")), VehicleType::Truck);
        assert_eq!(VehicleType::parse(Some("小轿车")), VehicleType::Other);
        assert_eq!(VehicleType::parse(None), VehicleType::Other);
    }

    #[test]
    fn test_threshold_ordering_check() {
        assert!(BandThresholds::default().is_ordered());
        let bad = BandThresholds {
            high: 0.1,
            ..BandThresholds::default()
        };
        assert!(!bad.is_ordered());
    }

    #[test]
    fn test_every_band_has_text() {
        for band in [
            RiskBand::Low,
            RiskBand::Medium,
            RiskBand::MediumHigh,
            RiskBand::High,
            RiskBand::Extreme,
        ] {
            assert!(!band.description().is_empty());
            assert!(!band.suggestion().is_empty());
        }
    }
}
