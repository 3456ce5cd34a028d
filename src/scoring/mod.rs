//! Risk scoring: feature extraction, the province table and the scorer.

pub mod features;
pub mod regions;
pub mod scorer;

pub use features::{
    parse_departure, FeatureVector, LightingCondition, RoadAttributes, SurfaceCondition,
    TrafficControlDevice, TrafficwayType, WeatherCondition,
};
pub use regions::{base_rate, province_for, Province};
pub use scorer::{damping_factor, RiskResult, RiskScorer, ScorerSettings, ScoringError};
