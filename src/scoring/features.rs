//! Feature vector for the accident-probability model.
//!
//! Every categorical field is a closed enum whose serde name is the exact
//! label the model was trained on, so a typo cannot reach the endpoint.

use crate::geometry::Alignment;
use crate::road::RoadClass;
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;

/// Presence of a traffic-control device at the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrafficControlDevice {
    #[serde(rename = "TRAFFIC SIGNAL")]
    TrafficSignal,
    #[serde(rename = "NO CONTROLS")]
    NoControls,
}

impl From<bool> for TrafficControlDevice {
    fn from(has_signal: bool) -> Self {
        if has_signal {
            Self::TrafficSignal
        } else {
            Self::NoControls
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WeatherCondition {
    #[serde(rename = "CLEAR")]
    Clear,
    #[serde(rename = "RAIN")]
    Rain,
    #[serde(rename = "SNOW")]
    Snow,
    #[serde(rename = "FOG/SMOKE/HAZE")]
    FogSmokeHaze,
    #[serde(rename = "CLOUDY/OVERCAST")]
    CloudyOvercast,
    #[serde(rename = "BLOWING SAND, SOIL, DIRT")]
    BlowingSand,
    #[serde(rename = "FREEZING RAIN/DRIZZLE")]
    FreezingRain,
    #[serde(rename = "SLEET/HAIL")]
    SleetHail,
    #[serde(rename = "SEVERE CROSS WIND GATE")]
    SevereCrossWind,
    #[serde(rename = "OTHER")]
    Other,
}

// Checked in order; compound keywords precede the single characters they
// contain ("冻雨" before "雨").
const WEATHER_KEYWORDS: &[(&[&str], WeatherCondition)] = &[
    (&["冻雨", "freezing"], WeatherCondition::FreezingRain),
    (&["冰雹", "hail", "sleet"], WeatherCondition::SleetHail),
    (&["雨", "rain", "drizzle", "shower"], WeatherCondition::Rain),
    (&["雪", "snow"], WeatherCondition::Snow),
    (&["雾", "霾", "fog", "haze", "smoke", "mist"], WeatherCondition::FogSmokeHaze),
    (&["沙", "尘", "sand", "dust"], WeatherCondition::BlowingSand),
    (&["阴", "多云", "cloud", "overcast"], WeatherCondition::CloudyOvercast),
    (&["风", "wind", "gale"], WeatherCondition::SevereCrossWind),
    (&["晴", "clear", "sunny", "fair"], WeatherCondition::Clear),
];

impl WeatherCondition {
    /// Map free-text weather to a category. Missing or blank text is
    /// treated as clear; text that matches no keyword is `Other`.
    pub fn from_description(text: Option<&str>) -> Self {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return Self::Clear;
        };
        let lower = text.to_lowercase();
        WEATHER_KEYWORDS
            .iter()
            .find(|(words, _)| words.iter().any(|w| lower.contains(w)))
            .map_or(Self::Other, |(_, category)| *category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LightingCondition {
    #[serde(rename = "DAYLIGHT")]
    Daylight,
    #[serde(rename = "DAWN")]
    Dawn,
    #[serde(rename = "DUSK")]
    Dusk,
    #[serde(rename = "DARKNESS")]
    Darkness,
    #[serde(rename = "DARKNESS, LIGHTED ROAD")]
    DarknessLightedRoad,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    let lower = text.to_lowercase();
    words.iter().any(|w| lower.contains(w))
}

impl LightingCondition {
    /// Lighting from hour of day (0-23) and weather text.
    ///
    /// At night, fog, haze, downpours and snow leave the road in full
    /// darkness; otherwise street lighting is assumed. By day, fog or haze
    /// make the lighting unknowable.
    pub fn from_hour_and_weather(hour: u32, weather: Option<&str>) -> Self {
        let weather = weather.unwrap_or_default();
        let obscured = contains_any(weather, &["雾", "霾", "fog", "haze"]);

        if !(6..20).contains(&hour) {
            if obscured || contains_any(weather, &["暴雨", "雪", "heavy rain", "snow"]) {
                return Self::Darkness;
            }
            return Self::DarknessLightedRoad;
        }
        if obscured {
            return Self::Unknown;
        }
        match hour {
            6 => Self::Dawn,
            7..=17 => Self::Daylight,
            _ => Self::Dusk,
        }
    }
}

/// Trafficway category the model understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrafficwayType {
    Expressway,
    #[serde(rename = "Main Road")]
    MainRoad,
    #[serde(rename = "Local Road")]
    LocalRoad,
    #[serde(rename = "Service Road")]
    ServiceRoad,
    #[serde(rename = "NOT DIVIDED")]
    NotDivided,
}

impl From<Option<RoadClass>> for TrafficwayType {
    fn from(class: Option<RoadClass>) -> Self {
        match class {
            Some(RoadClass::Expressway) => Self::Expressway,
            Some(RoadClass::MainRoad) => Self::MainRoad,
            Some(RoadClass::LocalRoad) => Self::LocalRoad,
            Some(RoadClass::ServiceRoad) => Self::ServiceRoad,
            None => Self::NotDivided,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SurfaceCondition {
    #[serde(rename = "DRY")]
    Dry,
    #[serde(rename = "WET")]
    Wet,
    #[serde(rename = "SNOW OR SLUSH")]
    SnowOrSlush,
    #[serde(rename = "ICE")]
    Ice,
    #[serde(rename = "SAND, MUD, DIRT")]
    SandMudDirt,
}

impl SurfaceCondition {
    pub fn from_weather(weather: Option<&str>) -> Self {
        let Some(w) = weather else {
            return Self::Dry;
        };
        if contains_any(w, &["雨", "rain", "drizzle"]) {
            Self::Wet
        } else if contains_any(w, &["雪", "snow", "slush"]) {
            Self::SnowOrSlush
        } else if contains_any(w, &["冰", "ice", "icy"]) {
            Self::Ice
        } else if contains_any(w, &["泥", "沙", "mud", "sand"]) {
            Self::SandMudDirt
        } else {
            Self::Dry
        }
    }
}

/// Road attributes the scorer needs from the upstream stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoadAttributes {
    pub road_class: Option<RoadClass>,
    pub has_signal: bool,
    pub alignment: Alignment,
}

impl Default for RoadAttributes {
    fn default() -> Self {
        Self {
            road_class: None,
            has_signal: false,
            alignment: Alignment::StraightAndLevel,
        }
    }
}

/// Model input, serialised in the field order the model expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    /// `YYYY-MM-DD`
    pub crash_date: String,
    pub traffic_control_device: TrafficControlDevice,
    pub weather_condition: WeatherCondition,
    pub lighting_condition: LightingCondition,
    pub trafficway_type: TrafficwayType,
    pub alignment: Alignment,
    pub roadway_surface_cond: SurfaceCondition,
    pub road_defect: &'static str,
    pub intersection_related_i: &'static str,
    pub crash_hour: u32,
    /// Monday = 1 … Sunday = 7
    pub crash_day_of_week: u32,
    pub crash_month: u32,
}

impl FeatureVector {
    /// Assemble the vector for one node.
    pub fn build(at: NaiveDateTime, weather: Option<&str>, road: &RoadAttributes) -> Self {
        Self {
            crash_date: at.format("%Y-%m-%d").to_string(),
            traffic_control_device: road.has_signal.into(),
            weather_condition: WeatherCondition::from_description(weather),
            lighting_condition: LightingCondition::from_hour_and_weather(at.hour(), weather),
            trafficway_type: road.road_class.into(),
            alignment: road.alignment,
            roadway_surface_cond: SurfaceCondition::from_weather(weather),
            road_defect: "NO DEFECTS",
            intersection_related_i: "N",
            crash_hour: at.hour(),
            crash_day_of_week: at.weekday().number_from_monday(),
            crash_month: at.month(),
        }
    }

    #[cfg(test)]
    pub(crate) fn sample() -> Self {
        let at = NaiveDate::from_ymd_opt(2024, 7, 14)
            .and_then(|d| d.and_hms_opt(8, 30, 0))
            .unwrap_or_default();
        Self::build(at, Some("晴"), &RoadAttributes::default())
    }
}

/// Parse a caller-supplied departure time.
///
/// Accepts RFC 3339 (the wall-clock time in the given offset is used),
/// `YYYY-MM-DD HH:MM[:SS]`, `YYYY-MM-DDTHH:MM[:SS]` and a bare date
/// (midnight). `None` or blank means now, in local time.
///
/// # Errors
///
/// Returns the offending input when no format matches.
pub fn parse_departure(raw: Option<&str>) -> Result<NaiveDateTime, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Local::now().naive_local());
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    Err(format!("unrecognised departure time {raw:?}"))
}
