//! Province base-rate table.
//!
//! The first two digits of a six-digit region code identify the
//! province-level division.

/// Province-level division with its historical accident base rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Province {
    pub code_prefix: &'static str,
    pub name: &'static str,
    pub base_rate: f64,
}

const fn p(code_prefix: &'static str, name: &'static str, base_rate: f64) -> Province {
    Province {
        code_prefix,
        name,
        base_rate,
    }
}

pub const PROVINCES: &[Province] = &[
    p("11", "北京", 0.30),
    p("12", "天津", 0.46),
    p("13", "河北", 0.05),
    p("14", "山西", 0.23),
    p("15", "内蒙古", 0.15),
    p("21", "辽宁", 0.11),
    p("22", "吉林", 0.29),
    p("23", "黑龙江", 0.11),
    p("31", "上海", 0.05),
    p("32", "江苏", 0.12),
    p("33", "浙江", 0.16),
    p("34", "安徽", 0.14),
    p("35", "福建", 0.18),
    p("36", "江西", 0.09),
    p("37", "山东", 0.12),
    p("41", "河南", 0.24),
    p("42", "湖北", 0.52),
    p("43", "湖南", 0.18),
    p("44", "广东", 0.20),
    p("45", "广西", 0.32),
    p("46", "海南", 0.25),
    p("50", "重庆", 0.13),
    p("51", "四川", 0.09),
    p("52", "贵州", 0.38),
    p("53", "云南", 0.14),
    p("54", "西藏", 0.14),
    p("61", "陕西", 0.11),
    p("62", "甘肃", 0.12),
    p("63", "青海", 0.25),
    p("64", "宁夏", 0.22),
    p("65", "新疆", 0.18),
];

/// Look up the province owning `region_code`.
pub fn province_for(region_code: &str) -> Option<&'static Province> {
    let prefix = region_code.trim().get(..2)?;
    PROVINCES.iter().find(|p| p.code_prefix == prefix)
}

/// Base rate for `region_code`, `0.0` when the province is unknown.
pub fn base_rate(region_code: &str) -> f64 {
    province_for(region_code).map_or(0.0, |p| p.base_rate)
}
