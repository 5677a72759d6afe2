//! # AQI scales
//!
//! Fixed breakpoint tables that map an index value to a category, colour and
//! health message. Values outside a table's range clamp to the nearest
//! boundary category; categorization never fails.
//!
//! Also hosts the PM2.5 <-> AQI conversion (US EPA breakpoints, 2024 revision)
//! used by the low-cost sensor correction in [`crate::fusion`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Index scale a value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AqiScale {
    /// US EPA, 0..=500, six categories.
    #[default]
    Epa,
    /// Canadian Air Quality Health Index, 1..=10 and "10+".
    Aqhi,
}

impl AqiScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            AqiScale::Epa => "EPA",
            AqiScale::Aqhi => "AQHI",
        }
    }

    fn table(&self) -> &'static [Band] {
        match self {
            AqiScale::Epa => EPA_BANDS,
            AqiScale::Aqhi => AQHI_BANDS,
        }
    }
}

impl fmt::Display for AqiScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AqiScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EPA" | "US" | "US_EPA" => Ok(AqiScale::Epa),
            "AQHI" | "CA" => Ok(AqiScale::Aqhi),
            other => Err(format!("unsupported AQI scale: {other}")),
        }
    }
}

/// Category tuple returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub scale: AqiScale,
    pub category: String,
    pub color_hex: String,
    pub health_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sensitive_groups: String,
}

struct Band {
    lo: i32,
    hi: i32,
    category: &'static str,
    color_hex: &'static str,
    health_message: &'static str,
    sensitive_groups: &'static str,
}

const EPA_BANDS: &[Band] = &[
    Band {
        lo: 0,
        hi: 50,
        category: "Good",
        color_hex: "#00E400",
        health_message: "Air quality is satisfactory, and air pollution poses little or no risk.",
        sensitive_groups: "",
    },
    Band {
        lo: 51,
        hi: 100,
        category: "Moderate",
        color_hex: "#FFFF00",
        health_message: "Air quality is acceptable. There may be a risk for some people who are unusually sensitive to air pollution.",
        sensitive_groups: "Unusually sensitive people",
    },
    Band {
        lo: 101,
        hi: 150,
        category: "Unhealthy for Sensitive Groups",
        color_hex: "#FF7E00",
        health_message: "Members of sensitive groups may experience health effects. The general public is less likely to be affected.",
        sensitive_groups: "People with heart or lung disease, older adults, children, and teenagers",
    },
    Band {
        lo: 151,
        hi: 200,
        category: "Unhealthy",
        color_hex: "#FF0000",
        health_message: "Some members of the general public may experience health effects; members of sensitive groups may experience more serious effects.",
        sensitive_groups: "People with heart or lung disease, older adults, children, and teenagers",
    },
    Band {
        lo: 201,
        hi: 300,
        category: "Very Unhealthy",
        color_hex: "#8F3F97",
        health_message: "Health alert: the risk of health effects is increased for everyone.",
        sensitive_groups: "Everyone",
    },
    Band {
        lo: 301,
        hi: 500,
        category: "Hazardous",
        color_hex: "#7E0023",
        health_message: "Health warning of emergency conditions: everyone is more likely to be affected.",
        sensitive_groups: "Everyone",
    },
];

const AQHI_BANDS: &[Band] = &[
    Band {
        lo: 1,
        hi: 3,
        category: "Low",
        color_hex: "#00CCFF",
        health_message: "Ideal air quality for outdoor activities.",
        sensitive_groups: "",
    },
    Band {
        lo: 4,
        hi: 6,
        category: "Moderate",
        color_hex: "#FFFF00",
        health_message: "No need to modify your usual outdoor activities unless you experience symptoms.",
        sensitive_groups: "People with heart or breathing problems",
    },
    Band {
        lo: 7,
        hi: 10,
        category: "High",
        color_hex: "#FF6600",
        health_message: "Consider reducing or rescheduling strenuous activities outdoors if you experience symptoms.",
        sensitive_groups: "People with heart or breathing problems, children and the elderly",
    },
    Band {
        lo: 11,
        hi: i32::MAX,
        category: "Very High",
        color_hex: "#990000",
        health_message: "Reduce or reschedule strenuous activities outdoors, especially if you experience symptoms.",
        sensitive_groups: "Everyone",
    },
];

/// Map an index value to its category on `scale`. Out-of-range values map to
/// the first or last band.
pub fn categorize(value: i32, scale: AqiScale) -> CategoryInfo {
    let table = scale.table();
    let band = table
        .iter()
        .find(|b| value >= b.lo && value <= b.hi)
        .unwrap_or_else(|| {
            if value < table[0].lo {
                &table[0]
            } else {
                &table[table.len() - 1]
            }
        });

    CategoryInfo {
        scale,
        category: band.category.to_string(),
        color_hex: band.color_hex.to_string(),
        health_message: band.health_message.to_string(),
        sensitive_groups: band.sensitive_groups.to_string(),
    }
}

/// (C_lo, C_hi, I_lo, I_hi) for 24h PM2.5 in µg/m³.
const PM25_BREAKPOINTS: &[(f64, f64, f64, f64)] = &[
    (0.0, 9.0, 0.0, 50.0),
    (9.1, 35.4, 51.0, 100.0),
    (35.5, 55.4, 101.0, 150.0),
    (55.5, 125.4, 151.0, 200.0),
    (125.5, 225.4, 201.0, 300.0),
    (225.5, 325.4, 301.0, 500.0),
];

/// PM2.5 concentration (µg/m³) to EPA AQI, clamped to 0..=500.
pub fn pm25_to_aqi(concentration: f64) -> i32 {
    if !concentration.is_finite() || concentration <= 0.0 {
        return 0;
    }
    // EPA truncates to one decimal before lookup.
    let c = (concentration * 10.0).floor() / 10.0;
    for &(c_lo, c_hi, i_lo, i_hi) in PM25_BREAKPOINTS {
        if c <= c_hi {
            let c = c.max(c_lo);
            return ((i_hi - i_lo) / (c_hi - c_lo) * (c - c_lo) + i_lo).round() as i32;
        }
    }
    500
}

/// EPA AQI back to a PM2.5 concentration (µg/m³) by inverting the breakpoints.
pub fn aqi_to_pm25(aqi: i32) -> f64 {
    let i = f64::from(aqi.clamp(0, 500));
    for &(c_lo, c_hi, i_lo, i_hi) in PM25_BREAKPOINTS {
        if i <= i_hi {
            let i = i.max(i_lo);
            return (c_hi - c_lo) / (i_hi - i_lo) * (i - i_lo) + c_lo;
        }
    }
    325.4
}
