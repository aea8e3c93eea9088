//! Length units accepted by distance filters. Lookup is a compile-time
//! perfect hash over the accepted spellings; conversion is two mirrored
//! factor tables.

use phf::phf_map;

pub const VALID_UNITS: &str = "meters (m), kilometers (km), feet (ft), yards (yd) or miles (mi)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LengthUnit {
    Meters = 0,
    Kilometers = 1,
    Feet = 2,
    Yards = 3,
    Miles = 4,
}

static UNIT_NAMES: phf::Map<&'static str, LengthUnit> = phf_map! {
    "m" => LengthUnit::Meters,
    "meters" => LengthUnit::Meters,
    "km" => LengthUnit::Kilometers,
    "kilometers" => LengthUnit::Kilometers,
    "ft" => LengthUnit::Feet,
    "feet" => LengthUnit::Feet,
    "yd" => LengthUnit::Yards,
    "yards" => LengthUnit::Yards,
    "mi" => LengthUnit::Miles,
    "miles" => LengthUnit::Miles,
};

pub const METERS_TO_UNIT: [f64; 5] = [
    1.0,
    0.001,
    3.28084,
    1.093613,
    0.000_621_371_192_237_333_9,
];

pub const UNITS_TO_METERS: [f64; 5] = [
    1.0,
    1.0 / 0.001,
    1.0 / 3.28084,
    1.0 / 1.093613,
    1.0 / 0.000_621_371_192_237_333_9,
];

impl LengthUnit {
    pub fn from_string(unit: &str) -> Option<LengthUnit> {
        UNIT_NAMES.get(unit).copied()
    }

    pub fn to_meters(&self, value: f64) -> f64 {
        value * UNITS_TO_METERS[*self as usize]
    }

    pub fn from_meters(&self, meters: f64) -> f64 {
        meters * METERS_TO_UNIT[*self as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_spellings_resolve() {
        for (name, unit) in [
            ("m", LengthUnit::Meters),
            ("meters", LengthUnit::Meters),
            ("km", LengthUnit::Kilometers),
            ("kilometers", LengthUnit::Kilometers),
            ("ft", LengthUnit::Feet),
            ("feet", LengthUnit::Feet),
            ("yd", LengthUnit::Yards),
            ("yards", LengthUnit::Yards),
            ("mi", LengthUnit::Miles),
            ("miles", LengthUnit::Miles),
        ] {
            assert_eq!(LengthUnit::from_string(name), Some(unit), "{}", name);
        }
    }

    #[test]
    fn unknown_units_are_rejected() {
        assert_eq!(LengthUnit::from_string("furlongs"), None);
        assert_eq!(LengthUnit::from_string("M"), None);
        assert_eq!(LengthUnit::from_string(""), None);
    }

    #[test]
    fn factor_tables_are_reciprocal() {
        for i in 0..5 {
            let product = METERS_TO_UNIT[i] * UNITS_TO_METERS[i];
            assert!((product - 1.0).abs() < 1e-9, "unit {}", i);
        }
    }

    #[test]
    fn kilometer_conversion() {
        assert!((LengthUnit::Kilometers.to_meters(1.5) - 1500.0).abs() < 1e-9);
        assert!((LengthUnit::Kilometers.from_meters(500.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mile_conversion() {
        let meters = LengthUnit::Miles.to_meters(1.0);
        assert!((meters - 1609.344).abs() < 0.001);
    }
}
