//! Linear unit conversions into the simulator's units.

use crate::error::{DelwaqError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Flux,
    Volume,
    Sediment,
    Temperature,
    Radiation,
}

impl Quantity {
    pub fn target_unit(&self) -> &'static str {
        match self {
            Quantity::Flux => "m3/s",
            Quantity::Volume => "m3",
            Quantity::Sediment => "g",
            Quantity::Temperature => "degC",
            Quantity::Radiation => "W/m2",
        }
    }
}

/// `target = source * scale [* surface] + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub scale: f64,
    pub offset: f64,
    /// Source is a depth (or depth rate) multiplied by the segment surface.
    pub per_area: bool,
}

impl UnitConversion {
    pub fn apply(&self, value: f64, surface: f64) -> f64 {
        let scale = if self.per_area {
            self.scale * surface
        } else {
            self.scale
        };
        value * scale + self.offset
    }

    pub fn invert(&self, value: f64, surface: f64) -> f64 {
        let scale = if self.per_area {
            self.scale * surface
        } else {
            self.scale
        };
        (value - self.offset) / scale
    }
}

const DAY: f64 = 86400.0;
const HOUR: f64 = 3600.0;

pub const UNIT_TABLE: &[(Quantity, &str, UnitConversion)] = &[
    (Quantity::Flux, "m3/s", linear(1.0)),
    (Quantity::Flux, "m3/h", linear(1.0 / HOUR)),
    (Quantity::Flux, "m3/d", linear(1.0 / DAY)),
    (Quantity::Flux, "l/s", linear(1e-3)),
    (Quantity::Flux, "m/s", per_area(1.0)),
    (Quantity::Flux, "mm/h", per_area(1e-3 / HOUR)),
    (Quantity::Flux, "mm/d", per_area(1e-3 / DAY)),
    (Quantity::Volume, "m3", linear(1.0)),
    (Quantity::Volume, "l", linear(1e-3)),
    (Quantity::Volume, "m", per_area(1.0)),
    (Quantity::Volume, "mm", per_area(1e-3)),
    (Quantity::Sediment, "g", linear(1.0)),
    (Quantity::Sediment, "kg", linear(1e3)),
    (Quantity::Sediment, "t", linear(1e6)),
    (Quantity::Sediment, "ton", linear(1e6)),
    (Quantity::Temperature, "degC", linear(1.0)),
    (
        Quantity::Temperature,
        "K",
        UnitConversion {
            scale: 1.0,
            offset: -273.15,
            per_area: false,
        },
    ),
    (
        Quantity::Temperature,
        "degF",
        UnitConversion {
            scale: 5.0 / 9.0,
            offset: -160.0 / 9.0,
            per_area: false,
        },
    ),
    (Quantity::Radiation, "W/m2", linear(1.0)),
    (Quantity::Radiation, "J/m2/d", linear(1.0 / DAY)),
    (Quantity::Radiation, "MJ/m2/d", linear(1e6 / DAY)),
];

const fn linear(scale: f64) -> UnitConversion {
    UnitConversion {
        scale,
        offset: 0.0,
        per_area: false,
    }
}

const fn per_area(scale: f64) -> UnitConversion {
    UnitConversion {
        scale,
        offset: 0.0,
        per_area: true,
    }
}

pub fn lookup(quantity: Quantity, unit: &str) -> Result<UnitConversion> {
    UNIT_TABLE
        .iter()
        .find(|(q, u, _)| *q == quantity && *u == unit)
        .map(|(_, _, conv)| *conv)
        .ok_or_else(|| {
            let known: Vec<&str> = UNIT_TABLE
                .iter()
                .filter(|(q, _, _)| *q == quantity)
                .map(|(_, u, _)| *u)
                .collect();
            DelwaqError::config(format!(
                "unit '{}' cannot be converted to {} (known: {:?})",
                unit,
                quantity.target_unit(),
                known
            ))
        })
}

/// Finds the first quantity among `candidates` that knows `unit`.
pub fn lookup_any(candidates: &[Quantity], unit: &str) -> Result<(Quantity, UnitConversion)> {
    candidates
        .iter()
        .find_map(|q| lookup(*q, unit).ok().map(|c| (*q, c)))
        .ok_or_else(|| {
            DelwaqError::config(format!(
                "unit '{}' is not supported for {:?}",
                unit, candidates
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_units() {
        for (_, unit, conv) in UNIT_TABLE {
            for value in [-12.5, 0.0, 0.001, 3.3e4] {
                for surface in [1.0, 2500.0] {
                    let back = conv.invert(conv.apply(value, surface), surface);
                    let tol = 1e-9 * value.abs().max(1.0);
                    assert!((back - value).abs() < tol, "{} {} {}", unit, value, back);
                }
            }
        }
    }

    #[test]
    fn test_known_conversions() {
        assert_eq!(lookup(Quantity::Flux, "m3/d").unwrap().apply(86400.0, 1.0), 1.0);
        let mm = lookup(Quantity::Volume, "mm").unwrap();
        assert!((mm.apply(10.0, 1_000_000.0) - 10_000.0).abs() < 1e-9);
        let k = lookup(Quantity::Temperature, "K").unwrap();
        assert!((k.apply(273.15, 1.0)).abs() < 1e-12);
        let f = lookup(Quantity::Temperature, "degF").unwrap();
        assert!((f.apply(212.0, 1.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_unit_is_config_error() {
        assert!(lookup(Quantity::Flux, "furlong/fortnight").unwrap_err().is_config());
        assert!(lookup(Quantity::Volume, "m3/s").unwrap_err().is_config());
        assert!(lookup_any(&[Quantity::Temperature, Quantity::Radiation], "kg").is_err());
        assert_eq!(
            lookup_any(&[Quantity::Temperature, Quantity::Radiation], "W/m2")
                .unwrap()
                .0,
            Quantity::Radiation
        );
    }
}
