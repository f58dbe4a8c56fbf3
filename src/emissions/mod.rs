//! Emission fields on the model grid from raster, vector and table sources.

pub mod raster;
pub mod vector;

use crate::error::{DelwaqError, Result};
use ndarray::Array2;
use std::collections::VecDeque;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterMethod {
    Nearest,
    Average,
    Mode,
}

impl FromStr for RasterMethod {
    type Err = DelwaqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nearest" => Ok(RasterMethod::Nearest),
            "average" => Ok(RasterMethod::Average),
            "mode" => Ok(RasterMethod::Mode),
            other => Err(DelwaqError::config(format!(
                "unsupported raster resampling method '{}', expected one of [nearest, average, mode]",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMethod {
    Value,
    Fraction,
}

impl FromStr for VectorMethod {
    type Err = DelwaqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "value" => Ok(VectorMethod::Value),
            "fraction" => Ok(VectorMethod::Fraction),
            other => Err(DelwaqError::config(format!(
                "unsupported rasterization method '{}', expected one of [value, fraction]",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMethod {
    Nearest,
    Zero,
    Constant(f64),
}

impl FillMethod {
    pub fn parse(name: &str, value: f64) -> Result<Self> {
        match name {
            "nearest" => Ok(FillMethod::Nearest),
            "zero" => Ok(FillMethod::Zero),
            "constant" => Ok(FillMethod::Constant(value)),
            other => Err(DelwaqError::config(format!(
                "unsupported fill method '{}', expected one of [nearest, zero, constant]",
                other
            ))),
        }
    }
}

/// Fills NaN cells inside `active` and sets cells outside it to NaN.
pub fn fill_missing(data: &mut Array2<f64>, active: &Array2<bool>, method: FillMethod) -> Result<()> {
    data.zip_mut_with(active, |v, &on| {
        if !on {
            *v = f64::NAN;
        }
    });
    match method {
        FillMethod::Zero | FillMethod::Constant(_) => {
            let fill = match method {
                FillMethod::Constant(c) => c,
                _ => 0.0,
            };
            data.zip_mut_with(active, |v, &on| {
                if on && v.is_nan() {
                    *v = fill;
                }
            });
        }
        FillMethod::Nearest => fill_nearest(data, active)?,
    }
    Ok(())
}

/// Breadth-first spreading of valid values into missing active cells.
fn fill_nearest(data: &mut Array2<f64>, active: &Array2<bool>) -> Result<()> {
    let (nrows, ncols) = data.dim();
    let mut queue: VecDeque<(usize, usize)> = data
        .indexed_iter()
        .filter(|(_, v)| !v.is_nan())
        .map(|(idx, _)| idx)
        .collect();
    let missing = active
        .iter()
        .zip(data.iter())
        .filter(|(on, v)| **on && v.is_nan())
        .count();
    if missing == 0 {
        return Ok(());
    }
    if queue.is_empty() {
        return Err(DelwaqError::missing(
            "source has no valid data over the model domain to fill from".to_string(),
        ));
    }
    // spread through all cells so disconnected active areas are still reached
    let mut reached = data.mapv(|v| !v.is_nan());
    while let Some((r, c)) = queue.pop_front() {
        let value = data[[r, c]];
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                let rr = r as isize + dr;
                let cc = c as isize + dc;
                if rr < 0 || cc < 0 || rr >= nrows as isize || cc >= ncols as isize {
                    continue;
                }
                let (rr, cc) = (rr as usize, cc as usize);
                if !reached[[rr, cc]] {
                    reached[[rr, cc]] = true;
                    data[[rr, cc]] = value;
                    queue.push_back((rr, cc));
                }
            }
        }
    }
    data.zip_mut_with(active, |v, &on| {
        if !on {
            *v = f64::NAN;
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_method_names() {
        assert_eq!("mode".parse::<RasterMethod>().unwrap(), RasterMethod::Mode);
        assert!("bilinear".parse::<RasterMethod>().unwrap_err().is_config());
        assert!("area".parse::<VectorMethod>().unwrap_err().is_config());
        assert!(FillMethod::parse("mean", 0.0).unwrap_err().is_config());
    }

    #[test]
    fn test_fill_zero_and_constant() {
        let active = array![[true, true], [false, true]];
        let mut data = array![[1.0, f64::NAN], [5.0, f64::NAN]];
        fill_missing(&mut data, &active, FillMethod::Zero).unwrap();
        assert_eq!(data[[0, 1]], 0.0);
        assert!(data[[1, 0]].is_nan());

        let mut data = array![[1.0, f64::NAN], [5.0, f64::NAN]];
        fill_missing(&mut data, &active, FillMethod::Constant(-2.0)).unwrap();
        assert_eq!(data[[1, 1]], -2.0);
    }

    #[test]
    fn test_fill_nearest() {
        let active = Array2::from_elem((1, 5), true);
        let mut data = array![[7.0, f64::NAN, f64::NAN, f64::NAN, 3.0]];
        fill_missing(&mut data, &active, FillMethod::Nearest).unwrap();
        assert_eq!(data, array![[7.0, 7.0, 7.0, 3.0, 3.0]]);
    }

    #[test]
    fn test_fill_nearest_without_data() {
        let active = Array2::from_elem((2, 2), true);
        let mut data = Array2::from_elem((2, 2), f64::NAN);
        assert!(fill_missing(&mut data, &active, FillMethod::Nearest).is_err());
    }
}
