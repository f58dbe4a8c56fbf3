use crate::error::{DelwaqError, Result};
use chrono::NaiveDateTime;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeMethod {
    Nearest,
    Linear,
}

impl FromStr for TimeMethod {
    type Err = DelwaqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nearest" => Ok(TimeMethod::Nearest),
            "linear" => Ok(TimeMethod::Linear),
            other => Err(DelwaqError::config(format!(
                "unsupported time alignment '{}', expected one of [nearest, linear]",
                other
            ))),
        }
    }
}

/// Target sample as `(1 - weight) * source[index] + weight * source[next]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub index: usize,
    pub next: usize,
    pub weight: f64,
}

impl Alignment {
    fn exact(index: usize) -> Self {
        Alignment {
            index,
            next: index,
            weight: 0.0,
        }
    }

    pub fn combine(&self, a: f64, b: f64) -> f64 {
        if self.weight == 0.0 {
            a
        } else {
            (1.0 - self.weight) * a + self.weight * b
        }
    }
}

/// Maps each target timestamp onto the source time axis.
pub fn align(
    source: &[NaiveDateTime],
    targets: &[NaiveDateTime],
    method: TimeMethod,
) -> Result<Vec<Alignment>> {
    let (Some(first), Some(last)) = (source.first(), source.last()) else {
        return Err(DelwaqError::Time("source has an empty time axis".to_string()));
    };
    if source.windows(2).any(|w| w[1] <= w[0]) {
        return Err(DelwaqError::Time(
            "source time axis is not strictly increasing".to_string(),
        ));
    }
    let mut out = Vec::with_capacity(targets.len());
    for t in targets {
        if t < first || t > last {
            return Err(DelwaqError::config(format!(
                "requested time {} is outside the source period {} - {}",
                t, first, last
            )));
        }
        let alignment = match source.binary_search(t) {
            Ok(i) => Alignment::exact(i),
            Err(i) => {
                // source[i - 1] < t < source[i]
                let before = source[i - 1];
                let after = source[i];
                let span = (after - before).num_milliseconds() as f64;
                let offset = (*t - before).num_milliseconds() as f64;
                match method {
                    TimeMethod::Nearest if offset <= span - offset => Alignment::exact(i - 1),
                    TimeMethod::Nearest => Alignment::exact(i),
                    TimeMethod::Linear => Alignment {
                        index: i - 1,
                        next: i,
                        weight: offset / span,
                    },
                }
            }
        };
        out.push(alignment);
    }
    Ok(out)
}

/// Moves every record one step later; the first record repeats the first sample.
pub fn shift_one_step<T: Clone>(records: &mut Vec<T>) {
    if let Some(first) = records.first().cloned() {
        records.pop();
        records.insert(0, first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn axis(start_hour: i64, n: usize, step_hours: i64) -> Vec<NaiveDateTime> {
        let t0 = crate::config::parse_datetime("2020-01-01").unwrap();
        (0..n as i64)
            .map(|i| t0 + Duration::hours(start_hour + i * step_hours))
            .collect()
    }

    #[test]
    fn test_exact_alignment() {
        let source = axis(0, 48, 1);
        let targets = axis(0, 3, 24);
        let a = align(&source, &targets, TimeMethod::Nearest).unwrap();
        assert_eq!(a.iter().map(|x| x.index).collect::<Vec<_>>(), vec![0, 24, 47 - 23]);
    }

    #[test]
    fn test_nearest_and_linear() {
        let source = axis(0, 3, 6);
        let targets = axis(2, 2, 2);
        let nearest = align(&source, &targets, TimeMethod::Nearest).unwrap();
        assert_eq!(nearest[0].index, 0);
        assert_eq!(nearest[1].index, 1);

        let linear = align(&source, &targets, TimeMethod::Linear).unwrap();
        assert_eq!(linear[0].index, 0);
        assert_eq!(linear[0].next, 1);
        assert!((linear[0].weight - 1.0 / 3.0).abs() < 1e-12);
        assert!((linear[1].combine(0.0, 6.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_outside_source() {
        let source = axis(0, 3, 24);
        let targets = axis(24, 3, 24);
        assert!(align(&source, &targets, TimeMethod::Nearest).unwrap_err().is_config());
    }

    #[test]
    fn test_shift_preserves_length() {
        let mut records = vec![1, 2, 3, 4];
        shift_one_step(&mut records);
        assert_eq!(records, vec![1, 1, 2, 3]);

        let mut empty: Vec<i32> = Vec::new();
        shift_one_step(&mut empty);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_unknown_time_method() {
        assert!("cubic".parse::<TimeMethod>().unwrap_err().is_config());
    }
}
