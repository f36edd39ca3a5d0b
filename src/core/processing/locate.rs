//! Nearest-date matching between acquisitions.
use chrono::{Duration, NaiveDateTime};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocateError {
    #[error("no candidate acquisitions")]
    NoCandidates,
    #[error("nearest acquisition {name} is {delta_days:.2} days away (window {window_days} days)")]
    OutsideWindow {
        name: String,
        delta_days: f64,
        window_days: f64,
    },
}

/// An acquisition picked for processing.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub name: String,
    pub timestamp: NaiveDateTime,
    /// Signed `timestamp - reference`, when matched against a reference
    pub delta: Option<Duration>,
}

impl Located {
    pub fn new(name: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            timestamp,
            delta: None,
        }
    }

    /// Δt in fractional days
    pub fn delta_days(&self) -> Option<f64> {
        self.delta.map(duration_days)
    }
}

pub fn duration_days(d: Duration) -> f64 {
    d.num_seconds() as f64 / 86_400.0
}

/// Pick the candidate closest in time to `reference`.
///
/// Exact ties go to the first candidate in input order, so callers that list
/// candidates from disk sort them by name first.
pub fn nearest(
    candidates: &[(String, NaiveDateTime)],
    reference: NaiveDateTime,
    max_window: Option<Duration>,
) -> Result<Located, LocateError> {
    let mut best: Option<(&(String, NaiveDateTime), Duration)> = None;
    for candidate in candidates {
        let delta = candidate.1 - reference;
        match best {
            Some((_, best_delta)) if delta.abs() >= best_delta.abs() => {}
            _ => best = Some((candidate, delta)),
        }
    }
    let ((name, timestamp), delta) = best.ok_or(LocateError::NoCandidates)?;

    if let Some(window) = max_window {
        if delta.abs() > window {
            return Err(LocateError::OutsideWindow {
                name: name.clone(),
                delta_days: duration_days(delta),
                window_days: duration_days(window),
            });
        }
    }
    Ok(Located {
        name: name.clone(),
        timestamp: *timestamp,
        delta: Some(delta),
    })
}
