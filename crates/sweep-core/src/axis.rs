//! Sweep axis generation.
//!
//! An axis is built either from a point count (linear interpolation between
//! both endpoints) or from a fixed step. The forward leg always ends exactly
//! on `end`; a backward leg mirrors it without repeating the turning point.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Relative slack when deciding whether a whole number of steps lands on
/// `end`. Keeps `2.0 / 0.025` from producing a spurious extra point.
const STEP_EPSILON: f64 = 1e-9;

/// Upper bound on the forward leg of a generated axis.
pub const MAX_AXIS_POINTS: usize = 1_000_000;

/// How the forward leg is spaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisSpacing {
    Count(usize),
    Step(f64),
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis {
    points: Vec<f64>,
    forward_len: usize,
    spacing: AxisSpacing,
    backward: bool,
}

impl SweepAxis {
    pub fn build(
        start: f64,
        end: f64,
        count: Option<usize>,
        step: Option<f64>,
        backward: bool,
    ) -> Result<Self, ConfigurationError> {
        check_finite("start", start)?;
        check_finite("end", end)?;

        let (forward, spacing) = match (count, step) {
            (Some(count), None) => (linspace(start, end, count)?, AxisSpacing::Count(count)),
            (None, Some(step)) => (stepped(start, end, step)?, AxisSpacing::Step(step)),
            _ => return Err(ConfigurationError::AxisSpacingAmbiguous),
        };

        Ok(Self::from_forward(forward, spacing, backward))
    }

    /// Axis from an explicit list of setpoints, visited in the given order.
    pub fn from_points(points: Vec<f64>) -> Result<Self, ConfigurationError> {
        if points.is_empty() {
            return Err(ConfigurationError::EmptyAxis);
        }
        for &p in &points {
            check_finite("setpoint", p)?;
        }
        Ok(Self::from_forward(points, AxisSpacing::Explicit, false))
    }

    fn from_forward(mut forward: Vec<f64>, spacing: AxisSpacing, backward: bool) -> Self {
        let forward_len = forward.len();
        if backward {
            let back: Vec<f64> = forward[..forward_len - 1].iter().rev().copied().collect();
            forward.extend(back);
        }
        Self {
            points: forward,
            forward_len,
            spacing,
            backward,
        }
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Length of the forward leg.
    pub fn forward_len(&self) -> usize {
        self.forward_len
    }

    pub fn spacing(&self) -> AxisSpacing {
        self.spacing
    }

    pub fn is_backward(&self) -> bool {
        self.backward
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().copied()
    }

    /// Copy of this axis with the given indices removed. Used for skip lists
    /// applied before a run.
    pub fn without_indices(&self, skip: &[usize]) -> Result<Self, ConfigurationError> {
        if let Some(&index) = skip.iter().find(|&&i| i >= self.points.len()) {
            return Err(ConfigurationError::IndexOutOfRange {
                index,
                len: self.points.len(),
            });
        }
        let points: Vec<f64> = self
            .points
            .iter()
            .enumerate()
            .filter(|(i, _)| !skip.contains(i))
            .map(|(_, v)| *v)
            .collect();
        if points.is_empty() {
            return Err(ConfigurationError::EmptyAxis);
        }
        let forward_len = self.forward_len - (0..self.forward_len).filter(|i| skip.contains(i)).count();
        Ok(Self {
            points,
            forward_len,
            spacing: AxisSpacing::Explicit,
            backward: self.backward,
        })
    }
}

impl<'a> IntoIterator for &'a SweepAxis {
    type Item = &'a f64;
    type IntoIter = std::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

fn check_finite(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigurationError::NonFinite { name, value })
    }
}

fn too_many_points(count: f64) -> ConfigurationError {
    ConfigurationError::TooManyPoints {
        what: "sweep axis",
        count,
        max: MAX_AXIS_POINTS,
    }
}

fn linspace(start: f64, end: f64, count: usize) -> Result<Vec<f64>, ConfigurationError> {
    if count < 2 {
        return Err(ConfigurationError::TooFewPoints { count });
    }
    if count > MAX_AXIS_POINTS {
        return Err(too_many_points(count as f64));
    }
    let intervals = (count - 1) as f64;
    let delta = end - start;
    let mut points: Vec<f64> = (0..count)
        .map(|i| start + delta * (i as f64 / intervals))
        .collect();
    points[count - 1] = end;
    Ok(points)
}

fn stepped(start: f64, end: f64, step: f64) -> Result<Vec<f64>, ConfigurationError> {
    if !step.is_finite() || step <= 0.0 {
        return Err(ConfigurationError::InvalidStep { step });
    }
    let span = (end - start).abs();
    let direction = if end >= start { 1.0 } else { -1.0 };
    let whole_steps = (span / step + STEP_EPSILON).floor();
    // Room for the start point and a trailing partial step.
    if !whole_steps.is_finite() || whole_steps + 2.0 > MAX_AXIS_POINTS as f64 {
        return Err(too_many_points(whole_steps + 2.0));
    }
    let whole_steps = whole_steps as usize;

    let mut points: Vec<f64> = (0..=whole_steps)
        .map(|i| start + direction * step * i as f64)
        .collect();

    let last = points.len() - 1;
    if (points[last] - end).abs() <= 2.0 * step * STEP_EPSILON {
        points[last] = end;
    } else {
        points.push(end);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn count_axis_has_both_endpoints() {
        let axis = SweepAxis::build(-1.0, 1.0, Some(21), None, false).unwrap();
        assert_eq!(axis.len(), 21);
        assert_eq!(axis.points()[0], -1.0);
        assert_eq!(axis.points()[20], 1.0);
        for (i, v) in axis.iter().enumerate() {
            let expected = -1.0 + 0.1 * i as f64;
            assert!((v - expected).abs() < 1e-12, "point {i}: {v} vs {expected}");
        }
    }

    #[test]
    fn step_axis_with_backward_leg() {
        let axis = SweepAxis::build(-1.0, 1.0, None, Some(0.025), true).unwrap();
        assert_eq!(axis.forward_len(), 81);
        assert_eq!(axis.len(), 161);
        assert_eq!(axis.points()[0], -1.0);
        assert_eq!(axis.points()[80], 1.0);
        assert_eq!(axis.points()[160], -1.0);
    }

    #[test]
    fn step_axis_ends_with_partial_step() {
        let axis = SweepAxis::build(0.0, 1.0, None, Some(0.3), false).unwrap();
        let pts = axis.points();
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[4], 1.0);
        assert!((pts[3] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn step_axis_descends() {
        let axis = SweepAxis::build(0.0, -0.5, None, Some(0.25), false).unwrap();
        assert_eq!(axis.points(), &[0.0, -0.25, -0.5]);
    }

    #[test]
    fn rejects_bad_configuration() {
        assert_eq!(
            SweepAxis::build(0.0, 1.0, Some(5), Some(0.1), false),
            Err(ConfigurationError::AxisSpacingAmbiguous)
        );
        assert_eq!(
            SweepAxis::build(0.0, 1.0, None, None, false),
            Err(ConfigurationError::AxisSpacingAmbiguous)
        );
        assert_eq!(
            SweepAxis::build(0.0, 1.0, Some(1), None, false),
            Err(ConfigurationError::TooFewPoints { count: 1 })
        );
        assert!(matches!(
            SweepAxis::build(0.0, 1.0, None, Some(-0.1), false),
            Err(ConfigurationError::InvalidStep { .. })
        ));
        assert!(matches!(
            SweepAxis::build(f64::NAN, 1.0, Some(3), None, false),
            Err(ConfigurationError::NonFinite { name: "start", .. })
        ));
    }

    #[test]
    fn huge_axes_are_rejected_before_allocating() {
        assert!(matches!(
            SweepAxis::build(0.0, 1.0, None, Some(1e-300), false),
            Err(ConfigurationError::TooManyPoints { .. })
        ));
        assert!(matches!(
            SweepAxis::build(0.0, 1.0, Some(usize::MAX), None, true),
            Err(ConfigurationError::TooManyPoints { .. })
        ));
        assert!(matches!(
            SweepAxis::build(-f64::MAX, f64::MAX, None, Some(1.0), false),
            Err(ConfigurationError::TooManyPoints { .. })
        ));
    }

    #[test]
    fn axis_at_the_limit_is_built() {
        let axis = SweepAxis::build(0.0, 1.0, Some(MAX_AXIS_POINTS), None, false).unwrap();
        assert_eq!(axis.len(), MAX_AXIS_POINTS);
        assert_eq!(axis.points()[MAX_AXIS_POINTS - 1], 1.0);
    }

    #[test]
    fn skip_list_removes_points() {
        let axis = SweepAxis::build(0.0, 4.0, Some(5), None, true).unwrap();
        let filtered = axis.without_indices(&[1, 7]).unwrap();
        assert_eq!(filtered.points(), &[0.0, 2.0, 3.0, 4.0, 3.0, 2.0, 0.0]);
        assert_eq!(filtered.forward_len(), 4);
        assert!(axis.without_indices(&[9]).is_err());
    }

    #[test]
    fn explicit_points_keep_order() {
        let axis = SweepAxis::from_points(vec![0.0, -10.0, -20.0, -10.0]).unwrap();
        assert_eq!(axis.len(), 4);
        assert_eq!(axis.spacing(), AxisSpacing::Explicit);
        assert_eq!(
            SweepAxis::from_points(Vec::new()),
            Err(ConfigurationError::EmptyAxis)
        );
    }

    proptest! {
        #[test]
        fn count_axis_is_monotonic(
            start in -100.0f64..100.0,
            end in -100.0f64..100.0,
            count in 2usize..500,
        ) {
            let axis = SweepAxis::build(start, end, Some(count), None, false).unwrap();
            let pts = axis.points();
            prop_assert_eq!(pts.len(), count);
            prop_assert_eq!(pts[0], start);
            prop_assert_eq!(pts[count - 1], end);
            for w in pts.windows(2) {
                if end >= start {
                    prop_assert!(w[1] >= w[0]);
                } else {
                    prop_assert!(w[1] <= w[0]);
                }
            }
        }

        #[test]
        fn step_axis_lands_on_end(
            start in -10.0f64..10.0,
            end in -10.0f64..10.0,
            step in 0.01f64..2.0,
        ) {
            let axis = SweepAxis::build(start, end, None, Some(step), false).unwrap();
            let pts = axis.points();
            prop_assert_eq!(pts[0], start);
            prop_assert_eq!(*pts.last().unwrap(), end);
            let n = pts.len();
            for (i, w) in pts.windows(2).enumerate() {
                let d = (w[1] - w[0]).abs();
                if i + 2 < n {
                    prop_assert!((d - step).abs() < 1e-9 * step.max(1.0));
                } else {
                    prop_assert!(d <= step * (1.0 + 1e-9));
                }
            }
        }

        #[test]
        fn backward_axis_is_palindrome(
            start in -10.0f64..10.0,
            end in -10.0f64..10.0,
            count in 2usize..200,
        ) {
            let axis = SweepAxis::build(start, end, Some(count), None, true).unwrap();
            let pts = axis.points();
            prop_assert_eq!(pts.len(), 2 * count - 1);
            for i in 0..pts.len() {
                prop_assert_eq!(pts[i], pts[pts.len() - 1 - i]);
            }
        }
    }
}
