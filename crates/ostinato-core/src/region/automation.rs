//! Automation regions.

use ostinato_automation::AutomationPoint;
use serde::{Deserialize, Serialize};

/// Payload of an automation region: an ordered list of points in local
/// frames.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AutomationRegionData {
    points: Vec<AutomationPoint>,
}

impl AutomationRegionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[AutomationPoint] {
        &self.points
    }

    /// Insert a point, keeping the list ordered by position. A point at an
    /// existing position replaces the old one.
    pub fn add_point(&mut self, point: AutomationPoint) {
        if let Some(existing) = self
            .points
            .iter_mut()
            .find(|p| p.local_pos == point.local_pos)
        {
            *existing = point;
            return;
        }
        self.points.push(point);
        self.points.sort_by_key(|p| p.local_pos);
    }

    pub fn remove_point_at(&mut self, local_pos: i64) -> bool {
        let before = self.points.len();
        self.points.retain(|p| p.local_pos != local_pos);
        self.points.len() != before
    }

    /// Latest point at or before `local_pos`, with its index.
    pub fn point_before(&self, local_pos: i64) -> Option<(usize, &AutomationPoint)> {
        self.points
            .iter()
            .enumerate()
            .rev()
            .find(|(_, p)| p.local_pos <= local_pos)
    }

    /// The point following index `idx`, if any.
    pub fn next_point(&self, idx: usize) -> Option<&AutomationPoint> {
        self.points.get(idx + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_kept_sorted() {
        let mut data = AutomationRegionData::new();
        data.add_point(AutomationPoint::new(500, 1.0));
        data.add_point(AutomationPoint::new(0, 0.0));
        data.add_point(AutomationPoint::new(250, 0.5));

        let positions: Vec<i64> = data.points().iter().map(|p| p.local_pos).collect();
        assert_eq!(positions, vec![0, 250, 500]);
    }

    #[test]
    fn test_add_replaces_same_position() {
        let mut data = AutomationRegionData::new();
        data.add_point(AutomationPoint::new(100, 0.2));
        data.add_point(AutomationPoint::new(100, 0.9));
        assert_eq!(data.points().len(), 1);
        assert_eq!(data.points()[0].normalized_value, 0.9);
    }

    #[test]
    fn test_point_before() {
        let mut data = AutomationRegionData::new();
        data.add_point(AutomationPoint::new(0, 0.0));
        data.add_point(AutomationPoint::new(1000, 1.0));

        let (idx, point) = data.point_before(500).unwrap();
        assert_eq!(point.local_pos, 0);
        assert_eq!(data.next_point(idx).unwrap().local_pos, 1000);

        let (idx, point) = data.point_before(1000).unwrap();
        assert_eq!(point.local_pos, 1000);
        assert!(data.next_point(idx).is_none());

        assert!(data.point_before(-1).is_none());
    }

    #[test]
    fn test_remove_point() {
        let mut data = AutomationRegionData::new();
        data.add_point(AutomationPoint::new(0, 0.0));
        assert!(data.remove_point_at(0));
        assert!(!data.remove_point_at(0));
        assert!(data.points().is_empty());
    }
}
