//! Annotation markers placed by the agent.
//!
//! Each marker lives for a fixed time-to-live and is identified by a unique
//! id, so expiry of one marker never removes a newer one at the same spot.

use std::time::Duration;
use tokio::time::Instant;

pub const MARKER_TTL: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationMarker {
    pub id: u64,
    /// Percent of screen width, 0-100
    pub x: f64,
    /// Percent of screen height, 0-100
    pub y: f64,
    pub label: String,
}

#[derive(Debug)]
struct Placed {
    marker: AnnotationMarker,
    expires_at: Instant,
}

/// The live marker set.
#[derive(Debug, Default)]
pub struct AnnotationOverlay {
    placed: Vec<Placed>,
    next_id: u64,
}

impl AnnotationOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a marker at `now`; it expires `MARKER_TTL` later.
    pub fn place(&mut self, x: f64, y: f64, label: String, now: Instant) -> AnnotationMarker {
        self.next_id += 1;
        let marker = AnnotationMarker {
            id: self.next_id,
            x: x.clamp(0.0, 100.0),
            y: y.clamp(0.0, 100.0),
            label,
        };
        self.placed.push(Placed {
            marker: marker.clone(),
            expires_at: now + MARKER_TTL,
        });
        marker
    }

    /// Drop every marker whose deadline has passed. Returns true if any went.
    pub fn sweep(&mut self, now: Instant) -> bool {
        let before = self.placed.len();
        self.placed.retain(|p| p.expires_at > now);
        self.placed.len() != before
    }

    /// Earliest pending expiry, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.placed.iter().map(|p| p.expires_at).min()
    }

    pub fn markers(&self) -> Vec<AnnotationMarker> {
        self.placed.iter().map(|p| p.marker.clone()).collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.placed.iter().any(|p| p.marker.id == id)
    }

    pub fn len(&self) -> usize {
        self.placed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_expires_after_four_seconds() {
        let mut overlay = AnnotationOverlay::new();
        let t = Instant::now();
        let marker = overlay.place(42.0, 17.0, "Submit".into(), t);

        overlay.sweep(t + Duration::from_millis(3999));
        assert!(overlay.contains(marker.id));

        assert!(overlay.sweep(t + Duration::from_millis(4001)));
        assert!(!overlay.contains(marker.id));
        assert!(overlay.next_deadline().is_none());
    }

    #[test]
    fn markers_coexist_and_expire_independently() {
        let mut overlay = AnnotationOverlay::new();
        let t = Instant::now();
        let first = overlay.place(10.0, 10.0, "a".into(), t);
        let second = overlay.place(10.0, 10.0, "b".into(), t + Duration::from_millis(2000));
        assert_ne!(first.id, second.id);
        assert_eq!(overlay.next_deadline(), Some(t + MARKER_TTL));

        overlay.sweep(t + Duration::from_millis(4500));
        assert!(!overlay.contains(first.id));
        assert!(overlay.contains(second.id));
        assert_eq!(overlay.len(), 1);
    }

    #[test]
    fn coordinates_are_clamped_to_percent_range() {
        let mut overlay = AnnotationOverlay::new();
        let m = overlay.place(-5.0, 140.0, "edge".into(), Instant::now());
        assert_eq!((m.x, m.y), (0.0, 100.0));
    }
}
