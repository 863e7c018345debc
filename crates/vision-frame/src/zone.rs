//! Geometry primitives for line and polygon zones.
//!
//! Zones are stored in normalized `[0, 1]` coordinates so a saved
//! configuration survives a camera's resolution changing; callers convert to
//! pixel space against the current frame dimensions lazily, at query time.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Which side of the oriented line a point falls on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Negative,
    Positive,
    OnLine,
}

/// A crossing-counter line defined by two normalized endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineZone {
    pub id: String,
    /// Normalized `[0, 1]` endpoints.
    pub start: Point,
    pub end: Point,
    pub count_in: u64,
    pub count_out: u64,
    /// Last known side for each track, used to detect a sign change.
    #[serde(skip)]
    last_side: std::collections::HashMap<u32, Side>,
}

impl LineZone {
    pub fn new(id: impl Into<String>, start: Point, end: Point) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            count_in: 0,
            count_out: 0,
            last_side: Default::default(),
        }
    }

    fn pixel_endpoints(&self, frame_width: u32, frame_height: u32) -> (Point, Point) {
        (
            Point {
                x: self.start.x * frame_width as f32,
                y: self.start.y * frame_height as f32,
            },
            Point {
                x: self.end.x * frame_width as f32,
                y: self.end.y * frame_height as f32,
            },
        )
    }

    fn side_of(&self, p: Point, frame_width: u32, frame_height: u32) -> Side {
        let (a, b) = self.pixel_endpoints(frame_width, frame_height);
        // Negated so that a left-to-right crossing of the line (the "in"
        // direction per spec) reads as Negative -> Positive.
        let cross = (b.y - a.y) * (p.x - a.x) - (b.x - a.x) * (p.y - a.y);
        if cross.abs() < f32::EPSILON {
            Side::OnLine
        } else if cross > 0.0 {
            Side::Positive
        } else {
            Side::Negative
        }
    }

    /// Feed one track's current anchor point through the crossing test.
    ///
    /// Returns `Some(direction)` ("in" or "out") when the track's side flipped
    /// since the last observation of this track. A track that has never been
    /// observed on this zone cannot cross on its first frame; it only seeds
    /// the baseline side.
    pub fn update(&mut self, track_id: u32, anchor: Point, frame_width: u32, frame_height: u32) -> Option<&'static str> {
        let current = self.side_of(anchor, frame_width, frame_height);
        let previous = self.last_side.insert(track_id, current);
        match (previous, current) {
            (Some(Side::Negative), Side::Positive) => {
                self.count_in += 1;
                Some("in")
            }
            (Some(Side::Positive), Side::Negative) => {
                self.count_out += 1;
                Some("out")
            }
            _ => None,
        }
    }

    /// Drop bookkeeping for a track that the tracker has retired.
    pub fn forget(&mut self, track_id: u32) {
        self.last_side.remove(&track_id);
    }

    /// Track ids this zone currently holds a side for.
    pub fn tracked_ids(&self) -> Vec<u32> {
        self.last_side.keys().copied().collect()
    }
}

/// A membership-tracking polygon defined by `>= 3` normalized vertices.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolygonZone {
    pub id: String,
    /// Normalized `[0, 1]` vertices, at least three.
    pub vertices: Vec<Point>,
    pub inside: HashSet<u32>,
}

impl PolygonZone {
    pub fn new(id: impl Into<String>, vertices: Vec<Point>) -> Self {
        assert!(vertices.len() >= 3, "a polygon zone needs at least 3 vertices");
        Self {
            id: id.into(),
            vertices,
            inside: HashSet::new(),
        }
    }

    fn pixel_vertices(&self, frame_width: u32, frame_height: u32) -> Vec<Point> {
        self.vertices
            .iter()
            .map(|v| Point {
                x: v.x * frame_width as f32,
                y: v.y * frame_height as f32,
            })
            .collect()
    }

    /// Even-odd ray-cast containment test.
    fn contains(&self, p: Point, frame_width: u32, frame_height: u32) -> bool {
        let verts = self.pixel_vertices(frame_width, frame_height);
        let mut inside = false;
        let n = verts.len();
        let mut j = n - 1;
        for i in 0..n {
            let vi = verts[i];
            let vj = verts[j];
            let intersects = ((vi.y > p.y) != (vj.y > p.y))
                && (p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x);
            if intersects {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Feed one track's current anchor point through the membership test.
    ///
    /// Returns `Some("entry")`/`Some("exit")` on a membership transition.
    pub fn update(&mut self, track_id: u32, anchor: Point, frame_width: u32, frame_height: u32) -> Option<&'static str> {
        let now_inside = self.contains(anchor, frame_width, frame_height);
        let was_inside = self.inside.contains(&track_id);
        match (was_inside, now_inside) {
            (false, true) => {
                self.inside.insert(track_id);
                Some("entry")
            }
            (true, false) => {
                self.inside.remove(&track_id);
                Some("exit")
            }
            _ => None,
        }
    }

    /// Drop bookkeeping for a track that the tracker has retired.
    pub fn forget(&mut self, track_id: u32) {
        self.inside.remove(&track_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_crossing_left_to_right_counts_in() {
        let mut line = LineZone::new("gate", Point { x: 0.5, y: 0.0 }, Point { x: 0.5, y: 1.0 });
        // moving centroid from x=0.1 to x=0.9 across a 100px-wide frame
        let xs = [0.1, 0.3, 0.5 - 1e-3, 0.5 + 1e-3, 0.7, 0.9];
        let mut crossings = vec![];
        for x in xs {
            if let Some(dir) = line.update(1, Point { x: x * 100.0, y: 50.0 }, 100, 100) {
                crossings.push(dir);
            }
        }
        assert_eq!(crossings, vec!["in"]);
        assert_eq!(line.count_in, 1);
        assert_eq!(line.count_out, 0);
    }

    #[test]
    fn polygon_membership_transitions() {
        let mut zone = PolygonZone::new(
            "box",
            vec![
                Point { x: 0.25, y: 0.25 },
                Point { x: 0.75, y: 0.25 },
                Point { x: 0.75, y: 0.75 },
                Point { x: 0.25, y: 0.75 },
            ],
        );
        assert_eq!(zone.update(1, Point { x: 10.0, y: 10.0 }, 100, 100), None);
        assert_eq!(zone.update(1, Point { x: 50.0, y: 50.0 }, 100, 100), Some("entry"));
        assert_eq!(zone.update(1, Point { x: 51.0, y: 51.0 }, 100, 100), None);
        assert_eq!(zone.update(1, Point { x: 90.0, y: 90.0 }, 100, 100), Some("exit"));
    }
}
