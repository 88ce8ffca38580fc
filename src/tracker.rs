//! Cross-frame object tracker.
//!
//! Matches each incoming detection to a live tracked object of the same class by
//! IoU. Objects unseen for `STALE_AFTER_S` are evicted before every match.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::detect::Detection;
use crate::geometry::{BBox, Zone};

/// Tracked objects unseen for this long are evicted.
pub const STALE_AFTER_S: f64 = 5.0;

/// A match requires IoU strictly greater than this.
pub const MATCH_IOU_THRESHOLD: f64 = 0.5;

/// Tracker-local identity. Monotonically increasing, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackedObject {
    pub id: ObjectId,
    pub class_name: String,
    pub bbox: BBox,
    pub first_seen: f64,
    pub last_seen: f64,
    pub zone: Zone,
    pub confidence: f32,
    pub trajectory: Vec<BBox>,
}

impl TrackedObject {
    /// Seconds between first and last sighting.
    pub fn dwell_s(&self) -> f64 {
        self.last_seen - self.first_seen
    }
}

/// Result of feeding one detection to the tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackOutcome {
    pub id: ObjectId,
    /// True when a new identity was allocated.
    pub is_new: bool,
    /// Zone change of a matched object, as `(from, to)`.
    pub transition: Option<(Zone, Zone)>,
}

#[derive(Debug)]
pub struct ObjectTracker {
    // BTreeMap keeps iteration in id order: ties on IoU resolve to the lowest id.
    objects: BTreeMap<ObjectId, TrackedObject>,
    next_id: u64,
}

impl ObjectTracker {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Match `detection` against live objects at time `now` (epoch seconds).
    ///
    /// Never fails: no match simply allocates a new identity.
    pub fn track(&mut self, detection: &Detection, now: f64) -> TrackOutcome {
        self.evict_stale(now);

        let mut best: Option<(ObjectId, f64)> = None;
        for (id, obj) in &self.objects {
            if obj.class_name != detection.class_name {
                continue;
            }
            let iou = detection.bbox.iou(&obj.bbox);
            let threshold = best.map(|(_, b)| b).unwrap_or(MATCH_IOU_THRESHOLD);
            if iou > threshold {
                best = Some((*id, iou));
            }
        }

        if let Some((id, _)) = best {
            if let Some(obj) = self.objects.get_mut(&id) {
                let old_zone = obj.zone;
                obj.bbox = detection.bbox;
                obj.last_seen = now;
                obj.zone = detection.zone;
                obj.confidence = detection.confidence;
                obj.trajectory.push(detection.bbox);
                let transition = (old_zone != detection.zone).then_some((old_zone, detection.zone));
                return TrackOutcome {
                    id,
                    is_new: false,
                    transition,
                };
            }
        }

        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(
            id,
            TrackedObject {
                id,
                class_name: detection.class_name.clone(),
                bbox: detection.bbox,
                first_seen: now,
                last_seen: now,
                zone: detection.zone,
                confidence: detection.confidence,
                trajectory: vec![detection.bbox],
            },
        );
        TrackOutcome {
            id,
            is_new: true,
            transition: None,
        }
    }

    /// Drop every object unseen for at least `STALE_AFTER_S`.
    pub fn evict_stale(&mut self, now: f64) {
        self.objects
            .retain(|_, obj| now - obj.last_seen < STALE_AFTER_S);
    }

    pub fn get(&self, id: ObjectId) -> Option<&TrackedObject> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self::new()
    }
}
