use serde::{Deserialize, Serialize};

/// Label reported by [`FaceMatcher`] when no gallery entry is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Default distance above which the matcher reports [`UNKNOWN_LABEL`].
pub const DEFAULT_MATCHER_THRESHOLD: f32 = 0.6;

/// A 2-D landmark coordinate in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bounding box for a detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
}

/// Ordered facial landmarks in the 68-point layout.
///
/// Points 36..42 outline the left eye and 42..48 the right eye, each
/// starting at the outer corner and going clockwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Landmarks {
    pub points: Vec<Point>,
}

const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;

impl Landmarks {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// The six left-eye points, or an empty slice if the layout is short.
    pub fn left_eye(&self) -> &[Point] {
        self.points.get(LEFT_EYE).unwrap_or(&[])
    }

    /// The six right-eye points, or an empty slice if the layout is short.
    pub fn right_eye(&self) -> &[Point] {
        self.points.get(RIGHT_EYE).unwrap_or(&[])
    }
}

/// Face descriptor (128-dimensional for the usual recognition nets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two descriptors.
    ///
    /// `None` when the lengths differ or either side is empty; such
    /// descriptors are not comparable.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Option<f32> {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Length shared by every descriptor in the set. `None` for an empty
    /// set, an empty descriptor, or mixed lengths.
    pub fn common_len(descriptors: &[Descriptor]) -> Option<usize> {
        let first = descriptors.first()?.len();
        (first > 0 && descriptors.iter().all(|d| d.len() == first)).then_some(first)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One face found in a frame: where it is, its landmarks, and its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub region: BoundingBox,
    pub landmarks: Landmarks,
    pub descriptor: Descriptor,
}

/// Reference descriptors for one known identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledDescriptors {
    /// Identity key (the student id).
    pub label: String,
    /// Display name surfaced on a successful match.
    pub name: String,
    pub descriptors: Vec<Descriptor>,
}

/// Closest gallery identity for a probe descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub label: String,
    pub name: Option<String>,
    pub distance: f32,
}

impl BestMatch {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

/// Strategy for finding the closest known identity to a probe descriptor.
pub trait Matcher {
    /// Returns `None` only when the gallery is empty.
    fn best_match(&self, probe: &Descriptor) -> Option<BestMatch>;
}

/// Nearest-neighbour matcher over labeled descriptors.
///
/// The distance to a label is the mean Euclidean distance to each of its
/// reference descriptors. References whose length differs from the probe
/// are ignored, and a label with none left never matches. Matches at or above `distance_threshold` are
/// reported under [`UNKNOWN_LABEL`], still carrying the best distance.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    gallery: Vec<LabeledDescriptors>,
    distance_threshold: f32,
}

impl FaceMatcher {
    pub fn new(gallery: Vec<LabeledDescriptors>, distance_threshold: f32) -> Self {
        let gallery: Vec<_> = gallery
            .into_iter()
            .filter(|entry| !entry.descriptors.is_empty())
            .collect();
        tracing::debug!(
            identities = gallery.len(),
            threshold = distance_threshold,
            "face matcher built"
        );
        Self {
            gallery,
            distance_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.gallery.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gallery.is_empty()
    }

    fn mean_distance(probe: &Descriptor, entry: &LabeledDescriptors) -> Option<f32> {
        let distances: Vec<f32> = entry
            .descriptors
            .iter()
            .filter_map(|reference| probe.euclidean_distance(reference))
            .collect();
        if distances.len() < entry.descriptors.len() {
            tracing::warn!(
                label = %entry.label,
                skipped = entry.descriptors.len() - distances.len(),
                probe_len = probe.len(),
                "reference descriptors with mismatched length ignored"
            );
        }
        if distances.is_empty() {
            return None;
        }
        Some(distances.iter().sum::<f32>() / distances.len() as f32)
    }
}

impl Matcher for FaceMatcher {
    fn best_match(&self, probe: &Descriptor) -> Option<BestMatch> {
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        // Always walk the whole gallery, no early exit.
        for (i, entry) in self.gallery.iter().enumerate() {
            let Some(distance) = Self::mean_distance(probe, entry) else {
                continue;
            };
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        if self.gallery.is_empty() {
            return None;
        }
        if let Some(entry) = best_idx
            .filter(|_| best_distance < self.distance_threshold)
            .map(|idx| &self.gallery[idx])
        {
            Some(BestMatch {
                label: entry.label.clone(),
                name: Some(entry.name.clone()),
                distance: best_distance,
            })
        } else {
            Some(BestMatch {
                label: UNKNOWN_LABEL.to_string(),
                name: None,
                distance: best_distance,
            })
        }
    }
}
