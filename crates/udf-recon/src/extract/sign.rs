//! Inside/outside labelling of an unsigned field from its gradients.

use std::collections::VecDeque;

use tracing::debug;

use crate::passes::{DistanceVolume, GradientVolume, NarrowBand};

/// Side labels for the band points and their halo.
///
/// `+1` is outside, `-1` inside. Points neither in the band nor adjacent to
/// it are unlabelled.
#[derive(Debug, Clone)]
pub struct SignField {
    sides: Vec<i8>,
    components: usize,
    conflicts: usize,
    halo_points: usize,
}

impl SignField {
    /// Side of a point, if labelled.
    #[inline]
    pub fn side(&self, flat: usize) -> Option<i8> {
        match self.sides[flat] {
            0 => None,
            side => Some(side),
        }
    }

    /// `side * distance` for a labelled point.
    #[inline]
    pub fn signed_distance(&self, volume: &DistanceVolume, flat: usize) -> Option<f64> {
        self.side(flat).map(|side| f64::from(side) * volume.get(flat))
    }

    /// Connected components of the band, one seed each.
    pub fn components(&self) -> usize {
        self.components
    }

    /// Band edges whose endpoint labels disagree with their gradients.
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    /// Non-band points labelled from a neighbouring band point.
    pub fn halo_points(&self) -> usize {
        self.halo_points
    }
}

/// Label band points by flooding across 6-connected neighbours, then label
/// the halo.
///
/// Each component is seeded at its lowest flat index, which is labelled
/// outside. Stepping to a neighbour flips the side when the two gradients
/// point in opposite directions (`g_a · g_b < 0`). A halo point copies the
/// side of the closest band point among its 26 neighbours, ties going to the
/// lowest flat index.
pub fn infer_signs(
    volume: &DistanceVolume,
    band: &NarrowBand,
    gradients: &GradientVolume,
) -> SignField {
    let grid = volume.grid();
    let mut sides = vec![0i8; grid.len()];
    let mut components = 0;
    let mut conflicts = 0;
    let mut queue = VecDeque::new();

    let flips = |a: usize, b: usize| match (gradients.get(a), gradients.get(b)) {
        (Some(ga), Some(gb)) => ga.dot(gb) < 0.0,
        _ => false,
    };

    for &seed in band.indices() {
        if sides[seed] != 0 {
            continue;
        }
        components += 1;
        sides[seed] = 1;
        queue.push_back(seed);

        while let Some(a) = queue.pop_front() {
            let side = sides[a];
            for b in grid.neighbors6(a) {
                if !band.contains(b) {
                    continue;
                }
                let expected = if flips(a, b) { -side } else { side };
                if sides[b] == 0 {
                    sides[b] = expected;
                    queue.push_back(b);
                } else if b < a && sides[b] != expected {
                    // Checked from the higher index only, so each edge counts once
                    conflicts += 1;
                }
            }
        }
    }

    let mut halo_points = 0;
    for &flat in band.indices() {
        for halo in grid.neighbors26(flat) {
            if band.contains(halo) || sides[halo] != 0 {
                continue;
            }
            let nearest = grid
                .neighbors26(halo)
                .filter(|&b| band.contains(b))
                .fold(None, |best: Option<usize>, b| match best {
                    Some(current) if volume.get(current) <= volume.get(b) => Some(current),
                    _ => Some(b),
                });
            if let Some(source) = nearest {
                sides[halo] = sides[source];
                halo_points += 1;
            }
        }
    }

    debug!(
        components,
        conflicts,
        halo_points,
        band_points = band.len(),
        "Inferred sides"
    );

    SignField {
        sides,
        components,
        conflicts,
        halo_points,
    }
}
