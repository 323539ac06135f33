//! Dissolving overlapping buffers into merged regions.
//!
//! Runs over the complete buffer set assembled after the parallel-phase
//! barrier. An R-tree over bounding boxes prunes the pairwise intersection
//! tests; union-find groups connected buffers; each component dissolves in
//! ascending feature-id order so the output never depends on how features
//! were partitioned upstream or on worker completion order.

use std::collections::BTreeMap;

use geo::{BoundingRect, MultiPolygon};
use rstar::{
    primitives::{GeomWithData, Rectangle},
    RTree, AABB,
};
use thiserror::Error;

use crate::buffer::BufferPolygon;
use crate::feature::{AttributeValue, Attributes, FeatureId};
use crate::geometry::GeometryEngine;

/// A region formed by dissolving one or more overlapping buffer polygons.
///
/// Terminal entity of the geometry pipeline; persisted as-is. The
/// contributing-id set is never empty, and each feature id appears in
/// exactly one region.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRegion {
    /// Dissolved geometry.
    pub geometry: MultiPolygon<f64>,
    /// Sorted ids of every contributing feature.
    pub contributing_ids: Vec<FeatureId>,
    /// Reconciled attributes.
    pub attributes: Attributes,
    /// Largest buffer distance among contributors, in CRS units.
    pub buffer_distance: f64,
}

/// Irreconcilable attribute disagreement between contributing features.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeConflictError {
    /// Two features carried different value types under the same key.
    #[error(
        "attribute {key:?} has conflicting value types between features {first} and {second}"
    )]
    TypeMismatch {
        /// The disputed attribute key.
        key: String,
        /// Lowest feature id carrying the key.
        first: FeatureId,
        /// Feature that disagreed on the type.
        second: FeatureId,
    },
}

/// Dissolves buffer polygons into merged regions.
#[derive(Debug)]
pub struct MergeEngine<E = crate::geometry::GeoEngine> {
    engine: E,
}

impl<E: GeometryEngine> MergeEngine<E> {
    /// Construct a merge engine over the given geometry backend.
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Dissolve all intersecting-or-touching buffers into merged regions.
    ///
    /// Output regions are sorted by their lowest contributing feature id.
    /// The result is identical for any upstream partitioning of the same
    /// buffer set.
    pub fn merge(
        &self,
        buffers: &[BufferPolygon],
    ) -> Result<Vec<MergedRegion>, MergeConflictError> {
        if buffers.is_empty() {
            return Ok(Vec::new());
        }

        // Canonical processing order: ascending feature id.
        let mut order: Vec<usize> = (0..buffers.len()).collect();
        order.sort_unstable_by_key(|&i| buffers[i].feature_id);

        let mut entries = Vec::with_capacity(order.len());
        for (position, &index) in order.iter().enumerate() {
            if let Some(rect) = buffers[index].geometry.bounding_rect() {
                entries.push(GeomWithData::new(
                    Rectangle::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    position,
                ));
            }
        }
        let tree = RTree::bulk_load(entries);

        let mut components = UnionFind::new(order.len());
        for (position, &index) in order.iter().enumerate() {
            let Some(rect) = buffers[index].geometry.bounding_rect() else {
                continue;
            };
            let envelope =
                AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
            for candidate in tree.locate_in_envelope_intersecting(&envelope) {
                let other = candidate.data;
                if other <= position || components.find(position) == components.find(other) {
                    continue;
                }
                let a = &buffers[index].geometry;
                let b = &buffers[order[other]].geometry;
                if self.engine.intersects(a, b) {
                    components.union(position, other);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for position in 0..order.len() {
            groups
                .entry(components.find(position))
                .or_default()
                .push(position);
        }

        let mut regions = Vec::with_capacity(groups.len());
        for positions in groups.into_values() {
            // Positions are already in ascending feature-id order.
            let members: Vec<&BufferPolygon> =
                positions.iter().map(|&p| &buffers[order[p]]).collect();
            regions.push(self.dissolve(&members)?);
        }
        regions.sort_unstable_by_key(|region| region.contributing_ids[0]);

        log::info!(
            "merged {} buffers into {} regions",
            buffers.len(),
            regions.len()
        );
        Ok(regions)
    }

    fn dissolve(&self, members: &[&BufferPolygon]) -> Result<MergedRegion, MergeConflictError> {
        let mut geometry = members[0].geometry.clone();
        for member in &members[1..] {
            geometry = self.engine.union(&geometry, &member.geometry);
        }
        let contributing_ids: Vec<FeatureId> = members.iter().map(|m| m.feature_id).collect();
        let attributes = reconcile_attributes(members)?;
        let buffer_distance = members
            .iter()
            .map(|m| m.distance)
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(MergedRegion {
            geometry,
            contributing_ids,
            attributes,
            buffer_distance,
        })
    }
}

/// Reconcile attributes across contributors, in ascending feature-id order:
/// numeric fields take the maximum, categorical fields keep the value from
/// the lowest contributing feature id.
fn reconcile_attributes(members: &[&BufferPolygon]) -> Result<Attributes, MergeConflictError> {
    let mut result = Attributes::new();
    let mut owners: BTreeMap<String, FeatureId> = BTreeMap::new();

    for member in members {
        for (key, value) in &member.attributes {
            let Some(existing) = result.get_mut(key) else {
                result.insert(key.clone(), value.clone());
                owners.insert(key.clone(), member.feature_id);
                continue;
            };
            match (&existing, value) {
                (AttributeValue::Number(current), AttributeValue::Number(candidate)) => {
                    if candidate > current {
                        *existing = AttributeValue::Number(*candidate);
                    }
                }
                // Lowest feature id already owns categorical fields.
                (AttributeValue::Text(_), AttributeValue::Text(_))
                | (AttributeValue::Bool(_), AttributeValue::Bool(_)) => {}
                _ => {
                    return Err(MergeConflictError::TypeMismatch {
                        key: key.clone(),
                        first: owners.get(key).copied().unwrap_or(member.feature_id),
                        second: member.feature_id,
                    });
                }
            }
        }
    }
    Ok(result)
}

/// Path-compressed union-find over component positions.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            // Anchor on the smaller root so components keep a stable anchor.
            let (low, high) = if root_a < root_b {
                (root_a, root_b)
            } else {
                (root_b, root_a)
            };
            self.parent[high] = low;
        }
    }
}
