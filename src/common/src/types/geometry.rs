// Copyright 2025 Strata Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use geo::BoundingRect;
use geo_types::{Coord, Rect};
use serde::{Deserialize, Serialize};

/// Geometry scalar wrapping `geo_types`.
///
/// The engine only ever needs the bounding envelope, point coordinates and
/// collection decomposition from it; full spatial relations are delegated to
/// `geo` by the residual filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry(geo_types::Geometry<f64>);

impl Geometry {
    pub fn new(inner: geo_types::Geometry<f64>) -> Self {
        Self(inner)
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self(geo_types::Geometry::Point(geo_types::Point::new(x, y)))
    }

    pub fn rect(min: (f64, f64), max: (f64, f64)) -> Self {
        Self(geo_types::Geometry::Rect(Rect::new(
            Coord { x: min.0, y: min.1 },
            Coord { x: max.0, y: max.1 },
        )))
    }

    pub fn inner(&self) -> &geo_types::Geometry<f64> {
        &self.0
    }

    pub fn into_inner(self) -> geo_types::Geometry<f64> {
        self.0
    }

    /// Minimal axis-aligned envelope, `None` for empty geometries.
    pub fn envelope(&self) -> Option<Rect<f64>> {
        self.0.bounding_rect()
    }

    /// Coordinates when the geometry is a single point.
    pub fn as_point(&self) -> Option<(f64, f64)> {
        match &self.0 {
            geo_types::Geometry::Point(p) => Some((p.x(), p.y())),
            _ => None,
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self.0, geo_types::Geometry::Point(_))
    }

    /// Break collections into their top-level parts; a simple geometry
    /// yields itself. Used when an extended-object index wants one covering
    /// cell per part.
    pub fn decompose(&self) -> Vec<Geometry> {
        match &self.0 {
            geo_types::Geometry::GeometryCollection(gc) => gc
                .0
                .iter()
                .flat_map(|g| Geometry::new(g.clone()).decompose())
                .collect(),
            geo_types::Geometry::MultiPoint(mp) => mp
                .0
                .iter()
                .map(|p| Geometry::new(geo_types::Geometry::Point(*p)))
                .collect(),
            geo_types::Geometry::MultiLineString(mls) => mls
                .0
                .iter()
                .map(|l| Geometry::new(geo_types::Geometry::LineString(l.clone())))
                .collect(),
            geo_types::Geometry::MultiPolygon(mp) => mp
                .0
                .iter()
                .map(|p| Geometry::new(geo_types::Geometry::Polygon(p.clone())))
                .collect(),
            _ => vec![self.clone()],
        }
    }

    pub fn estimated_size(&self) -> usize {
        match &self.0 {
            geo_types::Geometry::Point(_) => 16,
            geo_types::Geometry::Rect(_) => 32,
            geo_types::Geometry::Line(_) => 32,
            geo_types::Geometry::LineString(l) => l.0.len() * 16,
            geo_types::Geometry::Polygon(p) => {
                (p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>()) * 16
            }
            geo_types::Geometry::MultiPoint(m) => m.0.len() * 16,
            geo_types::Geometry::MultiLineString(m) => {
                m.0.iter().map(|l| l.0.len() * 16).sum()
            }
            geo_types::Geometry::MultiPolygon(m) => {
                m.0.iter().map(|p| p.exterior().0.len() * 16).sum()
            }
            geo_types::Geometry::GeometryCollection(gc) => gc
                .0
                .iter()
                .map(|g| Geometry::new(g.clone()).estimated_size())
                .sum(),
            geo_types::Geometry::Triangle(_) => 48,
        }
    }
}

impl From<geo_types::Geometry<f64>> for Geometry {
    fn from(inner: geo_types::Geometry<f64>) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use geo_types::{polygon, LineString, MultiPolygon};

    use super::*;

    #[test]
    fn test_point_envelope() {
        let p = Geometry::point(40.0, 60.0);
        assert_eq!(p.as_point(), Some((40.0, 60.0)));
        let env = p.envelope().unwrap();
        assert_eq!(env.min().x, 40.0);
        assert_eq!(env.max().y, 60.0);
    }

    #[test]
    fn test_polygon_envelope() {
        let poly = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 5.0),
            (x: 0.0, y: 5.0),
        ];
        let g = Geometry::new(geo_types::Geometry::Polygon(poly));
        assert!(!g.is_point());
        let env = g.envelope().unwrap();
        assert_eq!((env.min().x, env.min().y), (0.0, 0.0));
        assert_eq!((env.max().x, env.max().y), (10.0, 5.0));
    }

    #[test]
    fn test_decompose_multi() {
        let a = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let b = polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0)];
        let g = Geometry::new(geo_types::Geometry::MultiPolygon(MultiPolygon(vec![a, b])));
        assert_eq!(g.decompose().len(), 2);

        let line = Geometry::new(geo_types::Geometry::LineString(LineString::from(vec![
            (0.0, 0.0),
            (1.0, 1.0),
        ])));
        assert_eq!(line.decompose().len(), 1);
    }
}
