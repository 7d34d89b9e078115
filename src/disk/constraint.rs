//! Constraints on where a region may start and end.
//!
//! A [`Constraint`] combines four restrictions: alignment of the start and
//! end sectors, ranges the start and end must fall in, and bounds on the
//! length. Constraints compose by intersection and resolve to the concrete
//! geometry nearest a target.

use std::sync::Arc;

use super::alignment::Alignment;
use super::device::Device;
use super::geometry::Geometry;
use super::Sector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    start_align: Alignment,
    end_align: Alignment,
    start_range: Geometry,
    end_range: Geometry,
    min_size: Sector,
    max_size: Sector,
}

impl Constraint {
    /// Returns `None` when the size bounds admit nothing.
    pub fn new(
        start_align: Alignment,
        end_align: Alignment,
        start_range: Geometry,
        end_range: Geometry,
        min_size: Sector,
        max_size: Sector,
    ) -> Option<Self> {
        if min_size < 1 || max_size < min_size || !start_range.same_device(&end_range) {
            return None;
        }
        Some(Self {
            start_align,
            end_align,
            start_range,
            end_range,
            min_size,
            max_size,
        })
    }

    /// Satisfied by every geometry on `dev`.
    pub fn any(dev: &Arc<Device>) -> Self {
        let whole = Geometry::whole(dev);
        Self {
            start_align: Alignment::ANY,
            end_align: Alignment::ANY,
            start_range: whole.clone(),
            end_range: whole,
            min_size: 1,
            max_size: dev.length(),
        }
    }

    /// Satisfied by `geom` only.
    pub fn exact(geom: &Geometry) -> Self {
        Self {
            start_align: Alignment::exact(geom.start()),
            end_align: Alignment::exact(geom.end()),
            start_range: geom.head(),
            end_range: geom.tail(),
            min_size: geom.length(),
            max_size: geom.length(),
        }
    }

    /// Satisfied by every geometry inside `max`.
    pub fn from_max(max: &Geometry) -> Self {
        Self {
            start_align: Alignment::ANY,
            end_align: Alignment::ANY,
            start_range: max.clone(),
            end_range: max.clone(),
            min_size: 1,
            max_size: max.length(),
        }
    }

    /// Satisfied by every geometry containing `min`.
    pub fn from_min(min: &Geometry) -> Self {
        let dev = min.device();
        let head = Geometry::from_bounds(dev, 0, min.start()).unwrap_or_else(|_| min.clone());
        let tail =
            Geometry::from_bounds(dev, min.end(), dev.length() - 1).unwrap_or_else(|_| min.clone());
        Self {
            start_align: Alignment::ANY,
            end_align: Alignment::ANY,
            start_range: head,
            end_range: tail,
            min_size: min.length(),
            max_size: dev.length(),
        }
    }

    /// Satisfied by every geometry containing `min` and inside `max`.
    pub fn from_min_max(min: &Geometry, max: &Geometry) -> Option<Self> {
        if !max.test_inside(min) {
            return None;
        }
        let dev = min.device();
        let head = Geometry::from_bounds(dev, max.start(), min.start()).ok()?;
        let tail = Geometry::from_bounds(dev, min.end(), max.end()).ok()?;
        Self::new(
            Alignment::ANY,
            Alignment::ANY,
            head,
            tail,
            min.length(),
            max.length(),
        )
    }

    pub fn start_align(&self) -> &Alignment {
        &self.start_align
    }

    pub fn end_align(&self) -> &Alignment {
        &self.end_align
    }

    pub fn start_range(&self) -> &Geometry {
        &self.start_range
    }

    pub fn end_range(&self) -> &Geometry {
        &self.end_range
    }

    pub fn min_size(&self) -> Sector {
        self.min_size
    }

    pub fn max_size(&self) -> Sector {
        self.max_size
    }

    pub fn device(&self) -> &Arc<Device> {
        self.start_range.device()
    }

    /// The constraint satisfied exactly by geometries satisfying both, or
    /// `None` when no geometry does.
    pub fn intersect(&self, other: &Constraint) -> Option<Constraint> {
        let start_align = self.start_align.intersect(&other.start_align)?;
        let end_align = self.end_align.intersect(&other.end_align)?;
        let start_range = self.start_range.intersect(&other.start_range)?;
        let end_range = self.end_range.intersect(&other.end_range)?;
        Constraint::new(
            start_align,
            end_align,
            start_range,
            end_range,
            self.min_size.max(other.min_size),
            self.max_size.min(other.max_size),
        )
    }

    /// Ends reachable from `start` given the end range and the size bounds.
    fn end_range_for(&self, start: Sector) -> Option<Geometry> {
        let dev = self.device();
        let first = start + self.min_size - 1;
        if first >= dev.length() {
            return None;
        }
        let last = (start + self.max_size - 1).min(dev.length() - 1);
        let sizes = Geometry::from_bounds(dev, first, last).ok()?;
        sizes.intersect(&self.end_range)
    }

    /// Starts that leave at least one aligned end in reach.
    fn canonical_start_range(&self) -> Option<Geometry> {
        let first_end = self
            .end_align
            .align_up(Some(&self.end_range), self.end_range.start())?;
        let last_end = self
            .end_align
            .align_down(Some(&self.end_range), self.end_range.end())?;

        let min_start = (first_end - self.max_size + 1).max(0);
        let max_start = last_end - self.min_size + 1;
        if max_start < 0 || min_start > max_start {
            return None;
        }
        let sizes = Geometry::from_bounds(self.device(), min_start, max_start).ok()?;
        sizes.intersect(&self.start_range)
    }

    fn nearest_start(&self, start: Sector) -> Option<Sector> {
        let range = self.canonical_start_range()?;
        let result = self.start_align.align_nearest(Some(&range), start)?;
        // the chosen start must leave an aligned end within reach
        let ends = self.end_range_for(result)?;
        self.end_align
            .align_nearest(Some(&ends), ends.start())
            .map(|_| result)
    }

    fn nearest_end(&self, start: Sector, end: Sector) -> Option<Sector> {
        let ends = self.end_range_for(start)?;
        self.end_align.align_nearest(Some(&ends), end)
    }

    /// The geometry satisfying the constraint that is closest to `target`:
    /// the nearest valid start first, then the nearest valid end for it.
    pub fn solve_nearest(&self, target: &Geometry) -> Option<Geometry> {
        let start = self.nearest_start(target.start())?;
        let end = self.nearest_end(start, target.end())?;
        Geometry::from_bounds(self.device(), start, end).ok()
    }

    /// The largest geometry satisfying the constraint.
    pub fn solve_max(&self) -> Option<Geometry> {
        self.solve_nearest(&Geometry::whole(self.device()))
    }

    pub fn is_solution(&self, geom: &Geometry) -> bool {
        self.start_align.is_aligned(Some(&self.start_range), geom.start())
            && self.end_align.is_aligned(Some(&self.end_range), geom.end())
            && geom.length() >= self.min_size
            && geom.length() <= self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_accepts_everything() {
        let dev = Device::memory("mem0", 1000, 512);
        let any = Constraint::any(&dev);
        let geom = Geometry::new(&dev, 123, 456).unwrap();
        assert!(any.is_solution(&geom));
        assert_eq!(any.solve_nearest(&geom), Some(geom));
        assert_eq!(any.solve_max().unwrap().length(), 1000);
    }

    #[test]
    fn test_exact_intersections() {
        let dev = Device::memory("mem0", 1000, 512);
        let geom = Geometry::new(&dev, 150, 101).unwrap();
        let exact = Constraint::exact(&geom);
        assert!(exact.is_solution(&geom));
        assert!(!exact.is_solution(&Geometry::new(&dev, 150, 100).unwrap()));

        let room = Geometry::new(&dev, 100, 300).unwrap();
        let fits = Constraint::from_max(&room).intersect(&exact).unwrap();
        assert_eq!(fits.solve_nearest(&geom), Some(geom.clone()));

        let tight = Geometry::new(&dev, 200, 800).unwrap();
        assert!(Constraint::from_max(&tight).intersect(&exact).is_none());
    }

    #[test]
    fn test_solve_nearest_moves_into_room() {
        let dev = Device::memory("mem0", 1000, 512);
        let room = Geometry::new(&dev, 200, 800).unwrap();
        let target = Geometry::new(&dev, 150, 101).unwrap();
        let solved = Constraint::from_max(&room).solve_nearest(&target).unwrap();
        assert_eq!((solved.start(), solved.end()), (200, 250));
    }

    #[test]
    fn test_solve_nearest_with_grain() {
        let dev = Device::memory("mem0", 10000, 512);
        let mut aligned = Constraint::any(&dev);
        aligned.start_align = Alignment::new(0, 2048).unwrap();
        aligned.end_align = Alignment::new(2047, 2048).unwrap();

        let target = Geometry::new(&dev, 100, 3000).unwrap();
        let solved = aligned.solve_nearest(&target).unwrap();
        assert_eq!(solved.start(), 0);
        assert_eq!(solved.end(), 4095);
        assert!(aligned.is_solution(&solved));
    }

    #[test]
    fn test_from_min_keeps_core() {
        let dev = Device::memory("mem0", 1000, 512);
        let core = Geometry::new(&dev, 300, 100).unwrap();
        let grow = Constraint::from_min(&core);
        let small = Geometry::new(&dev, 310, 10).unwrap();
        let solved = grow.solve_nearest(&small).unwrap();
        assert!(solved.test_inside(&core));

        let bounded =
            Constraint::from_min_max(&core, &Geometry::new(&dev, 250, 300).unwrap()).unwrap();
        assert_eq!(bounded.solve_max().unwrap(), Geometry::new(&dev, 250, 300).unwrap());
    }
}
