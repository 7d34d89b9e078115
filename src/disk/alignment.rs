//! Periodic alignment arithmetic.
//!
//! An [`Alignment`] restricts sectors to one residue class: a sector `s`
//! satisfies `(offset, grain_size)` when `(s - offset) mod grain_size == 0`.
//! A grain of zero pins the single sector `offset`.
//!
//! Intersecting two alignments means solving two simultaneous congruences:
//!
//! ```text
//! o = Ao + X * Ag        (1)
//! o = Bo + Y * Bg        (2)
//! X * Ag - Y * Bg = Bo - Ao
//! ```
//!
//! A solution exists only when `Bo - Ao` is a multiple of `gcd(Ag, Bg)`.
//! The extended Euclidean algorithm gives `A * Ag + B * Bg = gcd`, which is
//! scaled by `(Bo - Ao) / gcd`. The merged grain is `lcm(Ag, Bg)`.

use super::geometry::Geometry;
use super::Sector;

/// `a mod b` with the result always in `[0, b)`.
pub fn abs_mod(a: Sector, b: Sector) -> Sector {
    if a < 0 { a % b + b } else { a % b }
}

/// Rounds down to the closest multiple of `grain_size`.
pub fn round_down_to(sector: Sector, grain_size: Sector) -> Sector {
    sector - abs_mod(sector, grain_size)
}

/// Rounds up to the closest multiple of `grain_size`.
pub fn round_up_to(sector: Sector, grain_size: Sector) -> Sector {
    if sector % grain_size != 0 {
        round_down_to(sector, grain_size) + grain_size
    } else {
        sector
    }
}

pub fn round_to_nearest(sector: Sector, grain_size: Sector) -> Sector {
    if sector % grain_size > grain_size / 2 {
        round_up_to(sector, grain_size)
    } else {
        round_down_to(sector, grain_size)
    }
}

pub fn greatest_common_divisor(a: Sector, b: Sector) -> Sector {
    debug_assert!(a >= 0 && b >= 0);
    let (mut a, mut b) = if b > a { (b, a) } else { (a, b) };
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EuclidTriple {
    gcd: Sector,
    x: Sector,
    y: Sector,
}

/// Returns `gcd, x, y` with `gcd = x * a + y * b`. Expects `a >= b`.
fn extended_euclid(a: Sector, b: Sector) -> EuclidTriple {
    if b == 0 {
        return EuclidTriple { gcd: a, x: 1, y: 0 };
    }
    let tmp = extended_euclid(b, a % b);
    EuclidTriple {
        gcd: tmp.gcd,
        x: tmp.y,
        y: tmp.x - (a / b) * tmp.y,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Alignment {
    offset: Sector,
    grain_size: Sector,
}

impl Alignment {
    /// Every sector satisfies this alignment.
    pub const ANY: Alignment = Alignment {
        offset: 0,
        grain_size: 1,
    };

    /// Builds an alignment, normalizing `offset` into `[0, grain_size)`.
    /// Returns `None` for a negative grain.
    pub fn new(offset: Sector, grain_size: Sector) -> Option<Self> {
        if grain_size < 0 {
            return None;
        }
        let offset = if grain_size != 0 {
            abs_mod(offset, grain_size)
        } else {
            offset
        };
        Some(Self { offset, grain_size })
    }

    /// The alignment satisfied by `sector` alone.
    pub fn exact(sector: Sector) -> Self {
        Self {
            offset: sector,
            grain_size: 0,
        }
    }

    pub fn offset(&self) -> Sector {
        self.offset
    }

    pub fn grain_size(&self) -> Sector {
        self.grain_size
    }

    /// Returns the alignment satisfied exactly by the sectors satisfying both
    /// `self` and `other`, or `None` when no sector does.
    pub fn intersect(&self, other: &Alignment) -> Option<Alignment> {
        let (a, b) = if self.grain_size < other.grain_size {
            (other, self)
        } else {
            (self, other)
        };

        if a.grain_size == 0 && b.grain_size == 0 {
            return (a.offset == b.offset).then_some(*a);
        }

        let factors = extended_euclid(a.grain_size, b.grain_size);
        let delta_on_gcd = (b.offset - a.offset) / factors.gcd;
        let new_offset = a.offset + factors.x * delta_on_gcd * a.grain_size;
        let new_grain_size = a.grain_size / factors.gcd * b.grain_size;

        // truncated division above: an inconsistent pair shows up here
        if new_offset != b.offset - factors.y * delta_on_gcd * b.grain_size {
            return None;
        }
        Alignment::new(new_offset, new_grain_size)
    }

    /// Closest sector to `sector` inside `geom` that satisfies the alignment.
    fn closest_inside_geometry(&self, geom: &Geometry, sector: Sector) -> Option<Sector> {
        if self.grain_size == 0 {
            return (self.is_aligned(Some(geom), sector) && geom.test_sector_inside(sector))
                .then_some(sector);
        }

        let mut sector = sector;
        if sector < geom.start() {
            sector += round_up_to(geom.start() - sector, self.grain_size);
        }
        if sector > geom.end() {
            sector -= round_up_to(sector - geom.end(), self.grain_size);
        }
        geom.test_sector_inside(sector).then_some(sector)
    }

    /// Closest aligned sector at or after `sector`, pulled back inside
    /// `geom` when one is given.
    pub fn align_up(&self, geom: Option<&Geometry>, sector: Sector) -> Option<Sector> {
        let result = if self.grain_size == 0 {
            self.offset
        } else {
            round_up_to(sector - self.offset, self.grain_size) + self.offset
        };
        match geom {
            Some(geom) => self.closest_inside_geometry(geom, result),
            None => Some(result),
        }
    }

    /// Closest aligned sector at or before `sector`, pulled back inside
    /// `geom` when one is given.
    pub fn align_down(&self, geom: Option<&Geometry>, sector: Sector) -> Option<Sector> {
        let result = if self.grain_size == 0 {
            self.offset
        } else {
            round_down_to(sector - self.offset, self.grain_size) + self.offset
        };
        match geom {
            Some(geom) => self.closest_inside_geometry(geom, result),
            None => Some(result),
        }
    }

    /// Whichever of [`align_up`](Self::align_up) and
    /// [`align_down`](Self::align_down) lands closer to `sector`.
    pub fn align_nearest(&self, geom: Option<&Geometry>, sector: Sector) -> Option<Sector> {
        let up = self.align_up(geom, sector);
        let down = self.align_down(geom, sector);
        match (up, down) {
            (None, other) | (other, None) => other,
            (Some(up), Some(down)) => {
                if (sector - up).abs() < (sector - down).abs() {
                    Some(up)
                } else {
                    Some(down)
                }
            }
        }
    }

    pub fn is_aligned(&self, geom: Option<&Geometry>, sector: Sector) -> bool {
        if let Some(geom) = geom
            && !geom.test_sector_inside(sector)
        {
            return false;
        }
        if self.grain_size != 0 {
            (sector - self.offset) % self.grain_size == 0
        } else {
            sector == self.offset
        }
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Self::ANY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::device::Device;

    #[test]
    fn test_rounding() {
        assert_eq!(abs_mod(-3, 4), 1);
        assert_eq!(round_down_to(17, 8), 16);
        assert_eq!(round_up_to(17, 8), 24);
        assert_eq!(round_up_to(16, 8), 16);
        assert_eq!(round_to_nearest(21, 8), 24);
        assert_eq!(round_to_nearest(19, 8), 16);
        assert_eq!(greatest_common_divisor(12, 18), 6);
        assert_eq!(greatest_common_divisor(0, 7), 7);
    }

    #[test]
    fn test_new_normalizes_offset() {
        let align = Alignment::new(-1, 8).unwrap();
        assert_eq!(align.offset(), 7);
        assert!(Alignment::new(0, -1).is_none());
        assert_eq!(Alignment::new(42, 0).unwrap().offset(), 42);
    }

    #[test]
    fn test_intersect_crt() {
        let a = Alignment::new(1, 3).unwrap();
        let b = Alignment::new(2, 5).unwrap();
        let ab = a.intersect(&b).unwrap();
        let ba = b.intersect(&a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.grain_size(), 15);
        for s in 0..15 {
            let both = s % 3 == 1 && s % 5 == 2;
            assert_eq!(ab.is_aligned(None, s), both, "sector {s}");
        }
    }

    #[test]
    fn test_intersect_without_solution() {
        let a = Alignment::new(0, 4).unwrap();
        let b = Alignment::new(1, 2).unwrap();
        assert!(a.intersect(&b).is_none());

        let x = Alignment::exact(10);
        assert_eq!(x.intersect(&Alignment::exact(10)), Some(x));
        assert!(x.intersect(&Alignment::exact(11)).is_none());
        assert_eq!(x.intersect(&Alignment::new(2, 4).unwrap()), Some(x));
        assert!(x.intersect(&Alignment::new(1, 4).unwrap()).is_none());
    }

    #[test]
    fn test_intersect_random_pairs_commute() {
        use rand::Rng;

        let mut rng = rand::rng();
        for _ in 0..200 {
            let a = Alignment::new(rng.random_range(0..64), rng.random_range(1..24)).unwrap();
            let b = Alignment::new(rng.random_range(0..64), rng.random_range(1..24)).unwrap();
            let ab = a.intersect(&b);
            assert_eq!(ab, b.intersect(&a));
            let period = a.grain_size() * b.grain_size();
            for s in 0..period {
                let expected = a.is_aligned(None, s) && b.is_aligned(None, s);
                let got = ab.map(|x| x.is_aligned(None, s)).unwrap_or(false);
                assert_eq!(got, expected, "{a:?} {b:?} sector {s}");
            }
        }
    }

    #[test]
    fn test_align_inside_geometry() {
        let dev = Device::memory("mem0", 1000, 512);
        let geom = Geometry::new(&dev, 100, 50).unwrap();
        let align = Alignment::new(0, 16).unwrap();

        assert_eq!(align.align_up(None, 101), Some(112));
        assert_eq!(align.align_down(None, 101), Some(96));
        assert_eq!(align.align_down(Some(&geom), 101), Some(112));
        assert_eq!(align.align_up(Some(&geom), 149), Some(144));
        assert_eq!(align.align_nearest(Some(&geom), 118), Some(112));
        assert_eq!(align.align_nearest(Some(&geom), 122), Some(128));
        assert!(align.is_aligned(Some(&geom), 112));
        assert!(!align.is_aligned(Some(&geom), 96));

        let narrow = Geometry::new(&dev, 113, 10).unwrap();
        assert_eq!(align.align_nearest(Some(&narrow), 115), None);

        let pinned = Alignment::exact(120);
        assert_eq!(pinned.align_up(Some(&geom), 0), Some(120));
        assert_eq!(pinned.align_down(Some(&narrow), 0), Some(120));
        assert_eq!(Alignment::exact(200).align_nearest(Some(&geom), 0), None);
    }
}
