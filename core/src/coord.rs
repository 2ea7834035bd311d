/// A tile coordinate: `iReal < level` and `iImag < level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Coord {
    pub level: u32,
    pub i_real: u32,
    pub i_imag: u32,
}

impl Coord {
    pub fn new(level: u32, i_real: u32, i_imag: u32) -> Self {
        Coord {
            level,
            i_real,
            i_imag,
        }
    }

    /// `true` if `i_real`/`i_imag` are within the `level x level` grid.
    pub fn in_bounds(&self) -> bool {
        self.i_real < self.level && self.i_imag < self.level
    }

    /// The data filename stem for this coord, before collision suffixing.
    pub fn base_filename(&self) -> String {
        format!("{};{};{}", self.level, self.i_real, self.i_imag)
    }

    /// Top-left corner of this tile in the complex plane `[-2, 2] x [-2, 2]i`.
    pub fn plane_origin(&self) -> (f64, f64) {
        let extent = 4.0 / self.level as f64;
        (
            -2.0 + self.i_real as f64 * extent,
            -2.0 + self.i_imag as f64 * extent,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_bounds_rejects_edge_indices() {
        let c = Coord::new(4, 4, 0);
        assert!(!c.in_bounds());
        let c = Coord::new(4, 0, 4);
        assert!(!c.in_bounds());
        let c = Coord::new(4, 3, 3);
        assert!(c.in_bounds());
    }

    #[test]
    fn base_filename_format() {
        assert_eq!(Coord::new(2, 0, 1).base_filename(), "2;0;1");
    }

    #[test]
    fn plane_origin_splits_the_quadrant_evenly() {
        let (re, im) = Coord::new(2, 0, 0).plane_origin();
        assert_eq!((re, im), (-2.0, -2.0));
        let (re, im) = Coord::new(2, 1, 1).plane_origin();
        assert_eq!((re, im), (0.0, 0.0));
    }
}
