//! Affine transforms between level and full-resolution coordinates.

/// A 3D affine transform stored as a 3x4 row-major matrix.
///
/// The fourth column is the translation; the implicit bottom row is
/// `[0, 0, 0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine3 {
    m: [[f64; 4]; 3],
}

impl Affine3 {
    /// The identity transform.
    pub fn identity() -> Self {
        Self::scale_and_translate([1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
    }

    /// Builds a transform from explicit rows.
    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        Self { m: rows }
    }

    /// Builds an axis-aligned scale followed by a translation.
    pub fn scale_and_translate(scale: [f64; 3], translate: [f64; 3]) -> Self {
        Self {
            m: [
                [scale[0], 0.0, 0.0, translate[0]],
                [0.0, scale[1], 0.0, translate[1]],
                [0.0, 0.0, scale[2], translate[2]],
            ],
        }
    }

    /// Matrix entry at `row`, `col` (column 3 is the translation).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.m[row][col]
    }

    /// Transforms a point.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (r, row) in self.m.iter().enumerate() {
            out[r] = row[0] * p[0] + row[1] * p[1] + row[2] * p[2] + row[3];
        }
        out
    }

    /// Transforms a direction, ignoring the translation.
    pub fn apply_vector(&self, v: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (r, row) in self.m.iter().enumerate() {
            out[r] = row[0] * v[0] + row[1] * v[1] + row[2] * v[2];
        }
        out
    }

    /// Composes two transforms: the result applies `other` first, then
    /// `self`.
    pub fn concatenate(&self, other: &Affine3) -> Affine3 {
        let mut m = [[0.0; 4]; 3];
        for r in 0..3 {
            for c in 0..3 {
                m[r][c] = (0..3).map(|k| self.m[r][k] * other.m[k][c]).sum();
            }
            m[r][3] = (0..3).map(|k| self.m[r][k] * other.m[k][3]).sum::<f64>() + self.m[r][3];
        }
        Affine3 { m }
    }
}

impl Default for Affine3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keeps_points() {
        let t = Affine3::identity();
        assert_eq!(t.apply([1.5, -2.0, 7.0]), [1.5, -2.0, 7.0]);
    }

    #[test]
    fn test_scale_and_translate() {
        let t = Affine3::scale_and_translate([4.0, 4.0, 1.0], [1.5, 1.5, 0.0]);
        assert_eq!(t.apply([1.0, 2.0, 3.0]), [5.5, 9.5, 3.0]);
        assert_eq!(t.get(0, 0), 4.0);
        assert_eq!(t.get(0, 3), 1.5);
    }

    #[test]
    fn test_apply_vector_ignores_translation() {
        let t = Affine3::scale_and_translate([2.0, 3.0, 1.0], [100.0, 100.0, 100.0]);
        assert_eq!(t.apply_vector([1.0, 0.0, 0.0]), [2.0, 0.0, 0.0]);
        assert_eq!(t.apply_vector([0.0, 1.0, 0.0]), [0.0, 3.0, 0.0]);
    }

    #[test]
    fn test_concatenate_applies_right_operand_first() {
        let scale = Affine3::scale_and_translate([2.0, 2.0, 2.0], [0.0, 0.0, 0.0]);
        let shift = Affine3::scale_and_translate([1.0, 1.0, 1.0], [1.0, 0.0, 0.0]);

        // shift(scale(p)): p=[1,0,0] -> [2,0,0] -> [3,0,0]
        let a = shift.concatenate(&scale);
        assert_eq!(a.apply([1.0, 0.0, 0.0]), [3.0, 0.0, 0.0]);

        // scale(shift(p)): p=[1,0,0] -> [2,0,0] -> [4,0,0]
        let b = scale.concatenate(&shift);
        assert_eq!(b.apply([1.0, 0.0, 0.0]), [4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_concatenate_matches_sequential_apply() {
        let a = Affine3::from_rows([
            [0.5, 0.0, 0.0, 3.0],
            [0.0, 2.0, 0.0, -1.0],
            [0.0, 0.0, 1.0, 0.25],
        ]);
        let b = Affine3::scale_and_translate([4.0, 4.0, 1.0], [1.5, 1.5, 0.0]);
        let p = [2.0, 5.0, -3.0];
        assert_eq!(a.concatenate(&b).apply(p), a.apply(b.apply(p)));
    }
}
