//! 3D value types with a fixed single-precision wire mapping
//!
//! Components are `f64` in memory and narrowed to `f32` on the wire, so a
//! decoded value equals [`narrowed`](Point3D::narrowed) of the original.

/// Point in 3D space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Same point after an `f32` round trip
    pub fn narrowed(&self) -> Self {
        let [x, y, z] = self.to_array().map(narrow);
        Self::new(x, y, z)
    }
}

/// Homogeneous point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point4D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Point4D {
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn narrowed(&self) -> Self {
        let [x, y, z, w] = self.to_array().map(narrow);
        Self::new(x, y, z, w)
    }
}

impl From<Point3D> for Point4D {
    fn from(p: Point3D) -> Self {
        Self::new(p.x, p.y, p.z, 1.0)
    }
}

/// 4x4 affine transform, row-vector convention.
///
/// The fourth row holds the translation (`OffsetX`, `OffsetY`, `OffsetZ`)
/// followed by `M44`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3D {
    rows: [[f64; 4]; 4],
}

impl Default for Matrix3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix3D {
    pub const fn identity() -> Self {
        Self {
            rows: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub const fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self { rows }
    }

    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut matrix = Self::identity();
        matrix.rows[3][0] = x;
        matrix.rows[3][1] = y;
        matrix.rows[3][2] = z;
        matrix
    }

    /// Row-major components: M11..M14, M21..M24, M31..M34, OffsetX, OffsetY, OffsetZ, M44
    pub fn from_array(values: [f64; 16]) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (index, value) in values.into_iter().enumerate() {
            rows[index / 4][index % 4] = value;
        }
        Self { rows }
    }

    /// Inverse of [`from_array`](Self::from_array), also the wire order
    pub fn to_array(&self) -> [f64; 16] {
        let mut values = [0.0; 16];
        for (index, value) in values.iter_mut().enumerate() {
            *value = self.rows[index / 4][index % 4];
        }
        values
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.rows
    }

    /// Component at zero-based `row`, `col`
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.rows[row][col] = value;
    }

    pub fn offset(&self) -> Point3D {
        Point3D::new(self.rows[3][0], self.rows[3][1], self.rows[3][2])
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn narrowed(&self) -> Self {
        Self::from_array(self.to_array().map(narrow))
    }
}

fn narrow(value: f64) -> f64 {
    f64::from(value as f32)
}
