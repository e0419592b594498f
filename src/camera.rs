//! Cube-face cameras: the six fixed view matrices and the shared 90° projection.
//!
//! Matrices are column-major (glam default). The projection uses OpenGL-style
//! depth with no Y flip; the face views below are oriented for exactly that
//! projection, so the two must change together.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub const FACE_FOV_Y_DEG: f32 = 90.0;
pub const FACE_NEAR: f32 = 0.1;
pub const FACE_FAR: f32 = 10.0;

/// One face of a cube image, in array-layer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Array layer of this face in a cube-compatible image.
    pub fn layer(self) -> u32 {
        self as u32
    }

    /// World-space direction the face camera looks along.
    pub fn direction(self) -> Vec3 {
        match self {
            CubeFace::PositiveX => Vec3::X,
            CubeFace::NegativeX => Vec3::NEG_X,
            CubeFace::PositiveY => Vec3::Y,
            CubeFace::NegativeY => Vec3::NEG_Y,
            CubeFace::PositiveZ => Vec3::Z,
            CubeFace::NegativeZ => Vec3::NEG_Z,
        }
    }

    pub fn view(self) -> Mat4 {
        CUBE_FACE_VIEWS[self as usize]
    }
}

/// View matrices for the six faces, indexed by array layer.
#[rustfmt::skip]
pub const CUBE_FACE_VIEWS: [Mat4; 6] = [
    // +X
    Mat4::from_cols_array(&[
         0.0,  0.0, -1.0, 0.0,
         0.0, -1.0,  0.0, 0.0,
        -1.0,  0.0,  0.0, 0.0,
         0.0,  0.0,  0.0, 1.0,
    ]),
    // -X
    Mat4::from_cols_array(&[
         0.0,  0.0,  1.0, 0.0,
         0.0, -1.0,  0.0, 0.0,
         1.0,  0.0,  0.0, 0.0,
         0.0,  0.0,  0.0, 1.0,
    ]),
    // +Y
    Mat4::from_cols_array(&[
         1.0,  0.0,  0.0, 0.0,
         0.0,  0.0, -1.0, 0.0,
         0.0,  1.0,  0.0, 0.0,
         0.0,  0.0,  0.0, 1.0,
    ]),
    // -Y
    Mat4::from_cols_array(&[
         1.0,  0.0,  0.0, 0.0,
         0.0,  0.0,  1.0, 0.0,
         0.0, -1.0,  0.0, 0.0,
         0.0,  0.0,  0.0, 1.0,
    ]),
    // +Z
    Mat4::from_cols_array(&[
         1.0,  0.0,  0.0, 0.0,
         0.0, -1.0,  0.0, 0.0,
         0.0,  0.0, -1.0, 0.0,
         0.0,  0.0,  0.0, 1.0,
    ]),
    // -Z
    Mat4::from_cols_array(&[
        -1.0,  0.0,  0.0, 0.0,
         0.0, -1.0,  0.0, 0.0,
         0.0,  0.0,  1.0, 0.0,
         0.0,  0.0,  0.0, 1.0,
    ]),
];

/// Create a right-handed perspective projection with OpenGL depth range.
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let tan_half = (fov_y / 2.0).tan();

    // Column 0: (1/(aspect*t), 0, 0, 0)
    // Column 1: (0, 1/t, 0, 0)
    // Column 2: (0, 0, -(far+near)/(far-near), -1)
    // Column 3: (0, 0, -2*far*near/(far-near), 0)
    Mat4::from_cols(
        glam::Vec4::new(1.0 / (aspect * tan_half), 0.0, 0.0, 0.0),
        glam::Vec4::new(0.0, 1.0 / tan_half, 0.0, 0.0),
        glam::Vec4::new(0.0, 0.0, -(far + near) / (far - near), -1.0),
        glam::Vec4::new(0.0, 0.0, -(2.0 * far * near) / (far - near), 0.0),
    )
}

/// The projection shared by all six faces.
pub fn face_projection() -> Mat4 {
    perspective(FACE_FOV_Y_DEG.to_radians(), 1.0, FACE_NEAR, FACE_FAR)
}

/// Push-constant block: view + projection = 128 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub const SIZE: u32 = std::mem::size_of::<CameraUniform>() as u32;

    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

/// Camera blocks for every face, in layer order, sharing one projection.
pub fn face_uniforms() -> [CameraUniform; 6] {
    let proj = face_projection();
    CubeFace::ALL.map(|face| CameraUniform::new(face.view(), proj))
}
