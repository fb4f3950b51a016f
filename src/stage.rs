//! The tutorial stages the renderer can show.

use std::fmt;

use clap::ValueEnum;

use crate::vertex::Mesh;

/// Which step of the tutorial to render. Each stage builds on the previous one.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    /// Clear the screen to a solid color.
    Clear,
    /// Draw a single colored triangle.
    Triangle,
    /// Draw a rotating, depth-tested cube.
    #[default]
    Cube,
}

impl Stage {
    /// The color the drawable is cleared to before drawing.
    pub const fn clear_color(self) -> [f32; 4] {
        match self {
            Stage::Clear => [1.0, 0.0, 0.0, 1.0],
            Stage::Triangle | Stage::Cube => [93.0 / 255.0, 161.0 / 255.0, 219.0 / 255.0, 1.0],
        }
    }

    /// The geometry drawn after clearing, if any.
    pub const fn mesh(self) -> Option<Mesh> {
        match self {
            Stage::Clear => None,
            Stage::Triangle => Some(Mesh::TRIANGLE),
            Stage::Cube => Some(Mesh::CUBE),
        }
    }

    /// Whether the model-view-projection transform changes over time. Static
    /// stages draw with the identity transform.
    pub const fn animates(self) -> bool {
        matches!(self, Stage::Cube)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Clear => "clear",
            Stage::Triangle => "triangle",
            Stage::Cube => "cube",
        };
        f.write_str(name)
    }
}
