//! Vertex de-duplication while flattening submodels into one buffer.

use crate::model::Vertex;
use crate::util::{Error, Result};

/// Collects vertices for a shared buffer, reusing matching vertices within
/// the current window.
///
/// A window is one submodel's vertex range; indices returned by
/// [`emit`](Self::emit) are relative to its start, which becomes the
/// submodel's `vertex_offset`.
#[derive(Debug, Default)]
pub struct VertexEmitter {
    vertices: Vec<Vertex>,
    window_start: usize,
}

impl VertexEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new window at the current end of the buffer.
    pub fn begin_window(&mut self) {
        self.window_start = self.vertices.len();
    }

    /// Absolute index of the first vertex of the current window.
    #[inline]
    pub fn window_start(&self) -> usize {
        self.window_start
    }

    #[inline]
    pub fn window_len(&self) -> usize {
        self.vertices.len() - self.window_start
    }

    /// Index of `vertex` within the window, appending it if no emitted
    /// vertex is [`possibly_equal`](Vertex::possibly_equal).
    pub fn emit(&mut self, vertex: Vertex) -> Result<u16> {
        let window = &self.vertices[self.window_start..];
        let index = match window.iter().position(|v| v.possibly_equal(&vertex)) {
            Some(found) => found,
            None => {
                self.vertices.push(vertex);
                self.window_len() - 1
            }
        };
        u16::try_from(index)
            .map_err(|_| Error::SizeOverflow(format!("more than 65536 vertices in window at {}", self.window_start)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn into_vertices(self) -> Vec<Vertex> {
        self.vertices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{Vec2, Vec3};

    #[test]
    fn test_identical_vertices_emitted_once() {
        let v = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Y, Vec2::new(0.5, 0.5));
        let mut e = VertexEmitter::new();
        let a = e.emit(v).unwrap();
        let b = e.emit(v).unwrap();
        assert_eq!(a, b);
        assert_eq!(e.len(), 1);
    }

    #[test]
    fn test_windows_do_not_share() {
        let v = Vertex::new(Vec3::X, Vec3::Y, Vec2::ZERO);
        let w = Vertex::new(Vec3::Z, Vec3::Y, Vec2::ZERO);
        let mut e = VertexEmitter::new();
        e.emit(v).unwrap();
        e.emit(w).unwrap();

        e.begin_window();
        assert_eq!(e.window_start(), 2);
        // same vertex again, but in a new window
        assert_eq!(e.emit(w).unwrap(), 0);
        assert_eq!(e.emit(v).unwrap(), 1);
        assert_eq!(e.emit(w).unwrap(), 0);
        assert_eq!(e.window_len(), 2);
        assert_eq!(e.into_vertices().len(), 4);
    }
}
