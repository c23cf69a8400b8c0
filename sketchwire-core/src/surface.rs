//! Drawing surfaces.
//!
//! Operations render through the [`Surface`] trait, which exposes the two
//! primitives they need (line segment and connected point sequence) plus a
//! settable stroke colour. [`Raster`] is a headless RGB pixel buffer used by
//! the client app for export and by tests for pixel comparisons.

use std::io::Write;
use std::path::Path;

use crate::geometry::{Color, Point};

/// Abstract 2D drawing context.
pub trait Surface {
    /// Colour used for subsequent strokes.
    fn set_color(&mut self, color: Color);

    fn color(&self) -> Color;

    /// Colour the surface is cleared to. Rubber-band erasing paints with it.
    fn background(&self) -> Color;

    fn draw_line(&mut self, from: Point, to: Point);

    /// Draw segments between consecutive points.
    fn draw_polyline(&mut self, points: &[Point]) {
        match points {
            [] => {}
            [only] => self.draw_line(*only, *only),
            _ => {
                for pair in points.windows(2) {
                    self.draw_line(pair[0], pair[1]);
                }
            }
        }
    }
}

/// Software RGB surface with clipped Bresenham line rasterisation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
    background: Color,
    stroke: Color,
}

impl Raster {
    /// Create a white raster with a black stroke.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_background(width, height, Color::WHITE)
    }

    pub fn with_background(width: u32, height: u32, background: Color) -> Self {
        Self {
            width,
            height,
            pixels: vec![background; width as usize * height as usize],
            background,
            stroke: Color::BLACK,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Colour at `(x, y)`, or `None` outside the surface.
    pub fn pixel(&self, x: i32, y: i32) -> Option<Color> {
        self.index(x.into(), y.into()).map(|i| self.pixels[i])
    }

    /// Number of pixels currently painted with `color`.
    pub fn count(&self, color: Color) -> usize {
        self.pixels.iter().filter(|&&c| c == color).count()
    }

    /// Reset every pixel to the background colour.
    pub fn clear(&mut self) {
        self.pixels.fill(self.background);
    }

    /// Encode as a binary PPM (P6) image.
    pub fn to_ppm(&self) -> Vec<u8> {
        let header = format!("P6\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.pixels.len() * 3);
        out.extend_from_slice(header.as_bytes());
        for c in &self.pixels {
            out.extend_from_slice(&[c.r, c.g, c.b]);
        }
        out
    }

    pub fn save_ppm(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(&self.to_ppm())?;
        file.flush()
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    fn plot(&mut self, x: i64, y: i64) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = self.stroke;
        }
    }

    /// Cohen-Sutherland clip of a segment to the pixel grid.
    ///
    /// Returns `None` when no part of the segment is on the surface.
    fn clip(&self, from: Point, to: Point) -> Option<((i64, i64), (i64, i64))> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let x_max = f64::from(self.width - 1);
        let y_max = f64::from(self.height - 1);
        let outcode = |x: f64, y: f64| {
            let mut code = INSIDE;
            if x < 0.0 {
                code |= LEFT;
            } else if x > x_max {
                code |= RIGHT;
            }
            if y < 0.0 {
                code |= BELOW;
            } else if y > y_max {
                code |= ABOVE;
            }
            code
        };

        let (mut x0, mut y0) = (f64::from(from.x), f64::from(from.y));
        let (mut x1, mut y1) = (f64::from(to.x), f64::from(to.y));
        let mut code0 = outcode(x0, y0);
        let mut code1 = outcode(x1, y1);
        loop {
            if code0 | code1 == INSIDE {
                let round = |v: f64| v.round() as i64;
                return Some(((round(x0), round(y0)), (round(x1), round(y1))));
            }
            if code0 & code1 != INSIDE {
                return None;
            }
            let out = if code0 != INSIDE { code0 } else { code1 };
            let (x, y) = if out & ABOVE != 0 {
                (x0 + (x1 - x0) * (y_max - y0) / (y1 - y0), y_max)
            } else if out & BELOW != 0 {
                (x0 + (x1 - x0) * -y0 / (y1 - y0), 0.0)
            } else if out & RIGHT != 0 {
                (x_max, y0 + (y1 - y0) * (x_max - x0) / (x1 - x0))
            } else {
                (0.0, y0 + (y1 - y0) * -x0 / (x1 - x0))
            };
            if out == code0 {
                (x0, y0) = (x, y);
                code0 = outcode(x0, y0);
            } else {
                (x1, y1) = (x, y);
                code1 = outcode(x1, y1);
            }
        }
    }
}

const INSIDE: u8 = 0;
const LEFT: u8 = 1;
const RIGHT: u8 = 2;
const BELOW: u8 = 4;
const ABOVE: u8 = 8;

impl Surface for Raster {
    fn set_color(&mut self, color: Color) {
        self.stroke = color;
    }

    fn color(&self) -> Color {
        self.stroke
    }

    fn background(&self) -> Color {
        self.background
    }

    fn draw_line(&mut self, from: Point, to: Point) {
        // Clipping first bounds the walk by the surface size.
        let Some(((x0, y0), (x1, y1))) = self.clip(from, to) else {
            return;
        };
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);

        loop {
            self.plot(x, y);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_raster_is_background() {
        let r = Raster::new(8, 4);
        assert_eq!(r.count(Color::WHITE), 32);
        assert_eq!(r.pixel(7, 3), Some(Color::WHITE));
        assert_eq!(r.pixel(8, 0), None);
        assert_eq!(r.pixel(-1, 0), None);
    }

    #[test]
    fn test_diagonal_line_pixels() {
        let mut r = Raster::new(64, 64);
        r.draw_line(Point::new(10, 10), Point::new(50, 50));
        assert_eq!(r.count(Color::BLACK), 41);
        for i in 10..=50 {
            assert_eq!(r.pixel(i, i), Some(Color::BLACK));
        }
    }

    #[test]
    fn test_line_direction_does_not_matter_for_axis_lines() {
        let mut a = Raster::new(32, 32);
        let mut b = Raster::new(32, 32);
        a.draw_line(Point::new(2, 5), Point::new(20, 5));
        b.draw_line(Point::new(20, 5), Point::new(2, 5));
        assert_eq!(a, b);
        assert_eq!(a.count(Color::BLACK), 19);
    }

    #[test]
    fn test_clipping_outside_bounds() {
        let mut r = Raster::new(10, 10);
        r.draw_line(Point::new(-5, 5), Point::new(15, 5));
        assert_eq!(r.count(Color::BLACK), 10);
    }

    #[test]
    fn test_extreme_coordinates_are_clipped() {
        let mut r = Raster::new(4, 4);
        r.draw_line(Point::new(i32::MIN, 0), Point::new(i32::MAX, 0));
        assert_eq!(r.count(Color::BLACK), 4);

        r.clear();
        r.draw_line(Point::new(i32::MIN, i32::MIN), Point::new(i32::MAX, i32::MAX));
        assert_eq!(r.count(Color::BLACK), 4);
        for i in 0..4 {
            assert_eq!(r.pixel(i, i), Some(Color::BLACK));
        }
    }

    #[test]
    fn test_line_entirely_off_surface() {
        let mut r = Raster::new(8, 8);
        r.draw_line(Point::new(-1_000_000, 20), Point::new(1_000_000, 20));
        r.draw_line(Point::new(i32::MAX, i32::MAX), Point::new(i32::MAX, i32::MIN));
        assert_eq!(r.count(Color::BLACK), 0);

        let mut empty = Raster::new(0, 0);
        empty.draw_line(Point::new(0, 0), Point::new(5, 5));
        assert_eq!(empty.count(Color::BLACK), 0);
    }

    #[test]
    fn test_stroke_color_and_clear() {
        let red = Color::rgb(255, 0, 0);
        let mut r = Raster::new(10, 10);
        r.set_color(red);
        assert_eq!(r.color(), red);
        r.draw_line(Point::new(0, 0), Point::new(0, 9));
        assert_eq!(r.count(red), 10);

        r.clear();
        assert_eq!(r.count(red), 0);
    }

    #[test]
    fn test_polyline_single_point_is_a_dot() {
        let mut r = Raster::new(10, 10);
        r.draw_polyline(&[Point::new(3, 3)]);
        assert_eq!(r.count(Color::BLACK), 1);
        r.draw_polyline(&[]);
        assert_eq!(r.count(Color::BLACK), 1);
    }

    #[test]
    fn test_ppm_header() {
        let r = Raster::new(3, 2);
        let ppm = r.to_ppm();
        assert!(ppm.starts_with(b"P6\n3 2\n255\n"));
        assert_eq!(ppm.len(), b"P6\n3 2\n255\n".len() + 3 * 2 * 3);
    }

    #[test]
    fn test_save_ppm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ppm");
        let r = Raster::new(4, 4);
        r.save_ppm(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), r.to_ppm());
    }
}
