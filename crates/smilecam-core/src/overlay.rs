//! Overlay drawing: the surface abstraction, a recording implementation and
//! the per-face box/label/landmark rendering.

use crate::policy::is_smiling;
use crate::types::{DisplaySize, FaceDetection, Point};
use image::{Rgb, RgbImage};
use serde::Serialize;

const BOX_LINE_WIDTH: f32 = 3.0;
const LABEL_FONT_PX: f32 = 16.0;
const LABEL_OFFSET_Y: f32 = 10.0;
const LANDMARK_RADIUS: f32 = 1.0;

/// Serialized as a `#rrggbb` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// Emerald, for smiling faces.
pub const SMILE_COLOR: Color = Color::rgb(0x10, 0xb9, 0x81);
/// Indigo, for everything else.
pub const FACE_COLOR: Color = Color::rgb(0x4f, 0x46, 0xe5);

/// Axis-aligned rectangle in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A 2D drawing target for the detection overlay.
pub trait Surface {
    fn size(&self) -> DisplaySize;
    fn resize(&mut self, size: DisplaySize);
    fn clear(&mut self);
    fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32);
    fn fill_text(&mut self, text: &str, origin: Point, color: Color, font_px: f32);
    fn fill_circle(&mut self, center: Point, radius: f32, color: Color);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    StrokeRect {
        rect: Rect,
        color: Color,
        line_width: f32,
    },
    FillText {
        text: String,
        origin: Point,
        color: Color,
        font_px: f32,
    },
    FillCircle {
        center: Point,
        radius: f32,
        color: Color,
    },
}

/// Surface that records draw commands since the last clear.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DisplayList {
    size: Option<DisplaySize>,
    commands: Vec<DrawCommand>,
}

impl DisplayList {
    pub fn new(size: DisplaySize) -> Self {
        Self {
            size: Some(size),
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Paint boxes and landmarks onto `canvas`, scaled from the list's size
    /// to the canvas size. Text has no glyph source here and is skipped.
    pub fn rasterize(&self, canvas: &mut RgbImage) {
        let (cw, ch) = canvas.dimensions();
        let size = self.size();
        let (sx, sy) = if size.is_empty() {
            (1.0, 1.0)
        } else {
            (cw as f32 / size.width as f32, ch as f32 / size.height as f32)
        };

        for cmd in &self.commands {
            match cmd {
                DrawCommand::StrokeRect {
                    rect,
                    color,
                    line_width,
                } => {
                    let r = Rect {
                        x: rect.x * sx,
                        y: rect.y * sy,
                        width: rect.width * sx,
                        height: rect.height * sy,
                    };
                    paint_rect_outline(canvas, r, *color, *line_width);
                }
                DrawCommand::FillCircle {
                    center,
                    radius,
                    color,
                } => {
                    let c = Point {
                        x: center.x * sx,
                        y: center.y * sy,
                    };
                    paint_disc(canvas, c, *radius, *color);
                }
                DrawCommand::FillText { .. } => {}
            }
        }
    }
}

impl Surface for DisplayList {
    fn size(&self) -> DisplaySize {
        self.size.unwrap_or(DisplaySize::new(0, 0))
    }

    fn resize(&mut self, size: DisplaySize) {
        self.size = Some(size);
        self.commands.clear();
    }

    fn clear(&mut self) {
        self.commands.clear();
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32) {
        self.commands.push(DrawCommand::StrokeRect {
            rect,
            color,
            line_width,
        });
    }

    fn fill_text(&mut self, text: &str, origin: Point, color: Color, font_px: f32) {
        self.commands.push(DrawCommand::FillText {
            text: text.to_string(),
            origin,
            color,
            font_px,
        });
    }

    fn fill_circle(&mut self, center: Point, radius: f32, color: Color) {
        self.commands.push(DrawCommand::FillCircle {
            center,
            radius,
            color,
        });
    }
}

/// Rounded percentage, e.g. 0.876 → 88.
pub fn percent(score: f32) -> i32 {
    (score * 100.0).round() as i32
}

/// Label drawn above a face box.
pub fn face_label(smiling: bool, happiness: f32) -> String {
    if smiling {
        format!("Smiling! ({}%)", percent(happiness))
    } else {
        format!("Face ({}%)", percent(happiness))
    }
}

/// Detection status line for the primary face.
pub fn detection_status(smiling: bool, happiness: f32) -> String {
    if smiling {
        format!("Smiling! ({}%)", percent(happiness))
    } else {
        format!("Face detected ({}%)", percent(happiness))
    }
}

/// Draw one face (box, label, landmarks) and report whether it is smiling.
pub fn draw_face<S: Surface + ?Sized>(surface: &mut S, face: &FaceDetection, threshold: f32) -> bool {
    let happiness = face.expressions.happy;
    let smiling = is_smiling(happiness, threshold);
    let color = if smiling { SMILE_COLOR } else { FACE_COLOR };
    let b = &face.bbox;

    surface.stroke_rect(
        Rect {
            x: b.x,
            y: b.y,
            width: b.width,
            height: b.height,
        },
        color,
        BOX_LINE_WIDTH,
    );
    surface.fill_text(
        &face_label(smiling, happiness),
        Point {
            x: b.x,
            y: b.y - LABEL_OFFSET_Y,
        },
        color,
        LABEL_FONT_PX,
    );
    for p in &face.landmarks {
        surface.fill_circle(*p, LANDMARK_RADIUS, color);
    }

    smiling
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Color) {
    let (w, h) = canvas.dimensions();
    if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
        canvas.put_pixel(x as u32, y as u32, Rgb([color.r, color.g, color.b]));
    }
}

/// Stroke centered on the rectangle edge, like a canvas `strokeRect`.
fn paint_rect_outline(canvas: &mut RgbImage, rect: Rect, color: Color, line_width: f32) {
    let half = (line_width / 2.0).max(0.5);
    let x0 = (rect.x - half).round() as i64;
    let x1 = (rect.x + rect.width + half).round() as i64;
    let y0 = (rect.y - half).round() as i64;
    let y1 = (rect.y + rect.height + half).round() as i64;
    let t = line_width.max(1.0).round() as i64;

    for y in y0..y1 {
        for x in x0..x1 {
            let on_edge = x < x0 + t || x >= x1 - t || y < y0 + t || y >= y1 - t;
            if on_edge {
                put(canvas, x, y, color);
            }
        }
    }
}

fn paint_disc(canvas: &mut RgbImage, center: Point, radius: f32, color: Color) {
    let r = radius.max(0.5);
    let x0 = (center.x - r).floor() as i64;
    let x1 = (center.x + r).ceil() as i64;
    let y0 = (center.y - r).floor() as i64;
    let y1 = (center.y + r).ceil() as i64;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f32 + 0.5 - center.x;
            let dy = y as f32 + 0.5 - center.y;
            if dx * dx + dy * dy <= r * r {
                put(canvas, x, y, color);
            }
        }
    }
}
