use std::fmt;

/// A user prompt in source image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Point { x: f32, y: f32 },
    Box { x1: f32, y1: f32, x2: f32, y2: f32 }, // left-top, right-bottom
    Text(String),
}

impl Prompt {
    pub fn new_point(x: f32, y: f32) -> Self {
        Self::Point { x, y }
    }

    pub fn new_box(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::Box { x1, y1, x2, y2 }
    }

    pub fn new_text<S: Into<String>>(text: S) -> Self {
        Self::Text(text.into())
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Prompt::Text(t) => Some(t.trim()),
            _ => None,
        }
    }

    /// Checks that need no image: non-empty text, finite and ordered geometry.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Prompt::Text(t) if t.trim().is_empty() => Err("text prompt must not be empty".into()),
            Prompt::Text(_) => Ok(()),
            Prompt::Point { x, y } => {
                if x.is_finite() && y.is_finite() {
                    Ok(())
                } else {
                    Err(format!("point ({x}, {y}) is not finite"))
                }
            }
            Prompt::Box { x1, y1, x2, y2 } => {
                if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
                    Err(format!("box ({x1}, {y1}, {x2}, {y2}) is not finite"))
                } else if x1 >= x2 || y1 >= y2 {
                    Err(format!(
                        "box ({x1}, {y1}, {x2}, {y2}) needs x1 < x2 and y1 < y2"
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Checks the geometry against the loaded image.
    pub fn check_bounds(&self, width: u32, height: u32) -> Result<(), String> {
        let (w, h) = (width as f32, height as f32);
        match *self {
            Prompt::Text(_) => Ok(()),
            Prompt::Point { x, y } => {
                if x >= 0.0 && y >= 0.0 && x < w && y < h {
                    Ok(())
                } else {
                    Err(format!(
                        "point ({x}, {y}) is outside the {width}x{height} image"
                    ))
                }
            }
            Prompt::Box { x1, y1, x2, y2 } => {
                if x1 >= 0.0 && y1 >= 0.0 && x2 <= w && y2 <= h {
                    Ok(())
                } else {
                    Err(format!(
                        "box ({x1}, {y1}, {x2}, {y2}) is outside the {width}x{height} image"
                    ))
                }
            }
        }
    }
}

impl From<[f32; 4]> for Prompt {
    fn from(bb: [f32; 4]) -> Self {
        Prompt::new_box(bb[0], bb[1], bb[2], bb[3])
    }
}

impl From<[f32; 2]> for Prompt {
    fn from(point: [f32; 2]) -> Self {
        Prompt::new_point(point[0], point[1])
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::Point { x, y } => write!(f, "point({x}, {y})"),
            Prompt::Box { x1, y1, x2, y2 } => write!(f, "box({x1}, {y1}, {x2}, {y2})"),
            Prompt::Text(t) => write!(f, "text({t:?})"),
        }
    }
}
