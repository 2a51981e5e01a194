//! Filter engine: maps a style, an intensity and the beauty flag to an
//! ordered list of image adjustments.
//!
//! Every style is a fixed formula over `i = intensity / 100`. At `i = 0`
//! every formula evaluates to the identity adjustment; only the beauty
//! addendum survives.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of adjustment a style may use. Each acts on a distinct channel
/// of the image, mirroring the CSS filter functions of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdjustmentKind {
    /// Percent, 0 = identity.
    Grayscale,
    /// Percent, 0 = identity.
    Sepia,
    /// Percent, 0 = identity.
    Invert,
    /// Factor, 1 = identity.
    Brightness,
    /// Factor, 1 = identity.
    Contrast,
    /// Factor, 1 = identity.
    Saturate,
    /// Gaussian standard deviation in pixels, 0 = identity.
    Blur,
    /// Degrees, 0 = identity.
    HueRotate,
}

impl AdjustmentKind {
    /// Parameter value that leaves the image untouched.
    pub fn identity_value(self) -> f32 {
        match self {
            AdjustmentKind::Brightness | AdjustmentKind::Contrast | AdjustmentKind::Saturate => 1.0,
            _ => 0.0,
        }
    }

    fn css_name(self) -> &'static str {
        match self {
            AdjustmentKind::Grayscale => "grayscale",
            AdjustmentKind::Sepia => "sepia",
            AdjustmentKind::Invert => "invert",
            AdjustmentKind::Brightness => "brightness",
            AdjustmentKind::Contrast => "contrast",
            AdjustmentKind::Saturate => "saturate",
            AdjustmentKind::Blur => "blur",
            AdjustmentKind::HueRotate => "hue-rotate",
        }
    }
}

/// One named adjustment with its numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub kind: AdjustmentKind,
    pub value: f32,
}

impl Adjustment {
    pub const fn new(kind: AdjustmentKind, value: f32) -> Self {
        Self { kind, value }
    }

    pub fn is_identity(&self) -> bool {
        (self.value - self.kind.identity_value()).abs() < 1e-6
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.kind.css_name();
        let v = self.value;
        match self.kind {
            AdjustmentKind::Grayscale | AdjustmentKind::Sepia | AdjustmentKind::Invert => {
                write!(f, "{name}({v}%)")
            }
            AdjustmentKind::Blur => write!(f, "{name}({v}px)"),
            AdjustmentKind::HueRotate => write!(f, "{name}({v}deg)"),
            _ => write!(f, "{name}({v})"),
        }
    }
}

/// Ordered list of adjustments, applied first to last.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdjustmentSpec {
    steps: Vec<Adjustment>,
}

impl AdjustmentSpec {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<Adjustment>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Adjustment] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True when applying this spec cannot change any pixel.
    pub fn is_identity(&self) -> bool {
        self.steps.iter().all(Adjustment::is_identity)
    }

    /// CSS `filter` property value, `"none"` when empty.
    pub fn to_css(&self) -> String {
        if self.steps.is_empty() {
            return "none".to_string();
        }
        self.steps
            .iter()
            .map(Adjustment::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    // Formulas are evaluated in f64 so parameters like 1 + 0.3 land on the
    // nearest f32 instead of a rounding midpoint.
    fn push(&mut self, kind: AdjustmentKind, value: f64) {
        self.steps.push(Adjustment::new(kind, value as f32));
    }
}

/// The enumerated style set. Unknown identifiers resolve to [`FilterId::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterId {
    #[default]
    None,
    Grayscale,
    Sepia,
    Invert,
    Brightness,
    Contrast,
    Saturate,
    Blur,
    Vintage,
    Cool,
    Warm,
    Dramatic,
    Moonlight,
    Sunset,
    Ocean,
    Rose,
    Noir,
    Cyberpunk,
    Pastel,
    Neon,
}

impl FilterId {
    pub const ALL: [FilterId; 20] = [
        FilterId::None,
        FilterId::Grayscale,
        FilterId::Sepia,
        FilterId::Invert,
        FilterId::Brightness,
        FilterId::Contrast,
        FilterId::Saturate,
        FilterId::Blur,
        FilterId::Vintage,
        FilterId::Cool,
        FilterId::Warm,
        FilterId::Dramatic,
        FilterId::Moonlight,
        FilterId::Sunset,
        FilterId::Ocean,
        FilterId::Rose,
        FilterId::Noir,
        FilterId::Cyberpunk,
        FilterId::Pastel,
        FilterId::Neon,
    ];

    /// Resolve a style identifier, failing closed to `None`.
    pub fn from_id(id: &str) -> FilterId {
        match Self::ALL.iter().find(|f| f.id() == id) {
            Some(f) => *f,
            None => {
                tracing::debug!(id, "unknown filter id; using none");
                FilterId::None
            }
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            FilterId::None => "none",
            FilterId::Grayscale => "grayscale",
            FilterId::Sepia => "sepia",
            FilterId::Invert => "invert",
            FilterId::Brightness => "brightness",
            FilterId::Contrast => "contrast",
            FilterId::Saturate => "saturate",
            FilterId::Blur => "blur",
            FilterId::Vintage => "vintage",
            FilterId::Cool => "cool",
            FilterId::Warm => "warm",
            FilterId::Dramatic => "dramatic",
            FilterId::Moonlight => "moonlight",
            FilterId::Sunset => "sunset",
            FilterId::Ocean => "ocean",
            FilterId::Rose => "rose",
            FilterId::Noir => "noir",
            FilterId::Cyberpunk => "cyberpunk",
            FilterId::Pastel => "pastel",
            FilterId::Neon => "neon",
        }
    }

    /// Display name shown in pickers and prompts.
    pub fn name(self) -> &'static str {
        match self {
            FilterId::None => "Original",
            FilterId::Grayscale => "Grayscale",
            FilterId::Sepia => "Sepia",
            FilterId::Invert => "Invert",
            FilterId::Brightness => "Bright",
            FilterId::Contrast => "Contrast",
            FilterId::Saturate => "Vibrant",
            FilterId::Blur => "Blur",
            FilterId::Vintage => "Vintage",
            FilterId::Cool => "Cool",
            FilterId::Warm => "Warm",
            FilterId::Dramatic => "Dramatic",
            FilterId::Moonlight => "Moonlight",
            FilterId::Sunset => "Sunset",
            FilterId::Ocean => "Ocean",
            FilterId::Rose => "Rose",
            FilterId::Noir => "Noir",
            FilterId::Cyberpunk => "Cyberpunk",
            FilterId::Pastel => "Pastel",
            FilterId::Neon => "Neon",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            FilterId::None => "✨",
            FilterId::Grayscale => "⚫",
            FilterId::Sepia => "🟤",
            FilterId::Invert => "🔄",
            FilterId::Brightness => "☀️",
            FilterId::Contrast => "⚡",
            FilterId::Saturate => "🌈",
            FilterId::Blur => "💫",
            FilterId::Vintage => "📷",
            FilterId::Cool => "❄️",
            FilterId::Warm => "🔥",
            FilterId::Dramatic => "🎭",
            FilterId::Moonlight => "🌙",
            FilterId::Sunset => "🌅",
            FilterId::Ocean => "🌊",
            FilterId::Rose => "🌹",
            FilterId::Noir => "🎬",
            FilterId::Cyberpunk => "🤖",
            FilterId::Pastel => "🎨",
            FilterId::Neon => "💡",
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// The user's current filter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub id: FilterId,
    /// Percentage in [0, 100].
    pub intensity: u8,
    pub beauty: bool,
}

impl FilterSpec {
    pub fn new(id: FilterId, intensity: i32, beauty: bool) -> Self {
        Self {
            id,
            intensity: intensity.clamp(0, 100) as u8,
            beauty,
        }
    }

    pub fn adjustments(&self) -> AdjustmentSpec {
        compute_adjustments(self.id, self.intensity as i32, self.beauty)
    }
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            id: FilterId::None,
            intensity: 100,
            beauty: false,
        }
    }
}

/// Fixed skin-smoothing addendum appended whenever beauty mode is on.
pub const BEAUTY_BLUR_PX: f32 = 0.5;
pub const BEAUTY_BRIGHTNESS: f32 = 1.05;

/// Compute the adjustment list for a style.
///
/// Pure and deterministic; cheap enough to call every frame.
pub fn compute_adjustments(id: FilterId, intensity_percent: i32, beauty: bool) -> AdjustmentSpec {
    use AdjustmentKind::*;

    let i = intensity_percent.clamp(0, 100) as f64 / 100.0;
    let mut spec = AdjustmentSpec::default();

    match id {
        FilterId::None => {}
        FilterId::Grayscale => spec.push(Grayscale, 100.0 * i),
        FilterId::Sepia => spec.push(Sepia, 100.0 * i),
        FilterId::Invert => spec.push(Invert, 100.0 * i),
        FilterId::Brightness => spec.push(Brightness, 1.0 + 0.3 * i),
        FilterId::Contrast => spec.push(Contrast, 1.0 + 0.5 * i),
        FilterId::Saturate => spec.push(Saturate, 1.0 + i),
        FilterId::Blur => spec.push(Blur, 3.0 * i),
        FilterId::Vintage => {
            spec.push(Sepia, 50.0 * i);
            spec.push(Contrast, 1.0 + 0.2 * i);
            spec.push(Brightness, 1.0 - 0.1 * i);
        }
        FilterId::Cool => {
            spec.push(HueRotate, 180.0 * i);
            spec.push(Saturate, 1.0 + 0.3 * i);
        }
        FilterId::Warm => {
            spec.push(Sepia, 30.0 * i);
            spec.push(Saturate, 1.0 + 0.4 * i);
            spec.push(Brightness, 1.0 + 0.1 * i);
        }
        FilterId::Dramatic => {
            spec.push(Contrast, 1.0 + 0.5 * i);
            spec.push(Brightness, 1.0 - 0.1 * i);
            spec.push(Saturate, 1.0 + 0.3 * i);
        }
        FilterId::Moonlight => {
            spec.push(Brightness, 1.0 - 0.2 * i);
            spec.push(Contrast, 1.0 + 0.2 * i);
            spec.push(Saturate, 1.0 - 0.3 * i);
            spec.push(HueRotate, 200.0 * i);
        }
        FilterId::Sunset => {
            spec.push(Sepia, 40.0 * i);
            spec.push(Saturate, 1.0 + 0.5 * i);
            spec.push(Brightness, 1.0 + 0.1 * i);
            spec.push(HueRotate, -10.0 * i);
        }
        FilterId::Ocean => {
            spec.push(HueRotate, 180.0 * i);
            spec.push(Saturate, 1.0 + 0.4 * i);
            spec.push(Brightness, 1.0 + 0.1 * i);
        }
        FilterId::Rose => {
            spec.push(HueRotate, 320.0 * i);
            spec.push(Saturate, 1.0 + 0.3 * i);
            spec.push(Brightness, 1.0 + 0.05 * i);
        }
        FilterId::Noir => {
            spec.push(Grayscale, 100.0 * i);
            spec.push(Contrast, 1.0 + 0.8 * i);
            spec.push(Brightness, 1.0 - 0.1 * i);
        }
        FilterId::Cyberpunk => {
            spec.push(HueRotate, 270.0 * i);
            spec.push(Saturate, 1.0 + i);
            spec.push(Contrast, 1.0 + 0.3 * i);
        }
        FilterId::Pastel => {
            spec.push(Saturate, 1.0 - 0.4 * i);
            spec.push(Brightness, 1.0 + 0.2 * i);
            spec.push(Contrast, 1.0 - 0.1 * i);
        }
        FilterId::Neon => {
            spec.push(Saturate, 1.0 + 1.5 * i);
            spec.push(Contrast, 1.0 + 0.4 * i);
            spec.push(Brightness, 1.0 + 0.2 * i);
        }
    }

    if beauty {
        spec.steps.push(Adjustment::new(Blur, BEAUTY_BLUR_PX));
        spec.steps.push(Adjustment::new(Brightness, BEAUTY_BRIGHTNESS));
    }

    spec
}
