//! User-placed sticker decorations.
//!
//! Positions are percentages of the container (0..=100 on both axes, the
//! sticker's center). The board is the only mutator; the compositor and
//! capture export read it.

use crate::types::{BoundingBox, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_POSITION: f32 = 50.0;
pub const DEFAULT_SIZE_PX: u32 = 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StickerError {
    #[error("unknown sticker template: {0}")]
    UnknownTemplate(String),
    #[error("no placed sticker with id {0}")]
    NotPlaced(String),
    #[error("sticker {0} is already being dragged")]
    DragInProgress(String),
    #[error("no drag in progress")]
    NoActiveDrag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickerCategory {
    Animals,
    Accessories,
    Fun,
    Expressions,
    Seasonal,
}

/// A sticker type from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StickerTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub category: StickerCategory,
}

const fn template(
    id: &'static str,
    name: &'static str,
    icon: &'static str,
    category: StickerCategory,
) -> StickerTemplate {
    StickerTemplate { id, name, icon, category }
}

pub const CATALOG: [StickerTemplate; 19] = [
    template("dog", "Dog", "🐶", StickerCategory::Animals),
    template("cat", "Cat", "🐱", StickerCategory::Animals),
    template("bunny", "Bunny", "🐰", StickerCategory::Animals),
    template("bear", "Bear", "🐻", StickerCategory::Animals),
    template("panda", "Panda", "🐼", StickerCategory::Animals),
    template("glasses", "Glasses", "🕶️", StickerCategory::Accessories),
    template("crown", "Crown", "👑", StickerCategory::Accessories),
    template("hat", "Hat", "🎩", StickerCategory::Accessories),
    template("party-hat", "Party Hat", "🎉", StickerCategory::Accessories),
    template("hearts", "Hearts", "💕", StickerCategory::Fun),
    template("stars", "Stars", "⭐", StickerCategory::Fun),
    template("sparkles", "Sparkles", "✨", StickerCategory::Fun),
    template("flowers", "Flowers", "🌸", StickerCategory::Fun),
    template("laugh", "LOL", "😂", StickerCategory::Expressions),
    template("cool", "Cool", "😎", StickerCategory::Expressions),
    template("fire", "Fire", "🔥", StickerCategory::Expressions),
    template("santa", "Santa", "🎅", StickerCategory::Seasonal),
    template("snowflake", "Snowflake", "❄️", StickerCategory::Seasonal),
    template("pumpkin", "Pumpkin", "🎃", StickerCategory::Seasonal),
];

impl StickerTemplate {
    pub fn find(id: &str) -> Option<&'static StickerTemplate> {
        CATALOG.iter().find(|t| t.id == id)
    }
}

/// One placement of a template. Ids are unique per placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedSticker {
    pub id: String,
    pub template_id: String,
    pub name: String,
    pub icon: String,
    /// Center, percent of container width.
    pub x: f32,
    /// Center, percent of container height.
    pub y: f32,
    pub size: u32,
    /// Degrees, clockwise.
    pub rotation: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Drag {
    id: String,
    /// Pointer position relative to the sticker center, in container pixels.
    offset: Point,
}

#[derive(Debug, Clone, Default)]
pub struct StickerBoard {
    stickers: Vec<PlacedSticker>,
    drag: Option<Drag>,
}

impl StickerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stickers(&self) -> &[PlacedSticker] {
        &self.stickers
    }

    pub fn len(&self) -> usize {
        self.stickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stickers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PlacedSticker> {
        self.stickers.iter().find(|s| s.id == id)
    }

    /// Place a new sticker at the container center. Returns its id.
    pub fn add(&mut self, template: &StickerTemplate) -> String {
        let id = format!("{}-{}", template.id, Uuid::new_v4().simple());
        self.stickers.push(PlacedSticker {
            id: id.clone(),
            template_id: template.id.to_string(),
            name: template.name.to_string(),
            icon: template.icon.to_string(),
            x: DEFAULT_POSITION,
            y: DEFAULT_POSITION,
            size: DEFAULT_SIZE_PX,
            rotation: 0.0,
        });
        tracing::debug!(id = %id, template = template.id, "sticker placed");
        id
    }

    pub fn add_by_id(&mut self, template_id: &str) -> Result<String, StickerError> {
        let template = StickerTemplate::find(template_id)
            .ok_or_else(|| StickerError::UnknownTemplate(template_id.to_string()))?;
        Ok(self.add(template))
    }

    pub fn remove(&mut self, id: &str) -> Result<PlacedSticker, StickerError> {
        let idx = self
            .stickers
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StickerError::NotPlaced(id.to_string()))?;
        if self.dragging() == Some(id) {
            self.drag = None;
        }
        Ok(self.stickers.remove(idx))
    }

    pub fn clear(&mut self) {
        self.stickers.clear();
        self.drag = None;
    }

    /// Move a sticker, clamping both axes to [0, 100].
    pub fn update_position(&mut self, id: &str, x: f32, y: f32) -> Result<(), StickerError> {
        let sticker = self
            .stickers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StickerError::NotPlaced(id.to_string()))?;
        sticker.x = clamp_percent(x);
        sticker.y = clamp_percent(y);
        Ok(())
    }

    /// Begin dragging `id` from `pointer`, both in the coordinate space of
    /// `container`. The grab offset is remembered so the sticker does not
    /// jump to the pointer.
    pub fn start_drag(&mut self, id: &str, pointer: Point, container: BoundingBox) -> Result<(), StickerError> {
        if let Some(active) = &self.drag {
            return Err(StickerError::DragInProgress(active.id.clone()));
        }
        let sticker = self
            .get(id)
            .ok_or_else(|| StickerError::NotPlaced(id.to_string()))?;
        let offset = Point::new(
            pointer.x - container.x - sticker.x * container.width / 100.0,
            pointer.y - container.y - sticker.y * container.height / 100.0,
        );
        self.drag = Some(Drag {
            id: id.to_string(),
            offset,
        });
        Ok(())
    }

    /// Reposition the active sticker for a pointer move. Returns the new
    /// (x, y) percentages.
    pub fn drag_to(&mut self, pointer: Point, container: BoundingBox) -> Result<(f32, f32), StickerError> {
        let drag = self.drag.clone().ok_or(StickerError::NoActiveDrag)?;
        let current = self
            .get(&drag.id)
            .map(|s| (s.x, s.y))
            .ok_or_else(|| StickerError::NotPlaced(drag.id.clone()))?;
        if container.width <= 0.0 || container.height <= 0.0 {
            return Ok(current);
        }

        let x = (pointer.x - container.x - drag.offset.x) * 100.0 / container.width;
        let y = (pointer.y - container.y - drag.offset.y) * 100.0 / container.height;
        self.update_position(&drag.id, x, y)?;
        Ok((clamp_percent(x), clamp_percent(y)))
    }

    /// Finish the active drag, returning the id that was being dragged.
    pub fn end_drag(&mut self) -> Option<String> {
        self.drag.take().map(|d| d.id)
    }

    pub fn dragging(&self) -> Option<&str> {
        self.drag.as_ref().map(|d| d.id.as_str())
    }
}

fn clamp_percent(v: f32) -> f32 {
    if v.is_nan() {
        return DEFAULT_POSITION;
    }
    v.clamp(0.0, 100.0)
}
