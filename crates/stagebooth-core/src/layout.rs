use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Smallest normalized width/height a tile may shrink to.
pub const MIN_TILE_SIZE: f64 = 0.05;

pub const DEFAULT_BACKGROUND: &str = "#ffffff";

/// Rendered stage size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSize {
    pub width: u32,
    pub height: u32,
}

impl StageSize {
    /// `None` for a zero-sized stage (not laid out yet).
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

/// One participant's rectangle on the stage.
///
/// Normalized to the stage size unless the owning room is still in legacy
/// pixel units. `z` is paint order, lowest first.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Tile {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub z: i32,
}

impl Tile {
    pub fn new(x: f64, y: f64, w: f64, h: f64, z: i32) -> Self {
        Self { x, y, w, h, z }
    }

    /// Clamp so that `w,h` lie in `[MIN_TILE_SIZE, 1]` and the rectangle
    /// stays inside the unit square. Non-finite values collapse to the minimum.
    pub fn clamped(self) -> Self {
        let w = clamp_size(self.w);
        let h = clamp_size(self.h);
        Self {
            x: clamp_offset(self.x, w),
            y: clamp_offset(self.y, h),
            w,
            h,
            z: self.z,
        }
    }

    /// Convert a pixel-unit tile to normalized units. Does not clamp.
    pub fn from_pixels(px: Tile, stage: StageSize) -> Self {
        let sw = f64::from(stage.width);
        let sh = f64::from(stage.height);
        Self {
            x: px.x / sw,
            y: px.y / sh,
            w: px.w / sw,
            h: px.h / sh,
            z: px.z,
        }
    }

    /// Convert a normalized tile to pixel units for `stage`.
    pub fn to_pixels(&self, stage: StageSize) -> Tile {
        let sw = f64::from(stage.width);
        let sh = f64::from(stage.height);
        Tile {
            x: self.x * sw,
            y: self.y * sh,
            w: self.w * sw,
            h: self.h * sh,
            z: self.z,
        }
    }
}

fn clamp_size(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(MIN_TILE_SIZE, 1.0)
    } else {
        MIN_TILE_SIZE
    }
}

fn clamp_offset(v: f64, size: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0 - size)
    } else {
        0.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayoutUnits {
    #[default]
    Normalized,
    #[serde(alias = "pixels", alias = "px")]
    Pixel,
}

/// Shared room state, replicated last-writer-wins from the master.
///
/// `layout` keeps arrival order; it breaks paint-order ties between equal `z`.
/// Missing and `null` fields both take their defaults.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(default = "default_background", deserialize_with = "background_or_default")]
    pub background: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub layout: IndexMap<String, Tile>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub layout_units: LayoutUnits,
}

fn default_background() -> String {
    DEFAULT_BACKGROUND.to_string()
}

fn background_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_background))
}

/// Treat an explicit `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Default for Room {
    fn default() -> Self {
        Self {
            background: default_background(),
            layout: IndexMap::new(),
            layout_units: LayoutUnits::Normalized,
        }
    }
}

impl Room {
    pub fn tile(&self, participant_id: &str) -> Option<&Tile> {
        self.layout.get(participant_id)
    }

    /// Migrate a legacy pixel-unit layout to normalized units.
    ///
    /// Returns `true` if a migration happened; normalized rooms are untouched.
    pub fn normalize(&mut self, stage: StageSize) -> bool {
        if self.layout_units != LayoutUnits::Pixel {
            return false;
        }
        for tile in self.layout.values_mut() {
            *tile = Tile::from_pixels(*tile, stage).clamped();
        }
        self.layout_units = LayoutUnits::Normalized;
        true
    }

    /// Merge `patch` into this room. Tiles are clamped on the way in.
    ///
    /// Updated tiles keep their position; new ones go last.
    pub fn merge(&mut self, patch: RoomPatch) {
        if let Some(background) = patch.background {
            self.background = background;
        }
        for id in &patch.remove {
            self.layout.shift_remove(id);
        }
        for (id, tile) in patch.layout {
            self.layout.insert(id, tile.clamped());
        }
        self.layout_units = LayoutUnits::Normalized;
    }
}

/// A master edit to the shared room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub background: Option<String>,
    pub layout: IndexMap<String, Tile>,
    pub remove: Vec<String>,
}

impl RoomPatch {
    pub fn tile(participant_id: impl Into<String>, tile: Tile) -> Self {
        let mut patch = Self::default();
        patch.layout.insert(participant_id.into(), tile);
        patch
    }

    pub fn background(color: impl Into<String>) -> Self {
        Self {
            background: Some(color.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.background.is_none() && self.layout.is_empty() && self.remove.is_empty()
    }
}
