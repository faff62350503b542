// tiles.rs — 16×16 tile grid and the atlas texture tiles are patched into

use image::{imageops, GenericImage, RgbaImage};

use crate::config::{TileConfig, TILE_GRID};

/// One cell of the grid. `row` and `col` are 1-based; row 1 is the bottom strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    pub row: u32,
    pub col: u32,
}

impl TileKey {
    pub fn new(row: u32, col: u32) -> Self {
        debug_assert!((1..=TILE_GRID).contains(&row) && (1..=TILE_GRID).contains(&col));
        Self { row, col }
    }

    fn index(self) -> usize {
        ((self.row - 1) * TILE_GRID + (self.col - 1)) as usize
    }

    /// Request order: rows top to bottom (16 down to 1), columns left to right.
    pub fn enumerate() -> impl Iterator<Item = TileKey> {
        (1..=TILE_GRID)
            .rev()
            .flat_map(|row| (1..=TILE_GRID).map(move |col| TileKey::new(row, col)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Pending,
    Loading,
    Filled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TileGrid {
    cells: Vec<TileState>,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            cells: vec![TileState::Pending; (TILE_GRID * TILE_GRID) as usize],
        }
    }
}

impl TileGrid {
    pub fn state(&self, key: TileKey) -> TileState {
        self.cells[key.index()]
    }

    pub fn set(&mut self, key: TileKey, state: TileState) {
        self.cells[key.index()] = state;
    }

    pub fn count(&self, state: TileState) -> usize {
        self.cells.iter().filter(|&&s| s == state).count()
    }

    pub fn total(&self) -> usize {
        self.cells.len()
    }

    /// Every cell is either filled or failed.
    pub fn is_settled(&self) -> bool {
        self.cells
            .iter()
            .all(|s| matches!(s, TileState::Filled | TileState::Failed))
    }
}

/// Pixel rectangle inside a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Full-resolution texture assembled from tiles. Unfilled pixels are transparent.
#[derive(Debug, Clone)]
pub struct TileAtlas {
    image: RgbaImage,
    tile_width: u32,
    tile_height: u32,
    pub grid: TileGrid,
    dirty: Vec<TextureRegion>,
}

impl TileAtlas {
    pub fn new(config: &TileConfig) -> Self {
        Self {
            image: RgbaImage::new(config.atlas_width(), config.atlas_height()),
            tile_width: config.tile_width,
            tile_height: config.tile_height,
            grid: TileGrid::default(),
            dirty: Vec::new(),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn region(&self, key: TileKey) -> TextureRegion {
        TextureRegion {
            x: (key.col - 1) * self.tile_width,
            y: self.image.height() - key.row * self.tile_height,
            width: self.tile_width,
            height: self.tile_height,
        }
    }

    /// Copy a tile into its cell and queue the cell for upload.
    /// Tiles of the wrong size are resampled to the cell size.
    pub fn patch(&mut self, key: TileKey, tile: &RgbaImage) -> TextureRegion {
        let region = self.region(key);
        let resized;
        let tile = if tile.dimensions() != (region.width, region.height) {
            resized = imageops::resize(tile, region.width, region.height, imageops::FilterType::Triangle);
            &resized
        } else {
            tile
        };

        // region is inside the atlas by construction
        let _ = self.image.copy_from(tile, region.x, region.y);

        self.grid.set(key, TileState::Filled);
        if !self.dirty.contains(&region) {
            self.dirty.push(region);
        }
        region
    }

    pub fn take_dirty(&mut self) -> Vec<TextureRegion> {
        std::mem::take(&mut self.dirty)
    }

    /// Tightly packed RGBA bytes of `region`, ready for a texture upload.
    pub fn region_bytes(&self, region: TextureRegion) -> Vec<u8> {
        let view = imageops::crop_imm(&self.image, region.x, region.y, region.width, region.height);
        view.to_image().into_raw()
    }
}
