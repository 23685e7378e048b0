//! In-memory registry of flats with a grid index for location lookups.

use crate::error::CacheError;
use crate::volumes::{Area, Flat};
use flats_core::BlockPos;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

/// Edge length of one grid cell in blocks.
pub const GRID_SIZE: i32 = 16;
/// Most grid cells a single area may cover.
pub const MAX_AREA_CELLS: u64 = 65_536;

/// Number of x/z grid cells `area` covers.
pub fn grid_cells(area: &Area) -> u64 {
    let (min, max) = (area.min(), area.max());
    let span = |lo: i32, hi: i32| u64::from(lo.div_euclid(GRID_SIZE).abs_diff(hi.div_euclid(GRID_SIZE))) + 1;
    span(min.0, max.0) * span(min.2, max.2)
}

fn check_indexable(name: &str, area: &Area) -> Result<(), CacheError> {
    let cells = grid_cells(area);
    if cells > MAX_AREA_CELLS {
        return Err(CacheError::AreaTooLarge {
            name: name.to_string(),
            cells,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GridKey {
    world: String,
    x: i32,
    z: i32,
}

impl GridKey {
    fn of(pos: &BlockPos) -> Self {
        Self {
            world: pos.world.clone(),
            x: pos.x.div_euclid(GRID_SIZE),
            z: pos.z.div_euclid(GRID_SIZE),
        }
    }
}

/// Maps x/z grid cells to the names of flats with an area touching them.
#[derive(Debug, Default)]
struct SpatialIndex {
    cells: HashMap<GridKey, Vec<String>>,
}

impl SpatialIndex {
    fn insert_area(&mut self, name: &str, area: &Area) {
        let (min, max) = (area.min(), area.max());
        for x in min.0.div_euclid(GRID_SIZE)..=max.0.div_euclid(GRID_SIZE) {
            for z in min.2.div_euclid(GRID_SIZE)..=max.2.div_euclid(GRID_SIZE) {
                let key = GridKey {
                    world: area.world().to_string(),
                    x,
                    z,
                };
                let names = self.cells.entry(key).or_default();
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
    }

    fn remove_flat(&mut self, name: &str) {
        self.cells.retain(|_, names| {
            names.retain(|n| n != name);
            !names.is_empty()
        });
    }

    fn candidates(&self, pos: &BlockPos) -> &[String] {
        self.cells.get(&GridKey::of(pos)).map(Vec::as_slice).unwrap_or_default()
    }

    fn clear(&mut self) {
        self.cells.clear();
    }
}

/// All flats keyed by name.
#[derive(Debug, Default)]
pub struct FlatsCache {
    flats: BTreeMap<String, Flat>,
    index: SpatialIndex,
}

impl FlatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cache contents and rebuilds the index.
    pub fn load_all(&mut self, flats: impl IntoIterator<Item = Flat>) {
        self.flats.clear();
        self.index.clear();
        for flat in flats {
            for area in flat.areas() {
                self.index.insert_area(flat.name(), area);
            }
            self.flats.insert(flat.name().to_string(), flat);
        }
        debug!("Loaded {} flat(s) into the cache", self.flats.len());
    }

    /// Copies of every flat, for persisting off the tick thread.
    pub fn snapshot(&self) -> Vec<Flat> {
        self.flats.values().cloned().collect()
    }

    pub fn create(&mut self, name: &str, area: Area) -> Result<(), CacheError> {
        if self.exists(name) {
            return Err(CacheError::AlreadyExists(name.to_string()));
        }
        check_indexable(name, &area)?;
        self.index.insert_area(name, &area);
        self.flats.insert(name.to_string(), Flat::new(name, area));
        Ok(())
    }

    pub fn add_area(&mut self, name: &str, area: Area) -> Result<(), CacheError> {
        let flat = self
            .flats
            .get_mut(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        check_indexable(name, &area)?;
        self.index.insert_area(name, &area);
        flat.add_area(area);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<Flat, CacheError> {
        let flat = self
            .flats
            .remove(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        self.index.remove_flat(name);
        Ok(flat)
    }

    pub fn get(&self, name: &str) -> Option<&Flat> {
        self.flats.get(name)
    }

    /// Mutable access for ownership changes. Areas are added through
    /// [`FlatsCache::add_area`].
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Flat> {
        self.flats.get_mut(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.flats.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.flats.keys().cloned().collect()
    }

    pub fn flats(&self) -> impl Iterator<Item = &Flat> {
        self.flats.values()
    }

    pub fn all_areas(&self) -> impl Iterator<Item = &Area> {
        self.flats.values().flat_map(|flat| flat.areas())
    }

    pub fn len(&self) -> usize {
        self.flats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flats.is_empty()
    }

    /// The flat containing `pos`, if any.
    pub fn flat_at(&self, pos: &BlockPos) -> Option<&Flat> {
        self.index
            .candidates(pos)
            .iter()
            .filter_map(|name| self.flats.get(name))
            .find(|flat| flat.contains(pos))
    }

    pub fn flat_name_at(&self, pos: &BlockPos) -> Option<String> {
        self.flat_at(pos).map(|flat| flat.name().to_string())
    }

    pub fn owned_count(&self, player: Uuid) -> usize {
        self.flats.values().filter(|flat| flat.is_owner(player)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(name: &str, a: (i32, i32, i32), b: (i32, i32, i32)) -> Area {
        Area::new(
            BlockPos::new("world", a.0, a.1, a.2),
            BlockPos::new("world", b.0, b.1, b.2),
            name,
        )
    }

    #[test]
    fn create_rejects_duplicates_and_delete_rejects_missing() {
        let mut cache = FlatsCache::new();
        cache.create("a", area("a", (0, 0, 0), (5, 5, 5))).unwrap();
        assert_eq!(
            cache.create("a", area("a", (10, 0, 0), (15, 5, 5))),
            Err(CacheError::AlreadyExists("a".into()))
        );
        assert_eq!(cache.delete("b").unwrap_err(), CacheError::NotFound("b".into()));
        assert!(cache.delete("a").is_ok());
        assert!(cache.is_empty());
    }

    #[test]
    fn areas_covering_too_many_cells_are_refused() {
        let mut cache = FlatsCache::new();
        let wide = area("w", (0, 0, 0), (GRID_SIZE * 256, 0, GRID_SIZE * 256));
        assert_eq!(grid_cells(&wide), 257 * 257);
        assert!(matches!(
            cache.create("w", wide.clone()),
            Err(CacheError::AreaTooLarge { .. })
        ));

        cache.create("w", area("w", (0, 0, 0), (15, 0, 15))).unwrap();
        assert!(matches!(cache.add_area("w", wide), Err(CacheError::AreaTooLarge { .. })));
        assert_eq!(cache.get("w").unwrap().areas().len(), 1);
        assert_eq!(grid_cells(&area("x", (-1, 0, -1), (0, 0, 0))), 4);
    }

    #[test]
    fn lookup_finds_flats_across_grid_cells_and_negative_coordinates() {
        let mut cache = FlatsCache::new();
        cache.create("west", area("west", (-40, 60, -40), (-1, 70, -1))).unwrap();
        cache.create("east", area("east", (0, 60, 0), (40, 70, 40))).unwrap();

        let at = |x, y, z| cache.flat_name_at(&BlockPos::new("world", x, y, z));
        assert_eq!(at(-1, 65, -1).as_deref(), Some("west"));
        assert_eq!(at(-33, 65, -17).as_deref(), Some("west"));
        assert_eq!(at(0, 65, 0).as_deref(), Some("east"));
        assert_eq!(at(39, 70, 17).as_deref(), Some("east"));
        assert_eq!(at(20, 90, 20), None);
        assert_eq!(cache.flat_name_at(&BlockPos::new("nether", 5, 65, 5)), None);
    }

    #[test]
    fn added_areas_are_indexed_and_deleted_flats_are_not() {
        let mut cache = FlatsCache::new();
        cache.create("a", area("a", (0, 0, 0), (3, 3, 3))).unwrap();
        cache.add_area("a", area("a", (100, 0, 100), (103, 3, 103))).unwrap();
        assert_eq!(cache.all_areas().count(), 2);
        assert_eq!(
            cache.flat_name_at(&BlockPos::new("world", 101, 1, 101)).as_deref(),
            Some("a")
        );

        cache.delete("a").unwrap();
        assert_eq!(cache.flat_name_at(&BlockPos::new("world", 101, 1, 101)), None);
        assert!(cache.add_area("a", area("a", (0, 0, 0), (1, 1, 1))).is_err());
    }

    #[test]
    fn owned_count_and_reload() {
        let owner = Uuid::new_v4();
        let mut cache = FlatsCache::new();
        cache.create("a", area("a", (0, 0, 0), (3, 3, 3))).unwrap();
        cache.create("b", area("b", (10, 0, 0), (13, 3, 3))).unwrap();
        cache.get_mut("a").unwrap().set_owner(owner);
        assert_eq!(cache.owned_count(owner), 1);

        let saved = cache.snapshot();
        let mut restored = FlatsCache::new();
        restored.load_all(saved);
        assert_eq!(restored.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(restored.owned_count(owner), 1);
        assert_eq!(
            restored.flat_name_at(&BlockPos::new("world", 11, 1, 1)).as_deref(),
            Some("b")
        );
    }
}
