//! Cuboid areas, per-player selections and the flats made from them.

use crate::error::LocationParseError;
use flats_core::{AttrValue, BlockPos, EntityHandle, StateStore, StoreResult, StoreView};
use uuid::Uuid;

/// Record keys holding the two selection corners of a player.
pub const SELECTION_POS1: &str = "flats.selection.pos1";
pub const SELECTION_POS2: &str = "flats.selection.pos2";

// ============================================================================
// Area
// ============================================================================

/// A cuboid between two corners, belonging to one flat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Area {
    pos1: BlockPos,
    pos2: BlockPos,
    flat_name: String,
    min: (i32, i32, i32),
    max: (i32, i32, i32),
}

impl Area {
    /// Both corners are taken to be in `pos1`'s world.
    pub fn new(pos1: BlockPos, pos2: BlockPos, flat_name: impl Into<String>) -> Self {
        let min = (pos1.x.min(pos2.x), pos1.y.min(pos2.y), pos1.z.min(pos2.z));
        let max = (pos1.x.max(pos2.x), pos1.y.max(pos2.y), pos1.z.max(pos2.z));
        Self {
            pos1,
            pos2,
            flat_name: flat_name.into(),
            min,
            max,
        }
    }

    /// Parses `world:x1,y1,z1;x2,y2,z2`.
    pub fn parse(location: &str, flat_name: impl Into<String>) -> Result<Self, LocationParseError> {
        let malformed = || LocationParseError::Malformed(location.to_string());
        let (world, corners) = location.rsplit_once(':').ok_or_else(malformed)?;
        if world.is_empty() {
            return Err(malformed());
        }
        let (first, second) = corners.split_once(';').ok_or_else(malformed)?;

        let corner = |raw: &str| -> Result<BlockPos, LocationParseError> {
            let coords: Vec<&str> = raw.split(',').collect();
            if coords.len() != 3 {
                return Err(malformed());
            }
            let mut parsed = [0i32; 3];
            for (slot, value) in parsed.iter_mut().zip(&coords) {
                *slot = value.trim().parse().map_err(|_| LocationParseError::InvalidCoordinate {
                    input: location.to_string(),
                    value: value.to_string(),
                })?;
            }
            Ok(BlockPos::new(world, parsed[0], parsed[1], parsed[2]))
        };

        Ok(Self::new(corner(first)?, corner(second)?, flat_name))
    }

    /// `None` unless both corners are selected in the same world.
    pub fn from_selection(selection: &Selection, flat_name: impl Into<String>) -> Option<Self> {
        match (&selection.pos1, &selection.pos2) {
            (Some(a), Some(b)) if a.world == b.world => Some(Self::new(a.clone(), b.clone(), flat_name)),
            _ => None,
        }
    }

    pub fn pos1(&self) -> &BlockPos {
        &self.pos1
    }

    pub fn pos2(&self) -> &BlockPos {
        &self.pos2
    }

    pub fn world(&self) -> &str {
        &self.pos1.world
    }

    pub fn flat_name(&self) -> &str {
        &self.flat_name
    }

    pub fn min(&self) -> (i32, i32, i32) {
        self.min
    }

    pub fn max(&self) -> (i32, i32, i32) {
        self.max
    }

    pub fn location_string(&self) -> String {
        format!("{}:{};{}", self.pos1.world, self.pos1.coords(), self.pos2.coords())
    }

    /// Inclusive bounds check in this area's world.
    pub fn contains(&self, pos: &BlockPos) -> bool {
        pos.world == self.world()
            && (self.min.0..=self.max.0).contains(&pos.x)
            && (self.min.1..=self.max.1).contains(&pos.y)
            && (self.min.2..=self.max.2).contains(&pos.z)
    }

    /// Whether `pos` is within `range` blocks of either corner on every axis.
    pub fn is_within_distance(&self, pos: &BlockPos, range: i32) -> bool {
        let Ok(range) = u32::try_from(range) else {
            return false;
        };
        let near = |corner: &BlockPos| {
            pos.x.abs_diff(corner.x) <= range
                && pos.y.abs_diff(corner.y) <= range
                && pos.z.abs_diff(corner.z) <= range
        };
        pos.world == self.world() && (near(&self.pos1) || near(&self.pos2))
    }

    /// Every block on the shell of the cuboid.
    pub fn outer_blocks(&self) -> Vec<BlockPos> {
        let (min, max) = (self.min, self.max);
        let mut blocks = Vec::new();
        for x in min.0..=max.0 {
            for y in min.1..=max.1 {
                for z in min.2..=max.2 {
                    if x == min.0 || x == max.0 || y == min.1 || y == max.1 || z == min.2 || z == max.2 {
                        blocks.push(BlockPos::new(self.world(), x, y, z));
                    }
                }
            }
        }
        blocks
    }
}

// ============================================================================
// Selection
// ============================================================================

/// The two corners a player marked with the selection wand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub pos1: Option<BlockPos>,
    pub pos2: Option<BlockPos>,
}

impl Selection {
    /// Reads the selection stored in a player's record.
    pub fn load(store: StoreView<'_>, player: EntityHandle) -> StoreResult<Self> {
        store.read(player, |record| Self {
            pos1: record.get(SELECTION_POS1).and_then(AttrValue::as_position).cloned(),
            pos2: record.get(SELECTION_POS2).and_then(AttrValue::as_position).cloned(),
        })
    }

    /// Removes both corners from a player's record.
    pub fn clear(store: &StateStore, player: EntityHandle) -> StoreResult<()> {
        store.update(player, |attrs| {
            attrs.remove(SELECTION_POS1);
            attrs.remove(SELECTION_POS2);
        })
    }

    /// Inclusive block count, or 0 unless both corners are set in one world.
    /// Saturates at `u64::MAX`.
    pub fn volume(&self) -> u64 {
        match (&self.pos1, &self.pos2) {
            (Some(a), Some(b)) if a.world == b.world => {
                let span = |p: i32, q: i32| u64::from(p.abs_diff(q)) + 1;
                span(a.x, b.x)
                    .checked_mul(span(a.y, b.y))
                    .and_then(|area| area.checked_mul(span(a.z, b.z)))
                    .unwrap_or(u64::MAX)
            }
            _ => 0,
        }
    }

    pub fn intersects(&self, area: &Area) -> bool {
        let Some(mine) = Area::from_selection(self, "") else {
            return false;
        };
        if mine.world() != area.world() {
            return false;
        }
        let (a_min, a_max) = (mine.min(), mine.max());
        let (b_min, b_max) = (area.min(), area.max());
        a_min.0 <= b_max.0
            && a_max.0 >= b_min.0
            && a_min.1 <= b_max.1
            && a_max.1 >= b_min.1
            && a_min.2 <= b_max.2
            && a_max.2 >= b_min.2
    }
}

// ============================================================================
// Flat
// ============================================================================

/// A named flat made of one or more areas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flat {
    name: String,
    areas: Vec<Area>,
    owner: Option<Uuid>,
    trusted: Vec<Uuid>,
}

impl Flat {
    pub fn new(name: impl Into<String>, area: Area) -> Self {
        Self {
            name: name.into(),
            areas: vec![area],
            owner: None,
            trusted: Vec::new(),
        }
    }

    pub fn with_parts(
        name: impl Into<String>,
        areas: Vec<Area>,
        owner: Option<Uuid>,
        trusted: Vec<Uuid>,
    ) -> Self {
        Self {
            name: name.into(),
            areas,
            owner,
            trusted,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    pub fn owner(&self) -> Option<Uuid> {
        self.owner
    }

    pub fn trusted(&self) -> &[Uuid] {
        &self.trusted
    }

    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }

    pub fn contains(&self, pos: &BlockPos) -> bool {
        self.areas.iter().any(|area| area.contains(pos))
    }

    pub fn is_owner(&self, player: Uuid) -> bool {
        self.owner == Some(player)
    }

    pub fn is_trusted(&self, player: Uuid) -> bool {
        self.trusted.contains(&player)
    }

    /// Callers holding the flat inside a [`crate::cache::FlatsCache`] go through
    /// [`crate::cache::FlatsCache::add_area`] so the spatial index follows.
    pub(crate) fn add_area(&mut self, area: Area) {
        self.areas.push(area);
    }

    pub fn set_owner(&mut self, owner: Uuid) {
        self.owner = Some(owner);
    }

    /// Returns `false` if the player was already trusted.
    pub fn add_trusted(&mut self, player: Uuid) -> bool {
        if self.is_trusted(player) {
            return false;
        }
        self.trusted.push(player);
        true
    }

    /// Returns `false` if the player was not trusted.
    pub fn remove_trusted(&mut self, player: Uuid) -> bool {
        let before = self.trusted.len();
        self.trusted.retain(|p| *p != player);
        self.trusted.len() != before
    }

    /// Clears the owner and every trusted player.
    pub fn unclaim(&mut self) {
        self.owner = None;
        self.trusted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: i32, y: i32, z: i32) -> BlockPos {
        BlockPos::new("world", x, y, z)
    }

    #[test]
    fn location_string_parses_back_to_the_same_corners() {
        let area = Area::parse("world:10,64,-5;0,70,5", "a").unwrap();
        assert_eq!(area.pos1(), &pos(10, 64, -5));
        assert_eq!(area.pos2(), &pos(0, 70, 5));
        assert_eq!(area.min(), (0, 64, -5));
        assert_eq!(area.max(), (10, 70, 5));
        assert_eq!(area.location_string(), "world:10,64,-5;0,70,5");
    }

    #[test]
    fn namespaced_world_names_keep_their_colon() {
        let area = Area::parse("minecraft:the_end:1,2,3;4,5,6", "a").unwrap();
        assert_eq!(area.world(), "minecraft:the_end");
    }

    #[test]
    fn malformed_location_strings_are_rejected() {
        for bad in ["", "world", "world:1,2,3", "world:1,2;3,4,5", ":1,2,3;4,5,6", "world:1,2,3;4,5,6,7"] {
            assert!(
                matches!(Area::parse(bad, "a"), Err(LocationParseError::Malformed(_))),
                "{bad}"
            );
        }
        assert!(matches!(
            Area::parse("world:1,x,3;4,5,6", "a"),
            Err(LocationParseError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn contains_is_inclusive_and_world_scoped() {
        let area = Area::new(pos(0, 0, 0), pos(2, 2, 2), "a");
        assert!(area.contains(&pos(0, 0, 0)));
        assert!(area.contains(&pos(2, 2, 2)));
        assert!(!area.contains(&pos(3, 2, 2)));
        assert!(!area.contains(&BlockPos::new("nether", 1, 1, 1)));
    }

    #[test]
    fn outer_blocks_cover_only_the_shell() {
        let area = Area::new(pos(0, 0, 0), pos(2, 2, 2), "a");
        let shell = area.outer_blocks();
        assert_eq!(shell.len(), 26);
        assert!(!shell.contains(&pos(1, 1, 1)));

        let flat = Area::new(pos(0, 5, 0), pos(3, 5, 0), "b");
        assert_eq!(flat.outer_blocks().len(), 4);
    }

    #[test]
    fn distance_is_measured_per_axis_from_either_corner() {
        let area = Area::new(pos(0, 0, 0), pos(500, 10, 500), "a");
        assert!(area.is_within_distance(&pos(100, 0, -100), 100));
        assert!(area.is_within_distance(&pos(450, 10, 550), 100));
        assert!(!area.is_within_distance(&pos(250, 5, 250), 100));
    }

    #[test]
    fn distance_holds_at_the_edges_of_the_world() {
        let area = Area::new(pos(i32::MIN, 0, i32::MIN), pos(i32::MIN + 5, 0, i32::MIN + 5), "a");
        assert!(!area.is_within_distance(&pos(i32::MAX, 0, i32::MAX), 100));
        assert!(area.is_within_distance(&pos(i32::MIN + 50, 0, i32::MIN), 100));
        assert!(!area.is_within_distance(&pos(i32::MIN, 0, i32::MIN), -1));
    }

    #[test]
    fn volume_requires_both_corners_in_one_world() {
        let mut selection = Selection::default();
        assert_eq!(selection.volume(), 0);
        selection.pos1 = Some(pos(0, 0, 0));
        assert_eq!(selection.volume(), 0);
        selection.pos2 = Some(pos(-1, 1, 4));
        assert_eq!(selection.volume(), 2 * 2 * 5);
        selection.pos2 = Some(BlockPos::new("nether", 1, 1, 1));
        assert_eq!(selection.volume(), 0);
    }

    #[test]
    fn volume_of_a_world_spanning_selection_saturates() {
        let selection = Selection {
            pos1: Some(pos(i32::MIN, i32::MIN, i32::MIN)),
            pos2: Some(pos(i32::MAX, i32::MAX, i32::MAX)),
        };
        assert_eq!(selection.volume(), u64::MAX);

        let slab = Selection {
            pos1: Some(pos(i32::MIN, 0, 0)),
            pos2: Some(pos(i32::MAX, 0, 0)),
        };
        assert_eq!(slab.volume(), 1 << 32);
    }

    #[test]
    fn selection_intersection_touches_count() {
        let area = Area::new(pos(0, 0, 0), pos(10, 10, 10), "a");
        let touching = Selection {
            pos1: Some(pos(10, 10, 10)),
            pos2: Some(pos(20, 20, 20)),
        };
        let apart = Selection {
            pos1: Some(pos(11, 0, 0)),
            pos2: Some(pos(20, 10, 10)),
        };
        assert!(touching.intersects(&area));
        assert!(!apart.intersects(&area));
    }

    #[test]
    fn unclaim_clears_owner_and_trusted() {
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let mut flat = Flat::new("a", Area::new(pos(0, 0, 0), pos(1, 1, 1), "a"));
        flat.set_owner(owner);
        assert!(flat.add_trusted(friend));
        assert!(!flat.add_trusted(friend));
        assert!(flat.is_owner(owner) && flat.is_trusted(friend));

        flat.unclaim();
        assert!(!flat.has_owner());
        assert!(flat.trusted().is_empty());
        assert!(!flat.remove_trusted(friend));
    }
}
