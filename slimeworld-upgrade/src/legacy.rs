//! Legacy numeric block ids and their namespaced names.
//!
//! The table is one-to-one so a flat section can be paletted and flattened
//! again without loss. Ids missing here use the `slime:legacy_<id>` form.
//! Metadata travels in the `data` property.

use std::collections::HashMap;
use std::sync::OnceLock;

use slimeworld_format::BlockState;
use slimeworld_format::chunk::is_air;

pub const LEGACY_PREFIX: &str = "slime:legacy_";
pub const DATA_PROPERTY: &str = "data";

/// Highest id a flat section can hold: 8 bits plus the extended nibble.
pub const MAX_LEGACY_ID: u16 = 0x0FFF;

const BLOCKS: &[(u16, &str)] = &[
    (0, "minecraft:air"),
    (1, "minecraft:stone"),
    (2, "minecraft:grass_block"),
    (3, "minecraft:dirt"),
    (4, "minecraft:cobblestone"),
    (5, "minecraft:oak_planks"),
    (6, "minecraft:oak_sapling"),
    (7, "minecraft:bedrock"),
    (9, "minecraft:water"),
    (11, "minecraft:lava"),
    (12, "minecraft:sand"),
    (13, "minecraft:gravel"),
    (14, "minecraft:gold_ore"),
    (15, "minecraft:iron_ore"),
    (16, "minecraft:coal_ore"),
    (17, "minecraft:oak_log"),
    (18, "minecraft:oak_leaves"),
    (19, "minecraft:sponge"),
    (20, "minecraft:glass"),
    (21, "minecraft:lapis_ore"),
    (22, "minecraft:lapis_block"),
    (24, "minecraft:sandstone"),
    (35, "minecraft:white_wool"),
    (41, "minecraft:gold_block"),
    (42, "minecraft:iron_block"),
    (45, "minecraft:bricks"),
    (46, "minecraft:tnt"),
    (47, "minecraft:bookshelf"),
    (48, "minecraft:mossy_cobblestone"),
    (49, "minecraft:obsidian"),
    (50, "minecraft:torch"),
    (54, "minecraft:chest"),
    (56, "minecraft:diamond_ore"),
    (57, "minecraft:diamond_block"),
    (58, "minecraft:crafting_table"),
    (61, "minecraft:furnace"),
    (73, "minecraft:redstone_ore"),
    (79, "minecraft:ice"),
    (80, "minecraft:snow_block"),
    (81, "minecraft:cactus"),
    (82, "minecraft:clay"),
    (86, "minecraft:carved_pumpkin"),
    (87, "minecraft:netherrack"),
    (88, "minecraft:soul_sand"),
    (89, "minecraft:glowstone"),
    (98, "minecraft:stone_bricks"),
    (103, "minecraft:melon"),
    (110, "minecraft:mycelium"),
    (112, "minecraft:nether_bricks"),
    (121, "minecraft:end_stone"),
    (129, "minecraft:emerald_ore"),
    (133, "minecraft:emerald_block"),
    (152, "minecraft:redstone_block"),
    (155, "minecraft:quartz_block"),
    (159, "minecraft:white_terracotta"),
    (165, "minecraft:slime_block"),
    (168, "minecraft:prismarine"),
    (170, "minecraft:hay_block"),
    (172, "minecraft:terracotta"),
    (173, "minecraft:coal_block"),
    (174, "minecraft:packed_ice"),
];

fn by_name() -> &'static HashMap<&'static str, u16> {
    static INDEX: OnceLock<HashMap<&'static str, u16>> = OnceLock::new();
    INDEX.get_or_init(|| BLOCKS.iter().map(|(id, name)| (*name, *id)).collect())
}

fn name_of(id: u16) -> Option<&'static str> {
    BLOCKS
        .binary_search_by_key(&id, |(id, _)| *id)
        .ok()
        .map(|i| BLOCKS[i].1)
}

/// Block state for a legacy id and its 4-bit metadata.
pub fn to_state(id: u16, data: u8) -> BlockState {
    let state = match name_of(id) {
        Some(name) => BlockState::new(name),
        None => BlockState::new(format!("{LEGACY_PREFIX}{id}")),
    };
    if data != 0 {
        state.with_property(DATA_PROPERTY, data.to_string())
    } else {
        state
    }
}

/// Legacy id and metadata for a block state, or why there is none.
pub fn from_state(state: &BlockState) -> Result<(u16, u8), String> {
    let id = if let Some(raw) = state.name.strip_prefix(LEGACY_PREFIX) {
        raw.parse::<u16>()
            .ok()
            .filter(|id| *id <= MAX_LEGACY_ID)
            .ok_or_else(|| format!("'{}' is not a valid legacy block", state.name))?
    } else if let Some(id) = by_name().get(state.name.as_str()) {
        *id
    } else if is_air(&state.name) {
        0
    } else {
        return Err(format!("block '{}' has no legacy id", state.name));
    };

    let mut data = 0u8;
    for (key, value) in &state.properties {
        if key != DATA_PROPERTY {
            return Err(format!(
                "block '{}' has property '{key}' with no legacy encoding",
                state.name
            ));
        }
        data = value
            .parse::<u8>()
            .ok()
            .filter(|d| *d < 16)
            .ok_or_else(|| format!("block '{}' has invalid data value '{value}'", state.name))?;
    }
    Ok((id, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_one_to_one() {
        assert!(BLOCKS.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(by_name().len(), BLOCKS.len());
    }

    #[test]
    fn test_known_and_fallback_ids() {
        assert_eq!(to_state(1, 0), BlockState::new("minecraft:stone"));
        assert_eq!(
            to_state(300, 5),
            BlockState::new("slime:legacy_300").with_property("data", "5")
        );
        for (id, data) in [(1, 0), (35, 14), (300, 5), (MAX_LEGACY_ID, 15), (8, 0)] {
            assert_eq!(from_state(&to_state(id, data)).unwrap(), (id, data));
        }
    }

    #[test]
    fn test_unknown_states_rejected() {
        assert!(from_state(&BlockState::new("minecraft:deepslate")).is_err());
        assert!(from_state(&BlockState::new("minecraft:stone").with_property("axis", "y")).is_err());
        assert!(from_state(&BlockState::new("slime:legacy_5000")).is_err());
        assert!(from_state(&BlockState::new("minecraft:stone").with_property("data", "16")).is_err());
    }

    #[test]
    fn test_air_variants_flatten_to_zero() {
        assert_eq!(from_state(&BlockState::new("minecraft:cave_air")).unwrap(), (0, 0));
    }
}
