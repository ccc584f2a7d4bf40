//! Identity slot assignment.
//!
//! A request for a taken slot is never rejected. The player gets the same
//! color with the next free pattern, and failing that the next free slot
//! in numbering order. Only a room with all 50 slots in use refuses.

use std::collections::HashSet;

use tapdash_protocol::{ColorSlot, PATTERN_COUNT, Pattern, SLOT_COUNT};

/// Picks a slot for the player joining as `number` (1-based).
///
/// - No request: start at slot `number - 1`, so the first ten players get
///   the ten solid colors, the next ten the striped ones, and so on.
/// - Requested and free: granted.
/// - Requested and taken: rotate through the other patterns of that color.
///
/// Any of these that lands on a taken slot walks forward to the next free
/// one. Returns `None` when every slot is taken.
pub(crate) fn assign_slot(
    taken: &HashSet<ColorSlot>,
    requested: Option<ColorSlot>,
    number: u32,
) -> Option<ColorSlot> {
    if let Some(wanted) = requested {
        if !taken.contains(&wanted) {
            return Some(wanted);
        }
        let color = wanted.color_index();
        let start = wanted.pattern().index();
        let same_color = (1..PATTERN_COUNT)
            .filter_map(|step| Pattern::from_index((start + step) % PATTERN_COUNT))
            .map(|pattern| ColorSlot::from_parts(color, pattern))
            .find(|slot| !taken.contains(slot));
        if same_color.is_some() {
            return same_color;
        }
        return next_free(taken, wanted.index());
    }

    let start = (number.saturating_sub(1) % u32::from(SLOT_COUNT)) as u8;
    next_free(taken, start)
}

/// First free slot at or after `start`, wrapping around.
fn next_free(taken: &HashSet<ColorSlot>, start: u8) -> Option<ColorSlot> {
    (0..SLOT_COUNT)
        .map(|offset| (start + offset) % SLOT_COUNT)
        .filter_map(|index| ColorSlot::new(index).ok())
        .find(|slot| !taken.contains(slot))
}
