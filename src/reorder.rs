//! Sibling renumbering discipline shared by every structural mutation.
//!
//! The planners here are pure: they take a sibling list as `(id, order)` pairs
//! in rendering order and return the [`OrderPatch`]es that bring it back to a
//! strictly increasing sequence. The store applies a whole plan before any
//! reader can observe the tree again, so a half-renumbered sibling set is never
//! visible.

use crate::core::BlockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPatch {
    pub id: BlockId,
    pub order: u32,
}

/// Where a dragged block lands relative to the drop target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPosition {
    Before,
    After,
}

pub fn is_strictly_increasing(siblings: &[(BlockId, u32)]) -> bool {
    siblings.windows(2).all(|pair| pair[0].1 < pair[1].1)
}

/// Rewrites the siblings to the dense sequence `0..n`, returning only the
/// entries whose order actually changes.
pub fn renumber(siblings: &[(BlockId, u32)]) -> Vec<OrderPatch> {
    siblings
        .iter()
        .enumerate()
        .filter_map(|(index, (id, order))| {
            let target = index as u32;
            (*order != target).then_some(OrderPatch {
                id: *id,
                order: target,
            })
        })
        .collect()
}

/// Makes room for `count` new siblings directly after position `after`
/// (`None` inserts at the front).
///
/// Returns the first order value for the inserted run together with the shifts
/// for every later sibling. Orders are never fractional: every later sibling
/// moves up by exactly `count`. `None` means the shift would overflow `u32`
/// and the siblings need renumbering first.
pub fn shift_after(
    siblings: &[(BlockId, u32)],
    after: Option<usize>,
    count: u32,
) -> Option<(u32, Vec<OrderPatch>)> {
    let start = match after {
        Some(index) => match siblings.get(index) {
            Some((_, order)) => order.checked_add(1)?,
            None => 0,
        },
        None => siblings.first().map_or(0, |(_, order)| *order),
    };
    start.checked_add(count)?;
    let first_later = after.map_or(0, |index| index + 1);

    let patches = siblings
        .iter()
        .skip(first_later)
        .map(|(id, order)| {
            Some(OrderPatch {
                id: *id,
                order: (*order).max(start).checked_add(count)?,
            })
        })
        .collect::<Option<Vec<_>>>()?;
    Some((start, patches))
}

/// First order value for `count` blocks appended after the last sibling, or
/// `None` when the run would not fit in `u32`.
pub fn append_order(siblings: &[(BlockId, u32)], count: u32) -> Option<u32> {
    let start = match siblings.last() {
        Some((_, order)) => order.checked_add(1)?,
        None => 0,
    };
    start.checked_add(count).map(|_| start)
}

/// Moves the sibling at `from` to `to` (clamped to the list) and renumbers.
pub fn move_within(siblings: &[(BlockId, u32)], from: usize, to: usize) -> Vec<OrderPatch> {
    if from >= siblings.len() {
        return Vec::new();
    }
    let to = to.min(siblings.len() - 1);
    if from == to {
        return Vec::new();
    }

    let mut reordered = siblings.to_vec();
    let moved = reordered.remove(from);
    reordered.insert(to, moved);
    renumber(&reordered)
}

/// Drag-and-drop is restricted to blocks sharing a parent.
pub fn is_valid_drop(dragged_parent: Option<BlockId>, target_parent: Option<BlockId>) -> bool {
    dragged_parent == target_parent
}

/// Index the dragged block should occupy once the list is renumbered.
pub fn drop_index(from: usize, target: usize, position: DropPosition) -> usize {
    let slot = match position {
        DropPosition::Before => target,
        DropPosition::After => target + 1,
    };
    if from < slot { slot - 1 } else { slot }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn siblings(orders: &[u32]) -> Vec<(BlockId, u32)> {
        orders
            .iter()
            .enumerate()
            .map(|(index, order)| (Uuid::from_u128(index as u128 + 1), *order))
            .collect()
    }

    fn apply(list: &[(BlockId, u32)], patches: &[OrderPatch]) -> Vec<(BlockId, u32)> {
        let mut out = list.to_vec();
        for patch in patches {
            if let Some(entry) = out.iter_mut().find(|(id, _)| *id == patch.id) {
                entry.1 = patch.order;
            }
        }
        out.sort_by_key(|(_, order)| *order);
        out
    }

    #[test]
    fn test_renumber_resolves_ties() {
        let list = siblings(&[0, 0, 4]);
        let patches = renumber(&list);
        assert_eq!(patches.len(), 2);
        let result = apply(&list, &patches);
        assert!(is_strictly_increasing(&result));
        assert_eq!(result[2].1, 2);
    }

    #[test]
    fn test_shift_after_moves_later_siblings_up_by_one() {
        let list = siblings(&[0, 1, 2]);
        let (start, patches) = shift_after(&list, Some(0), 1).unwrap();
        assert_eq!(start, 1);
        assert_eq!(
            patches,
            vec![
                OrderPatch {
                    id: list[1].0,
                    order: 2
                },
                OrderPatch {
                    id: list[2].0,
                    order: 3
                },
            ]
        );
    }

    #[test]
    fn test_shift_after_keeps_gaps_and_front_insert() {
        let list = siblings(&[0, 5, 6]);
        let (start, patches) = shift_after(&list, Some(0), 2).unwrap();
        assert_eq!(start, 1);
        let result = apply(&list, &patches);
        assert_eq!(result[1].1, 7);
        assert_eq!(result[2].1, 8);

        let (front, patches) = shift_after(&list, None, 1).unwrap();
        assert_eq!(front, 0);
        assert_eq!(patches.len(), 3);
        assert_eq!(patches[0].order, 1);
    }

    #[test]
    fn test_move_within_and_drop_index() {
        let list = siblings(&[0, 1, 2, 3]);
        let patches = move_within(&list, 0, 2);
        let result = apply(&list, &patches);
        let ids: Vec<u128> = result.iter().map(|(id, _)| id.as_u128()).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);

        assert_eq!(drop_index(0, 2, DropPosition::After), 2);
        assert_eq!(drop_index(3, 1, DropPosition::Before), 1);
        assert_eq!(drop_index(1, 1, DropPosition::After), 1);
        assert!(move_within(&list, 9, 0).is_empty());
    }

    #[test]
    fn test_order_arithmetic_reports_overflow() {
        let list = siblings(&[0, u32::MAX]);
        assert_eq!(shift_after(&list, Some(1), 1), None);
        assert_eq!(shift_after(&list, Some(0), 1), None);
        assert_eq!(append_order(&list, 1), None);

        let near = siblings(&[0, u32::MAX - 2]);
        assert_eq!(append_order(&near, 1), Some(u32::MAX - 1));
        assert_eq!(append_order(&near, 2), None);
        assert_eq!(append_order(&[], 3), Some(0));
    }
}
