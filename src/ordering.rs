//! Fractional `display_order` allocation for drag-reorderable lists.
//!
//! A moved or inserted item gets a value strictly between its new neighbours,
//! so no sibling row is rewritten. Midpoints halve the gap each time, and once
//! the gap drops under the configured minimum the caller renumbers the whole
//! list with [`renumbered`].

/// Order for an item inserted at `target_index` of an ascending `sequence`.
pub fn order_for_insert_at(sequence: &[f64], target_index: usize) -> f64 {
    let (Some(first), Some(last)) = (sequence.first(), sequence.last()) else {
        return 1.0;
    };
    if target_index == 0 {
        return first - 1.0;
    }
    if target_index >= sequence.len() {
        return last + 1.0;
    }
    (sequence[target_index - 1] + sequence[target_index]) / 2.0
}

/// Order for the item at `from_index` after an array move to `to_index`.
/// `to_index` past the end means "last". `None` when `from_index` is out of range.
pub fn order_for_move(sequence: &[f64], from_index: usize, to_index: usize) -> Option<f64> {
    if from_index >= sequence.len() {
        return None;
    }
    let mut rest = sequence.to_vec();
    let current = rest.remove(from_index);
    if rest.is_empty() {
        return Some(current);
    }
    Some(order_for_insert_at(&rest, to_index.min(rest.len())))
}

/// Result of placing one item into a sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub display_order: f64,
    /// Index of the item in the resulting sequence.
    pub index: usize,
    /// The value sits within `min_gap` of a neighbour; renumber the list.
    pub needs_renumber: bool,
}

/// True when `order`, placed at `target_index` of `sequence`, is closer than
/// `min_gap` to either neighbour (or no longer strictly between them).
pub fn gap_is_exhausted(sequence: &[f64], target_index: usize, order: f64, min_gap: f64) -> bool {
    let prev = target_index
        .checked_sub(1)
        .and_then(|i| sequence.get(i))
        .copied();
    let next = sequence.get(target_index).copied();
    let too_close_to_prev = prev.is_some_and(|p| order - p <= min_gap);
    let too_close_to_next = next.is_some_and(|n| n - order <= min_gap);
    too_close_to_prev || too_close_to_next
}

pub fn place_inserted(sequence: &[f64], target_index: usize, min_gap: f64) -> Placement {
    let index = target_index.min(sequence.len());
    let display_order = order_for_insert_at(sequence, index);
    Placement {
        display_order,
        index,
        needs_renumber: gap_is_exhausted(sequence, index, display_order, min_gap),
    }
}

pub fn place_moved(
    sequence: &[f64],
    from_index: usize,
    to_index: usize,
    min_gap: f64,
) -> Option<Placement> {
    let display_order = order_for_move(sequence, from_index, to_index)?;
    let mut rest = sequence.to_vec();
    rest.remove(from_index);
    let index = to_index.min(rest.len());
    Some(Placement {
        display_order,
        index,
        needs_renumber: gap_is_exhausted(&rest, index, display_order, min_gap),
    })
}

/// Standard array move: remove at `from_index`, reinsert at `to_index`
/// (clamped to the end). Out-of-range `from_index` leaves `items` untouched.
pub fn apply_move<T>(items: &mut Vec<T>, from_index: usize, to_index: usize) {
    if from_index >= items.len() {
        return;
    }
    let item = items.remove(from_index);
    let to = to_index.min(items.len());
    items.insert(to, item);
}

/// Fresh evenly spaced orders `step, 2*step, ..` for a list of `len` items.
pub fn renumbered(len: usize, step: f64) -> Vec<f64> {
    (1..=len).map(|i| i as f64 * step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_strictly_ascending(seq: &[f64]) -> bool {
        seq.windows(2).all(|w| w[0] < w[1])
    }

    #[test]
    fn empty_sequence_starts_at_one() {
        assert_eq!(order_for_insert_at(&[], 0), 1.0);
        assert_eq!(order_for_insert_at(&[], 5), 1.0);
    }

    #[test]
    fn insert_between_takes_midpoint() {
        assert_eq!(order_for_insert_at(&[1.0, 2.0], 1), 1.5);
    }

    #[test]
    fn insert_at_edges_extends_by_one() {
        let seq = [0.5, 2.0, 7.25];
        assert_eq!(order_for_insert_at(&seq, 0), -0.5);
        assert_eq!(order_for_insert_at(&seq, 3), 8.25);
        assert_eq!(order_for_insert_at(&seq, 99), 8.25);
    }

    #[test]
    fn insert_at_head_precedes_everything() {
        let mut seq = vec![3.0, 4.5, 9.0];
        let head = order_for_insert_at(&seq, 0);
        seq.insert(0, head);
        assert!(is_strictly_ascending(&seq));
    }

    #[test]
    fn move_first_to_last_goes_past_tail() {
        assert_eq!(order_for_move(&[1.0, 2.0, 3.0], 0, 2), Some(4.0));
    }

    #[test]
    fn move_last_to_first_goes_before_head() {
        assert_eq!(order_for_move(&[1.0, 2.0, 3.0], 2, 0), Some(0.0));
    }

    #[test]
    fn move_into_middle_uses_new_neighbours() {
        // [1, 2, 3, 4]: move index 0 to index 2 -> [2, 3, X, 4]
        assert_eq!(order_for_move(&[1.0, 2.0, 3.0, 4.0], 0, 2), Some(3.5));
        // move index 3 to index 1 -> [1, X, 2, 3]
        assert_eq!(order_for_move(&[1.0, 2.0, 3.0, 4.0], 3, 1), Some(1.5));
    }

    #[test]
    fn no_op_move_preserves_order() {
        let seq = [1.0, 2.0, 3.0, 4.0];
        for i in 0..seq.len() {
            let order = order_for_move(&seq, i, i).expect("in range");
            let mut after = seq.to_vec();
            after[i] = order;
            assert!(is_strictly_ascending(&after), "index {i}: {after:?}");
        }
        assert_eq!(order_for_move(&seq, 1, 1), Some(2.0));
    }

    #[test]
    fn move_of_single_item_keeps_its_order() {
        assert_eq!(order_for_move(&[7.0], 0, 3), Some(7.0));
    }

    #[test]
    fn move_from_out_of_range_is_rejected() {
        assert_eq!(order_for_move(&[1.0, 2.0], 2, 0), None);
        assert_eq!(order_for_move(&[], 0, 0), None);
    }

    #[test]
    fn repeated_midpoints_eventually_need_renumbering() {
        let mut seq = vec![1.0, 2.0];
        let mut flagged = false;
        for _ in 0..80 {
            let placement = place_inserted(&seq, 1, 1e-9);
            if placement.needs_renumber {
                flagged = true;
                break;
            }
            seq.insert(placement.index, placement.display_order);
            assert!(is_strictly_ascending(&seq));
        }
        assert!(flagged);
    }

    #[test]
    fn place_moved_reports_final_index() {
        let placement = place_moved(&[1.0, 2.0, 3.0], 0, 10, 1e-9).expect("in range");
        assert_eq!(placement.index, 2);
        assert_eq!(placement.display_order, 4.0);
        assert!(!placement.needs_renumber);
    }

    #[test]
    fn apply_move_matches_allocator_semantics() {
        let mut ids = vec!["a", "b", "c", "d"];
        apply_move(&mut ids, 0, 2);
        assert_eq!(ids, vec!["b", "c", "a", "d"]);
        apply_move(&mut ids, 3, 0);
        assert_eq!(ids, vec!["d", "b", "c", "a"]);
        apply_move(&mut ids, 9, 0);
        assert_eq!(ids, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn renumbered_is_evenly_spaced() {
        assert_eq!(renumbered(3, 1.0), vec![1.0, 2.0, 3.0]);
        assert_eq!(renumbered(2, 10.0), vec![10.0, 20.0]);
        assert!(renumbered(0, 1.0).is_empty());
    }
}
