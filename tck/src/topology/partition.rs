//! Assignment of nodes to partition groups.
//!
//! Designated nodes go first, into the group they were designated to.
//! The remaining nodes are handed out in input order: each group takes
//! its fair share of what is left (designated nodes of that group count
//! toward the share), the last group takes the rest, and no group is left
//! empty while undistributed nodes remain.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("Cannot partition into zero groups")]
    ZeroGroups,
    #[error("Designation to group {} but only {} groups are used", group, groups)]
    GroupOutOfRange { group: usize, groups: usize },
    #[error("Designated position {} is not in the node list", _0)]
    UnknownNode(usize),
    #[error("Position {} is designated more than once", _0)]
    DuplicateDesignation(usize),
}

/// Split positions `0..node_count` into groups.
///
/// `group_count` is clamped to `node_count`. `designations[g]` lists the
/// positions forced into group `g`.
pub fn assign_groups(
    node_count: usize,
    group_count: usize,
    designations: &[Vec<usize>],
) -> Result<Vec<Vec<usize>>, AssignmentError> {
    if group_count == 0 {
        return Err(AssignmentError::ZeroGroups);
    }
    let k = group_count.min(node_count);

    let mut designated = vec![false; node_count];
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (group, members) in designations.iter().enumerate() {
        if members.is_empty() {
            continue;
        }
        if group >= k {
            return Err(AssignmentError::GroupOutOfRange { group, groups: k });
        }
        for &position in members {
            if position >= node_count {
                return Err(AssignmentError::UnknownNode(position));
            }
            if designated[position] {
                return Err(AssignmentError::DuplicateDesignation(position));
            }
            designated[position] = true;
            groups[group].push(position);
        }
    }

    let mut remaining = (0..node_count).filter(|p| !designated[*p]).peekable();
    let mut left = node_count - designated.iter().filter(|d| **d).count();

    for g in 0..k {
        let take = if g + 1 == k {
            left
        } else {
            let groups_left = k - g;
            let designated_left: usize = groups[g..].iter().map(|m| m.len()).sum();
            let fair_share = (left + designated_left).div_ceil(groups_left);
            let empty_later = groups[g + 1..].iter().filter(|m| m.is_empty()).count();

            let mut take = fair_share
                .saturating_sub(groups[g].len())
                .min(left.saturating_sub(empty_later));
            if take == 0 && groups[g].is_empty() && left > 0 {
                take = 1;
            }
            take
        };

        groups[g].extend(remaining.by_ref().take(take));
        left -= take;
    }

    Ok(groups)
}
