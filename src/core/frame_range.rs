//! Frame range resolution: a node's declared range, with unbounded ends
//! replaced by the timeline bounds.

use crate::entities::node::Node;
use crate::entities::timeline::Timeline;

/// Resolve `(first, last)` for `output`.
///
/// An unbounded low end takes the timeline's left bound, an unbounded high
/// end its right bound. Without an output the timeline bounds are returned.
pub fn resolve_frame_range(output: Option<&dyn Node>, timeline: &Timeline) -> (i32, i32) {
    let Some(node) = output else {
        return timeline.bounds();
    };
    let declared = node.frame_range();
    let first = if declared.is_unbounded_first() {
        timeline.left_bound()
    } else {
        declared.first
    };
    let last = if declared.is_unbounded_last() {
        timeline.right_bound()
    } else {
        declared.last
    };
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::node::{UNBOUNDED_FIRST, UNBOUNDED_LAST};
    use crate::testing::TestNode;

    #[test]
    fn test_no_output_uses_timeline() {
        let timeline = Timeline::new(3, 42);
        assert_eq!(resolve_frame_range(None, &timeline), (3, 42));
    }

    #[test]
    fn test_bounded_node_ignores_timeline() {
        let timeline = Timeline::new(1, 100);
        let node = TestNode::new("read").with_frame_range(10, 20);
        assert_eq!(resolve_frame_range(Some(&*node as &dyn Node), &timeline), (10, 20));
    }

    #[test]
    fn test_each_unbounded_end_defers_separately() {
        let timeline = Timeline::new(5, 50);

        let low = TestNode::new("low").with_frame_range(UNBOUNDED_FIRST, 8);
        assert_eq!(resolve_frame_range(Some(&*low as &dyn Node), &timeline), (5, 8));

        let high = TestNode::new("high").with_frame_range(12, UNBOUNDED_LAST);
        assert_eq!(resolve_frame_range(Some(&*high as &dyn Node), &timeline), (12, 50));

        let both = TestNode::new("both");
        assert_eq!(resolve_frame_range(Some(&*both as &dyn Node), &timeline), (5, 50));
    }
}
