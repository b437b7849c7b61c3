use tracing::{debug, trace};

/// Vertical extent of one rendered row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowBox {
    pub top: f64,
    pub height: f64,
}

impl RowBox {
    fn midpoint_offset(&self, pointer_y: f64) -> f64 {
        pointer_y - self.top - self.height / 2.0
    }
}

/// Tracks the visual row order during a drag gesture. The store is only
/// told about the result once the drag ends.
#[derive(Debug, Clone, Default)]
pub struct DragReorderer {
    arrangement: Vec<String>,
    dragging: Option<String>,
}

impl DragReorderer {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            arrangement: ids,
            dragging: None,
        }
    }

    /// Replaces the arrangement after a re-render. A drag whose row
    /// disappeared is abandoned.
    pub fn set_arrangement(&mut self, ids: Vec<String>) {
        if let Some(id) = &self.dragging
            && !ids.contains(id)
        {
            debug!(id = %id, "dragged row no longer rendered; dropping drag");
            self.dragging = None;
        }
        self.arrangement = ids;
    }

    pub fn arrangement(&self) -> &[String] {
        &self.arrangement
    }

    pub fn dragging(&self) -> Option<&str> {
        self.dragging.as_deref()
    }

    pub fn drag_start(&mut self, id: &str) -> bool {
        if !self.arrangement.iter().any(|r| r == id) {
            debug!(id, "drag start on unrendered id ignored");
            return false;
        }
        self.dragging = Some(id.to_string());
        true
    }

    /// `boxes[i]` is the box of `arrangement()[i]`. The dragged row is moved
    /// in front of the nearest row whose midpoint lies below the pointer, or
    /// to the end when there is none.
    pub fn drag_over(&mut self, pointer_y: f64, boxes: &[RowBox]) {
        let Some(dragging) = self.dragging.clone() else {
            return;
        };

        let target = self
            .arrangement
            .iter()
            .zip(boxes)
            .filter(|(id, _)| **id != dragging)
            .map(|(id, b)| (id, b.midpoint_offset(pointer_y)))
            .filter(|(_, offset)| *offset < 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id.clone());

        self.arrangement.retain(|id| *id != dragging);
        match target.and_then(|t| self.arrangement.iter().position(|id| *id == t)) {
            Some(idx) => self.arrangement.insert(idx, dragging),
            None => self.arrangement.push(dragging),
        }
        trace!(pointer_y, "drag over");
    }

    /// `drag_over` for rows of equal height stacked from y = 0.
    pub fn drag_over_uniform(&mut self, pointer_y: f64, row_height: f64) {
        let boxes = uniform_boxes(self.arrangement.len(), row_height);
        self.drag_over(pointer_y, &boxes);
    }

    /// Pointer position that drops the dragged row at `target` (0-based)
    /// with uniform rows.
    pub fn pointer_for_index(&self, target: usize, row_height: f64) -> Option<f64> {
        let dragging = self.dragging.as_deref()?;
        let current = self.arrangement.iter().position(|id| id == dragging)?;
        let row = if target > current { target + 1 } else { target };
        Some(row as f64 * row_height + row_height / 4.0)
    }

    pub fn drag_end(&mut self) -> Option<Vec<String>> {
        let id = self.dragging.take()?;
        debug!(id = %id, "drag ended");
        Some(self.arrangement.clone())
    }
}

fn uniform_boxes(count: usize, row_height: f64) -> Vec<RowBox> {
    (0..count)
        .map(|i| RowBox {
            top: i as f64 * row_height,
            height: row_height,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{DragReorderer, RowBox};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn moves_before_nearest_row_below_pointer() {
        let mut drag = DragReorderer::new(ids(&["A", "B", "C"]));
        assert!(drag.drag_start("C"));

        // Pointer just above A's midpoint.
        drag.drag_over(10.0, &[
            RowBox { top: 0.0, height: 40.0 },
            RowBox { top: 40.0, height: 40.0 },
            RowBox { top: 80.0, height: 40.0 },
        ]);
        assert_eq!(drag.arrangement(), ids(&["C", "A", "B"]).as_slice());
        assert_eq!(drag.drag_end(), Some(ids(&["C", "A", "B"])));
        assert_eq!(drag.dragging(), None);
    }

    #[test]
    fn appends_when_pointer_is_below_every_midpoint() {
        let mut drag = DragReorderer::new(ids(&["A", "B", "C"]));
        drag.drag_start("A");
        drag.drag_over_uniform(500.0, 40.0);
        assert_eq!(drag.arrangement(), ids(&["B", "C", "A"]).as_slice());
    }

    #[test]
    fn second_start_replaces_first() {
        let mut drag = DragReorderer::new(ids(&["A", "B"]));
        drag.drag_start("A");
        drag.drag_start("B");
        assert_eq!(drag.dragging(), Some("B"));
        assert!(!drag.drag_start("Z"));
        assert_eq!(drag.dragging(), Some("B"));
    }

    #[test]
    fn end_without_drag_is_none() {
        let mut drag = DragReorderer::new(ids(&["A"]));
        assert_eq!(drag.drag_end(), None);
    }

    #[test]
    fn pointer_for_index_lands_row_at_target() {
        for (target, expected) in [
            (0, ["C", "A", "B", "D"]),
            (1, ["A", "C", "B", "D"]),
            (2, ["A", "B", "C", "D"]),
            (3, ["A", "B", "D", "C"]),
        ] {
            let mut drag = DragReorderer::new(ids(&["A", "B", "C", "D"]));
            drag.drag_start("C");
            let y = drag.pointer_for_index(target, 1.0).expect("dragging");
            drag.drag_over_uniform(y, 1.0);
            assert_eq!(drag.arrangement(), ids(&expected).as_slice(), "target {target}");
        }
    }

    #[test]
    fn rerender_without_dragged_row_abandons_drag() {
        let mut drag = DragReorderer::new(ids(&["A", "B"]));
        drag.drag_start("B");
        drag.set_arrangement(ids(&["A"]));
        assert_eq!(drag.dragging(), None);
    }
}
