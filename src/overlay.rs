//! Read-only projection of a step into the labels a viewer draws over its image.

use crate::lineage_index::LineageIndex;
use crate::position::{PixelScale, Position};
use lineage_protocol::{CellId, OverlayLabel, StepNum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverlayRequest {
    pub step: StepNum,
    /// Show only the selected cell. Ignored when nothing is selected.
    pub isolate: bool,
    pub selected: Option<CellId>,
}

/// Labels for one step, ordered by cell id. Unknown steps yield no labels.
pub fn overlay_labels(
    index: &LineageIndex,
    request: OverlayRequest,
    scale: PixelScale,
) -> Vec<OverlayLabel> {
    let Some(entry) = index.step(request.step) else {
        return vec![];
    };
    let label = |cell_id: CellId, position: Position| {
        let (x_px, y_px) = position.to_pixel(scale);
        OverlayLabel {
            cell_id,
            x_px,
            y_px,
        }
    };
    match (request.isolate, request.selected) {
        (true, Some(selected)) => entry
            .get(selected)
            .map(|cell| label(selected, cell.position()))
            .into_iter()
            .collect(),
        _ => entry
            .iter()
            .map(|(cell_id, cell)| label(cell_id, cell.position()))
            .collect(),
    }
}

/// Maps a click on the displayed image back to table coordinates.
pub fn pixel_to_position(x_px: f64, y_px: f64, scale: PixelScale) -> Position {
    Position::from_pixel(x_px, y_px, scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_table::CellRecord;

    fn index() -> LineageIndex {
        let rec = |cell_id, x, y, row_index| CellRecord {
            step: 1,
            cell_id,
            parent_id: 0,
            position: Position::new(x, y),
            row_index,
        };
        LineageIndex::from_records(vec![rec(4, 14.4, 28.8, 0), rec(2, 1.44, 0.0, 1)], 2).unwrap()
    }

    #[test]
    fn test_all_labels_sorted_by_id() {
        let labels = overlay_labels(
            &index(),
            OverlayRequest {
                step: 1,
                ..Default::default()
            },
            PixelScale::default(),
        );
        assert_eq!(
            labels,
            vec![
                OverlayLabel {
                    cell_id: 2,
                    x_px: 10,
                    y_px: 0
                },
                OverlayLabel {
                    cell_id: 4,
                    x_px: 100,
                    y_px: 200
                },
            ]
        );
    }

    #[test]
    fn test_isolate_returns_only_selection() {
        let idx = index();
        let request = OverlayRequest {
            step: 1,
            isolate: true,
            selected: Some(4),
        };
        let labels = overlay_labels(&idx, request, PixelScale::default());
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].cell_id, 4);

        let absent = OverlayRequest {
            selected: Some(99),
            ..request
        };
        assert!(overlay_labels(&idx, absent, PixelScale::default()).is_empty());

        let no_selection = OverlayRequest {
            selected: None,
            ..request
        };
        assert_eq!(
            overlay_labels(&idx, no_selection, PixelScale::default()).len(),
            2
        );
    }

    #[test]
    fn test_empty_and_unknown_steps() {
        let idx = index();
        for step in [2, 7] {
            let request = OverlayRequest {
                step,
                ..Default::default()
            };
            assert!(overlay_labels(&idx, request, PixelScale::default()).is_empty());
        }
    }

    #[test]
    fn test_custom_scale() {
        let scale = PixelScale::new(0.5).unwrap();
        let labels = overlay_labels(
            &index(),
            OverlayRequest {
                step: 1,
                isolate: true,
                selected: Some(2),
            },
            scale,
        );
        assert_eq!((labels[0].x_px, labels[0].y_px), (3, 0));
        let p = pixel_to_position(3.0, 4.0, scale);
        assert_eq!(p, Position::new(1.5, 2.0));
    }
}
