// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::{frame_dimensions::FrameDimensions, image::Rect};

/// Maximum number of rects returned by a single call to [`GroupBorderAssigner::group_done`].
pub const MAX_TO_FINALIZE: usize = 3;

// Bits of a vertex, named by the position of the group relative to the vertex.
const TOP_LEFT: u8 = 0x01;
const TOP_RIGHT: u8 = 0x02;
const BOTTOM_RIGHT: u8 = 0x04;
const BOTTOM_LEFT: u8 = 0x08;
const ALL: u8 = TOP_LEFT | TOP_RIGHT | BOTTOM_RIGHT | BOTTOM_LEFT;

/// Decides which parts of the frame can be rendered once a group is available.
///
/// Every vertex of the group grid keeps one bit for each of the (up to) four groups that
/// touch it. The area around a vertex, and the seams between two groups, are rendered by
/// the last of the groups involved to be done, so each pixel is rendered exactly once per
/// pass regardless of the order in which groups are completed.
pub struct GroupBorderAssigner {
    corners: Vec<AtomicU8>,
    frame_dimensions: FrameDimensions,
}

impl GroupBorderAssigner {
    pub fn new(frame_dimensions: FrameDimensions) -> GroupBorderAssigner {
        let xg = frame_dimensions.xsize_groups;
        let yg = frame_dimensions.ysize_groups;
        let corners = (0..(xg + 1) * (yg + 1))
            .map(|i| {
                let (x, y) = (i % (xg + 1), i / (xg + 1));
                let mut bits = 0;
                if x == 0 {
                    bits |= TOP_LEFT | BOTTOM_LEFT;
                }
                if x == xg {
                    bits |= TOP_RIGHT | BOTTOM_RIGHT;
                }
                if y == 0 {
                    bits |= TOP_LEFT | TOP_RIGHT;
                }
                if y == yg {
                    bits |= BOTTOM_LEFT | BOTTOM_RIGHT;
                }
                AtomicU8::new(bits)
            })
            .collect();
        GroupBorderAssigner {
            corners,
            frame_dimensions,
        }
    }

    fn vertex(&self, x: usize, y: usize) -> &AtomicU8 {
        &self.corners[y * (self.frame_dimensions.xsize_groups + 1) + x]
    }

    /// The corners of a group, in the order top-left, top-right, bottom-right, bottom-left,
    /// with the bit the group owns in each of them.
    fn group_corners(&self, group_id: usize) -> [(&AtomicU8, u8); 4] {
        let (gx, gy) = self.frame_dimensions.group_position(group_id);
        [
            (self.vertex(gx, gy), BOTTOM_RIGHT),
            (self.vertex(gx + 1, gy), BOTTOM_LEFT),
            (self.vertex(gx + 1, gy + 1), TOP_LEFT),
            (self.vertex(gx, gy + 1), TOP_RIGHT),
        ]
    }

    /// Records that `group_id` is available, and returns the rects (in base-grid
    /// coordinates) that can now be rendered. `padding` is the number of pixels that must be
    /// valid around a pixel for it to be rendered.
    pub fn group_done(
        &self,
        group_id: usize,
        padding: (usize, usize),
    ) -> ([Rect; MAX_TO_FINALIZE], usize) {
        let [tl, tr, br, bl] = self.group_corners(group_id).map(|(vertex, bit)| {
            let prev = vertex.fetch_or(bit, Ordering::AcqRel);
            debug_assert_eq!(prev & bit, 0, "group {group_id} done twice");
            prev | bit
        });

        let ready = [
            [tl == ALL, tl & TOP_RIGHT != 0, tr == ALL],
            [tl & BOTTOM_LEFT != 0, true, tr & BOTTOM_RIGHT != 0],
            [bl == ALL, bl & BOTTOM_RIGHT != 0, br == ALL],
        ];

        let fd = &self.frame_dimensions;
        let rect = fd.group_rect(group_id);
        let xpos = seam_positions(rect.origin.0, rect.end().0, fd.xsize, padding.0);
        let ypos = seam_positions(rect.origin.1, rect.end().1, fd.ysize, padding.1);

        let mut rects = [Rect::default(); MAX_TO_FINALIZE];
        let mut count = 0;
        for (by, row) in ready.iter().enumerate() {
            let (y0, y1) = (ypos[by], ypos[by + 1]);
            if y0 >= y1 {
                continue;
            }
            let Some(first) = row.iter().position(|r| *r) else {
                continue;
            };
            let last = 2 - row.iter().rev().position(|r| *r).unwrap_or(0);
            debug_assert!(row[first..=last].iter().all(|r| *r));
            let (x0, x1) = (xpos[first], xpos[last + 1]);
            if x0 >= x1 {
                continue;
            }
            if count > 0 {
                let prev = &mut rects[count - 1];
                if prev.end().1 == y0 && prev.origin.0 == x0 && prev.end().0 == x1 {
                    prev.size.1 += y1 - y0;
                    continue;
                }
            }
            rects[count] = Rect::new((x0, y0), (x1 - x0, y1 - y0));
            count += 1;
        }
        (rects, count)
    }

    /// Forgets that `group_id` was done, so that the areas it shares with other groups are
    /// rendered again after it is done again.
    pub fn clear_done(&self, group_id: usize) {
        for (vertex, bit) in self.group_corners(group_id) {
            vertex.fetch_and(!bit, Ordering::AcqRel);
        }
    }
}

/// Boundaries between the leading seam, the interior and the trailing seam of a group
/// spanning `[start, end)` along an axis of length `size`.
fn seam_positions(start: usize, end: usize, size: usize, padding: usize) -> [usize; 4] {
    [
        if start == 0 { 0 } else { start - padding },
        if start == 0 {
            0
        } else {
            size.min(start + padding)
        },
        if end == size { size } else { end - padding },
        size.min(end + padding),
    ]
}
