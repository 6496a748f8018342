// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::{PoisonError, RwLock};

use crate::{
    error::Result,
    image::{Image, Rect, copy_image_rect_to},
    render::internal::RenderPipelineShared,
    util::tracing_wrappers::*,
};

/// Pixels along the edges of every group, kept so that neighbouring groups can render the
/// seams between them.
///
/// Horizontal strips of group row `gy` are stored in band `2 * gy - 1` (top strip) and band
/// `2 * gy` (bottom strip), so that the two strips along a seam are in consecutive bands;
/// vertical strips are stored in the same way for group columns. Strips are only written by
/// the group they belong to.
///
/// The locks are never contended: a strip is written in `save` before its group calls
/// `GroupBorderAssigner::group_done`, and neighbours read it in `load` only after
/// `group_done` reports the shared corner complete. The `fetch_or` on the corner orders the
/// write before the reads; the lock only lets the strip be shared without `unsafe`.
pub struct BorderStorage {
    /// `[channel][band * xsize_groups + gx]`
    horizontal: Vec<Vec<RwLock<Image<f32>>>>,
    /// `[channel][band * ysize_groups + gy]`
    vertical: Vec<Vec<RwLock<Image<f32>>>>,
    xsize_groups: usize,
    ysize_groups: usize,
}

/// Copies the overlap of `src` (placed at `src_origin`) and `dst` (placed at `dst_origin`).
fn copy_overlap(
    src: &Image<f32>,
    src_origin: (isize, isize),
    dst: &mut Image<f32>,
    dst_origin: (isize, isize),
) -> Result<()> {
    let x0 = src_origin.0.max(dst_origin.0);
    let y0 = src_origin.1.max(dst_origin.1);
    let x1 = (src_origin.0 + src.size().0 as isize).min(dst_origin.0 + dst.size().0 as isize);
    let y1 = (src_origin.1 + src.size().1 as isize).min(dst_origin.1 + dst.size().1 as isize);
    if x0 >= x1 || y0 >= y1 {
        return Ok(());
    }
    let rect = Rect::new(
        ((x0 - src_origin.0) as usize, (y0 - src_origin.1) as usize),
        ((x1 - x0) as usize, (y1 - y0) as usize),
    );
    copy_image_rect_to(
        src,
        rect,
        dst,
        ((x0 - dst_origin.0) as usize, (y0 - dst_origin.1) as usize),
    )
}

fn strip_rect(group: Rect, strip: (usize, usize), side: usize) -> Rect {
    let (w, h) = group.size;
    let (sw, sh) = (strip.0.min(w), strip.1.min(h));
    match side {
        TOP => Rect::new(group.origin, (w, sh)),
        BOTTOM => Rect::new((group.origin.0, group.origin.1 + h - sh), (w, sh)),
        LEFT => Rect::new(group.origin, (sw, h)),
        _ => Rect::new((group.origin.0 + w - sw, group.origin.1), (sw, h)),
    }
}

const TOP: usize = 0;
const BOTTOM: usize = 1;
const LEFT: usize = 2;
const RIGHT: usize = 3;

impl BorderStorage {
    /// `strip_size[c]` is the number of columns of vertical strips and rows of horizontal
    /// strips of channel `c`.
    pub fn new(shared: &RenderPipelineShared, strip_size: &[(usize, usize)]) -> Result<Self> {
        let fd = &shared.frame_dimensions;
        let (xg, yg) = (fd.xsize_groups, fd.ysize_groups);
        let hbands = 2 * (yg - 1);
        let vbands = 2 * (xg - 1);
        let mut horizontal = vec![];
        let mut vertical = vec![];
        for (c, strip) in strip_size.iter().enumerate() {
            let mut h = vec![];
            for band in 0..hbands {
                let (gy, side) = ((band + 1) / 2, if band % 2 == 1 { TOP } else { BOTTOM });
                for gx in 0..xg {
                    let group = shared.group_input_rect(gy * xg + gx, c);
                    let size = strip_rect(group, *strip, side).size;
                    h.push(RwLock::new(Image::new(size)?));
                }
            }
            let mut v = vec![];
            for band in 0..vbands {
                let (gx, side) = ((band + 1) / 2, if band % 2 == 1 { LEFT } else { RIGHT });
                for gy in 0..yg {
                    let group = shared.group_input_rect(gy * xg + gx, c);
                    let size = strip_rect(group, *strip, side).size;
                    v.push(RwLock::new(Image::new(size)?));
                }
            }
            debug!(c, ?strip, hbands, vbands, "allocated border strips");
            horizontal.push(h);
            vertical.push(v);
        }
        Ok(BorderStorage {
            horizontal,
            vertical,
            xsize_groups: xg,
            ysize_groups: yg,
        })
    }

    fn strip(&self, c: usize, (gx, gy): (usize, usize), side: usize) -> &RwLock<Image<f32>> {
        match side {
            TOP => &self.horizontal[c][(2 * gy - 1) * self.xsize_groups + gx],
            BOTTOM => &self.horizontal[c][2 * gy * self.xsize_groups + gx],
            LEFT => &self.vertical[c][(2 * gx - 1) * self.ysize_groups + gy],
            _ => &self.vertical[c][2 * gx * self.ysize_groups + gy],
        }
    }

    fn has_strip(&self, (gx, gy): (usize, usize), side: usize) -> bool {
        match side {
            TOP => gy > 0,
            BOTTOM => gy + 1 < self.ysize_groups,
            LEFT => gx > 0,
            _ => gx + 1 < self.xsize_groups,
        }
    }

    /// Stores the edges of the group's input. `buffers[c]` holds the group's pixels at
    /// `data_origin`.
    pub fn save(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        buffers: &[Image<f32>],
        data_origin: (usize, usize),
    ) -> Result<()> {
        let pos = shared.frame_dimensions.group_position(group_id);
        for (c, buffer) in buffers.iter().enumerate() {
            let group = shared.group_input_rect(group_id, c);
            for side in [TOP, BOTTOM, LEFT, RIGHT] {
                if !self.has_strip(pos, side) {
                    continue;
                }
                let mut strip = self
                    .strip(c, pos, side)
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                let rect = strip_rect(
                    Rect::new(data_origin, group.size),
                    (strip.size().0, strip.size().1),
                    side,
                );
                copy_image_rect_to(buffer, rect, &mut strip, (0, 0))?;
            }
        }
        Ok(())
    }

    /// Copies the strips of the neighbours of the group into the border of the group's
    /// buffers. Strips of groups that are not done yet may hold stale data; the caller only
    /// renders areas whose inputs are known to be available.
    pub fn load(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        buffers: &mut [Image<f32>],
        data_origin: (usize, usize),
    ) -> Result<()> {
        let (gx, gy) = shared.frame_dimensions.group_position(group_id);
        let (xg, yg) = (self.xsize_groups, self.ysize_groups);
        let mut neighbours = vec![];
        for ny in gy.saturating_sub(1)..(gy + 2).min(yg) {
            for nx in gx.saturating_sub(1)..(gx + 2).min(xg) {
                match (nx.cmp(&gx), ny.cmp(&gy)) {
                    (_, std::cmp::Ordering::Less) => neighbours.push(((nx, ny), BOTTOM)),
                    (_, std::cmp::Ordering::Greater) => neighbours.push(((nx, ny), TOP)),
                    (std::cmp::Ordering::Less, _) => neighbours.push(((nx, ny), RIGHT)),
                    (std::cmp::Ordering::Greater, _) => neighbours.push(((nx, ny), LEFT)),
                    _ => {}
                }
            }
        }
        for (c, buffer) in buffers.iter_mut().enumerate() {
            let group = shared.group_input_rect(group_id, c);
            let buffer_origin = (
                group.origin.0 as isize - data_origin.0 as isize,
                group.origin.1 as isize - data_origin.1 as isize,
            );
            for (pos, side) in neighbours.iter() {
                let ngroup = shared.group_input_rect(pos.1 * xg + pos.0, c);
                let strip = self
                    .strip(c, *pos, *side)
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                let rect = strip_rect(ngroup, strip.size(), *side);
                copy_overlap(
                    &strip,
                    (rect.origin.0 as isize, rect.origin.1 as isize),
                    buffer,
                    buffer_origin,
                )?;
            }
        }
        Ok(())
    }
}
