// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;

use crate::{
    image::{Image, Rect},
    render::{RenderPipelineChannelMode, internal::RenderPipelineShared},
    util::{mirrored_row, tracing_wrappers::*},
};

use super::{
    Layout, LowMemoryRenderPipeline, ThreadData,
    row_buffers::{RowBuffer, RowSource},
};

/// Position of a row processed by a stage.
struct StageRow {
    /// Row relative to the rect, at the stage's input resolution.
    y: isize,
    /// First non-extra pixel, relative to the rect.
    x_start: isize,
    xsize: usize,
    xextra: usize,
    xpos: usize,
    ypos: usize,
    /// Whether input pixels outside the frame must be reflected before processing.
    mirror: bool,
}

fn clamp_to(v: isize, max: usize) -> usize {
    v.clamp(0, max as isize) as usize
}

/// Runs stage `i` on one row. `rect` is the area being rendered at the stage's input
/// resolution, `origins[c]` the position in `group_data[c]` of its top-left pixel.
#[allow(clippy::too_many_arguments)]
fn run_stage(
    shared: &RenderPipelineShared,
    layout: &Layout,
    i: usize,
    row: &StageRow,
    rect: Rect,
    group_data: &mut [Image<f32>],
    origins: &[(usize, usize)],
    rings: &mut [Vec<RowBuffer>],
    state: Option<&mut (dyn Any + Send)>,
) {
    let stage = &shared.stages[i];
    let nc = shared.num_channels;
    let (bx, by) = stage.settings().border();
    let (sx, sy) = stage.settings().shift();
    let mut input_rows: Vec<Vec<&[f32]>> = vec![vec![]; nc];
    let mut output_rows: Vec<Vec<&mut [f32]>> = (0..nc).map(|_| vec![]).collect();

    for (c, (data, rings)) in group_data.iter_mut().zip(rings.iter_mut()).enumerate() {
        let mode = stage.channel_mode(c);
        if mode == RenderPipelineChannelMode::Ignored {
            continue;
        }
        let (source, own) = match (layout.sources[i][c], layout.outputs[i][c]) {
            (Some(s), Some(o)) => {
                let (before, after) = rings.split_at_mut(o);
                (RowSource::Ring(&mut before[s]), after.first_mut())
            }
            (Some(s), None) => (RowSource::Ring(&mut rings[s]), None),
            (None, own) => (
                RowSource::Group {
                    image: data,
                    origin: origins[c],
                },
                match own {
                    Some(o) => rings.get_mut(o),
                    None => None,
                },
            ),
        };

        match mode {
            RenderPipelineChannelMode::InOut | RenderPipelineChannelMode::Input => {
                let start = row.x_start - (row.xextra + bx) as isize;
                let len = row.xsize + 2 * (row.xextra + bx);
                let (width, height) = shared.channel_size(i, c);
                let ys: Vec<isize> = (-(by as isize)..=by as isize)
                    .map(|dy| {
                        if row.mirror {
                            mirrored_row(row.y + dy, rect.origin.1, height)
                        } else {
                            row.y + dy
                        }
                    })
                    .collect();
                let mut source = source;
                if row.mirror {
                    for y in ys.iter() {
                        source.mirror_x(*y, start, len, rect.origin.0, width);
                    }
                }
                let source = source.into_shared();
                input_rows[c] = ys.iter().map(|y| source.window(*y, start, len)).collect();
                if mode == RenderPipelineChannelMode::InOut {
                    let Some(own) = own else {
                        debug_assert!(false, "InOut channel {c} of stage {i} has no buffer");
                        continue;
                    };
                    output_rows[c] = own
                        .windows_mut(
                            row.y << sy,
                            1 << sy,
                            (row.x_start - row.xextra as isize) << sx,
                            (row.xsize + 2 * row.xextra) << sx,
                        )
                        .collect();
                }
            }
            RenderPipelineChannelMode::InPlace => {
                let start = row.x_start - row.xextra as isize;
                let len = row.xsize + 2 * row.xextra;
                let output = match own {
                    Some(own) => {
                        let mut source = source;
                        let output = own.window_mut(row.y, start, len);
                        output.copy_from_slice(source.window(row.y, start, len));
                        output
                    }
                    None => source.into_window_mut(row.y, start, len),
                };
                output_rows[c] = vec![output];
            }
            RenderPipelineChannelMode::Ignored => {}
        }
    }

    stage.process_row(
        &input_rows,
        &mut output_rows,
        row.xextra,
        row.xsize,
        row.xpos,
        row.ypos,
        state,
    );
}

impl LowMemoryRenderPipeline {
    /// Renders `rect` (in base-grid coordinates) of the frame. `buffers` are the input buffers
    /// of `group_id`, with the borders of the neighbouring groups already in place.
    pub(super) fn render_rect(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        rect: Rect,
        buffers: &mut [Image<f32>],
        thread: &mut ThreadData,
    ) {
        let layout = &self.layout;
        let fd = &shared.frame_dimensions;
        let image_area = rect
            .shift_left(fd.upsampling_shift)
            .clip(fd.size_upsampled());
        if image_area.is_empty() {
            return;
        }
        trace!(group_id, ?image_area, "rendering rect");
        let num_stages = shared.stages.len();
        let group_rects: Vec<Rect> = (0..num_stages)
            .map(|i| image_area.ceil_shift_right(shared.stage_input_shift(i)))
            .collect();
        let origins: Vec<(usize, usize)> = (0..shared.num_channels)
            .map(|c| {
                let area = image_area.ceil_shift_right(shared.channel_shifts[0][c]);
                let group = shared.group_input_rect(group_id, c);
                (
                    layout.data_border.0 + area.origin.0 - group.origin.0,
                    layout.data_border.1 + area.origin.1 - group.origin.1,
                )
            })
            .collect();

        // Part of the rect that trailing stages process, in frame coordinates.
        let (visible_x, visible_y) = match shared.image_dimensions {
            Some((_, dims)) => {
                let (ox, oy) = dims.frame_origin;
                let (w, h) = dims.image_size;
                let x0 = (image_area.origin.0 as isize).max(-ox);
                let x1 = (image_area.end().0 as isize).min(w as isize - ox);
                let y0 = (image_area.origin.1 as isize).max(-oy);
                let y1 = (image_area.end().1 as isize).min(h as isize - oy);
                (
                    (x0.max(0) as usize, x1.max(x0).max(0) as usize),
                    (y0.max(0) as usize, y1.max(y0).max(0) as usize),
                )
            }
            None => (
                (image_area.origin.0, image_area.end().0),
                (image_area.origin.1, image_area.end().1),
            ),
        };

        let ThreadData {
            rings,
            local_states,
            ..
        } = thread;
        let ysize = image_area.size.1 as isize;
        let max_vpad = layout.max_vpad as isize;
        for vy in -max_vpad..ysize + max_vpad {
            for i in 0..layout.first_trailing {
                let vpad = layout.vpad[i] as isize;
                let stage_vy = vy - max_vpad + vpad;
                let shift = shared.stage_input_shift(i);
                if stage_vy < -vpad || stage_vy.rem_euclid(1 << shift.1) != 0 {
                    continue;
                }
                let y = stage_vy >> shift.1;
                let image_y = group_rects[i].origin.1 as isize + y;
                let height = shared.channel_size(i, shared.any_used_channel(i)).1;
                if image_y < 0 || image_y >= height as isize {
                    continue;
                }
                let row = StageRow {
                    y,
                    x_start: 0,
                    xsize: group_rects[i].size.0,
                    xextra: layout.xextra[i],
                    xpos: group_rects[i].origin.0,
                    ypos: image_y as usize,
                    mirror: true,
                };
                run_stage(
                    shared,
                    layout,
                    i,
                    &row,
                    group_rects[i],
                    buffers,
                    &origins,
                    rings,
                    local_states[i].as_deref_mut(),
                );
            }

            let y = vy - max_vpad;
            if y < 0 || y >= ysize || layout.first_trailing == num_stages {
                continue;
            }
            let frame_y = image_area.origin.1 + y as usize;
            if !(visible_y.0..visible_y.1).contains(&frame_y) || visible_x.0 >= visible_x.1 {
                continue;
            }
            for i in layout.first_trailing..num_stages {
                let (xpos, ypos) = match shared.image_dimensions {
                    Some((switch, dims)) if i > switch => (
                        (visible_x.0 as isize + dims.frame_origin.0) as usize,
                        (frame_y as isize + dims.frame_origin.1) as usize,
                    ),
                    _ => (visible_x.0, frame_y),
                };
                let row = StageRow {
                    y,
                    x_start: (visible_x.0 - image_area.origin.0) as isize,
                    xsize: visible_x.1 - visible_x.0,
                    xextra: 0,
                    xpos,
                    ypos,
                    mirror: false,
                };
                run_stage(
                    shared,
                    layout,
                    i,
                    &row,
                    group_rects[i],
                    buffers,
                    &origins,
                    rings,
                    local_states[i].as_deref_mut(),
                );
            }
        }
    }

    /// Renders the parts of the canvas outside of the frame that are assigned to `group_id`.
    /// Canvas columns and rows are split among groups along the group grid, with the groups on
    /// the edges of the frame covering the rest of the canvas.
    pub(super) fn render_padding(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        thread: &mut ThreadData,
    ) {
        let Some((switch, dims)) = shared.image_dimensions else {
            return;
        };
        let fd = &shared.frame_dimensions;
        let (gx, gy) = fd.group_position(group_id);
        let area = fd
            .group_rect(group_id)
            .shift_left(fd.upsampling_shift)
            .clip(fd.size_upsampled());
        let (w, h) = dims.image_size;
        let (ox, oy) = dims.frame_origin;
        let x0 = if gx == 0 {
            0
        } else {
            clamp_to(area.origin.0 as isize + ox, w)
        };
        let x1 = if gx + 1 == fd.xsize_groups {
            w
        } else {
            clamp_to(area.end().0 as isize + ox, w)
        };
        let y0 = if gy == 0 {
            0
        } else {
            clamp_to(area.origin.1 as isize + oy, h)
        };
        let y1 = if gy + 1 == fd.ysize_groups {
            h
        } else {
            clamp_to(area.end().1 as isize + oy, h)
        };
        let frame_x = (
            clamp_to(ox, w),
            clamp_to(ox + fd.xsize_upsampled as isize, w),
        );
        let frame_y = (
            clamp_to(oy, h),
            clamp_to(oy + fd.ysize_upsampled as isize, h),
        );

        for y in y0..y1 {
            if (frame_y.0..frame_y.1).contains(&y) {
                let left = (x0, x1.min(frame_x.0));
                let right = (x0.max(frame_x.1), x1);
                for (start, end) in [left, right] {
                    if start < end {
                        padding_row(shared, switch, start, end, y, thread);
                    }
                }
            } else if x0 < x1 {
                padding_row(shared, switch, x0, x1, y, thread);
            }
        }
    }
}

/// Fills `[x0, x1)` of canvas row `y` with the switch stage, and runs the following stages on
/// it.
fn padding_row(
    shared: &RenderPipelineShared,
    switch: usize,
    x0: usize,
    x1: usize,
    y: usize,
    thread: &mut ThreadData,
) {
    let ThreadData {
        padding_rows,
        local_states,
        ..
    } = thread;
    let nc = shared.num_channels;
    let xsize = x1 - x0;
    {
        let mut rows: Vec<&mut [f32]> = padding_rows.iter_mut().map(|r| &mut r[x0..x1]).collect();
        shared.stages[switch].process_padding_row(&mut rows, xsize, x0, y);
    }
    for (i, stage) in shared.stages.iter().enumerate().skip(switch + 1) {
        let mut input_rows: Vec<Vec<&[f32]>> = vec![vec![]; nc];
        let mut output_rows: Vec<Vec<&mut [f32]>> = (0..nc).map(|_| vec![]).collect();
        for (c, row) in padding_rows.iter_mut().enumerate() {
            let row = &mut row[x0..x1];
            match stage.channel_mode(c) {
                RenderPipelineChannelMode::Input => input_rows[c].push(row),
                RenderPipelineChannelMode::InPlace => output_rows[c].push(row),
                _ => {}
            }
        }
        stage.process_row(
            &input_rows,
            &mut output_rows,
            0,
            xsize,
            x0,
            y,
            local_states[i].as_deref_mut(),
        );
    }
}
