// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::{Mutex, MutexGuard};

use crate::{
    error::Result,
    image::{Image, Rect, copy_image_rect_to},
    util::{mirror, tracing_wrappers::*},
};

use super::{
    ImageDimensions, RenderPipelineChannelMode,
    internal::{GroupBuffers, LocalStates, RenderPipelineShared, RenderPipelineStrategy, lock},
};

struct SimpleState {
    /// Full-frame input, one image per channel.
    input: Vec<Image<f32>>,
    /// Number of times each group was copied into `input`.
    group_passes: Vec<usize>,
    rendered_passes: usize,
    local_states: LocalStates,
}

/// A strategy that waits for all the input of a pass to be available before rendering the
/// whole frame at once, one stage at a time, and prioritizes simplicity over memory usage and
/// speed. Meant for small images and as a reference for testing.
pub(crate) struct SimpleRenderPipeline {
    group_buffers: GroupBuffers,
    state: Mutex<SimpleState>,
}

fn clone_images(images: &[Image<f32>]) -> Result<Vec<Image<f32>>> {
    images.iter().map(|x| x.try_clone()).collect()
}

/// Range of `[0, size)` that lands on a canvas of `canvas_size` pixels when shifted by `origin`.
fn visible_range(size: usize, origin: isize, canvas_size: usize) -> (usize, usize) {
    let start = (-origin).clamp(0, size as isize) as usize;
    let end = (canvas_size as isize - origin).clamp(start as isize, size as isize) as usize;
    (start, end)
}

impl SimpleRenderPipeline {
    #[instrument(skip_all, err)]
    pub(crate) fn new(shared: &RenderPipelineShared) -> Result<SimpleRenderPipeline> {
        info!("creating simple render pipeline");
        let input = (0..shared.num_channels)
            .map(|c| Image::new(shared.channel_size(0, c)))
            .collect::<Result<_>>()?;
        Ok(SimpleRenderPipeline {
            group_buffers: GroupBuffers::unprepared(),
            state: Mutex::new(SimpleState {
                input,
                group_passes: vec![0; shared.frame_dimensions.num_groups],
                rendered_passes: 0,
                local_states: shared.init_local_states()?,
            }),
        })
    }
}

/// Runs stage `i` over `[x0, x1) x [y0, y1)` of `buffers`, whose channels are at the stage's
/// input resolution. Returns the buffers for the next stage.
#[allow(clippy::too_many_arguments)]
fn run_stage(
    shared: &RenderPipelineShared,
    i: usize,
    mut buffers: Vec<Image<f32>>,
    (x0, x1): (usize, usize),
    (y0, y1): (usize, usize),
    position_offset: (isize, isize),
    local_states: &mut LocalStates,
) -> Result<Vec<Image<f32>>> {
    let stage = &shared.stages[i];
    let nc = shared.num_channels;
    let (bx, by) = stage.settings().border();
    let (sx, sy) = stage.settings().shift();
    let modes: Vec<_> = (0..nc).map(|c| stage.channel_mode(c)).collect();
    let xsize = x1 - x0;

    let mut outputs = vec![];
    for (c, mode) in modes.iter().enumerate() {
        outputs.push(if *mode == RenderPipelineChannelMode::InOut {
            Some(Image::new(shared.channel_size(i + 1, c))?)
        } else {
            None
        });
    }

    for y in y0..y1 {
        let input_storage: Vec<Vec<Vec<f32>>> = buffers
            .iter()
            .zip(modes.iter())
            .map(|(image, mode)| match mode {
                RenderPipelineChannelMode::InOut | RenderPipelineChannelMode::Input => {
                    let (width, height) = image.size();
                    (-(by as isize)..=by as isize)
                        .map(|dy| {
                            let row = image.row(mirror(y as isize + dy, height));
                            (0..xsize + 2 * bx)
                                .map(|k| row[mirror((x0 + k) as isize - bx as isize, width)])
                                .collect()
                        })
                        .collect()
                }
                _ => vec![],
            })
            .collect();
        let mut output_storage: Vec<Vec<Vec<f32>>> = modes
            .iter()
            .map(|mode| {
                if *mode == RenderPipelineChannelMode::InOut {
                    vec![vec![0.0; xsize << sx]; 1 << sy]
                } else {
                    vec![]
                }
            })
            .collect();

        {
            let input_rows: Vec<Vec<&[f32]>> = input_storage
                .iter()
                .map(|rows| rows.iter().map(|r| r.as_slice()).collect())
                .collect();
            let mut output_rows: Vec<Vec<&mut [f32]>> = buffers
                .iter_mut()
                .zip(output_storage.iter_mut())
                .zip(modes.iter())
                .map(|((image, storage), mode)| match mode {
                    RenderPipelineChannelMode::InPlace => vec![&mut image.row_mut(y)[x0..x1]],
                    RenderPipelineChannelMode::InOut => {
                        storage.iter_mut().map(|r| r.as_mut_slice()).collect()
                    }
                    _ => vec![],
                })
                .collect();
            stage.process_row(
                &input_rows,
                &mut output_rows,
                0,
                xsize,
                (x0 as isize + position_offset.0) as usize,
                (y as isize + position_offset.1) as usize,
                local_states[i].as_deref_mut(),
            );
        }

        for (output, rows) in outputs.iter_mut().zip(output_storage.iter()) {
            let Some(output) = output else {
                continue;
            };
            let (width, height) = output.size();
            for (k, row) in rows.iter().enumerate() {
                let out_y = (y << sy) + k;
                if out_y >= height {
                    break;
                }
                let out_x0 = x0 << sx;
                let len = row.len().min(width.saturating_sub(out_x0));
                output.row_mut(out_y)[out_x0..out_x0 + len].copy_from_slice(&row[..len]);
            }
        }
    }

    for (c, output) in outputs.into_iter().enumerate() {
        if let Some(output) = output {
            buffers[c] = output;
        }
    }
    Ok(buffers)
}

/// Places the visible part of the frame on the canvas, and fills the rest of the canvas with
/// `process_padding_row` of stage `switch`.
fn make_canvas(
    shared: &RenderPipelineShared,
    switch: usize,
    dims: ImageDimensions,
    frame: &[Image<f32>],
) -> Result<Vec<Image<f32>>> {
    let (w, h) = dims.image_size;
    let (ox, oy) = dims.frame_origin;
    let fd = &shared.frame_dimensions;
    let mut canvas = (0..shared.num_channels)
        .map(|_| Image::new((w, h)))
        .collect::<Result<Vec<_>>>()?;
    let (fx0, fx1) = visible_range(fd.xsize_upsampled, ox, w);
    let (fy0, fy1) = visible_range(fd.ysize_upsampled, oy, h);
    let to_canvas = |v: usize, origin: isize, size: usize| {
        (v as isize + origin).clamp(0, size as isize) as usize
    };
    let canvas_x = (to_canvas(fx0, ox, w), to_canvas(fx1, ox, w));
    let canvas_y = (to_canvas(fy0, oy, h), to_canvas(fy1, oy, h));

    let stage = &shared.stages[switch];
    for y in 0..h {
        let segments = if (canvas_y.0..canvas_y.1).contains(&y) {
            vec![(0, canvas_x.0), (canvas_x.1, w)]
        } else {
            vec![(0, w)]
        };
        for (start, end) in segments {
            if start >= end {
                continue;
            }
            let mut rows: Vec<&mut [f32]> = canvas
                .iter_mut()
                .map(|image| &mut image.row_mut(y)[start..end])
                .collect();
            stage.process_padding_row(&mut rows, end - start, start, y);
        }
    }

    let visible = Rect::new((fx0, fy0), (fx1 - fx0, fy1 - fy0));
    if !visible.is_empty() {
        for (src, dst) in frame.iter().zip(canvas.iter_mut()) {
            copy_image_rect_to(src, visible, dst, (canvas_x.0, canvas_y.0))?;
        }
    }
    Ok(canvas)
}

#[instrument(skip_all, err)]
fn render(
    shared: &RenderPipelineShared,
    input: &[Image<f32>],
    local_states: &mut LocalStates,
) -> Result<()> {
    let fd = &shared.frame_dimensions;
    let first_trailing = shared.first_trailing_stage();
    let mut buffers = clone_images(input)?;
    for i in 0..shared.stages.len() {
        debug!("running stage {i}: {}", shared.stages[i]);
        match shared.image_dimensions {
            Some((switch, dims)) if i > switch => {
                let (w, h) = dims.image_size;
                buffers = run_stage(shared, i, buffers, (0, w), (0, h), (0, 0), local_states)?;
            }
            Some((_, dims)) if i >= first_trailing => {
                let x = visible_range(fd.xsize_upsampled, dims.frame_origin.0, dims.image_size.0);
                let y = visible_range(fd.ysize_upsampled, dims.frame_origin.1, dims.image_size.1);
                buffers = run_stage(shared, i, buffers, x, y, (0, 0), local_states)?;
            }
            _ => {
                let (w, h) = shared.channel_size(i, shared.any_used_channel(i));
                buffers = run_stage(shared, i, buffers, (0, w), (0, h), (0, 0), local_states)?;
            }
        }
        if let Some((switch, dims)) = shared.image_dimensions
            && switch == i
        {
            buffers = make_canvas(shared, switch, dims, &buffers)?;
        }
    }
    Ok(())
}

impl RenderPipelineStrategy for SimpleRenderPipeline {
    fn prepare_for_threads(
        &mut self,
        shared: &RenderPipelineShared,
        num_threads: usize,
        use_group_ids: bool,
    ) -> Result<()> {
        let sizes: Vec<_> = (0..shared.num_channels)
            .map(|c| shared.group_input_size(c))
            .collect();
        self.group_buffers = GroupBuffers::new(
            num_threads,
            shared.frame_dimensions.num_groups,
            use_group_ids,
            &sizes,
        )?;
        Ok(())
    }

    fn prepare_buffers(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        thread_id: usize,
    ) -> Result<(MutexGuard<'_, Vec<Image<f32>>>, Vec<Rect>)> {
        let buffers = self.group_buffers.get(group_id, thread_id)?;
        let rects = (0..shared.num_channels)
            .map(|c| Rect::new((0, 0), shared.group_input_rect(group_id, c).size))
            .collect();
        Ok((buffers, rects))
    }

    #[instrument(skip(self, shared, buffers), err)]
    fn process_buffers(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        _thread_id: usize,
        buffers: &mut [Image<f32>],
    ) -> Result<()> {
        let mut state = lock(&self.state);
        for (c, buffer) in buffers.iter().enumerate() {
            let rect = shared.group_input_rect(group_id, c);
            copy_image_rect_to(
                buffer,
                Rect::new((0, 0), rect.size),
                &mut state.input[c],
                rect.origin,
            )?;
        }
        state.group_passes[group_id] += 1;
        let ready_passes = state.group_passes.iter().copied().min().unwrap_or(0);
        if ready_passes <= state.rendered_passes {
            trace!(
                ready_passes,
                rendered = state.rendered_passes,
                "waiting for more groups"
            );
            return Ok(());
        }
        debug!(ready_passes, "rendering frame");
        state.rendered_passes = ready_passes;
        let SimpleState {
            input,
            local_states,
            ..
        } = &mut *state;
        render(shared, input, local_states)
    }

    fn clear_done(&self, _group_id: usize) {}
}
