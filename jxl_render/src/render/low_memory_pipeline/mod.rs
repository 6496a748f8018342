// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::{Mutex, MutexGuard};

use crate::{
    error::{Error, Result},
    image::{Image, Rect},
    util::{ShiftRightCeil, tracing_wrappers::*},
};

use super::{
    RenderPipelineChannelMode,
    group_border::GroupBorderAssigner,
    internal::{GroupBuffers, LocalStates, RenderPipelineShared, RenderPipelineStrategy, lock},
};

mod borders;
mod render_group;
mod row_buffers;

use borders::BorderStorage;
use row_buffers::RowBuffer;

const CACHE_LINE_BYTE_SIZE: usize = 64;
/// The x border of group buffers is a multiple of this, so that the group's own pixels start
/// at a cache line boundary.
const GROUP_DATA_X_ALIGN: usize = CACHE_LINE_BYTE_SIZE / std::mem::size_of::<f32>();

#[derive(Debug)]
struct RingSpec {
    num_rows: usize,
    row_len: usize,
    x_offset: usize,
}

/// Buffer assignment and extra rows/columns of every stage, computed when the pipeline is
/// built.
#[derive(Debug)]
struct Layout {
    /// Index of the first stage after the last stage with `InOut` channels. From this stage on,
    /// rows are processed only inside the rect being rendered, at the final resolution.
    first_trailing: usize,
    /// Columns processed on each side of the rect, at the stage's input resolution.
    xextra: Vec<usize>,
    /// Rows produced on each side of the rect, in final-resolution rows.
    vpad: Vec<usize>,
    max_vpad: usize,
    /// `sources[i][c]`: ring buffer of channel `c` read by stage `i`; `None` is the group data.
    sources: Vec<Vec<Option<usize>>>,
    /// `outputs[i][c]`: ring buffer of channel `c` written by stage `i`.
    outputs: Vec<Vec<Option<usize>>>,
    /// Ring buffers of each channel, in stage order.
    rings: Vec<Vec<RingSpec>>,
    /// Pixels of the base grid around a group that must be available before rendering a
    /// pixel near its edge.
    group_border: (usize, usize),
    /// Border of the group input buffers; the group's pixels start at this position.
    data_border: (usize, usize),
    /// Border strips kept for each channel.
    strip_size: Vec<(usize, usize)>,
    group_data_size: Vec<(usize, usize)>,
}

impl Layout {
    fn new(shared: &RenderPipelineShared) -> Result<Layout> {
        let fd = &shared.frame_dimensions;
        let base = fd.upsampling_shift;
        let nc = shared.num_channels;
        let stages = &shared.stages;
        let n = stages.len();

        let first_trailing = shared.first_trailing_stage();

        let mut xextra = vec![0; n];
        let mut vpad = vec![0; n];
        for i in 0..first_trailing {
            let (sx, sy) = stages[i].settings().shift();
            let shift = shared.stage_input_shift(i);
            let out = shared.output_padding[i];
            xextra[i] = out.0.shrc(sx);
            vpad[i] = out.1.shrc(sy) << shift.1;
        }
        let max_vpad = vpad.iter().copied().max().unwrap_or(0);

        let mut group_border = (0, 0);
        let mut align = (1, 1);
        for c in 0..nc {
            let shift = shared.channel_shifts[0][c];
            let pad = shared.padding[0][c];
            group_border.0 = group_border.0.max((pad.0 << shift.0).div_ceil(1 << base));
            group_border.1 = group_border.1.max((pad.1 << shift.1).div_ceil(1 << base));
            if shift.0 > base {
                align.0 = align.0.max(1 << (shift.0 - base));
            }
            if shift.1 > base {
                align.1 = align.1.max(1 << (shift.1 - base));
            }
        }
        let group_border = (
            group_border.0.next_multiple_of(align.0),
            group_border.1.next_multiple_of(align.1),
        );
        if 2 * group_border.0 > fd.group_dim || 2 * group_border.1 > fd.group_dim {
            return Err(Error::GroupTooSmallForBorder(
                fd.group_dim,
                fd.group_dim,
                group_border.0,
                group_border.1,
            ));
        }

        let strip_size: Vec<_> = (0..nc)
            .map(|c| {
                let shift = shared.channel_shifts[0][c];
                let pad = shared.padding[0][c];
                (
                    (group_border.0 << base).shrc(shift.0) + pad.0,
                    (group_border.1 << base).shrc(shift.1) + pad.1,
                )
            })
            .collect();
        let data_border = (
            strip_size
                .iter()
                .map(|s| s.0)
                .max()
                .unwrap_or(0)
                .next_multiple_of(GROUP_DATA_X_ALIGN),
            strip_size.iter().map(|s| s.1).max().unwrap_or(0),
        );
        let group_data_size = (0..nc)
            .map(|c| {
                let size = shared.group_input_size(c);
                (size.0 + 2 * data_border.0, size.1 + 2 * data_border.1)
            })
            .collect();

        let mut sources = vec![vec![None; nc]; n];
        let mut outputs = vec![vec![None; nc]; n];
        let mut producers = vec![vec![]; nc];
        for c in 0..nc {
            let mut current = None;
            for (i, stage) in stages.iter().enumerate() {
                let mode = stage.channel_mode(c);
                if mode == RenderPipelineChannelMode::Ignored {
                    continue;
                }
                sources[i][c] = current;
                // In-place stages never modify the group data, which other rects of the same
                // group may still need.
                if mode == RenderPipelineChannelMode::InOut
                    || (mode == RenderPipelineChannelMode::InPlace && current.is_none())
                {
                    current = Some(producers[c].len());
                    outputs[i][c] = current;
                    producers[c].push(i);
                }
            }
        }

        let max_width = (fd.group_dim + 2 * group_border.0) << base;
        let rings = producers
            .iter()
            .enumerate()
            .map(|(c, producers)| {
                producers
                    .iter()
                    .enumerate()
                    .map(|(r, &k)| {
                        let stage = &stages[k];
                        let in_out = stage.channel_mode(c) == RenderPipelineChannelMode::InOut;
                        let (sx, sy) = if in_out {
                            stage.settings().shift()
                        } else {
                            (0, 0)
                        };
                        let row_shift = shared.channel_shifts[k + 1][c].1;
                        let mut num_rows = (1 << sy) + 1;
                        for j in k + 1..n {
                            if sources[j][c] != Some(r)
                                || stages[j].channel_mode(c) == RenderPipelineChannelMode::Ignored
                            {
                                continue;
                            }
                            let lead = vpad[k].saturating_sub(vpad[j]) >> row_shift;
                            let border = stages[j].settings().border().1;
                            num_rows = num_rows.max(lead + border + (1 << sy) + 1);
                        }
                        let width = (max_width >> shared.stage_input_shift(k).0) + 1;
                        RingSpec {
                            num_rows: num_rows.next_power_of_two(),
                            row_len: (width + 2 * xextra[k]) << sx,
                            x_offset: xextra[k] << sx,
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(Layout {
            first_trailing,
            xextra,
            vpad,
            max_vpad,
            sources,
            outputs,
            rings,
            group_border,
            data_border,
            strip_size,
            group_data_size,
        })
    }
}

/// Buffers used by one thread while rendering.
struct ThreadData {
    /// `[channel][ring]`
    rings: Vec<Vec<RowBuffer>>,
    local_states: LocalStates,
    /// One canvas-wide row per channel, used for the areas outside of the frame.
    padding_rows: Vec<Vec<f32>>,
}

impl ThreadData {
    fn new(shared: &RenderPipelineShared, layout: &Layout) -> Result<ThreadData> {
        let rings = layout
            .rings
            .iter()
            .map(|specs| {
                specs
                    .iter()
                    .map(|s| RowBuffer::new(s.num_rows, s.row_len, s.x_offset))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let width = shared
            .image_dimensions
            .map_or(0, |(_, dims)| dims.image_size.0);
        let mut padding_rows = vec![];
        for _ in 0..shared.num_channels {
            let mut row = vec![];
            row.try_reserve_exact(width)?;
            row.resize(width, 0.0);
            padding_rows.push(row);
        }
        Ok(ThreadData {
            rings,
            local_states: shared.init_local_states()?,
            padding_rows,
        })
    }
}

/// Renders groups as soon as they (and the neighbours they share seams with) are available,
/// keeping only a few rows per stage in memory.
pub(crate) struct LowMemoryRenderPipeline {
    layout: Layout,
    assigner: GroupBorderAssigner,
    borders: BorderStorage,
    group_buffers: GroupBuffers,
    thread_data: Vec<Mutex<ThreadData>>,
}

impl LowMemoryRenderPipeline {
    #[instrument(skip_all, err)]
    pub(crate) fn new(shared: &RenderPipelineShared) -> Result<LowMemoryRenderPipeline> {
        let layout = Layout::new(shared)?;
        debug!(?layout, "low memory pipeline layout");
        let borders = BorderStorage::new(shared, &layout.strip_size)?;
        Ok(LowMemoryRenderPipeline {
            layout,
            assigner: GroupBorderAssigner::new(shared.frame_dimensions),
            borders,
            group_buffers: GroupBuffers::unprepared(),
            thread_data: vec![],
        })
    }

    fn has_borders(&self) -> bool {
        self.layout.group_border != (0, 0)
    }

    fn thread_data(&self, thread_id: usize) -> Result<MutexGuard<'_, ThreadData>> {
        if self.thread_data.is_empty() {
            return Err(Error::ThreadsNotPrepared);
        }
        let data = self
            .thread_data
            .get(thread_id)
            .ok_or(Error::InvalidThreadId(thread_id, self.thread_data.len()))?;
        Ok(lock(data))
    }
}

impl RenderPipelineStrategy for LowMemoryRenderPipeline {
    fn prepare_for_threads(
        &mut self,
        shared: &RenderPipelineShared,
        num_threads: usize,
        use_group_ids: bool,
    ) -> Result<()> {
        debug!(num_threads, use_group_ids, "preparing low memory pipeline");
        self.group_buffers = GroupBuffers::new(
            num_threads,
            shared.frame_dimensions.num_groups,
            use_group_ids,
            &self.layout.group_data_size,
        )?;
        self.thread_data = (0..num_threads)
            .map(|_| ThreadData::new(shared, &self.layout).map(Mutex::new))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn prepare_buffers(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        thread_id: usize,
    ) -> Result<(MutexGuard<'_, Vec<Image<f32>>>, Vec<Rect>)> {
        if thread_id >= self.thread_data.len() && !self.thread_data.is_empty() {
            return Err(Error::InvalidThreadId(thread_id, self.thread_data.len()));
        }
        let buffers = self.group_buffers.get(group_id, thread_id)?;
        let rects = (0..shared.num_channels)
            .map(|c| {
                Rect::new(
                    self.layout.data_border,
                    shared.group_input_rect(group_id, c).size,
                )
            })
            .collect();
        Ok((buffers, rects))
    }

    #[instrument(skip(self, shared, buffers), err)]
    fn process_buffers(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        thread_id: usize,
        buffers: &mut [Image<f32>],
    ) -> Result<()> {
        let mut thread = self.thread_data(thread_id)?;
        if self.has_borders() {
            self.borders
                .save(shared, group_id, buffers, self.layout.data_border)?;
        }
        self.render_padding(shared, group_id, &mut thread);
        let (rects, count) = self.assigner.group_done(group_id, self.layout.group_border);
        trace!(group_id, rects = ?&rects[..count], "group done");
        if count > 0 && self.has_borders() {
            self.borders
                .load(shared, group_id, buffers, self.layout.data_border)?;
        }
        for rect in &rects[..count] {
            self.render_rect(shared, group_id, *rect, buffers, &mut thread);
        }
        Ok(())
    }

    fn clear_done(&self, group_id: usize) {
        self.assigner.clear_done(group_id);
    }
}
