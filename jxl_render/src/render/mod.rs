// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;
use std::sync::atomic::Ordering;

use crate::{
    error::{Error, Result},
    frame_dimensions::FrameDimensions,
    image::Image,
    options::RenderPipelineOptions,
    util::tracing_wrappers::*,
};

mod builder;
mod group_border;
mod input;
mod internal;
mod low_memory_pipeline;
mod simple_pipeline;
pub mod stages;
#[cfg(test)]
mod test;

pub use builder::RenderPipelineBuilder;
pub use group_border::{GroupBorderAssigner, MAX_TO_FINALIZE};
pub use input::RenderPipelineInput;

use internal::{RenderPipelineShared, RenderPipelineStrategy};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderPipelineChannelMode {
    /// The stage does not look at this channel.
    Ignored,
    /// The stage modifies the channel in place, at the same resolution.
    InPlace,
    /// The stage reads the channel and writes a new buffer, possibly with a different
    /// resolution. Only this mode can use a border or a shift.
    InOut,
    /// The stage only reads the channel. Calls that cannot affect pixels inside the visible
    /// image may be skipped entirely.
    Input,
}

/// Spatial support and resampling factors of a stage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StageSettings {
    /// Number of input pixels needed on each side of the pixel being computed.
    pub border_x: u8,
    pub border_y: u8,
    /// log2 of the number of output columns/rows produced per input column/row.
    pub shift_x: u8,
    pub shift_y: u8,
}

impl StageSettings {
    pub const fn none() -> StageSettings {
        StageSettings {
            border_x: 0,
            border_y: 0,
            shift_x: 0,
            shift_y: 0,
        }
    }

    pub const fn symmetric(shift: u8, border: u8) -> StageSettings {
        StageSettings {
            border_x: border,
            border_y: border,
            shift_x: shift,
            shift_y: shift,
        }
    }

    pub const fn symmetric_border_only(border: u8) -> StageSettings {
        Self::symmetric(0, border)
    }

    pub const fn horizontal(shift: u8, border: u8) -> StageSettings {
        StageSettings {
            border_x: border,
            border_y: 0,
            shift_x: shift,
            shift_y: 0,
        }
    }

    pub const fn vertical(shift: u8, border: u8) -> StageSettings {
        StageSettings {
            border_x: 0,
            border_y: border,
            shift_x: 0,
            shift_y: shift,
        }
    }

    pub(crate) fn border(&self) -> (usize, usize) {
        (self.border_x as usize, self.border_y as usize)
    }

    pub(crate) fn shift(&self) -> (usize, usize) {
        (self.shift_x as usize, self.shift_y as usize)
    }
}

/// Canvas geometry reported by a stage that switches the pipeline to image coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageDimensions {
    pub image_size: (usize, usize),
    /// Position of the top-left corner of the frame on the canvas.
    pub frame_origin: (isize, isize),
}

/// Rows read by a stage, indexed by channel.
///
/// For an `InOut` or `Input` channel there are `2 * border_y + 1` rows, the middle one being
/// the row to process; index 0 of each row is pixel `-(xextra + border_x)` and rows are
/// `xsize + 2 * (xextra + border_x)` long. Other channels have no rows.
pub type InputRows<'a> = [Vec<&'a [f32]>];

/// Rows written by a stage, indexed by channel.
///
/// An `InOut` channel has `1 << shift_y` rows; index 0 is output pixel `-(xextra << shift_x)`
/// and rows are `(xsize + 2 * xextra) << shift_x` long. An `InPlace` channel has exactly one
/// row, starting at pixel `-xextra` and `xsize + 2 * xextra` long. Other channels have no rows.
pub type OutputRows<'a> = [Vec<&'a mut [f32]>];

pub trait RenderPipelineStage: std::fmt::Display + Send + Sync {
    fn settings(&self) -> StageSettings {
        StageSettings::none()
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode;

    /// Stages that cannot work with the inputs they were given report it here; building a
    /// pipeline with such a stage fails.
    fn is_initialized(&self) -> bool {
        true
    }

    /// Called once, when the pipeline is built, with the size of every channel as seen at the
    /// input of this stage.
    fn set_input_sizes(&mut self, _sizes: &[(usize, usize)]) -> Result<()> {
        Ok(())
    }

    /// Creates the state passed to `process_row`; one instance is created for each thread.
    fn init_local_state(&self) -> Result<Option<Box<dyn Any + Send>>> {
        Ok(None)
    }

    /// Processes `xsize + 2 * xextra` pixels of one input row; see [`InputRows`] and
    /// [`OutputRows`] for the layout of the rows. `xpos` and `ypos` are the position of the
    /// first non-extra pixel, at the resolution of this stage's input.
    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        xpos: usize,
        ypos: usize,
        state: Option<&mut (dyn Any + Send)>,
    );

    /// If this returns `Some`, the following stages see the whole canvas instead of the frame.
    /// At most one stage per pipeline may do so.
    fn image_dimensions(&self) -> Option<ImageDimensions> {
        None
    }

    /// Fills `xsize` pixels of each channel for an area of the canvas not covered by the frame.
    /// Only called on stages that return `Some` from `image_dimensions`.
    fn process_padding_row(
        &self,
        _rows: &mut [&mut [f32]],
        _xsize: usize,
        _xpos: usize,
        _ypos: usize,
    ) {
    }
}

/// A built render pipeline; see [`RenderPipelineBuilder`].
///
/// Decoders call [`RenderPipeline::get_input_buffers`] for a group, fill the returned
/// buffers, and call [`RenderPipelineInput::done`]. Different threads may do so concurrently
/// for different groups, as long as each uses its own `thread_id`.
pub struct RenderPipeline {
    shared: RenderPipelineShared,
    strategy: Box<dyn RenderPipelineStrategy>,
}

impl RenderPipeline {
    pub(crate) fn new(
        shared: RenderPipelineShared,
        strategy: Box<dyn RenderPipelineStrategy>,
    ) -> RenderPipeline {
        RenderPipeline { shared, strategy }
    }

    /// Allocates the buffers needed to process groups from `num_threads` threads. With
    /// `use_group_ids`, input buffers are indexed by group instead of by thread, so that a
    /// group can be filled by one thread and completed later.
    #[instrument(skip(self), err)]
    pub fn prepare_for_threads(&mut self, num_threads: usize, use_group_ids: bool) -> Result<()> {
        self.strategy
            .prepare_for_threads(&self.shared, num_threads.max(1), use_group_ids)
    }

    /// Returns the buffers to be filled with the decoded data of group `group_id`.
    pub fn get_input_buffers(
        &self,
        group_id: usize,
        thread_id: usize,
    ) -> Result<RenderPipelineInput<'_>> {
        let num_groups = self.shared.frame_dimensions.num_groups;
        if group_id >= num_groups {
            return Err(Error::InvalidGroupId(group_id, num_groups));
        }
        let (buffers, rects) = self
            .strategy
            .prepare_buffers(&self.shared, group_id, thread_id)?;
        Ok(RenderPipelineInput::new(
            self, group_id, thread_id, buffers, rects,
        ))
    }

    /// Minimum, over all groups, of the number of passes for which input was supplied.
    pub fn passes_with_all_input(&self) -> usize {
        self.shared.passes_with_all_input()
    }

    /// Forgets that `group_id` was processed, so that its borders are rendered again by the
    /// next pass.
    pub fn clear_done(&self, group_id: usize) {
        self.strategy.clear_done(group_id);
    }

    /// Groups whose input handle was dropped without calling `done`.
    pub fn truncated_groups(&self) -> Vec<usize> {
        self.shared
            .truncated_groups
            .iter()
            .enumerate()
            .filter(|(_, t)| t.load(Ordering::Relaxed))
            .map(|(g, _)| g)
            .collect()
    }

    pub fn frame_dimensions(&self) -> &FrameDimensions {
        &self.shared.frame_dimensions
    }

    pub fn num_channels(&self) -> usize {
        self.shared.num_channels
    }

    /// Size of channel `c` at the input of the pipeline.
    pub fn input_size(&self, c: usize) -> (usize, usize) {
        self.shared.channel_size(0, c)
    }

    pub(crate) fn input_ready(
        &self,
        group_id: usize,
        thread_id: usize,
        buffers: &mut [Image<f32>],
    ) -> Result<()> {
        self.shared.group_completed_passes[group_id].fetch_add(1, Ordering::AcqRel);
        self.strategy
            .process_buffers(&self.shared, group_id, thread_id, buffers)
    }

    pub(crate) fn input_abandoned(&self, group_id: usize) {
        warn!(group_id, "group input was not completed");
        self.shared.truncated_groups[group_id].store(true, Ordering::Relaxed);
    }
}

/// Feeds every group of the frame through `pipeline`: `fill` is called with the group id and
/// the group's input buffers, which are then marked as done.
///
/// If `fill` fails, the group's buffers are zero-filled and the group is recorded as
/// truncated, and the error is returned.
#[instrument(skip_all, err)]
pub fn run_groups<F>(
    pipeline: &mut RenderPipeline,
    options: &RenderPipelineOptions,
    fill: F,
) -> Result<()>
where
    F: Fn(usize, &mut RenderPipelineInput<'_>) -> Result<()> + Send + Sync,
{
    let num_groups = pipeline.frame_dimensions().num_groups;

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        let num_threads = options.num_threads.unwrap_or_else(rayon::current_num_threads);
        pipeline.prepare_for_threads(num_threads, options.use_group_ids)?;
        let pipeline = &*pipeline;
        let num_threads = num_threads.max(1);
        (0..num_groups).into_par_iter().try_for_each(|group_id| {
            // Threads beyond `num_threads` share buffers, which are then used in turn.
            let thread_id = rayon::current_thread_index().unwrap_or(0) % num_threads;
            let mut input = pipeline.get_input_buffers(group_id, thread_id)?;
            fill(group_id, &mut input)?;
            input.done()
        })
    }

    #[cfg(not(feature = "parallel"))]
    {
        pipeline.prepare_for_threads(1, options.use_group_ids)?;
        for group_id in 0..num_groups {
            let mut input = pipeline.get_input_buffers(group_id, 0)?;
            fill(group_id, &mut input)?;
            input.done()?;
        }
        Ok(())
    }
}
