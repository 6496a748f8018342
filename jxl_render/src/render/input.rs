// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::MutexGuard;

use crate::{
    error::{Error, Result},
    image::{Image, Rect},
    util::tracing_wrappers::*,
};

use super::RenderPipeline;

/// Input buffers of one group, obtained from [`RenderPipeline::get_input_buffers`].
///
/// The buffers must be filled within their rect and handed back with
/// [`RenderPipelineInput::done`]. If the handle is dropped instead (for example because the
/// bitstream ended early), the channels that were not marked as filled are zeroed and the
/// group is recorded as truncated; it is not rendered.
pub struct RenderPipelineInput<'a> {
    pipeline: &'a RenderPipeline,
    group_id: usize,
    thread_id: usize,
    buffers: MutexGuard<'a, Vec<Image<f32>>>,
    rects: Vec<Rect>,
    filled: Vec<bool>,
    finished: bool,
}

impl<'a> RenderPipelineInput<'a> {
    pub(super) fn new(
        pipeline: &'a RenderPipeline,
        group_id: usize,
        thread_id: usize,
        buffers: MutexGuard<'a, Vec<Image<f32>>>,
        rects: Vec<Rect>,
    ) -> RenderPipelineInput<'a> {
        let filled = vec![false; rects.len()];
        RenderPipelineInput {
            pipeline,
            group_id,
            thread_id,
            buffers,
            rects,
            filled,
            finished: false,
        }
    }

    pub fn group_id(&self) -> usize {
        self.group_id
    }

    pub fn num_channels(&self) -> usize {
        self.rects.len()
    }

    /// Returns the buffer of channel `c` and the rect of it that holds the group's pixels.
    /// Pixels outside the rect are owned by the pipeline.
    pub fn get_buffer(&mut self, c: usize) -> Result<(&mut Image<f32>, Rect)> {
        if c >= self.rects.len() {
            return Err(Error::InvalidChannel(c, self.rects.len()));
        }
        Ok((&mut self.buffers[c], self.rects[c]))
    }

    /// Area of channel `c` covered by this group, in coordinates of the whole channel.
    pub fn image_rect(&self, c: usize) -> Rect {
        self.pipeline.shared.group_input_rect(self.group_id, c)
    }

    /// Records that the rect of channel `c` was completely written.
    pub fn mark_filled(&mut self, c: usize) {
        self.filled[c] = true;
    }

    /// Hands the buffers back to the pipeline, and renders whatever became renderable.
    #[instrument(skip_all, fields(group_id = self.group_id), err)]
    pub fn done(mut self) -> Result<()> {
        self.finished = true;
        let (group_id, thread_id) = (self.group_id, self.thread_id);
        self.pipeline
            .input_ready(group_id, thread_id, &mut self.buffers)
    }
}

impl Drop for RenderPipelineInput<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for (c, rect) in self.rects.iter().enumerate() {
            if self.filled[c] {
                continue;
            }
            trace!(c, ?rect, "zero-filling channel of truncated group");
            if let Ok(mut r) = self.buffers[c].get_rect_mut(*rect) {
                r.fill(0.0);
            }
        }
        self.pipeline.input_abandoned(self.group_id);
    }
}
