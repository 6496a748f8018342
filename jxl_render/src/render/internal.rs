// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    error::{Error, Result},
    frame_dimensions::FrameDimensions,
    image::{Image, Rect},
    util::{ShiftRightCeil, tracing_wrappers::*},
};

use super::{ImageDimensions, RenderPipelineChannelMode, RenderPipelineStage};

pub(crate) type LocalStates = Vec<Option<Box<dyn Any + Send>>>;

/// Execution strategy of a [`super::RenderPipeline`]. The tables it needs are passed in on
/// every call.
pub(crate) trait RenderPipelineStrategy: Send + Sync {
    fn prepare_for_threads(
        &mut self,
        shared: &RenderPipelineShared,
        num_threads: usize,
        use_group_ids: bool,
    ) -> Result<()>;

    /// Returns the input buffers for the group, and the rect of each buffer to be filled.
    fn prepare_buffers(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        thread_id: usize,
    ) -> Result<(MutexGuard<'_, Vec<Image<f32>>>, Vec<Rect>)>;

    fn process_buffers(
        &self,
        shared: &RenderPipelineShared,
        group_id: usize,
        thread_id: usize,
        buffers: &mut [Image<f32>],
    ) -> Result<()>;

    fn clear_done(&self, group_id: usize);
}

/// Locks a buffer that is owned by a single thread or group at a time. A poisoned lock only
/// means that a previous user panicked; the data is overwritten before being read again.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Input buffers handed out to producers, either one set per thread or one set per group.
pub(crate) struct GroupBuffers {
    sets: Vec<Mutex<Vec<Image<f32>>>>,
    use_group_ids: bool,
}

impl GroupBuffers {
    pub fn unprepared() -> GroupBuffers {
        GroupBuffers {
            sets: vec![],
            use_group_ids: false,
        }
    }

    pub fn new(
        num_threads: usize,
        num_groups: usize,
        use_group_ids: bool,
        sizes: &[(usize, usize)],
    ) -> Result<GroupBuffers> {
        let count = if use_group_ids {
            num_groups
        } else {
            num_threads
        };
        let mut sets = vec![];
        sets.try_reserve_exact(count)?;
        for _ in 0..count {
            let images = sizes
                .iter()
                .map(|size| Image::new(*size))
                .collect::<Result<Vec<_>>>()?;
            sets.push(Mutex::new(images));
        }
        Ok(GroupBuffers {
            sets,
            use_group_ids,
        })
    }

    pub fn get(
        &self,
        group_id: usize,
        thread_id: usize,
    ) -> Result<MutexGuard<'_, Vec<Image<f32>>>> {
        if self.sets.is_empty() {
            return Err(Error::ThreadsNotPrepared);
        }
        let index = if self.use_group_ids {
            group_id
        } else {
            if thread_id >= self.sets.len() {
                return Err(Error::InvalidThreadId(thread_id, self.sets.len()));
            }
            thread_id
        };
        Ok(lock(&self.sets[index]))
    }
}

/// Stage list and the tables derived from it when the pipeline is built.
pub(crate) struct RenderPipelineShared {
    pub num_channels: usize,
    pub frame_dimensions: FrameDimensions,
    pub stages: Vec<Box<dyn RenderPipelineStage>>,
    /// `channel_shifts[i][c]` is the shift of channel `c` at the input of stage `i`; there is
    /// one extra entry for the output of the pipeline, which is always (0, 0).
    pub channel_shifts: Vec<Vec<(usize, usize)>>,
    /// `padding[i][c]` is how many pixels of channel `c` beyond the area to render must be
    /// valid at the input of stage `i`, at that stage's input resolution.
    pub padding: Vec<Vec<(usize, usize)>>,
    /// How many pixels beyond the area to render stage `i` must produce, at its output
    /// resolution, for the following stages.
    pub output_padding: Vec<(usize, usize)>,
    /// The stage that switches to image coordinates, if any.
    pub image_dimensions: Option<(usize, ImageDimensions)>,
    pub group_completed_passes: Vec<AtomicUsize>,
    pub truncated_groups: Vec<AtomicBool>,
}

impl RenderPipelineShared {
    #[instrument(skip_all, err)]
    pub fn new(
        num_channels: usize,
        frame_dimensions: FrameDimensions,
        mut stages: Vec<Box<dyn RenderPipelineStage>>,
    ) -> Result<RenderPipelineShared> {
        if num_channels == 0 {
            return Err(Error::NoChannels);
        }
        let Some(last) = stages.last() else {
            return Err(Error::EmptyPipeline);
        };
        for c in 0..num_channels {
            if last.channel_mode(c) == RenderPipelineChannelMode::InOut {
                return Err(Error::PipelineEndsWithInOut(last.to_string(), c));
            }
        }

        let channel_shifts = compute_channel_shifts(num_channels, &stages);
        for (i, stage) in stages.iter().enumerate() {
            let mut shift = None;
            for c in used_channels(stage.as_ref(), num_channels) {
                let s = channel_shifts[i][c];
                match shift {
                    None => shift = Some(s),
                    Some(prev) if prev != s => {
                        return Err(Error::MismatchedChannelShifts(stage.to_string(), prev, s));
                    }
                    _ => {}
                }
            }
        }
        let max_shift = frame_dimensions.upsampling_shift + frame_dimensions.log_group_dim;
        for (c, shift) in channel_shifts[0].iter().enumerate() {
            if shift.0 > max_shift || shift.1 > max_shift {
                return Err(Error::ChannelShiftTooLarge(c, *shift));
            }
        }

        let mut image_dimensions: Option<(usize, ImageDimensions)> = None;
        for (i, stage) in stages.iter().enumerate() {
            if let Some((prev, _)) = image_dimensions {
                if used_channels(stage.as_ref(), num_channels)
                    .any(|c| stage.channel_mode(c) == RenderPipelineChannelMode::InOut)
                {
                    return Err(Error::InOutAfterImageDimensionSwitch(stage.to_string()));
                }
                if stage.image_dimensions().is_some() {
                    return Err(Error::MultipleImageDimensionSwitches(
                        stage.to_string(),
                        stages[prev].to_string(),
                    ));
                }
            } else if let Some(dims) = stage.image_dimensions() {
                if used_channels(stage.as_ref(), num_channels)
                    .any(|c| stage.channel_mode(c) == RenderPipelineChannelMode::InOut)
                {
                    return Err(Error::InOutAfterImageDimensionSwitch(stage.to_string()));
                }
                image_dimensions = Some((i, dims));
            }
        }

        let (padding, output_padding) = compute_padding(num_channels, &stages);

        for (i, stage) in stages.iter_mut().enumerate() {
            let sizes: Vec<(usize, usize)> = match image_dimensions {
                Some((switch, dims)) if i > switch => vec![dims.image_size; num_channels],
                _ => channel_shifts[i]
                    .iter()
                    .map(|shift| {
                        (
                            frame_dimensions.xsize_upsampled.shrc(shift.0),
                            frame_dimensions.ysize_upsampled.shrc(shift.1),
                        )
                    })
                    .collect(),
            };
            stage.set_input_sizes(&sizes)?;
        }
        for stage in stages.iter() {
            if !stage.is_initialized() {
                return Err(Error::StageNotInitialized(stage.to_string()));
            }
        }

        debug!(
            ?channel_shifts,
            ?padding,
            ?output_padding,
            "computed stage tables"
        );

        let num_groups = frame_dimensions.num_groups;
        Ok(RenderPipelineShared {
            num_channels,
            frame_dimensions,
            stages,
            channel_shifts,
            padding,
            output_padding,
            image_dimensions,
            group_completed_passes: (0..num_groups).map(|_| AtomicUsize::new(0)).collect(),
            truncated_groups: (0..num_groups).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn passes_with_all_input(&self) -> usize {
        self.group_completed_passes
            .iter()
            .map(|x| x.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }

    /// Index of the stage after the last stage with an `InOut` channel; stages from this one on
    /// work at the final resolution without borders.
    pub fn first_trailing_stage(&self) -> usize {
        self.stages
            .iter()
            .rposition(|s| {
                used_channels(s.as_ref(), self.num_channels)
                    .any(|c| s.channel_mode(c) == RenderPipelineChannelMode::InOut)
            })
            .map_or(0, |i| i + 1)
    }

    /// Some channel that stage `i` uses.
    pub fn any_used_channel(&self, i: usize) -> usize {
        let stage = self.stages[i].as_ref();
        used_channels(stage, self.num_channels).last().unwrap_or(0)
    }

    /// Shift of the channels used by stage `i`, at its input.
    pub fn stage_input_shift(&self, i: usize) -> (usize, usize) {
        self.channel_shifts[i][self.any_used_channel(i)]
    }

    /// Size of channel `c` at the input of stage `i`, in frame coordinates.
    pub fn channel_size(&self, i: usize, c: usize) -> (usize, usize) {
        let shift = self.channel_shifts[i][c];
        (
            self.frame_dimensions.xsize_upsampled.shrc(shift.0),
            self.frame_dimensions.ysize_upsampled.shrc(shift.1),
        )
    }

    /// Size of the area a full group covers in channel `c` at the input of the pipeline.
    pub fn group_input_size(&self, c: usize) -> (usize, usize) {
        let base = self.frame_dimensions.upsampling_shift;
        let dim = self.frame_dimensions.group_dim << base;
        let shift = self.channel_shifts[0][c];
        (dim >> shift.0, dim >> shift.1)
    }

    /// Area of channel `c` covered by the group, at the input of the pipeline.
    pub fn group_input_rect(&self, group_id: usize, c: usize) -> Rect {
        let (gx, gy) = self.frame_dimensions.group_position(group_id);
        let size = self.group_input_size(c);
        Rect::new((gx * size.0, gy * size.1), size).clip(self.channel_size(0, c))
    }

    pub fn init_local_states(&self) -> Result<LocalStates> {
        self.stages.iter().map(|s| s.init_local_state()).collect()
    }
}

pub(crate) fn used_channels(
    stage: &dyn RenderPipelineStage,
    num_channels: usize,
) -> impl Iterator<Item = usize> + '_ {
    (0..num_channels).filter(move |c| stage.channel_mode(*c) != RenderPipelineChannelMode::Ignored)
}

fn compute_channel_shifts(
    num_channels: usize,
    stages: &[Box<dyn RenderPipelineStage>],
) -> Vec<Vec<(usize, usize)>> {
    let mut shifts = vec![vec![(0, 0); num_channels]; stages.len() + 1];
    for stage in stages.iter() {
        let (sx, sy) = stage.settings().shift();
        for c in 0..num_channels {
            if stage.channel_mode(c) == RenderPipelineChannelMode::InOut {
                shifts[0][c].0 += sx;
                shifts[0][c].1 += sy;
            }
        }
    }
    for (i, stage) in stages.iter().enumerate() {
        let (sx, sy) = stage.settings().shift();
        for c in 0..num_channels {
            let (x, y) = shifts[i][c];
            shifts[i + 1][c] = if stage.channel_mode(c) == RenderPipelineChannelMode::InOut {
                (x - sx, y - sy)
            } else {
                (x, y)
            };
        }
    }
    shifts
}

/// Walks the stages back to front. All the channels a stage uses get the same padding, which
/// is the largest any of them needs; this way a stage can process every channel over the same
/// range.
fn compute_padding(
    num_channels: usize,
    stages: &[Box<dyn RenderPipelineStage>],
) -> (Vec<Vec<(usize, usize)>>, Vec<(usize, usize)>) {
    let mut padding = vec![vec![]; stages.len()];
    let mut output_padding = vec![(0, 0); stages.len()];
    let mut current = vec![(0usize, 0usize); num_channels];
    for (i, stage) in stages.iter().enumerate().rev() {
        let settings = stage.settings();
        let (bx, by) = settings.border();
        let (sx, sy) = settings.shift();
        let out = used_channels(stage.as_ref(), num_channels)
            .map(|c| current[c])
            .fold((0, 0), |acc, p| (acc.0.max(p.0), acc.1.max(p.1)));
        output_padding[i] = out;
        for c in used_channels(stage.as_ref(), num_channels) {
            current[c] = if stage.channel_mode(c) == RenderPipelineChannelMode::InOut {
                (out.0.shrc(sx) + bx, out.1.shrc(sy) + by)
            } else {
                out
            };
        }
        padding[i] = current.clone();
    }
    (padding, output_padding)
}
